use async_trait::async_trait;

use crate::error::Result;

/// A full-text engine that stores index text per object key and answers
/// queries with keys in rank order. Objects live in a `collection`/`bucket`
/// namespace.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, collection: &str, bucket: &str, key: &str, text: &str) -> Result<()>;

    /// Remove everything indexed for `key`. Returns how many entries went away.
    async fn flush_object(&self, collection: &str, bucket: &str, key: &str) -> Result<u64>;

    async fn query(
        &self,
        collection: &str,
        bucket: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Make pushed documents visible to queries. Engines that apply pushes
    /// immediately keep the default.
    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    /// End open sessions politely. The backend stays usable and reconnects
    /// on the next call.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
