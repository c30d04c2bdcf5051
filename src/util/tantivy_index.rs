use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tantivy::{
    collector::{Count, TopDocs},
    directory::MmapDirectory,
    doc,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{Field, IndexRecordOption, Schema, SchemaBuilder, TextFieldIndexing, TextOptions, Value, STORED, STRING},
    Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, TantivyError, Term,
};
use tracing::{debug, info};

use super::search_backend::SearchBackend;
use crate::error::{Error, Result};

const WRITER_HEAP: usize = 64 * 1024 * 1024;

#[derive(Clone, Copy)]
pub struct IndexFields {
    /// `collection:bucket:key`, the unit of deletion
    pub uid: Field,
    pub key: Field,
    pub collection: Field,
    pub bucket: Field,
    pub body: Field,
}

fn schema() -> (Schema, IndexFields) {
    let mut sb = SchemaBuilder::default();
    let text_indexing = TextFieldIndexing::default()
        .set_tokenizer("default")
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text_opts = TextOptions::default().set_indexing_options(text_indexing);
    let uid = sb.add_text_field("uid", STRING);
    let key = sb.add_text_field("key", STRING | STORED);
    let collection = sb.add_text_field("collection", STRING);
    let bucket = sb.add_text_field("bucket", STRING);
    let body = sb.add_text_field("body", text_opts);
    let schema = sb.build();
    (schema, IndexFields { uid, key, collection, bucket, body })
}

fn uid(collection: &str, bucket: &str, key: &str) -> String {
    format!("{collection}:{bucket}:{key}")
}

struct Inner {
    index: Index,
    fields: IndexFields,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl Inner {
    fn writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| Error::BackendUnavailable("index writer lock poisoned".into()))
    }

    fn commit(&self) -> Result<()> {
        let opstamp = self.writer()?.commit()?;
        self.reader.reload()?;
        debug!(opstamp, "tantivy commit");
        Ok(())
    }
}

/// Embedded search engine for single-host use. Pushes are buffered in the
/// writer and become searchable after [`SearchBackend::commit`].
#[derive(Clone)]
pub struct TantivyBackend {
    inner: Arc<Inner>,
}

impl TantivyBackend {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (sch, _) = schema();
        let directory = MmapDirectory::open(dir).map_err(TantivyError::from)?;
        let index = Index::open_or_create(directory, sch)?;
        info!(dir = %dir.display(), "opened tantivy index");
        Self::from_index(index)
    }

    pub fn in_memory() -> Result<Self> {
        let (sch, _) = schema();
        Self::from_index(Index::create_in_ram(sch))
    }

    fn from_index(index: Index) -> Result<Self> {
        let (_, fields) = schema();
        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            inner: Arc::new(Inner {
                index,
                fields,
                writer: Mutex::new(writer),
                reader,
            }),
        })
    }

    fn namespace_query(&self, collection: &str, bucket: &str, inner: Box<dyn Query>) -> BooleanQuery {
        let f = self.inner.fields;
        let exact = |field: Field, value: &str| -> Box<dyn Query> {
            Box::new(TermQuery::new(
                Term::from_field_text(field, value),
                IndexRecordOption::Basic,
            ))
        };
        BooleanQuery::new(vec![
            (Occur::Must, inner),
            (Occur::Must, exact(f.collection, collection)),
            (Occur::Must, exact(f.bucket, bucket)),
        ])
    }
}

#[async_trait]
impl SearchBackend for TantivyBackend {
    fn name(&self) -> &str {
        "tantivy"
    }

    async fn push(&self, collection: &str, bucket: &str, key: &str, text: &str) -> Result<()> {
        let f = self.inner.fields;
        self.inner.writer()?.add_document(doc!(
            f.uid => uid(collection, bucket, key),
            f.key => key.to_string(),
            f.collection => collection.to_string(),
            f.bucket => bucket.to_string(),
            f.body => text.to_string(),
        ))?;
        Ok(())
    }

    /// Counts only committed entries.
    async fn flush_object(&self, collection: &str, bucket: &str, key: &str) -> Result<u64> {
        let term = Term::from_field_text(self.inner.fields.uid, &uid(collection, bucket, key));
        let searcher = self.inner.reader.searcher();
        let existing = searcher.search(&TermQuery::new(term.clone(), IndexRecordOption::Basic), &Count)?;
        self.inner.writer()?.delete_term(term);
        Ok(existing as u64)
    }

    async fn query(
        &self,
        collection: &str,
        bucket: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        if limit == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let f = self.inner.fields;
        let mut parser = QueryParser::for_index(&self.inner.index, vec![f.body]);
        parser.set_conjunction_by_default();
        let (parsed, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            debug!(?errors, "query parsed leniently");
        }
        let query = self.namespace_query(collection, bucket, parsed);

        let searcher = self.inner.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;
        let mut keys: Vec<String> = Vec::with_capacity(top_docs.len());
        for (_score, addr) in top_docs {
            let document: TantivyDocument = searcher.doc::<TantivyDocument>(addr)?;
            if let Some(key) = document.get_first(f.key).and_then(|v| v.as_str()) {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn commit(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.commit())
            .await
            .map_err(|e| Error::BackendUnavailable(format!("commit task failed: {e}")))?
    }
}
