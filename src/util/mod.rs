pub(crate) mod markup;
pub mod normalize;
pub mod query;
pub mod render_cache;
pub mod search_backend;
pub mod snippet;
pub mod sonic;
pub mod statement;
pub mod tantivy_index;
