//! Normalization, indexing and highlighted search for an archive of HTML
//! lecture notes.

pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod util;

pub use commands::library::{Catalog, Course};
pub use commands::search::SearchService;
pub use config::{Config, EngineConfig};
pub use error::{Error, Result};
pub use models::{DocumentKey, IndexReport, SearchResponse, SearchResult, Skipped};
pub use util::normalize::{index_text, normalize};
pub use util::query::Query;
pub use util::search_backend::SearchBackend;
pub use util::snippet::{build_windows, locate, ContextPad, Highlighter, Window};
