pub mod indexer;
pub mod library;
pub mod search;
