use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Segment that separates the course code from the file name in a key.
pub const HTML_SEGMENT: &str = "HTML";

/// Identifies one indexed page: `"{year}/{term}/{course}/HTML/{file_name}"`,
/// where `year` is a part name such as `IB` and `term` a term name such as
/// `Lent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub year: String,
    pub term: String,
    pub course: String,
    pub file_name: String,
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.year, self.term, self.course, HTML_SEGMENT, self.file_name
        )
    }
}

impl FromStr for DocumentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidKey(s.to_string());
        let parts: Vec<&str> = s.split('/').collect();
        let [year, term, course, html, file_name] = parts.as_slice() else {
            return Err(invalid());
        };
        if *html != HTML_SEGMENT
            || [year, term, course, file_name]
                .iter()
                .any(|p| p.is_empty() || matches!(**p, "." | ".."))
        {
            return Err(invalid());
        }
        Ok(DocumentKey {
            year: year.to_string(),
            term: term.to_string(),
            course: course.to_string(),
            file_name: file_name.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    /// Excerpt with query terms wrapped in highlight markup.
    pub highlighted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub failures: Vec<Skipped>,
}
