use std::{fs, io, path::{Path, PathBuf}};

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::DocumentKey;

const TITLE_FILE: &str = "title.txt";
const ALIASES_FILE: &str = "aliases.txt";
/// Per-course directory holding the pages that get indexed.
pub const PAGES_DIR: &str = "HTML_paginated";

/// Directory name for a part name, e.g. `IB` -> `year2`.
pub fn part_to_year_dir(part: &str) -> Option<&'static str> {
    match part {
        "IA" => Some("year1"),
        "IB" => Some("year2"),
        "II" => Some("year3"),
        "III" => Some("year4"),
        _ => None,
    }
}

/// Directory name for a term name, e.g. `Lent` -> `term2`.
pub fn term_to_dir(term: &str) -> Option<&'static str> {
    match term {
        "Michaelmas" => Some("term1"),
        "Lent" => Some("term2"),
        "Easter" => Some("term3"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Course {
    pub code: String,
    pub name: String,
    pub part: String,
    pub term: String,
    /// Lowercase lookup names, the course code included.
    pub aliases: Vec<String>,
    #[serde(skip)]
    pub path: PathBuf,
}

impl Course {
    pub fn url(&self) -> String {
        format!("/notes/{}/{}/{}", self.part, self.term, self.code)
    }

    pub fn html_url(&self) -> String {
        format!("{}/{}.html", self.url(), self.code)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.path.join(PAGES_DIR)
    }

    /// Index pages in file-name order; empty when the course has none.
    pub fn pages(&self) -> Result<Vec<PathBuf>> {
        let dir = self.pages_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut pages: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| at(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "html"))
            .collect();
        pages.sort();
        Ok(pages)
    }

    pub fn key_for(&self, page: &Path) -> Option<DocumentKey> {
        let file_name = page.file_name()?.to_str()?.to_string();
        Some(DocumentKey {
            year: self.part.clone(),
            term: self.term.clone(),
            course: self.code.clone(),
            file_name,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.aliases.iter().any(|a| *a == name)
    }
}

fn at(path: &Path, source: io::Error) -> Error {
    Error::Path {
        path: path.to_path_buf(),
        source,
    }
}

/// Contents of an optional text file, `None` when it does not exist.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(at(path, e)),
    }
}

fn read_title(dir: &Path) -> Result<Option<String>> {
    Ok(read_optional(&dir.join(TITLE_FILE))?.map(|t| t.trim().to_string()))
}

fn sorted_subdirs(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| at(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// The `year*/term*/COURSE` tree under the base folder.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every course, ordered by year, term and course directory name. Years
    /// and terms without a `title.txt` cannot be keyed and are left out.
    pub fn courses(&self) -> Result<Vec<Course>> {
        let mut courses = Vec::new();
        for year_dir in sorted_subdirs(&self.root, "year")? {
            let Some(part) = read_title(&year_dir)? else {
                warn!(dir = %year_dir.display(), "skipping year without title.txt");
                continue;
            };
            for term_dir in sorted_subdirs(&year_dir, "term")? {
                let Some(term) = read_title(&term_dir)? else {
                    warn!(dir = %term_dir.display(), "skipping term without title.txt");
                    continue;
                };
                for course_dir in sorted_subdirs(&term_dir, "")? {
                    courses.push(load_course(&course_dir, &part, &term)?);
                }
            }
        }
        Ok(courses)
    }

    pub fn find_course(&self, name: &str) -> Result<Option<Course>> {
        Ok(self.courses()?.into_iter().find(|c| c.matches(name)))
    }

    /// File on disk behind a document key.
    pub fn resolve(&self, key: &DocumentKey) -> Result<PathBuf> {
        let not_found = || Error::DocumentNotFound(key.to_string());
        let year = part_to_year_dir(&key.year).ok_or_else(not_found)?;
        let term = term_to_dir(&key.term).ok_or_else(not_found)?;
        let path = self
            .root
            .join(year)
            .join(term)
            .join(&key.course)
            .join(PAGES_DIR)
            .join(&key.file_name);
        if !path.is_file() {
            return Err(not_found());
        }
        Ok(path)
    }
}

fn load_course(dir: &Path, part: &str, term: &str) -> Result<Course> {
    let code = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let name = match read_title(dir)? {
        Some(name) => name,
        None => {
            warn!(course = %code, "no title.txt, naming the course after its directory");
            code.clone()
        }
    };
    let mut aliases: Vec<String> = read_optional(&dir.join(ALIASES_FILE))?
        .map(|text| {
            text.lines()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default();
    aliases.push(code.to_lowercase());
    aliases.sort();
    aliases.dedup();
    Ok(Course {
        code,
        name,
        part: part.to_string(),
        term: term.to_string(),
        aliases,
        path: dir.to_path_buf(),
    })
}
