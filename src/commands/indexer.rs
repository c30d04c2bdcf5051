use std::{fs, path::PathBuf, time::Instant};

use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::commands::library::{Catalog, Course};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{DocumentKey, IndexReport, Skipped};
use crate::util::normalize::index_text;
use crate::util::search_backend::SearchBackend;

/// Push every page of every course in the catalog. A course whose pages
/// cannot be listed is reported under its URL and the rest still run.
pub async fn index_all(catalog: &Catalog, backend: &dyn SearchBackend, config: &Config) -> Result<IndexReport> {
    let mut pages = Vec::new();
    let mut unlisted = Vec::new();
    for course in catalog.courses()? {
        match course_pages(&course) {
            Ok(found) => pages.extend(found),
            Err(e) => unlisted.push(Skipped {
                key: course.url(),
                reason: e.to_string(),
            }),
        }
    }
    let mut report = index_pages(pages, backend, config).await?;
    for failure in &unlisted {
        warn!(course = %failure.key, reason = %failure.reason, "course pages not listed");
    }
    report.failures.extend(unlisted);
    Ok(report)
}

/// Push the pages of the course with this code or alias.
pub async fn index_course(
    catalog: &Catalog,
    name: &str,
    backend: &dyn SearchBackend,
    config: &Config,
) -> Result<IndexReport> {
    let course = catalog
        .find_course(name)?
        .ok_or_else(|| Error::DocumentNotFound(format!("course {name}")))?;
    index_pages(course_pages(&course)?, backend, config).await
}

fn course_pages(course: &Course) -> Result<Vec<(DocumentKey, PathBuf)>> {
    Ok(course
        .pages()?
        .into_iter()
        .filter_map(|page| Some((course.key_for(&page)?, page)))
        .collect())
}

/// Read and reduce pages to index text on the rayon pool.
fn prepare(pages: Vec<(DocumentKey, PathBuf)>) -> Vec<std::result::Result<(String, String), Skipped>> {
    pages
        .into_par_iter()
        .map(|(key, path)| {
            let key = key.to_string();
            match fs::read_to_string(&path) {
                Ok(markup) => Ok((key, index_text(&markup).replace('\n', " "))),
                Err(e) => Err(Skipped {
                    key,
                    reason: e.to_string(),
                }),
            }
        })
        .collect()
}

async fn ingest(backend: &dyn SearchBackend, config: &Config, key: String, text: String) -> std::result::Result<(), Skipped> {
    let sent = async {
        backend.flush_object(&config.collection, &config.bucket, &key).await?;
        backend.push(&config.collection, &config.bucket, &key, &text).await
    };
    match sent.await {
        Ok(()) => {
            debug!(key = %key, bytes = text.len(), "indexed");
            Ok(())
        }
        Err(e) => Err(Skipped {
            key,
            reason: e.to_string(),
        }),
    }
}

pub async fn index_pages(
    pages: Vec<(DocumentKey, PathBuf)>,
    backend: &dyn SearchBackend,
    config: &Config,
) -> Result<IndexReport> {
    let t0 = Instant::now();
    let total = pages.len();
    let prepared = tokio::task::spawn_blocking(move || prepare(pages))
        .await
        .map_err(|e| Error::BackendUnavailable(format!("normalization task failed: {e}")))?;

    let mut report = IndexReport::default();
    let mut ready = Vec::with_capacity(prepared.len());
    for item in prepared {
        match item {
            Ok(doc) => ready.push(doc),
            Err(failure) => report.failures.push(failure),
        }
    }

    let outcomes: Vec<std::result::Result<(), Skipped>> = stream::iter(ready)
        .map(|(key, text)| ingest(backend, config, key, text))
        .buffer_unordered(config.index_concurrency.max(1))
        .collect()
        .await;
    for outcome in outcomes {
        match outcome {
            Ok(()) => report.indexed += 1,
            Err(failure) => report.failures.push(failure),
        }
    }

    backend
        .commit()
        .await
        .inspect_err(|e| error!(backend = backend.name(), error = %e, "commit failed"))?;
    for failure in &report.failures {
        warn!(key = %failure.key, reason = %failure.reason, "document not indexed");
    }
    info!(
        backend = backend.name(),
        total,
        indexed = report.indexed,
        failed = report.failures.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "indexing finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::library::fixtures;
    use crate::util::tantivy_index::TantivyBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn setup() -> (tempfile::TempDir, Catalog, Config) {
        let dir = tempfile::tempdir().unwrap();
        fixtures::sample_tree(dir.path());
        let catalog = Catalog::new(dir.path());
        let config = Config {
            base_folder: dir.path().to_path_buf(),
            ..Config::default()
        };
        (dir, catalog, config)
    }

    /// Records pushes and fails for keys containing `fail_on`.
    #[derive(Default)]
    struct Recording {
        fail_on: Option<&'static str>,
        pushed: Mutex<Vec<(String, String)>>,
        flushed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchBackend for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn push(&self, _c: &str, _b: &str, key: &str, text: &str) -> Result<()> {
            if self.fail_on.is_some_and(|f| key.contains(f)) {
                return Err(Error::BackendUnavailable("refused".into()));
            }
            self.pushed.lock().unwrap().push((key.to_string(), text.to_string()));
            Ok(())
        }

        async fn flush_object(&self, _c: &str, _b: &str, key: &str) -> Result<u64> {
            self.flushed.lock().unwrap().push(key.to_string());
            Ok(0)
        }

        async fn query(&self, _c: &str, _b: &str, _t: &str, _l: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_index_all_pushes_alphanumeric_text() {
        let (_dir, catalog, config) = setup();
        let backend = Recording::default();
        let report = index_all(&catalog, &backend, &config).await.unwrap();
        assert_eq!(report.indexed, 3);
        assert!(report.failures.is_empty());

        let mut pushed = backend.pushed.lock().unwrap().clone();
        pushed.sort();
        let keys: Vec<&str> = pushed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "IA/Michaelmas/VM/HTML/VM_1.html",
                "IB/Lent/GRM/HTML/GRM_1.html",
                "IB/Lent/GRM/HTML/GRM_2.html",
            ]
        );
        for (_, text) in &pushed {
            assert!(text.chars().all(|c| c.is_ascii_alphanumeric() || c == ' '), "{text:?}");
        }
        assert!(pushed[2].1.contains("A ring is a set with two operations "));
        assert_eq!(backend.flushed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let (_dir, catalog, config) = setup();
        let backend = Recording {
            fail_on: Some("GRM_1"),
            ..Recording::default()
        };
        let report = index_all(&catalog, &backend, &config).await.unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "IB/Lent/GRM/HTML/GRM_1.html");
        assert!(report.failures[0].reason.contains("refused"));
    }

    #[tokio::test]
    async fn test_course_without_title_is_still_indexed() {
        let (dir, catalog, config) = setup();
        fixtures::write(
            &dir.path().join("year2/term2/WIP/HTML_paginated/WIP_1.html"),
            "<p>Work in progress.</p>",
        );
        let backend = Recording::default();
        let report = index_all(&catalog, &backend, &config).await.unwrap();
        assert_eq!(report.indexed, 4);
        assert!(report.failures.is_empty());
        let pushed = backend.pushed.lock().unwrap();
        assert!(pushed.iter().any(|(k, _)| k == "IB/Lent/GRM/HTML/GRM_1.html"));
        assert!(pushed.iter().any(|(k, _)| k == "IB/Lent/WIP/HTML/WIP_1.html"));
    }

    #[tokio::test]
    async fn test_index_single_course() {
        let (_dir, catalog, config) = setup();
        let backend = Recording::default();
        let report = index_course(&catalog, "vm", &backend, &config).await.unwrap();
        assert_eq!(report.indexed, 1);
        let err = index_course(&catalog, "nope", &backend, &config).await.unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_reindexing_replaces_previous_text() {
        let (dir, catalog, config) = setup();
        let backend = TantivyBackend::in_memory().unwrap();
        index_all(&catalog, &backend, &config).await.unwrap();
        let hits = backend.query(&config.collection, &config.bucket, "cyclic", 10).await.unwrap();
        assert_eq!(hits, vec!["IB/Lent/GRM/HTML/GRM_1.html"]);

        fixtures::write(
            &dir.path().join("year2/term2/GRM/HTML_paginated/GRM_1.html"),
            "<html><head><title>Groups - GRM</title></head><body><p>Sylow subgroups.</p></body></html>",
        );
        index_all(&catalog, &backend, &config).await.unwrap();
        assert!(backend.query(&config.collection, &config.bucket, "cyclic", 10).await.unwrap().is_empty());
        assert_eq!(
            backend.query(&config.collection, &config.bucket, "sylow", 10).await.unwrap(),
            vec!["IB/Lent/GRM/HTML/GRM_1.html"]
        );
    }
}
