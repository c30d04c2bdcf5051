use std::{fs, num::NonZeroUsize, sync::Arc, time::Instant};

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use tracing::{error, info, warn};

use crate::commands::library::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{DocumentKey, SearchResponse, SearchResult, Skipped};
use crate::util::query::Query;
use crate::util::render_cache::RenderCache;
use crate::util::search_backend::SearchBackend;
use crate::util::snippet::Highlighter;

static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

/// Page title without its trailing ` - suffix` part.
pub fn extract_title(markup: &str) -> Option<String> {
    let inner = TITLE.captures(markup)?.get(1)?.as_str();
    let head = inner.rsplit_once('-').map_or(inner, |(head, _)| head);
    Some(head.trim().to_string())
}

/// Runs queries against the engine and turns the returned keys into
/// highlighted results. Cheap to clone.
#[derive(Clone)]
pub struct SearchService {
    catalog: Arc<Catalog>,
    backend: Arc<dyn SearchBackend>,
    cache: Arc<RenderCache>,
    config: Arc<Config>,
}

impl SearchService {
    pub fn new(config: Config, backend: Arc<dyn SearchBackend>) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| Error::Config("cache_capacity must be at least 1".into()))?;
        Ok(Self {
            catalog: Arc::new(Catalog::new(&config.base_folder)),
            backend,
            cache: Arc::new(RenderCache::new(capacity)),
            config: Arc::new(config),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn backend(&self) -> &dyn SearchBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn highlighter(&self, query: &Query) -> Highlighter {
        let h = &self.config.highlight;
        Highlighter::new(query)
            .with_markup(&h.tag, &h.css_class)
            .with_max_length(h.max_length)
            .with_pad(h.pad())
    }

    pub async fn search(&self, raw: &str) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let query = Query::parse(raw);
        if query.is_empty() {
            return Ok(SearchResponse {
                query: raw.to_string(),
                ..SearchResponse::default()
            });
        }

        let keys = self
            .backend
            .query(&self.config.collection, &self.config.bucket, raw.trim(), self.config.query_limit)
            .await
            .inspect_err(|e| error!(backend = self.backend.name(), error = %e, "search query failed"))?;
        let candidates = keys.len();

        let service = self.clone();
        let raw_owned = raw.to_string();
        let response = tokio::task::spawn_blocking(move || service.render_candidates(&raw_owned, &query, &keys))
            .await
            .map_err(|e| Error::BackendUnavailable(format!("render task failed: {e}")))?;

        for skipped in &response.skipped {
            warn!(key = %skipped.key, reason = %skipped.reason, "skipped search candidate");
        }
        info!(
            q = raw,
            candidates,
            n = response.results.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "search"
        );
        Ok(response)
    }

    /// Build results for engine keys in parallel, keeping engine order.
    pub fn render_candidates(&self, raw: &str, query: &Query, keys: &[String]) -> SearchResponse {
        let highlighter = self.highlighter(query);
        let rendered: Vec<std::result::Result<SearchResult, Skipped>> = keys
            .par_iter()
            .map(|key| {
                self.render_one(key, &highlighter).map_err(|e| Skipped {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            })
            .collect();

        let mut response = SearchResponse {
            query: raw.to_string(),
            ..SearchResponse::default()
        };
        for item in rendered {
            match item {
                Ok(result) => response.results.push(result),
                Err(skipped) => response.skipped.push(skipped),
            }
        }
        response
    }

    fn render_one(&self, raw_key: &str, highlighter: &Highlighter) -> Result<SearchResult> {
        let key: DocumentKey = raw_key.parse()?;
        let path = self.catalog.resolve(&key)?;
        let markup = fs::read_to_string(&path)?;
        let title = extract_title(&markup).ok_or_else(|| Error::MalformedDocument {
            key: raw_key.to_string(),
            reason: "no <title> element".into(),
        })?;
        let display = self.cache.get_or_render(&markup, &key.course);
        let flat = display.replace('\n', " ");
        Ok(SearchResult {
            title,
            href: format!("/notes/{key}"),
            highlighted: highlighter.highlight(&flat),
        })
    }
}
