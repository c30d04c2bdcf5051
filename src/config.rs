use std::{fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::snippet::{ContextPad, DEFAULT_CSS_CLASS, DEFAULT_MAX_LENGTH, DEFAULT_TAG};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SonicConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Longest wait for a connection or a reply line.
    pub timeout_ms: u64,
}

impl Default for SonicConfig {
    fn default() -> Self {
        Self {
            host: "search".into(),
            port: 1491,
            password: "SecretPassword".into(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TantivyConfig {
    pub index_dir: PathBuf,
}

impl Default for TantivyConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("index"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineConfig {
    Sonic(SonicConfig),
    Tantivy(TantivyConfig),
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Sonic(SonicConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub tag: String,
    pub css_class: String,
    pub max_length: usize,
    pub pad_before: usize,
    pub pad_after: usize,
}

impl HighlightConfig {
    pub fn pad(&self) -> ContextPad {
        ContextPad {
            before: self.pad_before,
            after: self.pad_after,
        }
    }
}

impl Default for HighlightConfig {
    fn default() -> Self {
        let pad = ContextPad::default();
        Self {
            tag: DEFAULT_TAG.into(),
            css_class: DEFAULT_CSS_CLASS.into(),
            max_length: DEFAULT_MAX_LENGTH,
            pad_before: pad.before,
            pad_after: pad.after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the `year*/term*/COURSE` tree.
    pub base_folder: PathBuf,
    pub engine: EngineConfig,
    pub collection: String,
    pub bucket: String,
    pub highlight: HighlightConfig,
    pub index_concurrency: usize,
    pub cache_capacity: usize,
    pub query_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_folder: PathBuf::from("."),
            engine: EngineConfig::default(),
            collection: "html_notes".into(),
            bucket: "default".into(),
            highlight: HighlightConfig::default(),
            index_concurrency: 4,
            cache_capacity: 256,
            query_limit: 20,
        }
    }
}

impl Config {
    /// Read `path` if given (defaults otherwise), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let bytes = fs::read(p)?;
                serde_json::from_slice(&bytes)?
            }
            None => Config::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `BASE_FOLDER` always applies; the `SONIC_*` variables apply when the
    /// engine is Sonic.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(base) = var("BASE_FOLDER") {
            self.base_folder = PathBuf::from(base);
        }
        if let EngineConfig::Sonic(sonic) = &mut self.engine {
            if let Some(host) = var("SONIC_HOST") {
                sonic.host = host;
            }
            if let Some(port) = var("SONIC_PORT") {
                sonic.port = port
                    .parse()
                    .map_err(|_| Error::Config(format!("SONIC_PORT is not a port number: {port:?}")))?;
            }
            if let Some(password) = var("SONIC_PASSWORD") {
                sonic.password = password;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_concurrency == 0 {
            return Err(Error::Config("index_concurrency must be at least 1".into()));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be at least 1".into()));
        }
        if self.highlight.tag.trim().is_empty() {
            return Err(Error::Config("highlight.tag must not be empty".into()));
        }
        if matches!(&self.engine, EngineConfig::Sonic(sonic) if sonic.timeout_ms == 0) {
            return Err(Error::Config("sonic timeout_ms must be at least 1".into()));
        }
        if self.collection.contains(char::is_whitespace) || self.bucket.contains(char::is_whitespace) {
            return Err(Error::Config("collection and bucket must be single words".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.collection, "html_notes");
        assert_eq!(config.bucket, "default");
        assert_eq!(config.highlight.max_length, 500);
        assert_eq!(config.highlight.pad(), ContextPad { before: 30, after: 35 });
        assert_eq!(config.engine, EngineConfig::Sonic(SonicConfig::default()));
        if let EngineConfig::Sonic(sonic) = &config.engine {
            assert_eq!(sonic.timeout_ms, 10_000);
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"engine": {"kind": "tantivy", "index_dir": "/tmp/idx"}, "highlight": {"tag": "mark"}}"#,
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(
            config.engine,
            EngineConfig::Tantivy(TantivyConfig { index_dir: "/tmp/idx".into() })
        );
        assert_eq!(config.highlight.tag, "mark");
        assert_eq!(config.highlight.css_class, "fw-bold");
        assert_eq!(config.query_limit, 20);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("BASE_FOLDER", "/srv/notes"),
                ("SONIC_HOST", "localhost"),
                ("SONIC_PORT", "1500"),
            ]))
            .unwrap();
        assert_eq!(config.base_folder, PathBuf::from("/srv/notes"));
        let EngineConfig::Sonic(sonic) = &config.engine else { panic!("engine changed") };
        assert_eq!(sonic.host, "localhost");
        assert_eq!(sonic.port, 1500);
        assert_eq!(sonic.password, "SecretPassword");
    }

    #[test]
    fn test_bad_port_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("SONIC_PORT", "high")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.index_concurrency = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.highlight.tag = " ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine = EngineConfig::Sonic(SonicConfig {
            timeout_ms: 0,
            ..SonicConfig::default()
        });
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
