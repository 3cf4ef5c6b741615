//! Cache configuration: version name, scope and asset manifest
//!
//! The manager takes all of this explicitly so that several independently
//! versioned instances can coexist. `CacheConfig::default()` reproduces the
//! app shell the cache was first written for.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Version name of the current cache bucket; bump it whenever assets change
pub const DEFAULT_CACHE_NAME: &str = "field-data-capture-v2";

/// Origin and path the app is served from when nothing else is configured
pub const DEFAULT_SCOPE: &str = "http://localhost:8080/";

/// App shell assets pre-cached on install
pub const DEFAULT_ASSETS: &[&str] = &[
    "./",
    "index.html",
    "manifest.json",
    "https://cdn.sheetjs.com/xlsx-0.19.3/package/dist/xlsx.full.min.js",
    "icons/icon-192x192.png",
    "icons/icon-512x512.png",
    "icons/icon-maskable-192x192.png",
    "icons/icon-maskable-512x512.png",
];

/// Errors raised while loading or resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// The scope is not an absolute URL
    #[error("Invalid scope URL '{0}': {1}")]
    InvalidScope(String, url::ParseError),

    /// A manifest entry does not resolve against the scope
    #[error("Invalid asset URL '{0}': {1}")]
    InvalidAsset(String, url::ParseError),

    /// Two manifest entries resolve to the same URL
    #[error("Duplicate asset in manifest: {0}")]
    DuplicateAsset(String),

    /// The cache name is empty
    #[error("Cache name must not be empty")]
    EmptyCacheName,
}

/// Explicit configuration for one asset cache manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Name of the current cache bucket
    pub cache_name: String,
    /// Base URL that relative assets resolve against; also the origin
    /// that decides whether a response is same-origin
    pub scope: Url,
    /// Ordered asset manifest, absolute or relative to `scope`
    pub assets: Vec<String>,
}

/// On-disk form of the configuration; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub cache_name: Option<String>,
    pub scope: Option<String>,
    pub assets: Option<Vec<String>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            scope: Url::parse(DEFAULT_SCOPE).expect("DEFAULT_SCOPE is an absolute URL"),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CacheConfig {
    /// Creates a configuration from its parts
    pub fn new(
        cache_name: impl Into<String>,
        scope: &str,
        assets: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            cache_name: cache_name.into(),
            scope: parse_scope(scope)?,
            assets: assets.into_iter().map(Into::into).collect(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML config file, filling unspecified fields from the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        Self::default().merge(file)
    }

    /// Applies the fields present in `file` on top of `self`
    pub fn merge(mut self, file: ConfigFile) -> Result<Self, ConfigError> {
        if let Some(name) = file.cache_name {
            self.cache_name = name;
        }
        if let Some(scope) = file.scope {
            self.scope = parse_scope(&scope)?;
        }
        if let Some(assets) = file.assets {
            self.assets = assets;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks the name and that the manifest resolves without duplicates
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_name.trim().is_empty() {
            return Err(ConfigError::EmptyCacheName);
        }
        self.resolve_assets().map(|_| ())
    }

    /// Resolves every manifest entry against the scope, preserving order
    pub fn resolve_assets(&self) -> Result<Vec<Url>, ConfigError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.assets.len());

        for asset in &self.assets {
            let mut url = self
                .scope
                .join(asset)
                .map_err(|e| ConfigError::InvalidAsset(asset.clone(), e))?;
            url.set_fragment(None);
            if !seen.insert(url.clone()) {
                return Err(ConfigError::DuplicateAsset(url.into()));
            }
            resolved.push(url);
        }

        Ok(resolved)
    }
}

fn parse_scope(scope: &str) -> Result<Url, ConfigError> {
    Url::parse(scope).map_err(|e| ConfigError::InvalidScope(scope.to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_matches_app_shell() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_name, "field-data-capture-v2");
        assert_eq!(config.assets.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_assets_against_scope() {
        let config =
            CacheConfig::new("v1", "https://app.test/field/", ["./", "index.html"]).unwrap();
        let urls = config.resolve_assets().unwrap();

        assert_eq!(urls[0].as_str(), "https://app.test/field/");
        assert_eq!(urls[1].as_str(), "https://app.test/field/index.html");
    }

    #[test]
    fn test_absolute_assets_are_kept() {
        let config = CacheConfig::default();
        let urls = config.resolve_assets().unwrap();

        assert!(urls
            .iter()
            .any(|u| u.host_str() == Some("cdn.sheetjs.com")));
    }

    #[test]
    fn test_duplicate_assets_rejected() {
        let result = CacheConfig::new(
            "v1",
            "https://app.test/",
            ["index.html", "./index.html"],
        );

        assert!(matches!(result, Err(ConfigError::DuplicateAsset(_))));
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let result = CacheConfig::new("v1", "not a url", ["index.html"]);
        assert!(matches!(result, Err(ConfigError::InvalidScope(..))));
    }

    #[test]
    fn test_empty_cache_name_rejected() {
        let result = CacheConfig::new("  ", "https://app.test/", ["index.html"]);
        assert!(matches!(result, Err(ConfigError::EmptyCacheName)));
    }

    #[test]
    fn test_load_merges_over_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "cache_name = \"field-data-capture-v3\"\nscope = \"https://field.example/\""
        )
        .unwrap();

        let config = CacheConfig::load(file.path()).unwrap();

        assert_eq!(config.cache_name, "field-data-capture-v3");
        assert_eq!(config.scope.as_str(), "https://field.example/");
        assert_eq!(config.assets.len(), DEFAULT_ASSETS.len());
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_entries = 10").unwrap();

        let result = CacheConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let result = CacheConfig::load(Path::new("/nonexistent/shellcache.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
