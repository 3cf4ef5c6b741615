//! Command-line interface parsing for shellcache
//!
//! The binary acts as the host runtime: each subcommand dispatches one
//! lifecycle event to the asset cache manager.

use clap::{ArgAction, Args, Parser, Subcommand};
use reqwest::Method;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::config::{CacheConfig, ConfigError, ConfigFile};
use crate::http::{Request, RequestMode};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// The request mode is not recognized
    #[error("Invalid mode: '{0}'. Valid modes: navigate, same-origin, no-cors, cors")]
    InvalidMode(String),

    /// The HTTP method is not a valid token
    #[error("Invalid method: '{0}'")]
    InvalidMethod(String),

    /// The URL does not resolve against the scope
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, url::ParseError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No cache directory given and none could be determined
    #[error("Could not determine a cache directory; pass --cache-dir")]
    NoCacheDir,
}

/// shellcache - offline app-shell cache
#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Pre-cache a versioned app shell and serve cache-first fetches")]
#[command(version)]
pub struct Cli {
    /// TOML config file with cache_name, scope and assets
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name of the current cache version (overrides the config file)
    #[arg(long, global = true, value_name = "NAME")]
    pub cache_name: Option<String>,

    /// Scope URL the app is served from (overrides the config file)
    #[arg(long, global = true, value_name = "URL")]
    pub scope: Option<String>,

    /// Directory holding cache buckets (defaults to the XDG cache directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the current cache and pre-cache every manifest asset
    Install,
    /// Delete caches from other versions and claim clients
    Activate,
    /// Dispatch a fetch through the cache
    ///
    /// Examples:
    ///   shellcache fetch index.html
    ///   shellcache fetch https://images.example/logo.png --mode no-cors
    Fetch(FetchArgs),
    /// List cache buckets and their entry counts
    List,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Absolute URL, or a path relative to the scope
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request mode: navigate, same-origin, no-cors, cors
    #[arg(long, default_value = "no-cors")]
    pub mode: String,

    /// Write the response body to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Parses a request mode argument
pub fn parse_mode_arg(s: &str) -> Result<RequestMode, CliError> {
    RequestMode::from_str(s).ok_or_else(|| CliError::InvalidMode(s.to_string()))
}

/// Parses an HTTP method argument, case-insensitively
pub fn parse_method_arg(s: &str) -> Result<Method, CliError> {
    Method::from_bytes(s.to_uppercase().as_bytes())
        .map_err(|_| CliError::InvalidMethod(s.to_string()))
}

impl FetchArgs {
    /// Builds the request to dispatch, resolving the URL against `scope`
    pub fn to_request(&self, scope: &Url) -> Result<Request, CliError> {
        let url = scope
            .join(&self.url)
            .map_err(|e| CliError::InvalidUrl(self.url.clone(), e))?;
        Ok(Request::new(
            parse_method_arg(&self.method)?,
            url,
            parse_mode_arg(&self.mode)?,
        ))
    }
}

impl Cli {
    /// Builds the cache configuration: defaults, then the config file, then flags
    pub fn load_config(&self) -> Result<CacheConfig, CliError> {
        let config = match &self.config {
            Some(path) => CacheConfig::load(path)?,
            None => CacheConfig::default(),
        };
        let overrides = ConfigFile {
            cache_name: self.cache_name.clone(),
            scope: self.scope.clone(),
            assets: None,
        };
        Ok(config.merge(overrides)?)
    }

    /// Log filter for the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "shellcache=warn",
            1 => "shellcache=info",
            _ => "shellcache=debug",
        }
    }
}
