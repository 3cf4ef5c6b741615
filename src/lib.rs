//! shellcache library
//!
//! A cache-first asset cache driven by install / activate / fetch lifecycle
//! events. The `shellcache` binary is a thin host around this library; the
//! modules are public so other hosts and the integration tests can drive the
//! lifecycle directly.

pub mod cache;
pub mod cli;
pub mod clients;
pub mod config;
pub mod http;
pub mod network;
pub mod worker;

pub use cache::{CacheError, CacheStorage, DiskStorage, MemoryStorage};
pub use config::CacheConfig;
pub use http::{Request, RequestMode, Response, ResponseType};
pub use network::{HttpNetwork, Network, NetworkError};
pub use worker::{AssetCacheManager, CacheEvent, FetchOutcome, LifecycleHandler, WorkerError};
