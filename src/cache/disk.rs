//! Cache storage persisted to the filesystem
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<hex(bucket name)>/bucket.json     name + creation time
//! <root>/<hex(bucket name)>/<sha256>.entry  JSON header line, then raw body
//! ```
//!
//! Bucket names longer than 100 bytes use `h-<sha256(name)>` as the directory
//! name instead of the hex encoding; the marker still holds the real name.
//!
//! Entries are written to a temporary file and renamed into place, so a
//! reader sees either the previous entry or the new one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, warn};

use super::storage::{CacheError, CacheStorage};
use crate::http::{RequestKey, Response, StoredResponse};

const MARKER_FILE: &str = "bucket.json";
const ENTRY_EXT: &str = "entry";

/// Longest bucket name stored as plain hex; longer names are hashed so the
/// directory name stays under common filesystem limits
const MAX_HEX_NAME_BYTES: usize = 100;

/// Sequence for unique temp-file names within this process
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Marker identifying a bucket directory
#[derive(Debug, Serialize, Deserialize)]
struct BucketMarker {
    name: String,
    created_at: DateTime<Utc>,
}

/// Header line of an entry file; the body follows it
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: RequestKey,
    response: StoredResponse,
}

/// Stores cache buckets as directories on disk
///
/// The default location is XDG-compliant (`~/.cache/shellcache/` on Linux).
#[derive(Debug, Clone)]
pub struct DiskStorage {
    /// Directory holding one subdirectory per bucket
    root: PathBuf,
}

impl DiskStorage {
    /// Creates storage in the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "shellcache")?;
        Some(Self::with_dir(project_dirs.cache_dir().join("buckets")))
    }

    /// Creates storage rooted at a custom directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        if name.len() <= MAX_HEX_NAME_BYTES {
            self.root.join(hex::encode(name.as_bytes()))
        } else {
            let digest = Sha256::digest(name.as_bytes());
            self.root.join(format!("h-{}", hex::encode(digest)))
        }
    }

    fn entry_path(&self, name: &str, key: &RequestKey) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.method.as_bytes());
        hasher.update(b" ");
        hasher.update(key.url.as_bytes());
        let file = format!("{}.{}", hex::encode(hasher.finalize()), ENTRY_EXT);
        self.bucket_dir(name).join(file)
    }

    /// Writes `contents` to a temporary file beside `path`
    async fn stage(path: &Path, contents: &[u8]) -> Result<PathBuf, CacheError> {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), seq));

        if let Err(e) = fs::write(&tmp, contents).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(CacheError::io(format!("writing {}", tmp.display()), e));
        }
        Ok(tmp)
    }

    /// Writes `contents` beside `path` and renames it into place
    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
        let tmp = Self::stage(path, contents).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(CacheError::io(format!("renaming into {}", path.display()), e));
        }
        Ok(())
    }

    /// Serializes an entry file: JSON header line, then the raw body
    fn encode_entry(key: RequestKey, mut response: StoredResponse) -> Result<Vec<u8>, CacheError> {
        let body = std::mem::take(&mut response.body);
        let header = EntryHeader { key, response };
        let mut contents = serde_json::to_vec(&header)
            .map_err(|_| CacheError::Corrupt(format!("entry for {}", header.key)))?;
        contents.push(b'\n');
        contents.extend_from_slice(&body);
        Ok(contents)
    }

    async fn read_marker(dir: &Path) -> Result<Option<BucketMarker>, CacheError> {
        let path = dir.join(MARKER_FILE);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| CacheError::Corrupt(path.display().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn read_entry(path: &Path) -> Result<Option<(EntryHeader, Vec<u8>)>, CacheError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(format!("reading {}", path.display()), e)),
        };

        let corrupt = || CacheError::Corrupt(path.display().to_string());
        let split = bytes.iter().position(|&b| b == b'\n').ok_or_else(corrupt)?;
        let header: EntryHeader = serde_json::from_slice(&bytes[..split]).map_err(|_| corrupt())?;
        let body = bytes[split + 1..].to_vec();
        Ok(Some((header, body)))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let dir = self.bucket_dir(name);
        if Self::read_marker(&dir).await?.is_some() {
            return Ok(());
        }

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(format!("creating {}", dir.display()), e))?;
        let marker = BucketMarker {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&marker)
            .map_err(|_| CacheError::Corrupt(format!("marker for bucket {}", name)))?;
        Self::write_atomic(&dir.join(MARKER_FILE), &json).await?;
        debug!(bucket = name, dir = %dir.display(), "created cache bucket");
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(Self::read_marker(&self.bucket_dir(name)).await?.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut dirs = match fs::read_dir(&self.root).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(format!("listing {}", self.root.display()), e)),
        };

        let mut markers = Vec::new();
        while let Some(dir) = dirs
            .next_entry()
            .await
            .map_err(|e| CacheError::io(format!("listing {}", self.root.display()), e))?
        {
            match Self::read_marker(&dir.path()).await {
                Ok(Some(marker)) => markers.push(marker),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping unreadable cache bucket"),
            }
        }

        markers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(markers.into_iter().map(|m| m.name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.bucket_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(format!("deleting {}", dir.display()), e)),
        }
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), CacheError> {
        self.open(name).await?;

        let path = self.entry_path(name, &key);
        let contents = Self::encode_entry(key, response)?;
        Self::write_atomic(&path, &contents).await
    }

    /// Stages every entry before renaming any into place. A failure while
    /// staging writes nothing; a failure while renaming removes the entries
    /// this batch already committed.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), CacheError> {
        self.open(name).await?;

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(entries.len());
        for (key, response) in entries {
            let path = self.entry_path(name, &key);
            let written = match Self::encode_entry(key, response) {
                Ok(contents) => Self::stage(&path, &contents).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(tmp) => staged.push((tmp, path)),
                Err(e) => {
                    for (tmp, _) in &staged {
                        let _ = fs::remove_file(tmp).await;
                    }
                    return Err(e);
                }
            }
        }

        for (index, (tmp, path)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(tmp, path).await {
                warn!(bucket = name, path = %path.display(), "rolling back cache batch");
                for (_, committed) in &staged[..index] {
                    let _ = fs::remove_file(committed).await;
                }
                for (pending, _) in &staged[index..] {
                    let _ = fs::remove_file(pending).await;
                }
                return Err(CacheError::io(format!("renaming into {}", path.display()), e));
            }
        }
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<Response>, CacheError> {
        let path = self.entry_path(name, key);
        Ok(Self::read_entry(&path).await?.and_then(|(header, body)| {
            (header.key == *key).then(|| {
                let mut stored = header.response;
                stored.body = body;
                stored.to_response()
            })
        }))
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let dir = self.bucket_dir(name);
        let mut files = match fs::read_dir(&dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(format!("listing {}", dir.display()), e)),
        };

        let mut keys = Vec::new();
        while let Some(file) = files
            .next_entry()
            .await
            .map_err(|e| CacheError::io(format!("listing {}", dir.display()), e))?
        {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some((header, _)) = Self::read_entry(&path).await? {
                keys.push(header.key);
            }
        }

        keys.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        Ok(keys)
    }
}
