//! Local filesystem backend.
//!
//! Layout: `<base_dir>/<namespace>/<sanitized>.json` for values and
//! `.jsonl` for transcripts, with `<file>.lock` alongside for the
//! cooperative update lock.
//!
//! Writes are atomic: serialize to a dot-prefixed sibling temp file,
//! `chmod 0600`, then rename over the target (`rename` replaces the
//! destination on both Unix and Windows). Appends go through `O_APPEND`,
//! which is atomic per line up to `PIPE_BUF` on POSIX.
//!
//! Reads are served from a per-instance value cache whose entries stay
//! valid only while the TTL is live and the on-disk mtime is unchanged,
//! so cross-process writes are observed within one read.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::backend::{
    empty_line_stream, line_stream_from, BackendKind, HealthStatus, LineStream, Namespace,
    StorageBackend, Updater, HEALTH_PROBE_TIMEOUT,
};
use crate::cache::ValueCache;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::keys::sanitize_key;

/// Cooperative lock tuning. The defaults match the documented protocol:
/// poll every 100 ms, evict locks older than 30 s, give up after 10 s.
#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    /// Interval between acquisition attempts.
    pub poll_interval: Duration,
    /// Age past which a leftover lock is considered abandoned.
    pub stale_after: Duration,
    /// Total acquisition budget before `LockTimeout`.
    pub timeout: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Filesystem-backed key-value and append-log storage.
pub struct FileBackend {
    base_dir: PathBuf,
    cache: ValueCache,
    lock_settings: LockSettings,
}

impl FileBackend {
    /// Creates a backend rooted at the configured base directory.
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_dir: config.resolved_base_dir(),
            cache: ValueCache::new(config.cache_enabled, config.cache_ttl_ms),
            lock_settings: LockSettings::default(),
        }
    }

    /// Overrides the lock protocol timings (tests and embedders with
    /// unusual latency profiles).
    pub fn with_lock_settings(mut self, settings: LockSettings) -> Self {
        self.lock_settings = settings;
        self
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.base_dir.join(ns.as_str())
    }

    fn entry_path(&self, ns: Namespace, sanitized: &str) -> PathBuf {
        let extension = match ns {
            Namespace::Transcripts => "jsonl",
            _ => "json",
        };
        self.namespace_dir(ns)
            .join(format!("{sanitized}.{extension}"))
    }

    fn cache_key(ns: Namespace, sanitized: &str) -> String {
        format!("{ns}/{sanitized}")
    }

    /// Fresh read from disk, bypassing the cache.
    async fn read_value(&self, path: &Path, ns: Namespace, key: &str) -> StorageResult<Option<Value>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_unavailable(e, path)),
        };
        let value = serde_json::from_str(&raw).map_err(|e| StorageError::Corruption {
            key: format!("{ns}/{key}"),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }

    async fn write_atomic(&self, path: &Path, value: &Value) -> StorageResult<()> {
        let parent = path.parent().ok_or_else(|| StorageError::InvalidArgument {
            message: format!("entry path has no parent: {}", path.display()),
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_unavailable(e, parent))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        let tmp = parent.join(format!(".{file_name}.tmp-{}", Uuid::new_v4()));

        let body = serde_json::to_string_pretty(value).map_err(|e| {
            StorageError::InvalidArgument {
                message: format!("value is not serializable: {e}"),
            }
        })?;
        tokio::fs::write(&tmp, format!("{body}\n"))
            .await
            .map_err(|e| io_unavailable(e, &tmp))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = tokio::fs::set_permissions(&tmp, perms).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(io_unavailable(e, &tmp));
            }
        }

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_unavailable(e, path));
        }
        Ok(())
    }

    async fn acquire_lock(&self, entry_path: &Path) -> StorageResult<LockGuard> {
        let lock_path = lock_path_for(entry_path);
        let started = Instant::now();
        loop {
            let mut options = tokio::fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            options.mode(0o600);
            match options.open(&lock_path).await {
                Ok(mut file) => {
                    let _ = file
                        .write_all(std::process::id().to_string().as_bytes())
                        .await;
                    return Ok(LockGuard { path: lock_path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(age) = lock_age(&lock_path).await {
                        if age >= self.lock_settings.stale_after {
                            tracing::debug!(lock = %lock_path.display(), "evicting stale lock");
                            let _ = tokio::fs::remove_file(&lock_path).await;
                            continue;
                        }
                    }
                    let waited = started.elapsed();
                    if waited >= self.lock_settings.timeout {
                        return Err(StorageError::LockTimeout {
                            path: lock_path,
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(self.lock_settings.poll_interval).await;
                }
                Err(e) => return Err(io_unavailable(e, &lock_path)),
            }
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn is_distributed(&self) -> bool {
        false
    }

    async fn initialize(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| io_unavailable(e, &self.base_dir))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(&self.base_dir, perms)
                .await
                .map_err(|e| io_unavailable(e, &self.base_dir))?;
        }
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.cache.clear();
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: &str) -> StorageResult<Option<Value>> {
        let sanitized = sanitize_key(key);
        let path = self.entry_path(ns, &sanitized);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_unavailable(e, &path)),
        };
        let mtime = mtime_ms(&meta);
        let cache_key = Self::cache_key(ns, &sanitized);
        if let Some(value) = self.cache.get(&cache_key, mtime) {
            return Ok(Some(value));
        }
        let value = self.read_value(&path, ns, key).await?;
        if let Some(value) = &value {
            self.cache.put(cache_key, value, mtime);
        }
        Ok(value)
    }

    async fn set(&self, ns: Namespace, key: &str, value: &Value) -> StorageResult<()> {
        let sanitized = sanitize_key(key);
        let path = self.entry_path(ns, &sanitized);
        self.write_atomic(&path, value).await?;
        self.cache.invalidate(&Self::cache_key(ns, &sanitized));
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> StorageResult<bool> {
        let sanitized = sanitize_key(key);
        let path = self.entry_path(ns, &sanitized);
        self.cache.invalidate(&Self::cache_key(ns, &sanitized));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_unavailable(e, &path)),
        }
    }

    async fn list(&self, ns: Namespace, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let prefix = prefix.map(sanitize_key);
        let dir = self.namespace_dir(ns);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_unavailable(e, &dir)),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_unavailable(e, &dir))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name
                .strip_suffix(".json")
                .or_else(|| name.strip_suffix(".jsonl"))
            else {
                continue;
            };
            if let Some(prefix) = &prefix {
                if !stem.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            keys.push(stem.to_string());
        }
        Ok(keys)
    }

    async fn update(
        &self,
        ns: Namespace,
        key: &str,
        mut apply: Updater,
    ) -> StorageResult<Option<Value>> {
        let sanitized = sanitize_key(key);
        let path = self.entry_path(ns, &sanitized);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_unavailable(e, parent))?;
        }

        let _lock = self.acquire_lock(&path).await?;
        // Re-read under the lock; the cached copy may predate a
        // concurrent writer.
        let current = self.read_value(&path, ns, key).await?;
        let next = apply(current);
        match &next {
            Some(value) => self.write_atomic(&path, value).await?,
            None => match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_unavailable(e, &path)),
            },
        }
        self.cache.invalidate(&Self::cache_key(ns, &sanitized));
        Ok(next)
    }

    async fn append(&self, ns: Namespace, key: &str, line: &str) -> StorageResult<()> {
        let sanitized = sanitize_key(key);
        let path = self.entry_path(ns, &sanitized);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_unavailable(e, parent))?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&path)
            .await
            .map_err(|e| io_unavailable(e, &path))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| io_unavailable(e, &path))?;
        file.flush().await.map_err(|e| io_unavailable(e, &path))?;
        self.cache.invalidate(&Self::cache_key(ns, &sanitized));
        Ok(())
    }

    async fn read_lines(&self, ns: Namespace, key: &str) -> StorageResult<LineStream> {
        let sanitized = sanitize_key(key);
        let path = self.entry_path(ns, &sanitized);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(line_stream_from(
                content
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(empty_line_stream()),
            Err(e) => Err(io_unavailable(e, &path)),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let probe = async {
            tokio::fs::create_dir_all(&self.base_dir).await?;
            tokio::fs::metadata(&self.base_dir).await?;
            Ok::<_, std::io::Error>(())
        };
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;
        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(())) => HealthStatus::healthy(elapsed(started)),
            Ok(Err(e)) => HealthStatus::failed(elapsed(started), e.to_string()),
            Err(_) => HealthStatus::failed(elapsed(started), "health probe timed out"),
        }
    }
}

/// Removes the lock file when the guard leaves scope.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_path_for(entry_path: &Path) -> PathBuf {
    let mut os = entry_path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

async fn lock_age(lock_path: &Path) -> Option<Duration> {
    let meta = tokio::fs::metadata(lock_path).await.ok()?;
    let modified = meta.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn mtime_ms(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn io_unavailable(err: std::io::Error, path: &Path) -> StorageError {
    StorageError::Unavailable {
        backend: BackendKind::File,
        message: format!("{}: {err}", path.display()),
        source: Some(Box::new(err)),
    }
}
