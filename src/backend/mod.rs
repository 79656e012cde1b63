//! Backend contract shared by every storage engine.
//!
//! [`StorageBackend`] defines the uniform namespaced key-value and
//! append-log interface. Backends are dumb adapters over their transport:
//! routing policy lives in [`StorageService`](crate::service::StorageService),
//! blob recovery in [`blob`](crate::blob), and key hygiene in
//! [`keys`](crate::keys).
//!
//! # Capability advertisement
//!
//! Not every backend supports every operation. `append`/`read_lines`
//! return [`StorageError::Unsupported`] on the document-database and
//! secrets backends rather than being split into a separate subtype; this
//! keeps routing a plain sum over [`BackendKind`].

pub mod agentcore;
mod aws;
pub mod dynamodb;
pub mod file;
pub mod secrets;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Upper bound on every health probe.
pub(crate) const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Closed set of logical keyspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Session index documents.
    Sessions,
    /// Append-only conversation logs.
    Transcripts,
    /// Credentials and tokens.
    Auth,
    /// Platform configuration documents.
    Config,
}

impl Namespace {
    /// Every namespace, in a stable order (used for health aggregation
    /// and the status CLI).
    pub const ALL: [Namespace; 4] = [
        Namespace::Sessions,
        Namespace::Transcripts,
        Namespace::Auth,
        Namespace::Config,
    ];

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Transcripts => "transcripts",
            Self::Auth => "auth",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sessions" => Ok(Self::Sessions),
            "transcripts" => Ok(Self::Transcripts),
            "auth" => Ok(Self::Auth),
            "config" => Ok(Self::Config),
            other => Err(StorageError::InvalidArgument {
                message: format!("unknown namespace: {other}"),
            }),
        }
    }
}

/// Identifies a backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    /// Local filesystem.
    #[serde(rename = "file")]
    File,
    /// Cloud event-memory service.
    #[serde(rename = "agentcore")]
    AgentCore,
    /// Cloud document database.
    #[serde(rename = "dynamodb")]
    DynamoDb,
    /// Managed secrets vault.
    #[serde(rename = "secrets-manager")]
    SecretsManager,
}

impl BackendKind {
    /// Stable string tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::AgentCore => "agentcore",
            Self::DynamoDb => "dynamodb",
            Self::SecretsManager => "secrets-manager",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "agentcore" => Ok(Self::AgentCore),
            "dynamodb" => Ok(Self::DynamoDb),
            "secrets-manager" => Ok(Self::SecretsManager),
            other => Err(StorageError::InvalidArgument {
                message: format!("unknown backend tag: {other}"),
            }),
        }
    }
}

/// Result of a bounded, side-effect-free health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the probe succeeded.
    pub ok: bool,
    /// Observed probe latency.
    pub latency_ms: u64,
    /// Failure detail when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    /// A successful probe.
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            ok: true,
            latency_ms,
            error: None,
        }
    }

    /// A failed probe.
    pub fn failed(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// Read-modify-write closure for [`StorageBackend::update`].
///
/// `None` in means the key is currently absent; `None` out deletes it.
/// Backends with optimistic concurrency may invoke the closure more than
/// once when a write races, so it must be prepared to re-run against a
/// fresh current value.
pub type Updater = Box<dyn FnMut(Option<Value>) -> Option<Value> + Send>;

/// Lazily yielded transcript lines, chronological and finite.
pub type LineStream = BoxStream<'static, StorageResult<String>>;

/// Builds an empty [`LineStream`] (missing keys read as empty).
pub fn empty_line_stream() -> LineStream {
    Box::pin(futures::stream::empty())
}

/// Builds a [`LineStream`] over an already-materialized batch.
pub(crate) fn line_stream_from(lines: Vec<String>) -> LineStream {
    Box::pin(futures::stream::iter(
        lines.into_iter().map(Ok::<_, StorageError>),
    ))
}

/// Namespaced key-value and append-log storage.
///
/// # Contract
///
/// - `get` never fails for missing keys; absence is `Ok(None)`.
/// - `delete` is idempotent and reports whether a value existed.
/// - `list` enumerates keys whose **sanitized** form starts with the
///   prefix; order is unspecified.
/// - `update` is an atomic read-modify-write with respect to other
///   `update` calls on the same `(namespace, key)` — via a file lock
///   locally, a conditional write on the document database, and
///   best-effort read-then-write on the event store.
/// - `append` preserves call order for a single writer; cross-writer
///   order follows the backend's event timestamps.
/// - `read_lines` yields chronological lines and is restartable.
///
/// # Thread safety
///
/// Implementations are `Send + Sync` and shared behind
/// `Arc<dyn StorageBackend>`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Whether the backend is shared across hosts (cloud) or local.
    fn is_distributed(&self) -> bool;

    /// Prepares the backend for use (creates directories, verifies the
    /// remote resource exists).
    async fn initialize(&self) -> StorageResult<()>;

    /// Releases resources. Further calls are undefined.
    async fn close(&self) -> StorageResult<()>;

    /// Latest value for a key, or `None` when absent.
    async fn get(&self, ns: Namespace, key: &str) -> StorageResult<Option<Value>>;

    /// Persists a value, overwriting any prior one.
    async fn set(&self, ns: Namespace, key: &str, value: &Value) -> StorageResult<()>;

    /// Removes a key. Returns `true` iff a value existed.
    async fn delete(&self, ns: Namespace, key: &str) -> StorageResult<bool>;

    /// Enumerates keys, optionally filtered by a sanitized-form prefix.
    async fn list(&self, ns: Namespace, prefix: Option<&str>) -> StorageResult<Vec<String>>;

    /// Atomic read-modify-write. Returns the value that was applied
    /// (`None` means the key was deleted).
    async fn update(
        &self,
        ns: Namespace,
        key: &str,
        apply: Updater,
    ) -> StorageResult<Option<Value>>;

    /// Appends one record to a log-shaped key. `line` must not contain
    /// embedded newlines (caller responsibility).
    async fn append(&self, ns: Namespace, key: &str, line: &str) -> StorageResult<()>;

    /// Chronological lines for a log-shaped key; empty for missing keys.
    async fn read_lines(&self, ns: Namespace, key: &str) -> StorageResult<LineStream>;

    /// Bounded, side-effect-free probe.
    async fn health_check(&self) -> HealthStatus;
}
