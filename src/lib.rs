#![deny(unsafe_code)]

//! Pluggable namespaced storage for the OpenClaw agent platform.
//!
//! This crate exposes a uniform key-value and append-log interface over
//! four backends — the local filesystem, an event-sourced cloud memory
//! service, a cloud document database, and a managed secrets vault — and
//! routes each namespace (`sessions`, `transcripts`, `auth`, `config`) to
//! the right one based on data classification and service mode.
//!
//! # Overview
//!
//! - [`StorageBackend`] is the contract every engine implements:
//!   `get`/`set`/`delete`/`list`/`update`/`append`/`read_lines` plus
//!   lifecycle and a bounded health probe.
//! - [`StorageService`] picks a backend per namespace (`file`,
//!   `agentcore`, or `hybrid` mode), constructs backends lazily, and
//!   degrades gracefully when a cloud backend fails to initialize.
//! - [`transcript`] defines the `agentcore://` transcript location
//!   scheme and a unified reader over both location forms.
//! - [`blob`] recovers payloads the upstream memory API hands back in
//!   non-JSON text forms.
//!
//! # Module Organization
//!
//! - [`backend`] - The [`StorageBackend`] trait and the four engines
//! - [`service`] - Routing, lifecycle, health aggregation, singleton
//! - [`config`] - Validated configuration schema
//! - [`transcript`] - Transcript location URIs and the unified reader
//! - [`blob`] - Blob/Python-dict decoding and the content sanitizer
//! - [`keys`] - Sanitized-key functions
//! - [`error`] - The [`StorageError`] taxonomy
//!
//! # Example
//!
//! ```no_run
//! use openclaw_storage::{Namespace, StorageConfig, StorageService};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), openclaw_storage::StorageError> {
//! let service = StorageService::new(StorageConfig::default())?;
//! service.initialize().await?;
//!
//! let sessions = service.get_backend(Namespace::Sessions).await?;
//! sessions.set(Namespace::Sessions, "abc", &json!({"a": 1})).await?;
//! assert_eq!(
//!     sessions.get(Namespace::Sessions, "abc").await?,
//!     Some(json!({"a": 1}))
//! );
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod blob;
pub mod config;
pub mod error;
pub mod keys;
pub mod service;
pub mod transcript;

mod cache;

// Re-exports for ergonomic access
pub use backend::{
    BackendKind, HealthStatus, LineStream, Namespace, StorageBackend, Updater,
};
pub use config::{Classification, ServiceMode, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use service::{reset_shared, shared, NamespaceSummary, StorageService};
pub use transcript::{
    build_agentcore_transcript_uri, is_agentcore_uri, parse_transcript_uri,
    read_transcript_messages, AgentCoreTranscript,
};
