//! Configuration schema, validation, and classification resolution.
//!
//! [`StorageConfig`] mirrors the `storage` section of the platform's JSON
//! configuration (camelCase keys, unknown keys rejected). Validation
//! errors carry a corrective hint naming the configuration key to set, so
//! the diagnostic CLI can print actionable messages.
//!
//! # Defaults
//!
//! | Setting              | Default         | Meaning                          |
//! |----------------------|-----------------|----------------------------------|
//! | `type`               | `file`          | Service mode                     |
//! | `cacheEnabled`       | `true`          | FileBackend value cache          |
//! | `cacheTtlMs`         | 45,000          | Cache entry TTL                  |
//! | `dynamodb.ttlSeconds`| 2,592,000 (30 d)| Item TTL; `0` disables           |
//! | `dynamodb.namespaceIndexName` | `NamespaceIndex` | GSI for `list`      |
//! | `baseDir`            | user state dir  | FileBackend root                 |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::Namespace;
use crate::error::{StorageError, StorageResult};

/// Service-wide mode selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Everything stays on the local filesystem.
    #[default]
    File,
    /// Cloud namespaces live in the event-memory service.
    Agentcore,
    /// Document database for sessions, event memory for transcripts.
    Hybrid,
}

impl ServiceMode {
    /// Stable string form (matches the configuration wire value).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Agentcore => "agentcore",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-namespace storage classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Stored on the local filesystem.
    Local,
    /// Stored in a managed cloud backend.
    Cloud,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        })
    }
}

/// Explicit per-namespace classification overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DataClassification {
    /// Override for the `sessions` namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Classification>,
    /// Override for the `transcripts` namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcripts: Option<Classification>,
    /// Override for the `auth` namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<Classification>,
    /// Override for the `config` namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Classification>,
}

impl DataClassification {
    fn get(&self, ns: Namespace) -> Option<Classification> {
        match ns {
            Namespace::Sessions => self.sessions,
            Namespace::Transcripts => self.transcripts,
            Namespace::Auth => self.auth,
            Namespace::Config => self.config,
        }
    }
}

/// Event-memory (AgentCore) backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentCoreConfig {
    /// ARN of the memory resource holding event streams.
    pub memory_arn: String,
    /// AWS region; falls back to `AWS_REGION`, then the ARN's region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Actor-id prefix for multi-tenant isolation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
}

/// Document-database backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DynamoDbConfig {
    /// Table holding the namespaced key-value items.
    pub table_name: String,
    /// AWS region; falls back to `AWS_REGION`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Item TTL in seconds applied on write; `0` disables.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Global secondary index on `(namespace, key)` backing `list`.
    #[serde(default = "default_namespace_index")]
    pub namespace_index_name: String,
}

/// Managed secrets backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretsManagerConfig {
    /// ARN anchoring the credential store (also provides the region
    /// fallback).
    pub secret_arn: String,
    /// Optional envelope-encryption key for newly created secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    /// AWS region; falls back to `AWS_REGION`, then the ARN's region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Top-level storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct StorageConfig {
    /// Service mode.
    #[serde(rename = "type")]
    pub mode: ServiceMode,
    /// Per-namespace classification overrides.
    pub data_classification: DataClassification,
    /// Event-memory backend; required when cloud transcripts (or cloud
    /// sessions without DynamoDB) are routed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agentcore: Option<AgentCoreConfig>,
    /// Document-database backend; required for hybrid sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamodb: Option<DynamoDbConfig>,
    /// Managed secrets backend for the `auth` namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets_manager: Option<SecretsManagerConfig>,
    /// Whether the FileBackend value cache is active.
    pub cache_enabled: bool,
    /// Value-cache TTL in milliseconds (must be positive).
    pub cache_ttl_ms: u64,
    /// FileBackend root; defaults to the user state directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: ServiceMode::File,
            data_classification: DataClassification::default(),
            agentcore: None,
            dynamodb: None,
            secrets_manager: None,
            cache_enabled: true,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            base_dir: None,
        }
    }
}

/// Default value-cache TTL (45 s).
pub const DEFAULT_CACHE_TTL_MS: u64 = 45_000;

/// Default item TTL on the document database (30 days).
pub const DEFAULT_DYNAMODB_TTL_SECONDS: u64 = 2_592_000;

fn default_ttl_seconds() -> u64 {
    DEFAULT_DYNAMODB_TTL_SECONDS
}

fn default_namespace_index() -> String {
    "NamespaceIndex".to_string()
}

impl StorageConfig {
    /// Parses a configuration from a JSON value, rejecting unknown keys.
    pub fn from_value(value: serde_json::Value) -> StorageResult<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| StorageError::Config {
                message: format!("malformed storage configuration: {e}"),
                hint: None,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from JSON text, rejecting unknown keys.
    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| StorageError::Config {
                message: format!("storage configuration is not valid JSON: {e}"),
                hint: None,
            })?;
        Self::from_value(value)
    }

    /// Semantic validation beyond what serde enforces.
    ///
    /// Checks that every namespace the mode routes to a cloud backend has
    /// the backend it needs configured, and that the pieces that are
    /// present are internally coherent.
    pub fn validate(&self) -> StorageResult<()> {
        if self.cache_ttl_ms == 0 {
            return Err(StorageError::config(
                "cacheTtlMs must be greater than zero",
                "cacheTtlMs",
            ));
        }
        if let Some(agentcore) = &self.agentcore {
            if agentcore.memory_arn.trim().is_empty() {
                return Err(StorageError::config(
                    "agentcore.memoryArn must not be empty",
                    "agentcore.memoryArn",
                ));
            }
        }
        if let Some(dynamodb) = &self.dynamodb {
            if dynamodb.table_name.trim().is_empty() {
                return Err(StorageError::config(
                    "dynamodb.tableName must not be empty",
                    "dynamodb.tableName",
                ));
            }
        }
        if let Some(secrets) = &self.secrets_manager {
            if secrets.secret_arn.trim().is_empty() {
                return Err(StorageError::config(
                    "secretsManager.secretArn must not be empty",
                    "secretsManager.secretArn",
                ));
            }
        }

        if self.classification(Namespace::Transcripts) == Classification::Cloud
            && self.mode != ServiceMode::File
            && self.agentcore.is_none()
        {
            return Err(StorageError::config(
                "cloud transcripts require an event-memory resource",
                "agentcore.memoryArn",
            ));
        }
        if self.classification(Namespace::Sessions) == Classification::Cloud
            && self.mode == ServiceMode::Agentcore
            && self.agentcore.is_none()
        {
            return Err(StorageError::config(
                "cloud sessions in agentcore mode require an event-memory resource",
                "agentcore.memoryArn",
            ));
        }
        if self.classification(Namespace::Sessions) == Classification::Cloud
            && self.mode == ServiceMode::Hybrid
            && self.dynamodb.is_none()
            && self.agentcore.is_none()
        {
            return Err(StorageError::config(
                "hybrid sessions require a document database (or event memory as fallback)",
                "dynamodb.tableName",
            ));
        }
        Ok(())
    }

    /// Resolves the classification for a namespace: explicit override
    /// first, otherwise the mode default (`file` mode keeps everything
    /// local; `agentcore`/`hybrid` put sessions and transcripts in the
    /// cloud).
    pub fn classification(&self, ns: Namespace) -> Classification {
        if let Some(explicit) = self.data_classification.get(ns) {
            return explicit;
        }
        match self.mode {
            ServiceMode::File => Classification::Local,
            ServiceMode::Agentcore | ServiceMode::Hybrid => match ns {
                Namespace::Sessions | Namespace::Transcripts => Classification::Cloud,
                Namespace::Auth | Namespace::Config => Classification::Local,
            },
        }
    }

    /// The FileBackend root directory.
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(default_base_dir)
    }
}

fn default_base_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("openclaw")
        .join("storage")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid_file_mode() {
        let config = StorageConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.mode, ServiceMode::File);
        assert!(config.cache_enabled);
        assert_eq!(config.cache_ttl_ms, 45_000);
    }

    #[test]
    fn file_mode_classifies_everything_local() {
        let config = StorageConfig::default();
        for ns in Namespace::ALL {
            assert_eq!(config.classification(ns), Classification::Local);
        }
    }

    #[test]
    fn hybrid_mode_defaults() {
        let config = StorageConfig {
            mode: ServiceMode::Hybrid,
            dynamodb: Some(DynamoDbConfig {
                table_name: "T".into(),
                region: None,
                ttl_seconds: DEFAULT_DYNAMODB_TTL_SECONDS,
                namespace_index_name: "NamespaceIndex".into(),
            }),
            agentcore: Some(AgentCoreConfig {
                memory_arn: "arn:aws:bedrock-agentcore:us-east-1:123:memory/m1".into(),
                region: None,
                namespace_prefix: None,
            }),
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(
            config.classification(Namespace::Sessions),
            Classification::Cloud
        );
        assert_eq!(
            config.classification(Namespace::Transcripts),
            Classification::Cloud
        );
        assert_eq!(config.classification(Namespace::Auth), Classification::Local);
        assert_eq!(
            config.classification(Namespace::Config),
            Classification::Local
        );
    }

    #[test]
    fn explicit_override_wins_over_mode_default() {
        let config = StorageConfig {
            mode: ServiceMode::Hybrid,
            data_classification: DataClassification {
                sessions: Some(Classification::Local),
                ..Default::default()
            },
            agentcore: Some(AgentCoreConfig {
                memory_arn: "arn:aws:bedrock-agentcore:us-east-1:123:memory/m1".into(),
                region: None,
                namespace_prefix: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            config.classification(Namespace::Sessions),
            Classification::Local
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StorageConfig::from_json_str(r#"{"type": "file", "surprise": 1}"#).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = StorageConfig::from_json_str("{not json").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn camel_case_wire_names_parse() {
        let config = StorageConfig::from_json_str(
            r#"{
                "type": "hybrid",
                "dataClassification": {"auth": "cloud"},
                "dynamodb": {"tableName": "T", "ttlSeconds": 0},
                "agentcore": {"memoryArn": "arn:aws:bedrock-agentcore:us-east-1:1:memory/m", "namespacePrefix": "tenant-a"},
                "cacheTtlMs": 1000
            }"#,
        )
        .unwrap();
        assert_eq!(config.mode, ServiceMode::Hybrid);
        assert_eq!(config.data_classification.auth, Some(Classification::Cloud));
        let dynamodb = config.dynamodb.unwrap();
        assert_eq!(dynamodb.table_name, "T");
        assert_eq!(dynamodb.ttl_seconds, 0);
        assert_eq!(dynamodb.namespace_index_name, "NamespaceIndex");
        assert_eq!(
            config.agentcore.unwrap().namespace_prefix.as_deref(),
            Some("tenant-a")
        );
        assert_eq!(config.cache_ttl_ms, 1000);
    }

    #[test]
    fn agentcore_mode_without_memory_arn_fails_with_hint() {
        let err = StorageConfig {
            mode: ServiceMode::Agentcore,
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.hint(), Some("agentcore.memoryArn"));
    }

    #[test]
    fn hybrid_mode_without_any_cloud_backend_fails_with_hint() {
        let config = StorageConfig {
            mode: ServiceMode::Hybrid,
            data_classification: DataClassification {
                transcripts: Some(Classification::Local),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.hint(), Some("dynamodb.tableName"));
    }

    #[test]
    fn zero_cache_ttl_is_rejected() {
        let err = StorageConfig {
            cache_ttl_ms: 0,
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.hint(), Some("cacheTtlMs"));
    }

    #[test]
    fn serde_roundtrip() {
        let config = StorageConfig {
            mode: ServiceMode::Hybrid,
            dynamodb: Some(DynamoDbConfig {
                table_name: "T".into(),
                region: Some("eu-west-1".into()),
                ttl_seconds: 60,
                namespace_index_name: "NamespaceIndex".into(),
            }),
            agentcore: Some(AgentCoreConfig {
                memory_arn: "arn:aws:bedrock-agentcore:us-east-1:1:memory/m".into(),
                region: None,
                namespace_prefix: None,
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        let back = StorageConfig::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
