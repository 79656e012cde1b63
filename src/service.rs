//! Backend routing, lifecycle, and health aggregation.
//!
//! [`StorageService`] resolves a backend per namespace:
//!
//! 1. `auth` goes to the secrets vault whenever one is configured;
//! 2. the namespace classification is resolved (explicit override, else
//!    the mode default);
//! 3. cloud namespaces in `hybrid` mode route `sessions` to the document
//!    database (falling back to event memory, then the filesystem) and
//!    `transcripts` to event memory (falling back to the filesystem);
//! 4. cloud namespaces in `agentcore` mode route to event memory;
//! 5. everything else stays on the filesystem.
//!
//! Backends are constructed lazily on first use and memoized for the
//! life of the service. `initialize` warms the filesystem backend and
//! *attempts* each configured cloud backend: a failing cloud
//! initialization is logged and the service continues degraded — the
//! first call that actually demands that backend re-raises the error.
//!
//! A process-wide singleton ([`shared`]/[`reset_shared`]) exists for
//! call sites without dependency injection; library code should prefer
//! an explicitly constructed service.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::backend::agentcore::EventMemoryBackend;
use crate::backend::dynamodb::DynamoDbBackend;
use crate::backend::file::FileBackend;
use crate::backend::secrets::SecretsManagerBackend;
use crate::backend::{BackendKind, HealthStatus, Namespace, StorageBackend};
use crate::config::{Classification, ServiceMode, StorageConfig};
use crate::error::{StorageError, StorageResult};

/// One row of [`StorageService::config_summary`].
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceSummary {
    /// The namespace.
    pub namespace: Namespace,
    /// Backend tag the namespace resolves to.
    pub backend: BackendKind,
    /// Resolved classification.
    pub classification: Classification,
}

/// Routes namespaces to backends and owns their lifecycle.
pub struct StorageService {
    config: StorageConfig,
    backends: tokio::sync::Mutex<BTreeMap<BackendKind, Arc<dyn StorageBackend>>>,
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StorageService {
    /// Creates a service over a validated configuration.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backends: tokio::sync::Mutex::new(BTreeMap::new()),
        })
    }

    /// The configuration this service routes with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Resolved classification for a namespace.
    pub fn classification(&self, ns: Namespace) -> Classification {
        self.config.classification(ns)
    }

    /// Which backend a namespace resolves to, without constructing it.
    pub fn resolve_backend_kind(&self, ns: Namespace) -> BackendKind {
        if ns == Namespace::Auth && self.config.secrets_manager.is_some() {
            return BackendKind::SecretsManager;
        }
        if self.classification(ns) == Classification::Local {
            return BackendKind::File;
        }
        match self.config.mode {
            ServiceMode::Hybrid => match ns {
                Namespace::Sessions => {
                    if self.config.dynamodb.is_some() {
                        BackendKind::DynamoDb
                    } else if self.config.agentcore.is_some() {
                        BackendKind::AgentCore
                    } else {
                        BackendKind::File
                    }
                }
                _ => {
                    if self.config.agentcore.is_some() {
                        BackendKind::AgentCore
                    } else {
                        BackendKind::File
                    }
                }
            },
            ServiceMode::Agentcore => BackendKind::AgentCore,
            // A cloud override without a cloud mode has nowhere to go
            // but the filesystem.
            ServiceMode::File => BackendKind::File,
        }
    }

    /// The backend serving a namespace, constructing it on first use.
    pub async fn get_backend(&self, ns: Namespace) -> StorageResult<Arc<dyn StorageBackend>> {
        let kind = self.resolve_backend_kind(ns);
        self.backend_for(kind).await
    }

    async fn backend_for(&self, kind: BackendKind) -> StorageResult<Arc<dyn StorageBackend>> {
        let mut backends = self.backends.lock().await;
        if let Some(backend) = backends.get(&kind) {
            return Ok(backend.clone());
        }
        let backend = self.build_backend(kind).await?;
        backends.insert(kind, backend.clone());
        Ok(backend)
    }

    async fn build_backend(&self, kind: BackendKind) -> StorageResult<Arc<dyn StorageBackend>> {
        match kind {
            BackendKind::File => Ok(Arc::new(FileBackend::new(&self.config))),
            BackendKind::AgentCore => {
                let agentcore = self.config.agentcore.as_ref().ok_or_else(|| {
                    StorageError::config(
                        "event-memory backend requested but not configured",
                        "agentcore.memoryArn",
                    )
                })?;
                Ok(Arc::new(EventMemoryBackend::connect(agentcore).await?))
            }
            BackendKind::DynamoDb => {
                let dynamodb = self.config.dynamodb.as_ref().ok_or_else(|| {
                    StorageError::config(
                        "document-database backend requested but not configured",
                        "dynamodb.tableName",
                    )
                })?;
                Ok(Arc::new(DynamoDbBackend::connect(dynamodb).await?))
            }
            BackendKind::SecretsManager => {
                let secrets = self.config.secrets_manager.as_ref().ok_or_else(|| {
                    StorageError::config(
                        "secrets backend requested but not configured",
                        "secretsManager.secretArn",
                    )
                })?;
                Ok(Arc::new(SecretsManagerBackend::connect(secrets).await?))
            }
        }
    }

    fn configured_cloud_kinds(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        if self.config.agentcore.is_some() {
            kinds.push(BackendKind::AgentCore);
        }
        if self.config.dynamodb.is_some() {
            kinds.push(BackendKind::DynamoDb);
        }
        if self.config.secrets_manager.is_some() {
            kinds.push(BackendKind::SecretsManager);
        }
        kinds
    }

    /// Initializes the filesystem backend, then attempts each configured
    /// cloud backend. Cloud failures degrade rather than abort.
    pub async fn initialize(&self) -> StorageResult<()> {
        let file = self.backend_for(BackendKind::File).await?;
        file.initialize().await?;

        for kind in self.configured_cloud_kinds() {
            let attempt = async {
                let backend = self.backend_for(kind).await?;
                backend.initialize().await
            };
            if let Err(err) = attempt.await {
                tracing::warn!(
                    backend = %kind,
                    error = %err,
                    "cloud backend failed to initialize; continuing degraded"
                );
                // Drop the memoized handle so the next demand rebuilds
                // and re-raises.
                self.backends.lock().await.remove(&kind);
            }
        }
        Ok(())
    }

    /// Closes every constructed backend and forgets the handles.
    pub async fn close(&self) -> StorageResult<()> {
        let mut backends = self.backends.lock().await;
        while let Some((kind, backend)) = backends.pop_first() {
            if let Err(err) = backend.close().await {
                tracing::warn!(backend = %kind, error = %err, "backend close failed");
            }
        }
        Ok(())
    }

    /// Probes the resolved backend for every namespace.
    pub async fn health_check(&self) -> BTreeMap<Namespace, HealthStatus> {
        let mut statuses = BTreeMap::new();
        for ns in Namespace::ALL {
            let status = match self.get_backend(ns).await {
                Ok(backend) => backend.health_check().await,
                Err(err) => HealthStatus::failed(0, err.to_string()),
            };
            statuses.insert(ns, status);
        }
        statuses
    }

    /// Per-namespace backend tag and classification, for diagnostics.
    pub fn config_summary(&self) -> Vec<NamespaceSummary> {
        Namespace::ALL
            .into_iter()
            .map(|namespace| NamespaceSummary {
                namespace,
                backend: self.resolve_backend_kind(namespace),
                classification: self.classification(namespace),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Process-wide singleton
// ---------------------------------------------------------------------------

static SHARED: parking_lot::Mutex<Option<Arc<StorageService>>> = parking_lot::Mutex::new(None);

/// Returns the process-wide service, constructing it from `config` on
/// first call. Later calls ignore `config` and return the existing
/// handle.
pub fn shared(config: StorageConfig) -> StorageResult<Arc<StorageService>> {
    let mut slot = SHARED.lock();
    if let Some(service) = slot.as_ref() {
        return Ok(service.clone());
    }
    let service = Arc::new(StorageService::new(config)?);
    *slot = Some(service.clone());
    Ok(service)
}

/// Drops the process-wide service so the next [`shared`] call rebuilds
/// it. Tests use this between cases.
pub fn reset_shared() {
    SHARED.lock().take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentCoreConfig, DataClassification, DynamoDbConfig};

    fn hybrid_config() -> StorageConfig {
        StorageConfig {
            mode: ServiceMode::Hybrid,
            dynamodb: Some(DynamoDbConfig {
                table_name: "T".into(),
                region: None,
                ttl_seconds: 0,
                namespace_index_name: "NamespaceIndex".into(),
            }),
            agentcore: Some(AgentCoreConfig {
                memory_arn: "arn:aws:bedrock-agentcore:us-east-1:123:memory/m1".into(),
                region: None,
                namespace_prefix: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn file_mode_routes_everything_to_file() {
        let service = StorageService::new(StorageConfig::default()).unwrap();
        for ns in Namespace::ALL {
            assert_eq!(service.resolve_backend_kind(ns), BackendKind::File);
        }
    }

    #[test]
    fn hybrid_mode_routes_per_namespace() {
        let service = StorageService::new(hybrid_config()).unwrap();
        assert_eq!(
            service.resolve_backend_kind(Namespace::Sessions),
            BackendKind::DynamoDb
        );
        assert_eq!(
            service.resolve_backend_kind(Namespace::Transcripts),
            BackendKind::AgentCore
        );
        assert_eq!(
            service.resolve_backend_kind(Namespace::Auth),
            BackendKind::File
        );
        assert_eq!(
            service.resolve_backend_kind(Namespace::Config),
            BackendKind::File
        );
    }

    #[test]
    fn hybrid_sessions_fall_back_to_event_memory() {
        let mut config = hybrid_config();
        config.dynamodb = None;
        let service = StorageService::new(config).unwrap();
        assert_eq!(
            service.resolve_backend_kind(Namespace::Sessions),
            BackendKind::AgentCore
        );
    }

    #[test]
    fn agentcore_mode_routes_cloud_namespaces_to_event_memory() {
        let config = StorageConfig {
            mode: ServiceMode::Agentcore,
            agentcore: Some(AgentCoreConfig {
                memory_arn: "arn:aws:bedrock-agentcore:us-east-1:123:memory/m1".into(),
                region: None,
                namespace_prefix: None,
            }),
            ..Default::default()
        };
        let service = StorageService::new(config).unwrap();
        assert_eq!(
            service.resolve_backend_kind(Namespace::Sessions),
            BackendKind::AgentCore
        );
        assert_eq!(
            service.resolve_backend_kind(Namespace::Auth),
            BackendKind::File
        );
    }

    #[test]
    fn secrets_configuration_captures_auth() {
        let mut config = hybrid_config();
        config.secrets_manager = Some(crate::config::SecretsManagerConfig {
            secret_arn: "arn:aws:secretsmanager:us-east-1:123:secret:openclaw".into(),
            kms_key_id: None,
            region: None,
        });
        let service = StorageService::new(config).unwrap();
        assert_eq!(
            service.resolve_backend_kind(Namespace::Auth),
            BackendKind::SecretsManager
        );
    }

    #[test]
    fn cloud_override_in_file_mode_stays_on_the_filesystem() {
        let config = StorageConfig {
            data_classification: DataClassification {
                sessions: Some(Classification::Cloud),
                ..Default::default()
            },
            ..Default::default()
        };
        let service = StorageService::new(config).unwrap();
        assert_eq!(
            service.resolve_backend_kind(Namespace::Sessions),
            BackendKind::File
        );
    }

    #[test]
    fn config_summary_covers_every_namespace() {
        let service = StorageService::new(hybrid_config()).unwrap();
        let summary = service.config_summary();
        assert_eq!(summary.len(), 4);
        let transcripts = summary
            .iter()
            .find(|row| row.namespace == Namespace::Transcripts)
            .unwrap();
        assert_eq!(transcripts.backend, BackendKind::AgentCore);
        assert_eq!(transcripts.classification, Classification::Cloud);
    }
}
