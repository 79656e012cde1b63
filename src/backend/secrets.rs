//! Managed secrets backend for the `auth` namespace.
//!
//! Each `(namespace, key)` maps to a secret named
//! `openclaw-auth/<namespace>/<key>` (slashes in keys are preserved so
//! nested credential paths stay hierarchical). String values are stored
//! raw; everything else as canonical JSON, and reads reverse that
//! round trip. Deletion is immediate and unrecoverable; the vault's
//! recovery window is deliberately skipped so a revoked credential is
//! gone at once.
//!
//! New secrets are tagged `Application=openclaw` / `Namespace=<ns>` and
//! attached to the configured KMS key when present. There is no
//! append-log shape here: `append`/`read_lines` return `Unsupported`.

use std::time::Instant;

use async_trait::async_trait;
use aws_sdk_secretsmanager::types::{Filter, FilterNameStringType, Tag};
use aws_sdk_secretsmanager::Client;
use serde_json::Value;

use crate::backend::aws::{resolve_region, sdk_config};
use crate::backend::{
    BackendKind, HealthStatus, LineStream, Namespace, StorageBackend, Updater,
    HEALTH_PROBE_TIMEOUT,
};
use crate::config::SecretsManagerConfig;
use crate::error::{StorageError, StorageResult};
use crate::keys::sanitize_key_path;

const SECRET_ROOT: &str = "openclaw-auth";

/// Encrypted credential storage over the managed secrets service.
#[derive(Debug, Clone)]
pub struct SecretsManagerBackend {
    client: Client,
    kms_key_id: Option<String>,
}

impl SecretsManagerBackend {
    /// Creates a backend with a pre-built client.
    pub fn new(client: Client, kms_key_id: Option<String>) -> Self {
        Self { client, kms_key_id }
    }

    /// Creates a backend using the standard AWS config chain.
    pub async fn connect(config: &SecretsManagerConfig) -> StorageResult<Self> {
        let region = resolve_region(config.region.as_deref(), Some(&config.secret_arn));
        let sdk = sdk_config(region).await;
        Ok(Self::new(Client::new(&sdk), config.kms_key_id.clone()))
    }

    fn secret_name(ns: Namespace, key: &str) -> String {
        format!("{SECRET_ROOT}/{ns}/{}", sanitize_key_path(key))
    }

    fn namespace_root(ns: Namespace) -> String {
        format!("{SECRET_ROOT}/{ns}/")
    }

    async fn create_secret(
        &self,
        ns: Namespace,
        name: &str,
        payload: &str,
    ) -> StorageResult<()> {
        let mut request = self
            .client
            .create_secret()
            .name(name)
            .secret_string(payload)
            .tags(Tag::builder().key("Application").value("openclaw").build())
            .tags(Tag::builder().key("Namespace").value(ns.as_str()).build());
        if let Some(kms_key_id) = &self.kms_key_id {
            request = request.kms_key_id(kms_key_id);
        }
        request
            .send()
            .await
            .map_err(|e| sdk_unavailable(e, "create secret"))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SecretsManagerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SecretsManager
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.client
            .list_secrets()
            .max_results(1)
            .send()
            .await
            .map_err(|e| sdk_unavailable(e, "list secrets"))?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: &str) -> StorageResult<Option<Value>> {
        let name = Self::secret_name(ns, key);
        let response = match self
            .client
            .get_secret_value()
            .secret_id(&name)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception())
                {
                    return Ok(None);
                }
                return Err(sdk_unavailable(err, "get secret"));
            }
        };
        Ok(response.secret_string().map(decode_secret_string))
    }

    async fn set(&self, ns: Namespace, key: &str, value: &Value) -> StorageResult<()> {
        let name = Self::secret_name(ns, key);
        let payload = encode_secret_string(value)?;
        match self
            .client
            .put_secret_value()
            .secret_id(&name)
            .secret_string(&payload)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception())
                {
                    return self.create_secret(ns, &name, &payload).await;
                }
                Err(sdk_unavailable(err, "put secret value"))
            }
        }
    }

    async fn delete(&self, ns: Namespace, key: &str) -> StorageResult<bool> {
        let name = Self::secret_name(ns, key);
        match self
            .client
            .delete_secret()
            .secret_id(&name)
            .force_delete_without_recovery(true)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception())
                {
                    return Ok(false);
                }
                Err(sdk_unavailable(err, "delete secret"))
            }
        }
    }

    async fn list(&self, ns: Namespace, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let root = Self::namespace_root(ns);
        let filter = Filter::builder()
            .key(FilterNameStringType::Name)
            .values(&root)
            .build();
        let mut keys = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_secrets()
                .filters(filter.clone())
                .max_results(100);
            if let Some(token) = next_token.take() {
                request = request.next_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| sdk_unavailable(e, "list secrets"))?;
            for entry in response.secret_list() {
                let Some(key) = entry.name().and_then(|name| name.strip_prefix(&root)) else {
                    continue;
                };
                if let Some(prefix) = prefix {
                    if !key.starts_with(prefix) {
                        continue;
                    }
                }
                keys.push(key.to_string());
            }
            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(keys)
    }

    /// Read-apply-write; credentials are written by one process at a
    /// time in practice, so no conditional guard is layered on top.
    async fn update(
        &self,
        ns: Namespace,
        key: &str,
        mut apply: Updater,
    ) -> StorageResult<Option<Value>> {
        let current = self.get(ns, key).await?;
        let next = apply(current);
        match &next {
            Some(value) => self.set(ns, key, value).await?,
            None => {
                self.delete(ns, key).await?;
            }
        }
        Ok(next)
    }

    async fn append(&self, _ns: Namespace, _key: &str, _line: &str) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            backend: BackendKind::SecretsManager,
            operation: "append",
        })
    }

    async fn read_lines(&self, _ns: Namespace, _key: &str) -> StorageResult<LineStream> {
        Err(StorageError::Unsupported {
            backend: BackendKind::SecretsManager,
            operation: "read_lines",
        })
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let probe = self.client.list_secrets().max_results(1).send();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;
        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => HealthStatus::healthy(elapsed(started)),
            Ok(Err(e)) => HealthStatus::failed(elapsed(started), e.to_string()),
            Err(_) => HealthStatus::failed(elapsed(started), "health probe timed out"),
        }
    }
}

/// Strings are stored raw; everything else as canonical JSON.
fn encode_secret_string(value: &Value) -> StorageResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other).map_err(|e| StorageError::InvalidArgument {
            message: format!("value is not serializable: {e}"),
        }),
    }
}

/// Inverse of [`encode_secret_string`]: JSON parses back to structure,
/// anything else is a plain string credential.
fn decode_secret_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn sdk_unavailable<E>(err: E, what: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::Unavailable {
        backend: BackendKind::SecretsManager,
        message: format!("{what}: {err}"),
        source: Some(Box::new(err)),
    }
}
