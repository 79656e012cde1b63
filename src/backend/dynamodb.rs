//! Document-database backend for namespaced key-value storage.
//!
//! Single-table layout with composite primary keys:
//!
//! | Attribute   | Type   | Description                             |
//! |-------------|--------|-----------------------------------------|
//! | `PK`        | String | Partition key: `<namespace>#<key>`      |
//! | `SK`        | String | Sort key: `DATA`                        |
//! | `namespace` | String | GSI partition key                       |
//! | `key`       | String | GSI sort key                            |
//! | `data`      | String | Canonical JSON document                 |
//! | `updatedAt` | String | RFC 3339 write timestamp                |
//! | `ttl`       | Number | Epoch seconds for native TTL (optional) |
//! | `rev`       | Number | Monotonic revision guarding `update`    |
//!
//! `list` queries the `(namespace, key)` global secondary index with
//! `begins_with` prefix filtering and standard `ExclusiveStartKey`
//! pagination. Items whose `ttl` already elapsed are treated as absent on
//! every read path, even before the backend reclaims them.
//!
//! `update` is a read / apply / conditional-write loop: the write carries
//! `rev = :prev` (or an absence condition for fresh keys) and retries with
//! a fresh read when the condition fails, so concurrent updates serialize
//! per key. This backend has no append-log shape; `append`/`read_lines`
//! return `Unsupported` and transcripts belong to the event-memory
//! backend.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use chrono::Utc;
use serde_json::Value;

use crate::backend::aws::{resolve_region, sdk_config};
use crate::backend::{
    BackendKind, HealthStatus, LineStream, Namespace, StorageBackend, Updater,
    HEALTH_PROBE_TIMEOUT,
};
use crate::config::DynamoDbConfig;
use crate::error::{StorageError, StorageResult};
use crate::keys::sanitize_key;

const SORT_KEY: &str = "DATA";
const MAX_UPDATE_ATTEMPTS: u32 = 16;

/// Namespaced key-value storage over a single DynamoDB table.
#[derive(Debug, Clone)]
pub struct DynamoDbBackend {
    client: Client,
    table_name: String,
    index_name: String,
    ttl_seconds: u64,
}

impl DynamoDbBackend {
    /// Creates a backend with a pre-built client.
    pub fn new(client: Client, config: &DynamoDbConfig) -> Self {
        Self {
            client,
            table_name: config.table_name.clone(),
            index_name: config.namespace_index_name.clone(),
            ttl_seconds: config.ttl_seconds,
        }
    }

    /// Creates a backend using the standard AWS config chain.
    pub async fn connect(config: &DynamoDbConfig) -> StorageResult<Self> {
        let region = resolve_region(config.region.as_deref(), None);
        let sdk = sdk_config(region).await;
        Ok(Self::new(Client::new(&sdk), config))
    }

    fn pk(ns: Namespace, sanitized: &str) -> String {
        format!("{ns}#{sanitized}")
    }

    fn ttl_epoch(&self) -> Option<i64> {
        (self.ttl_seconds > 0).then(|| Utc::now().timestamp() + self.ttl_seconds as i64)
    }

    /// Reads the item, treating elapsed TTLs as absent. Returns the data
    /// document and the revision attribute (absent for items written by
    /// unconditional `set`).
    async fn get_item_live(
        &self,
        ns: Namespace,
        sanitized: &str,
    ) -> StorageResult<Option<(Value, Option<u64>)>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(Self::pk(ns, sanitized)))
            .key("SK", AttributeValue::S(SORT_KEY.to_string()))
            .send()
            .await
            .map_err(|e| sdk_unavailable(e, "get item"))?;

        let Some(item) = result.item() else {
            return Ok(None);
        };
        if is_expired(item, Utc::now().timestamp()) {
            return Ok(None);
        }

        let data = item
            .get("data")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| StorageError::Corruption {
                key: format!("{ns}/{sanitized}"),
                message: "missing or invalid data attribute".to_string(),
            })?;
        let value: Value =
            serde_json::from_str(data).map_err(|e| StorageError::Corruption {
                key: format!("{ns}/{sanitized}"),
                message: e.to_string(),
            })?;
        let rev = item
            .get("rev")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<u64>().ok());
        Ok(Some((value, rev)))
    }

    /// Conditional write backing `update`. `expected` is the observed
    /// revision state: `None` means the item did not exist, `Some(None)`
    /// means it existed without a revision.
    async fn conditional_put(
        &self,
        ns: Namespace,
        sanitized: &str,
        value: &Value,
        expected: Option<Option<u64>>,
    ) -> StorageResult<bool> {
        let data = serde_json::to_string(value).map_err(|e| StorageError::InvalidArgument {
            message: format!("value is not serializable: {e}"),
        })?;
        let next_rev = match expected {
            Some(Some(rev)) => rev + 1,
            _ => 1,
        };

        let mut expression =
            String::from("SET #data = :data, #ns = :ns, #key = :key, #updated = :updated, #rev = :rev");
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(Self::pk(ns, sanitized)))
            .key("SK", AttributeValue::S(SORT_KEY.to_string()))
            .expression_attribute_names("#data", "data")
            .expression_attribute_names("#ns", "namespace")
            .expression_attribute_names("#key", "key")
            .expression_attribute_names("#updated", "updatedAt")
            .expression_attribute_names("#rev", "rev")
            .expression_attribute_values(":data", AttributeValue::S(data))
            .expression_attribute_values(":ns", AttributeValue::S(ns.as_str().to_string()))
            .expression_attribute_values(":key", AttributeValue::S(sanitized.to_string()))
            .expression_attribute_values(":updated", AttributeValue::S(Utc::now().to_rfc3339()))
            .expression_attribute_values(":rev", AttributeValue::N(next_rev.to_string()));

        if let Some(epoch) = self.ttl_epoch() {
            expression.push_str(", #ttl = :ttl");
            request = request
                .expression_attribute_names("#ttl", "ttl")
                .expression_attribute_values(":ttl", AttributeValue::N(epoch.to_string()));
        }

        request = request.update_expression(expression);
        request = match expected {
            None => request.condition_expression("attribute_not_exists(PK)"),
            Some(None) => {
                request.condition_expression("attribute_exists(PK) AND attribute_not_exists(#rev)")
            }
            Some(Some(rev)) => request
                .condition_expression("#rev = :prev")
                .expression_attribute_values(":prev", AttributeValue::N(rev.to_string())),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                if sdk_err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    return Ok(false);
                }
                Err(sdk_unavailable(sdk_err, "update item"))
            }
        }
    }
}

#[async_trait]
impl StorageBackend for DynamoDbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DynamoDb
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
            .map_err(|e| sdk_unavailable(e, "describe table"))?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: &str) -> StorageResult<Option<Value>> {
        let sanitized = sanitize_key(key);
        Ok(self
            .get_item_live(ns, &sanitized)
            .await?
            .map(|(value, _)| value))
    }

    async fn set(&self, ns: Namespace, key: &str, value: &Value) -> StorageResult<()> {
        let sanitized = sanitize_key(key);
        let data = serde_json::to_string(value).map_err(|e| StorageError::InvalidArgument {
            message: format!("value is not serializable: {e}"),
        })?;

        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("PK", AttributeValue::S(Self::pk(ns, &sanitized)))
            .item("SK", AttributeValue::S(SORT_KEY.to_string()))
            .item("namespace", AttributeValue::S(ns.as_str().to_string()))
            .item("key", AttributeValue::S(sanitized.clone()))
            .item("data", AttributeValue::S(data))
            .item("updatedAt", AttributeValue::S(Utc::now().to_rfc3339()));
        if let Some(epoch) = self.ttl_epoch() {
            request = request.item("ttl", AttributeValue::N(epoch.to_string()));
        }
        request
            .send()
            .await
            .map_err(|e| sdk_unavailable(e, "put item"))?;
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> StorageResult<bool> {
        let sanitized = sanitize_key(key);
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(Self::pk(ns, &sanitized)))
            .key("SK", AttributeValue::S(SORT_KEY.to_string()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| sdk_unavailable(e, "delete item"))?;

        Ok(result
            .attributes()
            .is_some_and(|attrs| !attrs.is_empty() && !is_expired(attrs, Utc::now().timestamp())))
    }

    async fn list(&self, ns: Namespace, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let prefix = prefix.map(sanitize_key);
        let now = Utc::now().timestamp();
        let mut keys = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            let mut query = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(&self.index_name)
                .projection_expression("#key, #ttl")
                .expression_attribute_names("#ns", "namespace")
                .expression_attribute_names("#key", "key")
                .expression_attribute_names("#ttl", "ttl")
                .expression_attribute_values(":ns", AttributeValue::S(ns.as_str().to_string()));
            query = match &prefix {
                Some(prefix) => query
                    .key_condition_expression("#ns = :ns AND begins_with(#key, :prefix)")
                    .expression_attribute_values(":prefix", AttributeValue::S(prefix.clone())),
                None => query.key_condition_expression("#ns = :ns"),
            };
            if let Some(start_key) = exclusive_start_key.take() {
                query = query.set_exclusive_start_key(Some(start_key));
            }

            let output = query
                .send()
                .await
                .map_err(|e| sdk_unavailable(e, "query namespace index"))?;

            for item in output.items() {
                if is_expired(item, now) {
                    continue;
                }
                if let Some(key) = item.get("key").and_then(|v| v.as_s().ok()) {
                    keys.push(key.clone());
                }
            }

            match output.last_evaluated_key() {
                Some(last_key) if !last_key.is_empty() => {
                    exclusive_start_key = Some(last_key.clone());
                }
                _ => break,
            }
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
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.get_item_live(ns, &sanitized).await?;
            let (current_value, expected) = match current {
                Some((value, rev)) => (Some(value), Some(rev)),
                None => (None, None),
            };
            let next = apply(current_value);

            let applied = match &next {
                Some(value) => {
                    self.conditional_put(ns, &sanitized, value, expected)
                        .await?
                }
                None => {
                    // Deleting under contention is resolved by
                    // last-write-wins; the unconditional delete is
                    // idempotent either way.
                    self.delete(ns, key).await?;
                    true
                }
            };
            if applied {
                return Ok(next);
            }
            tracing::debug!(
                namespace = %ns,
                key = %sanitized,
                attempt,
                "revision conflict on update, re-reading"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10 * u64::from(attempt))).await;
        }
        Err(StorageError::Unavailable {
            backend: BackendKind::DynamoDb,
            message: format!(
                "update of {ns}/{sanitized} lost the revision race {MAX_UPDATE_ATTEMPTS} times"
            ),
            source: None,
        })
    }

    async fn append(&self, _ns: Namespace, _key: &str, _line: &str) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            backend: BackendKind::DynamoDb,
            operation: "append",
        })
    }

    async fn read_lines(&self, _ns: Namespace, _key: &str) -> StorageResult<LineStream> {
        Err(StorageError::Unsupported {
            backend: BackendKind::DynamoDb,
            operation: "read_lines",
        })
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let probe = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;
        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => HealthStatus::healthy(elapsed(started)),
            Ok(Err(e)) => HealthStatus::failed(elapsed(started), e.to_string()),
            Err(_) => HealthStatus::failed(elapsed(started), "health probe timed out"),
        }
    }
}

fn is_expired(attrs: &HashMap<String, AttributeValue>, now: i64) -> bool {
    attrs
        .get("ttl")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
        .is_some_and(|ttl| ttl <= now)
}

fn sdk_unavailable<E>(err: E, what: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::Unavailable {
        backend: BackendKind::DynamoDb,
        message: format!("{what}: {err}"),
        source: Some(Box::new(err)),
    }
}
