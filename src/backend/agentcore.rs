//! Event-memory backend over the AgentCore memory service.
//!
//! The upstream API is append-only and keyed by
//! `(memoryId, actorId, sessionId)`; there is no delete operation. This
//! backend maps key-value and append-log semantics onto event streams:
//!
//! - actor: `openclaw-storage[/<prefix>]/<namespace>`;
//! - key-value keys become `kv-<sanitized>` sessions where each `set` is
//!   one blob event `{"_type":"kv","value":…}` and the most recent event
//!   wins — a `{"_type":"tombstone"}` event shadows every prior value
//!   (and a later `set` resurrects the key);
//! - transcript keys become `tr-<sanitized>` sessions where each line is
//!   a blob event `{"_type":"line","text":…}`, mirrored by a
//!   conversational payload when the line is a user/assistant message so
//!   the service's long-term memory extraction has structured input.
//!
//! `update` here is a read-then-write without a concurrency guard; two
//! racing updaters can interleave. Callers that need strict atomicity for
//! `sessions` should run hybrid mode, which routes that namespace to the
//! document database instead.
//!
//! The AWS client sits behind the [`MemoryEvents`] seam so the mapping
//! logic is testable without the service.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_bedrockagentcore::types::{Content, Conversational, PayloadType, Role};
use aws_smithy_types::{DateTime, Document, Number as SmithyNumber};
use chrono::Utc;
use serde_json::{json, Value};

use crate::backend::aws::{resolve_region, sdk_config};
use crate::backend::{
    line_stream_from, BackendKind, HealthStatus, LineStream, Namespace, StorageBackend, Updater,
    HEALTH_PROBE_TIMEOUT,
};
use crate::blob;
use crate::config::AgentCoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::keys::sanitize_key;

const ACTOR_ROOT: &str = "openclaw-storage";
const KV_SESSION_PREFIX: &str = "kv-";
const TRANSCRIPT_SESSION_PREFIX: &str = "tr-";

/// Speaker of a conversational payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationRole {
    /// End-user message.
    User,
    /// Agent message.
    Assistant,
}

/// One payload attached to an event at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Opaque document payload; the faithful-recovery channel.
    Blob(Value),
    /// Structured conversational mirror for long-term-memory extraction.
    Conversational {
        /// Who spoke.
        role: ConversationRole,
        /// Flattened message text.
        text: String,
    },
}

/// An event as read back from the service. Only blob payloads are
/// consumed on the read path.
#[derive(Debug, Clone, Default)]
pub struct MemoryEvent {
    /// Blob payloads in payload order.
    pub blobs: Vec<Value>,
}

/// Client seam over the event-memory data plane.
///
/// `recent_events` yields events **newest-first**, matching the upstream
/// list order; the backend reverses where chronology is required.
#[async_trait]
pub trait MemoryEvents: Send + Sync {
    /// Appends one event carrying the given payloads.
    async fn put_event(
        &self,
        actor_id: &str,
        session_id: &str,
        payloads: Vec<EventPayload>,
    ) -> StorageResult<()>;

    /// Events for a stream, newest-first. Missing streams read as empty.
    async fn recent_events(
        &self,
        actor_id: &str,
        session_id: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryEvent>>;

    /// Every session id under an actor. Missing actors read as empty.
    async fn list_session_ids(&self, actor_id: &str) -> StorageResult<Vec<String>>;
}

enum KvState {
    Live(Value),
    Tombstone,
}

/// Key-value and append-log storage over event streams.
pub struct EventMemoryBackend {
    events: Arc<dyn MemoryEvents>,
    namespace_prefix: Option<String>,
}

impl EventMemoryBackend {
    /// Connects to the configured memory resource.
    pub async fn connect(config: &AgentCoreConfig) -> StorageResult<Self> {
        let client = AgentCoreClient::connect(config).await?;
        Ok(Self::with_client(
            Arc::new(client),
            config.namespace_prefix.clone(),
        ))
    }

    /// Builds the backend over any [`MemoryEvents`] implementation.
    pub fn with_client(events: Arc<dyn MemoryEvents>, namespace_prefix: Option<String>) -> Self {
        Self {
            events,
            namespace_prefix,
        }
    }

    fn actor_id(&self, ns: Namespace) -> String {
        match self.namespace_prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{ACTOR_ROOT}/{prefix}/{ns}"),
            None => format!("{ACTOR_ROOT}/{ns}"),
        }
    }

    fn kv_session(key: &str) -> String {
        format!("{KV_SESSION_PREFIX}{}", sanitize_key(key))
    }

    fn transcript_session(key: &str) -> String {
        format!("{TRANSCRIPT_SESSION_PREFIX}{}", sanitize_key(key))
    }

    /// Latest live value for a kv session; tombstones read as absent.
    async fn latest_kv(&self, ns: Namespace, key: &str) -> StorageResult<Option<Value>> {
        let events = self
            .events
            .recent_events(&self.actor_id(ns), &Self::kv_session(key), Some(1))
            .await?;
        Ok(events
            .first()
            .and_then(kv_state_from_event)
            .and_then(|state| match state {
                KvState::Live(value) => Some(value),
                KvState::Tombstone => None,
            }))
    }

    async fn write_kv(&self, ns: Namespace, key: &str, value: &Value) -> StorageResult<()> {
        self.events
            .put_event(
                &self.actor_id(ns),
                &Self::kv_session(key),
                vec![EventPayload::Blob(json!({"_type": "kv", "value": value}))],
            )
            .await
    }

    async fn write_tombstone(&self, ns: Namespace, key: &str) -> StorageResult<()> {
        self.events
            .put_event(
                &self.actor_id(ns),
                &Self::kv_session(key),
                vec![EventPayload::Blob(json!({
                    "_type": "tombstone",
                    "deletedAt": Utc::now().to_rfc3339(),
                }))],
            )
            .await
    }
}

#[async_trait]
impl StorageBackend for EventMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::AgentCore
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn initialize(&self) -> StorageResult<()> {
        // Cheap read against the memory resource; surfaces missing
        // resources and bad credentials at startup.
        self.events
            .recent_events(&self.actor_id(Namespace::Sessions), "kv-health-probe", Some(1))
            .await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: &str) -> StorageResult<Option<Value>> {
        self.latest_kv(ns, key).await
    }

    async fn set(&self, ns: Namespace, key: &str, value: &Value) -> StorageResult<()> {
        self.write_kv(ns, key, value).await
    }

    async fn delete(&self, ns: Namespace, key: &str) -> StorageResult<bool> {
        let existed = self.latest_kv(ns, key).await?.is_some();
        self.write_tombstone(ns, key).await?;
        Ok(existed)
    }

    async fn list(&self, ns: Namespace, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let prefix = prefix.map(sanitize_key);
        let session_ids = self.events.list_session_ids(&self.actor_id(ns)).await?;
        let mut keys = Vec::new();
        for session_id in session_ids {
            let Some(key) = session_id.strip_prefix(KV_SESSION_PREFIX) else {
                continue;
            };
            if let Some(prefix) = &prefix {
                if !key.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            // Tombstoned keys stay out of listings.
            if self.latest_kv(ns, key).await?.is_some() {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    /// Read-then-write without a guard; see the module docs for the
    /// documented race and the hybrid-mode escape hatch.
    async fn update(
        &self,
        ns: Namespace,
        key: &str,
        mut apply: Updater,
    ) -> StorageResult<Option<Value>> {
        let current = self.latest_kv(ns, key).await?;
        let next = apply(current);
        match &next {
            Some(value) => self.write_kv(ns, key, value).await?,
            None => self.write_tombstone(ns, key).await?,
        }
        Ok(next)
    }

    async fn append(&self, ns: Namespace, key: &str, line: &str) -> StorageResult<()> {
        let mut payloads = vec![EventPayload::Blob(json!({"_type": "line", "text": line}))];
        if let Some(conversational) = conversational_payload(line) {
            payloads.push(conversational);
        }
        self.events
            .put_event(&self.actor_id(ns), &Self::transcript_session(key), payloads)
            .await
    }

    async fn read_lines(&self, ns: Namespace, key: &str) -> StorageResult<LineStream> {
        let events = self
            .events
            .recent_events(&self.actor_id(ns), &Self::transcript_session(key), None)
            .await?;
        // Upstream order is newest-first; the contract is chronological.
        let mut lines: Vec<String> = events
            .iter()
            .filter_map(|event| event.blobs.first().and_then(blob::line_text_from_blob))
            .collect();
        lines.reverse();
        Ok(line_stream_from(lines))
    }

    async fn health_check(&self) -> HealthStatus {
        let started = std::time::Instant::now();
        let actor_id = self.actor_id(Namespace::Sessions);
        let probe = self
            .events
            .recent_events(&actor_id, "kv-health-probe", Some(1));
        let elapsed = |started: std::time::Instant| started.elapsed().as_millis() as u64;
        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => HealthStatus::healthy(elapsed(started)),
            Ok(Err(e)) => HealthStatus::failed(elapsed(started), e.to_string()),
            Err(_) => HealthStatus::failed(elapsed(started), "health probe timed out"),
        }
    }
}

fn kv_state_from_event(event: &MemoryEvent) -> Option<KvState> {
    let blob = event.blobs.first()?;
    let normalized = blob::normalize_blob(blob);
    let obj = normalized.as_object()?;
    match obj.get("_type").and_then(Value::as_str) {
        Some("kv") => Some(KvState::Live(
            obj.get("value").cloned().unwrap_or(Value::Null),
        )),
        Some("tombstone") => Some(KvState::Tombstone),
        _ => None,
    }
}

/// Builds the conversational mirror payload for a transcript line, when
/// the line is a user or assistant message with textual content.
fn conversational_payload(line: &str) -> Option<EventPayload> {
    let value: Value = serde_json::from_str(line).ok()?;
    let message = value.get("message").unwrap_or(&value);
    let role = match message.get("role").and_then(Value::as_str)? {
        "user" => ConversationRole::User,
        "assistant" => ConversationRole::Assistant,
        _ => return None,
    };
    let text = message_text(message)?;
    if text.is_empty() {
        return None;
    }
    Some(EventPayload::Conversational { role, text })
}

fn message_text(message: &Value) -> Option<String> {
    match message.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(items)) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// AWS adapter
// ---------------------------------------------------------------------------

/// [`MemoryEvents`] over the AgentCore memory data plane.
pub struct AgentCoreClient {
    client: aws_sdk_bedrockagentcore::Client,
    memory_id: String,
}

impl AgentCoreClient {
    /// Connects using the standard AWS config chain. The memory id is the
    /// ARN segment after the last `/`.
    pub async fn connect(config: &AgentCoreConfig) -> StorageResult<Self> {
        let memory_id = memory_id_from_arn(&config.memory_arn)?;
        let region = resolve_region(config.region.as_deref(), Some(&config.memory_arn));
        let sdk = sdk_config(region).await;
        Ok(Self {
            client: aws_sdk_bedrockagentcore::Client::new(&sdk),
            memory_id,
        })
    }
}

#[async_trait]
impl MemoryEvents for AgentCoreClient {
    async fn put_event(
        &self,
        actor_id: &str,
        session_id: &str,
        payloads: Vec<EventPayload>,
    ) -> StorageResult<()> {
        let mut request = self
            .client
            .create_event()
            .memory_id(&self.memory_id)
            .actor_id(actor_id)
            .session_id(session_id)
            .event_timestamp(DateTime::from_millis(Utc::now().timestamp_millis()));
        for payload in payloads {
            request = request.payload(to_payload_type(payload)?);
        }
        request
            .send()
            .await
            .map_err(|e| sdk_unavailable(e, "create event"))?;
        Ok(())
    }

    async fn recent_events(
        &self,
        actor_id: &str,
        session_id: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<MemoryEvent>> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_events()
                .memory_id(&self.memory_id)
                .actor_id(actor_id)
                .session_id(session_id)
                .include_payloads(true);
            if let Some(limit) = limit {
                request = request.max_results(limit.min(100) as i32);
            }
            if let Some(token) = next_token.take() {
                request = request.next_token(token);
            }
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if err
                        .as_service_error()
                        .is_some_and(|e| e.is_resource_not_found_exception())
                    {
                        return Ok(events);
                    }
                    return Err(sdk_unavailable(err, "list events"));
                }
            };
            for event in response.events() {
                let blobs = event
                    .payload()
                    .iter()
                    .filter_map(|payload| match payload {
                        PayloadType::Blob(document) => Some(document_to_value(document)),
                        _ => None,
                    })
                    .collect();
                events.push(MemoryEvent { blobs });
            }
            if let Some(limit) = limit {
                if events.len() >= limit {
                    events.truncate(limit);
                    return Ok(events);
                }
            }
            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => return Ok(events),
            }
        }
    }

    async fn list_session_ids(&self, actor_id: &str) -> StorageResult<Vec<String>> {
        let mut session_ids = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_sessions()
                .memory_id(&self.memory_id)
                .actor_id(actor_id)
                .max_results(100);
            if let Some(token) = next_token.take() {
                request = request.next_token(token);
            }
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if err
                        .as_service_error()
                        .is_some_and(|e| e.is_resource_not_found_exception())
                    {
                        return Ok(session_ids);
                    }
                    return Err(sdk_unavailable(err, "list sessions"));
                }
            };
            for summary in response.session_summaries() {
                session_ids.push(summary.session_id().to_string());
            }
            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => return Ok(session_ids),
            }
        }
    }
}

fn to_payload_type(payload: EventPayload) -> StorageResult<PayloadType> {
    match payload {
        EventPayload::Blob(value) => Ok(PayloadType::Blob(value_to_document(&value))),
        EventPayload::Conversational { role, text } => {
            let conversational = Conversational::builder()
                .content(Content::Text(text))
                .role(match role {
                    ConversationRole::User => Role::User,
                    ConversationRole::Assistant => Role::Assistant,
                })
                .build()
                .map_err(|e| StorageError::InvalidArgument {
                    message: format!("conversational payload rejected: {e}"),
                })?;
            Ok(PayloadType::Conversational(conversational))
        }
    }
}

/// The memory id is the ARN segment after the last `/`; a bare id
/// without ARN punctuation passes through unchanged.
fn memory_id_from_arn(memory_arn: &str) -> StorageResult<String> {
    let id = memory_arn.rsplit('/').next().unwrap_or_default();
    if id.is_empty() {
        return Err(StorageError::config(
            format!("cannot derive a memory id from {memory_arn:?}"),
            "agentcore.memoryArn",
        ));
    }
    Ok(id.to_string())
}

fn sdk_unavailable<E>(err: E, what: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::Unavailable {
        backend: BackendKind::AgentCore,
        message: format!("{what}: {err}"),
        source: Some(Box::new(err)),
    }
}

fn value_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(SmithyNumber::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(SmithyNumber::NegInt(i))
            } else {
                Document::Number(SmithyNumber::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(value_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_document(v)))
                .collect(),
        ),
    }
}

fn document_to_value(document: &Document) -> Value {
    match document {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(n) => match n {
            SmithyNumber::PosInt(u) => Value::from(*u),
            SmithyNumber::NegInt(i) => Value::from(*i),
            SmithyNumber::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(document_to_value).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_value(v)))
                .collect(),
        ),
    }
}
