//! Transcript location URIs and the unified transcript reader.
//!
//! A session record points at its transcript with an opaque location:
//! either an absolute `.jsonl` path on the local filesystem, or
//! `agentcore://<memoryArn>/<sessionId>` addressing an event stream. The
//! memory ARN itself contains slashes, so parsing splits at the **last**
//! slash of the post-scheme remainder.
//!
//! [`read_transcript_messages`] dispatches on the scheme, JSON-parses
//! each line, applies the Python-dict content sanitizer to the `message`
//! field, and yields messages in chronological order (the event backend
//! already re-orders the service's newest-first pages).

use std::path::Path;

use serde_json::Value;

use crate::backend::Namespace;
use crate::blob::sanitize_message;
use crate::config::{AgentCoreConfig, Classification, ServiceMode, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::service::StorageService;

/// Scheme prefix of event-stream transcript locations.
pub const AGENTCORE_URI_SCHEME: &str = "agentcore://";

/// A parsed `agentcore://` transcript location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCoreTranscript {
    /// The memory resource holding the stream.
    pub memory_arn: String,
    /// The event stream within it.
    pub session_id: String,
}

/// Whether a location string addresses an event stream.
pub fn is_agentcore_uri(uri: &str) -> bool {
    uri.starts_with(AGENTCORE_URI_SCHEME)
}

/// Composes an `agentcore://` transcript location.
pub fn build_agentcore_transcript_uri(memory_arn: &str, session_id: &str) -> String {
    format!("{AGENTCORE_URI_SCHEME}{memory_arn}/{session_id}")
}

/// Parses an `agentcore://` transcript location.
///
/// The remainder after the scheme splits at its last `/`: everything
/// before is the memory ARN, everything after the session id. Both must
/// be non-empty.
pub fn parse_transcript_uri(uri: &str) -> StorageResult<AgentCoreTranscript> {
    let rest = uri
        .strip_prefix(AGENTCORE_URI_SCHEME)
        .ok_or_else(|| StorageError::InvalidArgument {
            message: format!("not an agentcore transcript URI: {uri}"),
        })?;
    let (memory_arn, session_id) =
        rest.rsplit_once('/')
            .ok_or_else(|| StorageError::InvalidArgument {
                message: format!("transcript URI is missing a session id: {uri}"),
            })?;
    if memory_arn.is_empty() || session_id.is_empty() {
        return Err(StorageError::InvalidArgument {
            message: format!("transcript URI has empty components: {uri}"),
        });
    }
    Ok(AgentCoreTranscript {
        memory_arn: memory_arn.to_string(),
        session_id: session_id.to_string(),
    })
}

/// Reads a transcript's messages from either location form.
///
/// Missing files read as empty. Lines that do not parse as JSON, or
/// parse without a `message` field, are skipped. Each yielded message has
/// the content sanitizer applied.
pub async fn read_transcript_messages(
    uri: &str,
    config: &StorageConfig,
) -> StorageResult<Vec<Value>> {
    if is_agentcore_uri(uri) {
        read_agentcore_messages(uri, config).await
    } else {
        read_file_messages(Path::new(uri)).await
    }
}

async fn read_file_messages(path: &Path) -> StorageResult<Vec<Value>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::Unavailable {
                backend: crate::backend::BackendKind::File,
                message: format!("{}: {e}", path.display()),
                source: Some(Box::new(e)),
            })
        }
    };
    Ok(content.lines().filter_map(message_from_line).collect())
}

async fn read_agentcore_messages(uri: &str, config: &StorageConfig) -> StorageResult<Vec<Value>> {
    let location = parse_transcript_uri(uri)?;

    // A fresh, non-singleton service aimed at the URI's memory resource:
    // the session index can reference transcripts outside the configured
    // default memory.
    let mut config = config.clone();
    match &mut config.agentcore {
        Some(agentcore) => agentcore.memory_arn = location.memory_arn.clone(),
        None => {
            config.agentcore = Some(AgentCoreConfig {
                memory_arn: location.memory_arn.clone(),
                region: None,
                namespace_prefix: None,
            })
        }
    }
    if config.mode == ServiceMode::File {
        config.mode = ServiceMode::Agentcore;
    }
    config.data_classification.transcripts = Some(Classification::Cloud);

    let service = StorageService::new(config)?;
    service.initialize().await?;
    let backend = service.get_backend(Namespace::Transcripts).await?;

    let mut stream = backend
        .read_lines(Namespace::Transcripts, &location.session_id)
        .await?;
    let mut messages = Vec::new();
    {
        use futures::StreamExt;
        while let Some(line) = stream.next().await {
            if let Some(message) = message_from_line(&line?) {
                messages.push(message);
            }
        }
    }
    service.close().await?;
    Ok(messages)
}

fn message_from_line(line: &str) -> Option<Value> {
    if line.trim().is_empty() {
        return None;
    }
    let entry: Value = serde_json::from_str(line).ok()?;
    let mut message = entry.get("message")?.clone();
    sanitize_message(&mut message);
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn scheme_detection() {
        assert!(is_agentcore_uri("agentcore://arn/sid"));
        assert!(!is_agentcore_uri("/tmp/transcripts/s.jsonl"));
        assert!(!is_agentcore_uri("agentcore:/missing-slash"));
    }

    #[test]
    fn parse_splits_at_the_last_slash() {
        let parsed = parse_transcript_uri(
            "agentcore://arn:aws:bedrock-agentcore:us-east-1:123:memory/m1/s-xyz",
        )
        .unwrap();
        assert_eq!(
            parsed,
            AgentCoreTranscript {
                memory_arn: "arn:aws:bedrock-agentcore:us-east-1:123:memory/m1".to_string(),
                session_id: "s-xyz".to_string(),
            }
        );
    }

    #[test]
    fn build_then_parse_round_trips() {
        let arn = "arn:aws:bedrock-agentcore:us-east-1:123:memory/m1";
        let uri = build_agentcore_transcript_uri(arn, "s-42");
        let parsed = parse_transcript_uri(&uri).unwrap();
        assert_eq!(parsed.memory_arn, arn);
        assert_eq!(parsed.session_id, "s-42");
    }

    #[test]
    fn empty_components_are_rejected() {
        assert!(parse_transcript_uri("agentcore:///sid").is_err());
        assert!(parse_transcript_uri("agentcore://arn/").is_err());
        assert!(parse_transcript_uri("agentcore://no-slash").is_err());
        assert!(parse_transcript_uri("file:///tmp/x.jsonl").is_err());
    }

    #[test]
    fn message_lines_parse_and_sanitize() {
        let line = r#"{"type":"message","message":{"role":"assistant","content":[{"text":"{'role': 'assistant', 'content': [{'text': \"Hello, I'm A\"}]}"}]}}"#;
        let message = message_from_line(line).unwrap();
        assert_eq!(message["content"][0]["text"], json!("Hello, I'm A"));
    }

    #[test]
    fn non_message_lines_are_skipped() {
        assert_eq!(message_from_line(""), None);
        assert_eq!(message_from_line("not json"), None);
        assert_eq!(message_from_line(r#"{"type":"meta"}"#), None);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let messages = read_transcript_messages(
            "/definitely/not/here/transcript.jsonl",
            &StorageConfig::default(),
        )
        .await
        .unwrap();
        assert!(messages.is_empty());
    }
}
