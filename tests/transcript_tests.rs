//! Integration tests for transcript locations and the unified reader.

use openclaw_storage::{
    build_agentcore_transcript_uri, parse_transcript_uri, read_transcript_messages,
    StorageConfig,
};
use serde_json::json;

// ─── URI scheme ─────────────────────────────────────────────────────────────

mod uri_scheme {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_handles_slashes_inside_the_memory_arn() {
        let parsed = parse_transcript_uri(
            "agentcore://arn:aws:bedrock-agentcore:us-east-1:123:memory/m1/s-xyz",
        )
        .unwrap();
        assert_eq!(
            parsed.memory_arn,
            "arn:aws:bedrock-agentcore:us-east-1:123:memory/m1"
        );
        assert_eq!(parsed.session_id, "s-xyz");
    }

    #[test]
    fn build_and_parse_are_inverses() {
        for (arn, sid) in [
            ("arn:aws:bedrock-agentcore:us-east-1:123:memory/m1", "s-1"),
            ("short-arn", "session.with.dots"),
        ] {
            let parsed = parse_transcript_uri(&build_agentcore_transcript_uri(arn, sid)).unwrap();
            assert_eq!(parsed.memory_arn, arn);
            assert_eq!(parsed.session_id, sid);
        }
    }
}

// ─── File transcripts ───────────────────────────────────────────────────────

mod file_transcripts {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn reads_messages_in_file_order_with_sanitization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        let lines = [
            r#"{"type":"message","message":{"role":"user","content":[{"text":"hello"}]}}"#,
            r#"{"type":"tool_result","detail":"skipped, no message field"}"#,
            "not even json",
            r#"{"type":"message","message":{"role":"assistant","content":[{"text":"{'role': 'assistant', 'content': [{'text': \"Hello, I'm A\"}]}"}]}}"#,
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let messages =
            read_transcript_messages(path.to_str().unwrap(), &StorageConfig::default())
                .await
                .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], json!("user"));
        assert_eq!(messages[0]["content"][0]["text"], json!("hello"));
        // The Python-dict content was sanitized down to the inner text.
        assert_eq!(messages[1]["content"][0]["text"], json!("Hello, I'm A"));
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let messages = read_transcript_messages(
            "/no/such/dir/transcript.jsonl",
            &StorageConfig::default(),
        )
        .await
        .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn crlf_line_endings_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        std::fs::write(
            &path,
            "{\"message\":{\"role\":\"user\",\"content\":[{\"text\":\"a\"}]}}\r\n{\"message\":{\"role\":\"assistant\",\"content\":[{\"text\":\"b\"}]}}\r\n",
        )
        .unwrap();
        let messages =
            read_transcript_messages(path.to_str().unwrap(), &StorageConfig::default())
                .await
                .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"][0]["text"], json!("b"));
    }
}
