//! Integration tests for the storage router and service lifecycle.

use std::sync::Arc;

use openclaw_storage::{
    BackendKind, Namespace, StorageConfig, StorageService,
};
use serde_json::json;

fn file_config(dir: &std::path::Path) -> StorageConfig {
    StorageConfig {
        base_dir: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

// ─── Routing scenarios ──────────────────────────────────────────────────────

mod routing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hybrid_mode_resolves_the_documented_backends() {
        let config = StorageConfig::from_json_str(
            r#"{
                "type": "hybrid",
                "dynamodb": {"tableName": "T"},
                "agentcore": {"memoryArn": "A"}
            }"#,
        )
        .unwrap();
        let service = StorageService::new(config).unwrap();
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
    fn secrets_backend_wins_auth_in_any_mode() {
        let config = StorageConfig::from_json_str(
            r#"{
                "type": "file",
                "secretsManager": {"secretArn": "arn:aws:secretsmanager:us-east-1:1:secret:x"}
            }"#,
        )
        .unwrap();
        let service = StorageService::new(config).unwrap();
        assert_eq!(
            service.resolve_backend_kind(Namespace::Auth),
            BackendKind::SecretsManager
        );
        assert_eq!(
            service.resolve_backend_kind(Namespace::Sessions),
            BackendKind::File
        );
    }

    #[test]
    fn missing_cloud_configuration_is_rejected_with_a_hint() {
        let err = StorageConfig::from_json_str(r#"{"type": "agentcore"}"#).unwrap_err();
        assert_eq!(err.hint(), Some("agentcore.memoryArn"));
    }
}

// ─── File-mode end-to-end ───────────────────────────────────────────────────

mod file_mode {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn get_backend_serves_working_storage() {
        let dir = tempfile::tempdir().unwrap();
        let service = StorageService::new(file_config(dir.path())).unwrap();
        service.initialize().await.unwrap();

        let sessions = service.get_backend(Namespace::Sessions).await.unwrap();
        sessions
            .set(Namespace::Sessions, "abc", &json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(
            sessions.get(Namespace::Sessions, "abc").await.unwrap(),
            Some(json!({"a": 1}))
        );
        service.close().await.unwrap();
    }

    #[tokio::test]
    async fn backends_are_memoized_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let service = StorageService::new(file_config(dir.path())).unwrap();
        let first = service.get_backend(Namespace::Sessions).await.unwrap();
        let second = service.get_backend(Namespace::Config).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn health_check_covers_every_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let service = StorageService::new(file_config(dir.path())).unwrap();
        service.initialize().await.unwrap();
        let statuses = service.health_check().await;
        assert_eq!(statuses.len(), 4);
        for (ns, status) in &statuses {
            assert!(status.ok, "{ns} probe failed: {:?}", status.error);
        }
    }

    #[tokio::test]
    async fn config_summary_matches_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let service = StorageService::new(file_config(dir.path())).unwrap();
        for row in service.config_summary() {
            assert_eq!(row.backend, service.resolve_backend_kind(row.namespace));
            assert_eq!(
                row.classification,
                service.classification(row.namespace)
            );
        }
    }
}

// ─── Singleton lifecycle ────────────────────────────────────────────────────

mod singleton {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn shared_returns_the_same_handle_until_reset() {
        openclaw_storage::reset_shared();

        let first = openclaw_storage::shared(StorageConfig::default()).unwrap();
        let second = openclaw_storage::shared(StorageConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        openclaw_storage::reset_shared();
        let third = openclaw_storage::shared(StorageConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        openclaw_storage::reset_shared();
    }

    #[test]
    #[serial]
    fn shared_rejects_invalid_configuration() {
        openclaw_storage::reset_shared();
        let err = openclaw_storage::shared(StorageConfig {
            cache_ttl_ms: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.hint(), Some("cacheTtlMs"));
        openclaw_storage::reset_shared();
    }
}
