//! The `openclaw storage` command group.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use openclaw_storage::{
    BackendKind, Namespace, StorageConfig, StorageService,
};
use serde_json::json;

/// Storage diagnostics and migration planning.
#[derive(Subcommand)]
pub enum StorageCommand {
    /// Show service mode and per-namespace backend resolution
    Status {
        /// Path to the storage configuration JSON
        #[arg(long, env = "OPENCLAW_STORAGE_CONFIG")]
        config: Option<PathBuf>,

        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,

        /// Probe each namespace's backend
        #[arg(long)]
        health: bool,
    },

    /// Plan data migration between backends
    ///
    /// v1 only enumerates what would move; pass `--dry-run` to preview.
    Migrate {
        /// Target backend
        #[arg(long, value_enum)]
        to: MigrateTarget,

        /// Restrict to one namespace (default: all)
        #[arg(long)]
        namespace: Option<String>,

        /// Enumerate without copying
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,

        /// Path to the storage configuration JSON
        #[arg(long, env = "OPENCLAW_STORAGE_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Backends a migration can target.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MigrateTarget {
    /// Local filesystem
    File,
    /// Cloud event memory
    Agentcore,
    /// Managed secrets vault
    SecretsManager,
}

impl MigrateTarget {
    fn backend_kind(self) -> BackendKind {
        match self {
            Self::File => BackendKind::File,
            Self::Agentcore => BackendKind::AgentCore,
            Self::SecretsManager => BackendKind::SecretsManager,
        }
    }
}

pub async fn run(command: StorageCommand) -> Result<()> {
    match command {
        StorageCommand::Status {
            config,
            json,
            health,
        } => status(config.as_deref(), json, health).await,
        StorageCommand::Migrate {
            to,
            namespace,
            dry_run,
            yes,
            config,
        } => migrate(to, namespace.as_deref(), dry_run, yes, config.as_deref()).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<StorageConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            Ok(StorageConfig::from_json_str(&raw)?)
        }
        None => Ok(StorageConfig::default()),
    }
}

async fn status(config_path: Option<&Path>, json: bool, health: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let service = StorageService::new(config)?;
    let summary = service.config_summary();

    let health_results = if health {
        service.initialize().await?;
        Some(service.health_check().await)
    } else {
        None
    };

    if json {
        let namespaces: Vec<_> = summary
            .iter()
            .map(|row| {
                let mut entry = json!({
                    "namespace": row.namespace,
                    "backend": row.backend,
                    "classification": row.classification,
                });
                if let Some(health) = &health_results {
                    entry["health"] = serde_json::to_value(&health[&row.namespace])?;
                }
                Ok(entry)
            })
            .collect::<Result<_>>()?;
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "mode": service.config().mode,
                "namespaces": namespaces,
            }))?
        );
        return Ok(());
    }

    println!("mode: {}", service.config().mode.to_string().bold());
    println!();
    println!(
        "{:<14} {:<18} {:<8}{}",
        "namespace".dimmed(),
        "backend".dimmed(),
        "class".dimmed(),
        if health { "  health".dimmed().to_string() } else { String::new() }
    );
    for row in &summary {
        let health_column = match &health_results {
            Some(results) => {
                let status = &results[&row.namespace];
                if status.ok {
                    format!("  {} ({} ms)", "ok".green(), status.latency_ms)
                } else {
                    format!(
                        "  {} {}",
                        "failed".red(),
                        status.error.as_deref().unwrap_or("unknown")
                    )
                }
            }
            None => String::new(),
        };
        println!(
            "{:<14} {:<18} {:<8}{}",
            row.namespace.to_string(),
            row.backend.to_string(),
            row.classification.to_string(),
            health_column
        );
    }
    Ok(())
}

async fn migrate(
    target: MigrateTarget,
    namespace: Option<&str>,
    dry_run: bool,
    yes: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    if !dry_run {
        bail!("data copy is not implemented yet; re-run with --dry-run to preview the plan");
    }

    let config = load_config(config_path)?;
    let service = StorageService::new(config)?;
    let target_kind = target.backend_kind();

    let namespaces: Vec<Namespace> = match namespace {
        Some(ns) => vec![ns.parse()?],
        None => Namespace::ALL.to_vec(),
    };

    println!(
        "migration plan → {} {}",
        target_kind.to_string().bold(),
        "(dry run)".dimmed()
    );
    for ns in namespaces {
        let source_kind = service.resolve_backend_kind(ns);
        if source_kind == target_kind {
            println!("  {ns}: already on {source_kind}, nothing to move");
            continue;
        }
        match service.get_backend(ns).await {
            Ok(backend) => match backend.list(ns, None).await {
                Ok(keys) => {
                    println!(
                        "  {ns}: {} → {}, {} key(s)",
                        source_kind,
                        target_kind,
                        keys.len()
                    );
                    for key in keys.iter().take(5) {
                        println!("      {key}");
                    }
                    if keys.len() > 5 {
                        println!("      … and {} more", keys.len() - 5);
                    }
                }
                Err(err) => println!("  {ns}: cannot enumerate ({err})"),
            },
            Err(err) => println!("  {ns}: source backend unavailable ({err})"),
        }
    }
    if !yes {
        println!();
        println!("re-run with --yes once the copy phase ships to apply the plan");
    }
    Ok(())
}
