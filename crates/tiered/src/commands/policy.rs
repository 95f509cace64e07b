//! Inspect and validate the resolution policy

use anyhow::{Context, Result};
use camino::Utf8Path;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;
use serde_json::json;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tiered_core::{ResolutionPolicy, TieredConfig};
use tiered_resolver::builder::build_backends;
use tiered_resolver::{HttpTransport, Transport};

use crate::output;

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Check the configuration and build every backend
    Validate,

    /// Print the effective resolution table
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(cmd: PolicyCommands, config: Option<&Utf8Path>) -> Result<()> {
    let config = super::load_config(config)?;
    match cmd {
        PolicyCommands::Validate => validate(&config),
        PolicyCommands::Show(args) => show(&config, args),
    }
}

fn validate(config: &TieredConfig) -> Result<()> {
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new().context("Failed to build HTTP client")?);
    let backends = build_backends(config, transport)?;

    output::success(&format!("Configuration is valid ({})", config.source()));

    output::header(&format!("Backends ({})", backends.len()));
    let referenced = config.policy().referenced_backends();
    for backend in &config.config.backends {
        let note = if referenced.contains(&backend.id) {
            String::new()
        } else {
            format!(" {}", "(unused)".yellow())
        };
        println!(
            "  {} {}{}",
            backend.id.as_str().cyan(),
            backend.spec.type_name().dimmed(),
            note
        );
    }

    output::header("Chains");
    for entry in config.policy().entries() {
        output::kv(entry.kind.as_str(), &chain(&entry.backends));
    }

    let settings = config.settings();
    output::header("Settings");
    output::kv("max concurrent fetches", &settings.max_concurrent_fetches.to_string());
    output::kv(
        "failure threshold",
        &settings.consecutive_failure_threshold.to_string(),
    );
    Ok(())
}

fn show(config: &TieredConfig, args: ShowArgs) -> Result<()> {
    let policy = config.policy();

    if args.json {
        let entries: Vec<_> = policy
            .entries()
            .map(|entry| {
                json!({
                    "kind": entry.kind,
                    "backends": entry.backends,
                    "per_backend_timeout_ms": entry.per_backend_timeout_ms,
                    "max_retries": entry.max_retries,
                    "ttl_secs": entry.ttl().map(|ttl| ttl.as_secs()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    output::header(&format!("Resolution policy ({})", config.source()));
    let mut table = Table::new(policy_rows(policy));
    table.with(Style::sharp());
    println!("{}", table);
    Ok(())
}

fn chain(backends: &[tiered_core::BackendId]) -> String {
    backends
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Table row for one policy entry
#[derive(Tabled, Debug)]
pub(crate) struct PolicyRow {
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "BACKENDS")]
    backends: String,
    #[tabled(rename = "TIMEOUT")]
    timeout: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: u32,
    #[tabled(rename = "TTL")]
    ttl: String,
}

pub(crate) fn policy_rows(policy: &ResolutionPolicy) -> Vec<PolicyRow> {
    policy
        .entries()
        .map(|entry| PolicyRow {
            kind: entry.kind.to_string(),
            backends: chain(&entry.backends),
            timeout: format!("{}ms", entry.per_backend_timeout_ms),
            attempts: entry.max_retries,
            ttl: match entry.ttl() {
                Some(ttl) => format!("{}s", ttl.as_secs()),
                None => "never".to_string(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    const CONFIG: &str = r#"
backends:
  - id: env
    type: env
  - id: vault:hcom
    type: vault
    address: https://vault.example.com
policy:
  - kind: secret
    backends: [env, vault:hcom]
    ttl-secs: 60
  - kind: config
    backends: [env]
    max-retries: 5
  - kind: metadata
    backends: [env]
"#;

    #[test]
    fn test_policy_rows() {
        let config = TieredConfig::from_yaml(CONFIG, Utf8Path::new(".")).unwrap();
        let rows = policy_rows(config.policy());

        assert_eq!(rows.len(), 3);
        let secret = rows.iter().find(|r| r.kind == "secret").unwrap();
        assert_eq!(secret.backends, "env → vault:hcom");
        assert_eq!(secret.ttl, "60s");
        assert_eq!(secret.timeout, "2000ms");

        let config_row = rows.iter().find(|r| r.kind == "config").unwrap();
        assert_eq!(config_row.attempts, 5);
        assert_eq!(config_row.ttl, "900s");

        let metadata = rows.iter().find(|r| r.kind == "metadata").unwrap();
        assert_eq!(metadata.ttl, "never");
    }

    #[test]
    fn test_validate_builds_backends() {
        let config = TieredConfig::from_yaml(CONFIG, Utf8Path::new(".")).unwrap();
        assert!(validate(&config).is_ok());
    }
}
