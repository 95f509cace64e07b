//! One-shot resolution of keys

use anyhow::{bail, Result};
use camino::Utf8Path;
use clap::Args;
use owo_colors::OwoColorize;
use serde_json::json;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tiered_core::{Key, Kind, ResolvedValue};
use tiered_resolver::{AggregatedFailure, ResolveError};
use tokio::time::Instant;

use crate::output;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Keys to resolve
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Kind of value: secret, config or metadata
    #[arg(short, long, default_value = "config")]
    pub kind: Kind,

    /// Give up on backends after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show secret values (WARNING: insecure)
    #[arg(long)]
    pub reveal: bool,
}

pub async fn run(args: ResolveArgs, config: Option<&Utf8Path>) -> Result<()> {
    let config = super::load_config(config)?;
    let resolver = super::build_resolver(&config)?;

    let deadline = Instant::now() + Duration::from_millis(args.timeout_ms);
    let requests = args
        .keys
        .iter()
        .map(|key| (Key::from(key.as_str()), args.kind))
        .collect();
    let results = resolver.resolve_many(requests, deadline).await;
    let failed = results.iter().filter(|(_, result)| result.is_err()).count();

    if args.json {
        let report: Vec<_> = results
            .iter()
            .map(|(key, result)| json_entry(key, result, args.reveal))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (key, result) in &results {
            match result {
                Ok(value) => print_value(value, args.reveal),
                Err(err) => print_error(key, err),
            }
        }
        if !args.reveal && args.kind.is_sensitive() && failed < results.len() {
            println!();
            output::info("Use --reveal to display secret values (WARNING: insecure)");
        }
    }

    if failed > 0 {
        bail!("{} of {} key(s) could not be resolved", failed, results.len());
    }
    Ok(())
}

/// Printable form of a value; secrets are masked unless `reveal`
pub(crate) fn display_value(value: &ResolvedValue, reveal: bool) -> String {
    if value.kind.is_sensitive() && !reveal {
        return "*".repeat(value.value.len().clamp(1, 8));
    }
    match value.value.as_str() {
        Some(text) => text.to_string(),
        None => format!("[binary, {} bytes]", value.value.len()),
    }
}

fn expiry(value: &ResolvedValue) -> String {
    match value.expires_at() {
        Some(at) => at.to_rfc3339(),
        None => "never".to_string(),
    }
}

fn print_value(value: &ResolvedValue, reveal: bool) {
    println!(
        "{} {} = {}",
        "✓".green().bold(),
        value.key.as_str().cyan(),
        display_value(value, reveal)
    );
    output::kv("source", value.source.as_str());
    output::kv("fetched", &value.fetched_at.to_rfc3339());
    output::kv("expires", &expiry(value));
}

fn print_error(key: &Key, err: &ResolveError) {
    output::error(&format!("{}", key.as_str().bold()));
    match err.aggregated() {
        Some(failure) => {
            if failure.all_not_found() {
                output::warning("No backend has this key");
            } else if failure.all_unauthorized() {
                output::warning("Every backend refused access; check credentials");
            }
            let mut table = Table::new(failure_rows(failure));
            table.with(Style::sharp());
            eprintln!("{}", table);
        }
        None => eprintln!("  {}", err),
    }
}

/// Table row for one backend's failure
#[derive(Tabled, Debug, PartialEq)]
pub(crate) struct FailureRow {
    #[tabled(rename = "BACKEND")]
    backend: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: u32,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

pub(crate) fn failure_rows(failure: &AggregatedFailure) -> Vec<FailureRow> {
    failure
        .failures
        .iter()
        .map(|f| FailureRow {
            backend: f.backend.to_string(),
            outcome: f.kind.to_string(),
            attempts: f.attempts,
            detail: f.message.clone(),
        })
        .collect()
}

fn json_entry(
    key: &Key,
    result: &Result<std::sync::Arc<ResolvedValue>, ResolveError>,
    reveal: bool,
) -> serde_json::Value {
    match result {
        Ok(value) => json!({
            "key": key,
            "kind": value.kind,
            "value": display_value(value, reveal),
            "source": value.source,
            "fetched_at": value.fetched_at,
            "expires_at": value.expires_at(),
        }),
        Err(ResolveError::Exhausted(failure)) => json!({
            "key": key,
            "kind": failure.kind,
            "error": failure.to_string(),
            "failures": failure.failures,
        }),
        Err(err) => json!({
            "key": key,
            "error": err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tiered_core::BackendId;
    use tiered_resolver::{BackendErrorKind, BackendFailure};

    fn value(kind: Kind, payload: &str) -> ResolvedValue {
        ResolvedValue {
            key: Key::from("db.password"),
            kind,
            value: payload.into(),
            source: BackendId::from("vault:hcom"),
            fetched_at: Utc::now(),
            ttl: kind.default_ttl(),
        }
    }

    #[test]
    fn test_secrets_are_masked_unless_revealed() {
        let secret = value(Kind::Secret, "hunter2-hunter2");
        assert_eq!(display_value(&secret, false), "********");
        assert_eq!(display_value(&secret, true), "hunter2-hunter2");

        let short = value(Kind::Secret, "abc");
        assert_eq!(display_value(&short, false), "***");
    }

    #[test]
    fn test_config_is_shown() {
        let config = value(Kind::Config, "us-east-1");
        assert_eq!(display_value(&config, false), "us-east-1");
    }

    #[test]
    fn test_binary_payload() {
        let mut binary = value(Kind::Metadata, "");
        binary.value = vec![0xff, 0xfe, 0x00].into();
        assert_eq!(display_value(&binary, false), "[binary, 3 bytes]");
    }

    #[test]
    fn test_failure_rows_keep_policy_order() {
        let failure = AggregatedFailure {
            key: Key::from("db.password"),
            kind: Kind::Secret,
            failures: vec![
                BackendFailure {
                    backend: BackendId::from("env"),
                    kind: BackendErrorKind::NotFound,
                    attempts: 1,
                    message: "DB_PASSWORD is not set".to_string(),
                },
                BackendFailure {
                    backend: BackendId::from("vault:hcom"),
                    kind: BackendErrorKind::Timeout,
                    attempts: 3,
                    message: "no answer within 2000ms".to_string(),
                },
            ],
        };

        let rows = failure_rows(&failure);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].backend, "env");
        assert_eq!(rows[1].outcome, BackendErrorKind::Timeout.to_string());
        assert_eq!(rows[1].attempts, 3);
    }

    #[test]
    fn test_json_entry_never_leaks_masked_secret() {
        let secret = std::sync::Arc::new(value(Kind::Secret, "hunter2"));
        let entry = json_entry(&secret.key, &Ok(secret.clone()), false);
        assert_eq!(entry["value"], "*******");
        assert_eq!(entry["source"], "vault:hcom");
    }
}
