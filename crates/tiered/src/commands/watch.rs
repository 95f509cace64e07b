//! Periodic re-resolution for long-running checks

use anyhow::Result;
use camino::Utf8Path;
use clap::Args;
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tiered_core::{Key, Kind, ResolvedValue};
use tiered_resolver::Resolver;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use super::resolve::display_value;
use crate::output;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Keys to watch
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Kind of value: secret, config or metadata
    #[arg(short, long, default_value = "config")]
    pub kind: Kind,

    /// Seconds between rounds
    #[arg(long, default_value_t = 30)]
    pub interval_secs: u64,

    /// Deadline for each round in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Show secret values (WARNING: insecure)
    #[arg(long)]
    pub reveal: bool,
}

/// How a value differs from the one seen in the previous round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    First,
    Value,
    Source,
}

pub(crate) fn detect_change(previous: Option<&ResolvedValue>, current: &ResolvedValue) -> Option<Change> {
    match previous {
        None => Some(Change::First),
        Some(prev) if prev.value != current.value => Some(Change::Value),
        Some(prev) if prev.source != current.source => Some(Change::Source),
        Some(_) => None,
    }
}

pub async fn run(args: WatchArgs, config: Option<&Utf8Path>) -> Result<()> {
    let config = super::load_config(config)?;
    let resolver = super::build_resolver(&config)?;

    if let Some(secs) = config.settings().sweep_interval_secs {
        resolver.spawn_sweeper(Duration::from_secs(secs));
    }

    let keys: Vec<Key> = args.keys.iter().map(|k| Key::from(k.as_str())).collect();
    let mut seen: HashMap<Key, Arc<ResolvedValue>> = HashMap::new();

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    output::info(&format!(
        "Watching {} {} key(s) every {}s (Ctrl-C to stop)",
        keys.len(),
        args.kind,
        args.interval_secs.max(1)
    ));

    let mut rounds = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break,
        }

        let deadline = Instant::now() + Duration::from_millis(args.timeout_ms);
        for (change, value) in watch_round(&resolver, &keys, args.kind, deadline, &mut seen).await {
            report(change, &value, args.reveal);
        }
        rounds += 1;
    }

    let stats = resolver.cache_stats().await;
    println!();
    output::kv("rounds", &rounds.to_string());
    output::kv("cached entries", &stats.entries.to_string());
    Ok(())
}

/// Resolve every key afresh and return what differs from the last round
///
/// Cached entries are dropped first so each round reaches the backends.
pub(crate) async fn watch_round(
    resolver: &Resolver,
    keys: &[Key],
    kind: Kind,
    deadline: Instant,
    seen: &mut HashMap<Key, Arc<ResolvedValue>>,
) -> Vec<(Change, Arc<ResolvedValue>)> {
    for key in keys {
        resolver.invalidate(key).await;
    }

    let requests = keys.iter().map(|key| (key.clone(), kind)).collect();
    let mut changes = Vec::new();
    for (key, result) in resolver.resolve_many(requests, deadline).await {
        match result {
            Ok(value) => {
                if let Some(change) = detect_change(seen.get(&key).map(Arc::as_ref), &value) {
                    changes.push((change, value.clone()));
                }
                seen.insert(key, value);
            }
            Err(err) => warn!("{}", err),
        }
    }
    changes
}

fn report(change: Change, value: &ResolvedValue, reveal: bool) {
    let label = match change {
        Change::First => "resolved".green().to_string(),
        Change::Value => "changed".yellow().to_string(),
        Change::Source => "moved".blue().to_string(),
    };
    println!(
        "{} {} {} = {} ({})",
        chrono::Utc::now().format("%H:%M:%S").dimmed(),
        label,
        value.key.as_str().cyan(),
        display_value(value, reveal),
        value.source.as_str().dimmed()
    );
}
