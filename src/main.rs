//! skymax - inverter status poller
//!
//! Polls a solar/battery inverter over RS232 or USB HID raw and prints the
//! decoded readings as JSON.

mod report;

use clap::Parser;
use report::Report;
use skymax_client::{Config, Poller, ReportConfig, RunOutcome};
use skymax_core::{CacheEvent, QueryKind, StatusCache};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Kinds that feed a report when they are polled.
const REPORT_KINDS: [QueryKind; 3] = [QueryKind::Mode, QueryKind::GeneralStatus, QueryKind::RatedInfo];

#[derive(Parser)]
#[command(name = "skymax")]
#[command(about = "Polls a solar/battery inverter and prints its status as JSON")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "SKYMAX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Send one raw command, print the reply and exit
    #[arg(short, long, value_name = "CMD")]
    raw: Option<String>,

    /// Exit after the first complete report
    #[arg(short = '1', long)]
    run_once: bool,

    /// Device path (overrides the configuration file)
    #[arg(long)]
    device: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries reports only
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(device) = cli.device {
        config.device.path = device;
    }
    if cli.run_once {
        config.poll.run_once = true;
    }

    let framing = config.framing_options();
    tracing::debug!(
        device = %config.device.path.display(),
        transport = ?config.device.transport,
        framing = ?framing.framing,
        read_timeout = ?framing.read_timeout,
        "Device configuration"
    );

    let report_kinds = report_kinds(&config.poll.queries);
    if !report_kinds.contains(&QueryKind::GeneralStatus) {
        tracing::warn!("general_status is not polled, no reports will be printed");
    }

    let cache = Arc::new(StatusCache::new());
    let poller = Arc::new(Poller::with_cache(
        config.device.clone(),
        config.poll.clone(),
        framing,
        cache.clone(),
    ));

    if let Some(raw) = cli.raw {
        let reply = poller.execute_raw(&raw).await?;
        println!("Reply: {}", reply);
        return Ok(());
    }

    tracing::info!("Starting skymax");
    tracing::info!("  Device: {}", config.device.path.display());
    tracing::info!("  Poll interval: {}s", config.poll.interval_secs);

    // Subscribe before the first write can happen
    let mut events = cache.subscribe();
    let mut handle = poller.clone().spawn();

    let shutdown_poller = poller.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping poller...");
        shutdown_poller.shutdown();
    });

    let run_once = config.poll.run_once;
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(CacheEvent::ModeChanged { from, to }) => {
                        cache.take_mode_changed();
                        tracing::info!(
                            mode = to.code(),
                            raw = ?cache.raw_mode(),
                            "Inverter mode changed: {} -> {}",
                            from,
                            to
                        );
                    }
                    Ok(CacheEvent::Updated(_)) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Cache events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
                if emit_report(&cache, &report_kinds, &config.report) && run_once {
                    tracing::info!("All queries complete, exiting");
                    poller.shutdown();
                    (&mut handle).await?;
                    return Ok(());
                }
            }
            outcome = &mut handle => {
                let outcome = outcome?;
                if outcome == RunOutcome::Completed {
                    emit_report(&cache, &report_kinds, &config.report);
                }
                break;
            }
        }
    }

    tracing::info!("skymax stopped");
    Ok(())
}

/// The report kinds among the polled queries.
fn report_kinds(queries: &[QueryKind]) -> Vec<QueryKind> {
    REPORT_KINDS
        .into_iter()
        .filter(|kind| queries.contains(kind))
        .collect()
}

/// Prints a report once every polled report kind has changed since the last
/// one. Returns whether a report was printed.
fn emit_report(cache: &StatusCache, kinds: &[QueryKind], factors: &ReportConfig) -> bool {
    if !kinds.contains(&QueryKind::GeneralStatus) || !cache.take_all_changed(kinds) {
        return false;
    }
    if cache.take_changed(QueryKind::Warnings) {
        if let Some(warnings) = cache.snapshot(QueryKind::Warnings) {
            if warnings.contains('1') {
                tracing::warn!(warnings = %warnings, "Inverter reports warnings");
            }
        }
    }

    let Some(status) = cache.snapshot(QueryKind::GeneralStatus) else {
        return false;
    };
    if kinds.contains(&QueryKind::RatedInfo) && cache.snapshot(QueryKind::RatedInfo).is_none() {
        return false;
    }

    let report = match Report::from_status(&status, cache.decode_mode(), factors) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("Discarding status reply: {}", e);
            return false;
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            tracing::error!("Failed to encode report: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "230.0 50.0 230.0 50.0 0161 0119 003 460 57.50 012 100 0069 0014 103.8 57.49 00000 00110110 00 00 00856 010";
    const RATED: &str = "230.0 21.7 230.0 50.0 21.7 5000 4000 48.0 46.0 42.0 56.4 54.0 2 02 060 0 1 3 1 01 0 0 54.0 0 1";

    #[test]
    fn test_report_kinds_follow_polled_queries() {
        assert_eq!(report_kinds(&QueryKind::ALL), REPORT_KINDS.to_vec());
        assert_eq!(
            report_kinds(&[QueryKind::GeneralStatus, QueryKind::Mode]),
            vec![QueryKind::Mode, QueryKind::GeneralStatus]
        );
        assert!(report_kinds(&[QueryKind::Warnings]).is_empty());
    }

    #[test]
    fn test_report_without_rated_info_polled() {
        let kinds = report_kinds(&[QueryKind::Mode, QueryKind::GeneralStatus]);
        let cache = StatusCache::new();
        cache.update(QueryKind::Mode, "L");
        cache.update(QueryKind::GeneralStatus, STATUS);

        assert!(emit_report(&cache, &kinds, &ReportConfig::default()));
        assert!(!cache.is_changed(QueryKind::Mode));
        assert!(!cache.is_changed(QueryKind::GeneralStatus));

        // Nothing new since the last report
        assert!(!emit_report(&cache, &kinds, &ReportConfig::default()));
    }

    #[test]
    fn test_report_waits_for_rated_info_when_polled() {
        let kinds = report_kinds(&QueryKind::ALL);
        let cache = StatusCache::new();
        cache.update(QueryKind::Mode, "B");
        cache.update(QueryKind::GeneralStatus, STATUS);
        assert!(!emit_report(&cache, &kinds, &ReportConfig::default()));
        assert!(cache.is_changed(QueryKind::GeneralStatus));

        cache.update(QueryKind::RatedInfo, RATED);
        assert!(emit_report(&cache, &kinds, &ReportConfig::default()));
        assert!(!cache.is_changed(QueryKind::RatedInfo));
    }

    #[test]
    fn test_no_report_without_general_status() {
        let kinds = report_kinds(&[QueryKind::Mode]);
        let cache = StatusCache::new();
        cache.update(QueryKind::Mode, "L");
        assert!(!emit_report(&cache, &kinds, &ReportConfig::default()));
        // Flag stays for other consumers
        assert!(cache.is_changed(QueryKind::Mode));
    }
}
