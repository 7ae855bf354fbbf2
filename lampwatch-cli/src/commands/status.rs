use std::time::Duration;

use chrono::Local;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use lampwatch_core::ExecutionBackend;
use lampwatch_core::inspector::ServiceInspector;
use lampwatch_core::model::ServiceStatusReport;

use super::CliResult;

pub async fn run_status(backend: &dyn ExecutionBackend, json: bool) -> CliResult {
    let reports = ServiceInspector::new(backend).refresh_all().await?;
    print_reports(&reports, json)
}

/// Refresh every `interval` until Ctrl-C
pub async fn run_watch(backend: &dyn ExecutionBackend, interval: Duration, json: bool) -> CliResult {
    let mut check_interval = tokio::time::interval(interval);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let inspector = ServiceInspector::new(backend);

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                match inspector.refresh_all().await {
                    Ok(reports) => {
                        if !json {
                            println!("-- {} --", Local::now().format("%Y-%m-%d %H:%M:%S"));
                        }
                        print_reports(&reports, json)?;
                    }
                    // The session reconnects on the next tick
                    Err(e) => warn!("refresh failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_reports(reports: &[ServiceStatusReport], json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    for line in format_reports(reports) {
        println!("{}", line);
    }
    Ok(())
}

fn format_reports(reports: &[ServiceStatusReport]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<10} {:<10} {:<18} {}",
        "SERVICE", "STATE", "VERSION", "UNIT"
    )];
    for r in reports {
        lines.push(format!(
            "{:<10} {:<10} {:<18} {}",
            r.service.label(),
            r.activity.to_string(),
            r.version_short.to_string(),
            r.service_name.as_deref().unwrap_or("-")
        ));
    }
    lines
}
