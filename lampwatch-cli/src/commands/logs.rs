use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use lampwatch_core::model::LogFileEntry;
use lampwatch_core::{ExecutionBackend, FollowEvent, LiveFollower};

use super::{CliError, CliResult, confirm, print_text};

pub async fn run_tail(backend: &dyn ExecutionBackend, path: &str, lines: usize) -> CliResult {
    let text = backend.tail(path, lines).await?;
    print!("{}", text);
    Ok(())
}

pub async fn run_size(backend: &dyn ExecutionBackend, path: &str, bytes: bool) -> CliResult {
    let size = backend.size_bytes(path).await?;
    if bytes {
        println!("{}", size);
    } else {
        println!("{}  {}", human_size(size), path);
    }
    Ok(())
}

pub async fn run_search(
    backend: &dyn ExecutionBackend,
    path: &str,
    pattern: &str,
    tail_lines: usize,
    max_hits: usize,
) -> CliResult {
    if pattern.is_empty() {
        return Err(CliError::Usage("search pattern must not be empty".into()));
    }
    let hits = backend.search(path, pattern, tail_lines, max_hits).await?;
    if hits.trim().is_empty() {
        eprintln!("no matches for '{}' in the last {} lines", pattern, tail_lines);
    } else {
        print!("{}", hits);
    }
    Ok(())
}

pub async fn run_truncate(backend: &dyn ExecutionBackend, path: &str, yes: bool) -> CliResult {
    if !confirm(&format!("Truncate {} on {}?", path, backend.name()), yes)? {
        eprintln!("aborted");
        return Ok(());
    }
    let outcome = backend.try_truncate(path).await;
    if outcome.success {
        println!("{}", outcome.message);
        Ok(())
    } else {
        Err(CliError::Usage(outcome.message))
    }
}

pub async fn run_ls(backend: &dyn ExecutionBackend, json: bool) -> CliResult {
    let entries = backend.list_log_dir().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    eprintln!("{}", backend.log_dir());
    for line in format_entries(&entries) {
        println!("{}", line);
    }
    Ok(())
}

pub async fn run_download(
    backend: &dyn ExecutionBackend,
    remote_path: &str,
    local_path: Option<PathBuf>,
) -> CliResult {
    let local_path = local_path.unwrap_or_else(|| default_download_path(remote_path));
    let message = backend.download_file(remote_path, &local_path).await?;
    print_text(&message);
    Ok(())
}

/// Stream `path` until it ends or Ctrl-C
pub async fn run_follow(backend: &dyn ExecutionBackend, path: &str) -> CliResult {
    let mut follower = LiveFollower::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    follower.start(backend, path, tx).await?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(FollowEvent::Chunk(text)) => {
                    stdout.write_all(text.as_bytes())?;
                    stdout.flush()?;
                }
                Some(FollowEvent::Error(e)) => eprintln!("follow error: {}", e),
                Some(FollowEvent::Ended { exit_status }) => {
                    if let Some(code) = exit_status.filter(|c| *c != 0) {
                        eprintln!("follow ended (exit {})", code);
                    }
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    follower.stop().await;
    Ok(())
}

fn default_download_path(remote_path: &str) -> PathBuf {
    Path::new(remote_path)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("download.log"))
}

fn format_entries(entries: &[LogFileEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| format!("{:>12}  {}  {}", human_size(e.size_bytes), e.modified_at, e.name))
        .collect()
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}
