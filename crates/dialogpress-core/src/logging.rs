use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::session::CompressionEvent;

/// Target used for structured compression events.
pub const EVENTS_TARGET: &str = "dialogpress::events";

/// Install the global fmt subscriber: stdout plus an appended log file.
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(log_file: &Path, verbose: bool) -> Result<()> {
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir).context("Failed to create log dir")?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_target(true)
        .with_writer(std::io::stdout.and(Mutex::new(file)))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

/// Emit one applied compression as a structured event.
pub fn emit_compression_event(session_id: &str, event: &CompressionEvent) {
    info!(
        target: EVENTS_TARGET,
        session = session_id,
        pre_tokens = event.pre_tokens,
        post_tokens = event.post_tokens,
        tokens_saved = event.tokens_saved(),
        pre_turns = event.pre_turn_count,
        summary_tokens = event.summary_turn.token_count,
        "compression applied"
    );
}
