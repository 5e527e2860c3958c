//! Logging setup.
//!
//! Mirrors the dual-sink approach of a typical desktop client's logger: a
//! colorized terminal logger for interactive runs plus a plain-text file
//! logger under `logs/` next to the executable, both driven through the
//! `log` facade so every subsystem just calls `log::info!`/`log::warn!`/…

use anyhow::{Context, Result};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::File;
use std::path::PathBuf;

/// Initialize the global logger.
///
/// `verbose` raises the terminal filter from `Info` to `Debug`; the file
/// logger always records at `Debug` so a bug report can be reconstructed
/// after the fact even from a quiet run.
pub fn setup_logger(log_dir: Option<PathBuf>, verbose: bool) -> Result<()> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => {
            let exe_path = std::env::current_exe().context("failed to get exe path")?;
            exe_path
                .parent()
                .unwrap_or(std::path::Path::new("."))
                .join("logs")
        }
    };
    std::fs::create_dir_all(&log_dir).context("failed to create log dir")?;

    let log_file =
        File::create(log_dir.join("lantrackd.log")).context("failed to create log file")?;

    let file_config = ConfigBuilder::new()
        .set_time_offset_to_local()
        .unwrap_or_else(|b| b)
        .build();

    let term_config = ConfigBuilder::new()
        .set_time_offset_to_local()
        .unwrap_or_else(|b| b)
        .build();

    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(TermLogger::new(
        term_level,
        term_config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));
    loggers.push(WriteLogger::new(LevelFilter::Debug, file_config, log_file));

    CombinedLogger::init(loggers).ok();
    log::info!("logger initialized (log_dir={})", log_dir.display());
    Ok(())
}
