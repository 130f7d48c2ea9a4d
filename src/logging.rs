//! Logger setup for the binary. The library only talks to the `log` facade.

use log::LevelFilter;
use simplelog::{ColorChoice, Config as LogConfig, ConfigBuilder, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

/// Installs the global logger.
///
/// Logs go to `file` when given, appended, and to standard error otherwise.
/// With [`LevelFilter::Off`] nothing is installed.
pub fn init(level: LevelFilter, file: Option<&Path>) -> io::Result<()> {
    if level == LevelFilter::Off {
        return Ok(());
    }
    let config = log_config();
    match file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            WriteLogger::init(level, config, file)
        }
        None => TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto),
    }
    .map_err(io::Error::other)
}

fn log_config() -> LogConfig {
    ConfigBuilder::new()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Debug)
        .build()
}
