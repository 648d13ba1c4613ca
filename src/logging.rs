use std::fs::OpenOptions;

use anyhow::{Context, Result};
use log::LevelFilter;
use simplelog::{ConfigBuilder, WriteLogger};

/// Installs a file logger that appends to `path`, creating it if needed.
///
/// The handle stays open for the whole session. Nothing is buffered on our
/// side, and the terminal teardown flushes the logger before exit.
pub fn init(path: &str) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path))?;

    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();

    WriteLogger::init(LevelFilter::Debug, config, file).context("install file logger")?;
    Ok(())
}
