use std::{fs, path::Path};

use anyhow::{Context, Result};
use siphon_plugin::LogLevel;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Target of the one-line-per-run JSON events written to the event log.
pub const FLOW_RUN_TARGET: &str = "flow_run";

pub const LOG_FILE: &str = "siphon.log";
pub const EVENT_FILE: &str = "siphon_events.json";

/// Install the global subscriber.
///
/// - stdout always gets human readable output filtered by `level`.
/// - with `log_dir`, the same output also goes to a daily rolling text log,
///   and every `flow_run` event goes to a daily rolling JSON log.
pub fn init_tracing(level: LogLevel, log_dir: Option<&Path>) -> Result<()> {
    let directive = level.as_directive();

    let stdout_layer = fmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::new(directive));

    let (txt_layer, json_layer) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create log dir {}", dir.display()))?;

            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let txt_layer = fmt::layer()
                .with_writer(txt_appender)
                .with_ansi(false)
                .with_filter(EnvFilter::new(directive));

            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, EVENT_FILE);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new(format!("{FLOW_RUN_TARGET}=info")));

            (Some(txt_layer), Some(json_layer))
        }
        None => (None, None),
    };

    Registry::default()
        .with(stdout_layer)
        .with(txt_layer)
        .with(json_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(())
}
