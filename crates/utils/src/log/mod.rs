pub mod config;

use std::{fs::OpenOptions, sync::Mutex};

use libexo_core::error::ExoError;
pub use tracing::{
    debug, debug_span, error, error_span, event, info, info_span, span, trace,
    trace_span, warn, warn_span, Level, Subscriber,
};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use self::config::LogConfig;

static INIT_ONCE: std::sync::Once = std::sync::Once::new();

fn filter(directives: &str) -> Result<EnvFilter, ExoError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .map_err(|e| {
            ExoError::Config(format!("invalid log filter {:?}: {}", directives, e))
        })
}

impl LogConfig {
    /// Install the global subscriber. Later calls are no-ops.
    ///
    /// Console records go to stderr, so a report printed on stdout stays
    /// parseable. File records are JSON lines carrying the enclosing
    /// `chain`, `phase` and `step` spans with their fields.
    pub fn init(&self) -> Result<(), ExoError> {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter(&self.console_level)?);

        let file_layer = match &self.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        ExoError::Config(format!(
                            "failed to open log file {}: {}",
                            path, e
                        ))
                    })?;
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter(&self.file_level)?);
                Some(layer)
            }
            None => None,
        };

        INIT_ONCE.call_once(move || {
            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .init();
        });
        Ok(())
    }

    /// Replace the console filter, e.g. from a command line flag.
    pub fn with_console_level(mut self, level: Option<String>) -> Self {
        if let Some(level) = level {
            self.console_level = level;
        }
        self
    }
}

pub fn init_logging_with_config(cfg: LogConfig) -> Result<(), ExoError> {
    cfg.init()
}
