//! Subscriber setup for applications embedding the engine.
//!
//! The engine only emits `tracing` events: step boundaries at `info`,
//! handshakes and consumer phases at `debug`, recorded failures at `error`.
//! Nothing is printed unless a subscriber is installed, which is what
//! [`init_logging`] does.
//!
//! ```no_run
//! use ironbatch::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::default()).unwrap();
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tfmt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is not set.
    pub level: LogLevel,
    /// Emit one JSON object per event instead of text.
    pub json: bool,
    /// Extra filter directives, e.g. `"ironbatch::multi=debug"`.
    pub directives: Option<String>,
}

impl LogConfig {
    fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let mut spec = self.level.to_string();
        if let Some(extra) = &self.directives {
            spec.push(',');
            spec.push_str(extra);
        }
        Ok(EnvFilter::try_new(spec)?)
    }
}

/// Install a global fmt subscriber.
///
/// Calling it again, or after another subscriber was installed, is not an
/// error: the existing subscriber is kept.
///
/// # Errors
///
/// Returns an error if the filter directives cannot be parsed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;
    let builder = tfmt().with_env_filter(filter).with_thread_names(true).with_target(true);
    let installed = if config.json {
        builder.json().finish().try_init()
    } else {
        builder.finish().try_init()
    };
    if installed.is_err() {
        tracing::debug!("global subscriber already installed, keeping it");
    }
    Ok(())
}
