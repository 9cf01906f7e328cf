//! Log sinks for the agent.
//!
//! A console run logs to stderr. Under the service manager there is no
//! console, so events go to `agent.log` beside the executable and, on
//! Windows, to an ETW provider as well.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, EnvFilter};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// File written when running under the service manager.
pub const LOG_FILE_NAME: &str = "agent.log";

#[cfg(windows)]
const ETW_PROVIDER: &str = "HearthAgent";

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// The log file could not be opened.
    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Another subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Installs the global subscriber once; later calls are no-ops.
pub fn initialise(filter: &str, managed: bool) -> Result<(), TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(filter, managed))
        .map(|_| ())
}

fn install_subscriber(filter: &str, managed: bool) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let (writer, ansi) = if managed {
        let file = open_log_file()?;
        (BoxMakeWriter::new(Mutex::new(file)), false)
    } else {
        (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal())
    };

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_ansi(ansi)
        .with_writer(writer);

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    #[cfg(windows)]
    let registry = registry.with(if managed {
        tracing_etw::LayerBuilder::new(ETW_PROVIDER).build().ok()
    } else {
        None
    });

    registry.try_init()?;
    Ok(())
}

/// Path of the managed-mode log file.
pub fn log_file_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(LOG_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(LOG_FILE_NAME))
}

fn open_log_file() -> Result<File, TelemetryError> {
    let path = log_file_path();
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| TelemetryError::LogFile { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filters() {
        let error = install_subscriber("hearth=loud", false).expect_err("filter should not parse");
        assert!(matches!(error, TelemetryError::Filter(_)));
    }

    #[test]
    fn log_file_sits_beside_the_executable() {
        let path = log_file_path();
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some(LOG_FILE_NAME)
        );
    }

    #[test]
    fn repeated_initialisation_is_harmless() {
        initialise("info", false).expect("first install");
        initialise("debug", false).expect("second call is a no-op");
    }
}
