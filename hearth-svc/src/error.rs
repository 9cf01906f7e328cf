//! Error surface of [`crate::run`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::host::HostError;
use crate::probe::ProbeError;
use crate::signal::BridgeError;

/// Errors returned by a run.
///
/// Application errors are forwarded untouched: the message of a failed
/// `init`, `start` or `stop` is exactly the message the service produced.
#[derive(Debug, Error)]
pub enum RunError {
    /// Detecting the hosting mode failed; no callback ran.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// The running executable could not be located; no callback ran.
    #[error("failed to locate the running executable: {source}")]
    ExecutablePath {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Moving into the executable's directory failed; no callback ran.
    #[error("failed to change working directory to '{path}': {source}")]
    WorkingDir {
        /// Target directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `init` failed; `start` and `stop` were not called.
    #[error(transparent)]
    Init(anyhow::Error),
    /// `start` failed; `stop` was not called.
    #[error(transparent)]
    Start(anyhow::Error),
    /// `stop` failed after a stop request.
    #[error(transparent)]
    Stop(anyhow::Error),
    /// The service manager failed independently of the service.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Console signal listeners could not be installed; `stop` was still
    /// called.
    #[error(transparent)]
    Signals(#[from] BridgeError),
}
