//! Hearth service runner
//!
//! Runs one program body either as an interactive console process or as a
//! Windows Service, behind a single lifecycle: `init → start → running → stop`.
//!
//! Implement [`Service`] and hand it to [`run`]. `init` and `start` must not
//! block; spawn long-running work on your own threads. `stop` may block while
//! the workload shuts down. In a console, Ctrl+C (and `SIGTERM` on unix) is
//! treated like a service stop request.
//!
//! ```no_run
//! use hearth_svc::{Environment, Service};
//!
//! struct Program;
//!
//! impl Service for Program {
//!     fn init(&mut self, env: &Environment) -> anyhow::Result<()> {
//!         tracing::info!(managed = env.is_managed_host(), "initialising");
//!         Ok(())
//!     }
//!
//!     fn start(&mut self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn stop(&mut self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), hearth_svc::RunError> {
//!     hearth_svc::run(Program)
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod probe;
pub mod run;
pub mod service;
pub mod signal;

pub use cancel::{CancellationReason, CancellationSource, CancellationToken, Registration};
pub use config::Config;
pub use control::{ControlEvent, ControlKind, Origin};
pub use error::RunError;
pub use host::{
    request_channel, Accepts, ChangeRequest, Command, ExitStatus, Handler, HostError,
    RequestSender, Requests, ServiceHost, State, Status, StatusReporter, SystemHost,
};
pub use probe::{HostProbe, ProbeError, SystemProbe};
pub use run::{run, run_with, run_with_config};
pub use service::{ControlHandler, Disposition, Environment, Service};
pub use signal::{BridgeError, Signal, SignalGuard, SignalSink, SignalSource, SystemSignals};
