//! Manager-facing state machine.
//!
//! ```text
//! [entry] StartPending --start ok--> Running
//!                      \-start err-> Exited(true, 1)
//! Running --Interrogate--> Running, echo status
//! Running --Pause|Continue|Other--> Running, silent
//! Running --Stop|Shutdown|cancelled--> StopPending
//! StopPending --stop ok--> Exited(false, 0)
//!             \-stop err-> Exited(true, 2)
//! ```
//!
//! `start`/`stop` failures cannot travel back through the manager API, so they
//! are staged in an [`ErrorSlot`] and collected by the runner once the manager
//! call returns.

use std::ffi::OsString;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::control::{ControlEvent, ControlKind};
use crate::host::{Accepts, ExitStatus, Handler, Requests, State, Status, StatusReporter};
use crate::service::Service;

const CONTROLLER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::controller");

/// Lifecycle callback that failed on the manager thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailedPhase {
    Start,
    Stop,
}

#[derive(Debug)]
pub(crate) struct StagedError {
    pub(crate) phase: FailedPhase,
    pub(crate) error: anyhow::Error,
}

/// Single-slot handoff from the manager thread to the waiting caller.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorSlot {
    slot: Arc<Mutex<Option<StagedError>>>,
}

impl ErrorSlot {
    pub(crate) fn clear(&self) {
        *self.slot.lock() = None;
    }

    fn stage(&self, phase: FailedPhase, error: anyhow::Error) {
        *self.slot.lock() = Some(StagedError { phase, error });
    }

    pub(crate) fn take(&self) -> Option<StagedError> {
        self.slot.lock().take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    StartPending,
    Running,
    StopPending,
    Exited(ExitStatus),
}

/// Drives a [`Service`] through the manager protocol.
pub(crate) struct Controller<S> {
    service: S,
    cancellation: Option<CancellationToken>,
    errors: ErrorSlot,
    accepts: Accepts,
    last_reported: Status,
}

impl<S: Service> Controller<S> {
    pub(crate) fn new(
        service: S,
        cancellation: Option<CancellationToken>,
        errors: ErrorSlot,
    ) -> Self {
        Self {
            service,
            cancellation,
            errors,
            accepts: Accepts::STOP | Accepts::SHUTDOWN,
            last_reported: Status::new(State::Stopped),
        }
    }

    fn report(&mut self, reporter: &mut dyn StatusReporter, status: Status) {
        debug!(target: CONTROLLER_TARGET, state = ?status.state, "reporting status");
        self.last_reported = status.clone();
        reporter.report(status);
    }

    fn starting(&mut self, reporter: &mut dyn StatusReporter) -> Phase {
        match self.service.start() {
            Ok(()) => {
                let running = Status::new(State::Running).accepting(self.accepts);
                self.report(reporter, running);
                info!(target: CONTROLLER_TARGET, "service running");
                Phase::Running
            }
            Err(error) => {
                warn!(target: CONTROLLER_TARGET, error = %error, "service failed to start");
                self.errors.stage(FailedPhase::Start, error);
                Phase::Exited(ExitStatus::START_FAILED)
            }
        }
    }

    fn running(&mut self, event: ControlEvent, reporter: &mut dyn StatusReporter) -> Phase {
        match event.kind() {
            ControlKind::Interrogate => {
                let current = event
                    .status()
                    .cloned()
                    .unwrap_or_else(|| self.last_reported.clone());
                // Echo only; the recorded state does not change.
                reporter.report(current);
                Phase::Running
            }
            kind if kind.is_stop() => {
                info!(
                    target: CONTROLLER_TARGET,
                    kind = ?event.kind(),
                    cancelled = event.is_cancellation(),
                    "stop requested"
                );
                self.report(reporter, Status::pending(State::StopPending));
                Phase::StopPending
            }
            kind => {
                debug!(target: CONTROLLER_TARGET, ?kind, "ignoring control");
                Phase::Running
            }
        }
    }

    fn stopping(&mut self) -> Phase {
        match self.service.stop() {
            Ok(()) => {
                info!(target: CONTROLLER_TARGET, "service stopped");
                Phase::Exited(ExitStatus::SUCCESS)
            }
            Err(error) => {
                warn!(target: CONTROLLER_TARGET, error = %error, "service failed to stop");
                self.errors.stage(FailedPhase::Stop, error);
                Phase::Exited(ExitStatus::STOP_FAILED)
            }
        }
    }
}

impl<S: Service> Handler for Controller<S> {
    fn execute(
        &mut self,
        _args: Vec<OsString>,
        mut requests: Requests,
        reporter: &mut dyn StatusReporter,
    ) -> ExitStatus {
        self.report(reporter, Status::pending(State::StartPending));

        // Without a token the publisher is dropped here, so the channel closes
        // as soon as the manager lets go of its sender.
        let publisher = requests.take_publisher();
        let _registration = self
            .cancellation
            .as_ref()
            .zip(publisher)
            .map(|(token, publisher)| {
                token.on_cancel(move || {
                    let _ = publisher.send(ControlEvent::cancelled());
                })
            });

        let mut phase = Phase::StartPending;
        loop {
            phase = match phase {
                Phase::StartPending => self.starting(reporter),
                Phase::Running => {
                    let event = requests.recv().unwrap_or_else(|_| {
                        warn!(target: CONTROLLER_TARGET, "request channel closed; stopping");
                        ControlEvent::cancelled()
                    });
                    self.running(event, reporter)
                }
                Phase::StopPending => self.stopping(),
                Phase::Exited(status) => {
                    info!(
                        target: CONTROLLER_TARGET,
                        failed = status.failed,
                        code = status.code,
                        "handler exiting"
                    );
                    return status;
                }
            };
        }
    }
}
