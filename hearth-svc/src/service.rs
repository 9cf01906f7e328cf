//! The contract an application implements to be hosted by [`crate::run`].

use crate::cancel::CancellationToken;
use crate::control::ControlEvent;

/// Program body driven through `init → start → stop`.
///
/// `init` and `start` must not block. `stop` is called exactly once, and only
/// when `start` succeeded.
///
/// The two provided methods are optional capabilities. They are queried once
/// when the run begins; implementations that only care about the three
/// lifecycle callbacks can ignore them.
pub trait Service: Send + 'static {
    /// Called after the hosting mode is known and before anything starts.
    fn init(&mut self, env: &Environment) -> anyhow::Result<()>;

    /// Starts the workload.
    fn start(&mut self) -> anyhow::Result<()>;

    /// Stops the workload.
    fn stop(&mut self) -> anyhow::Result<()>;

    /// External cancellation that ends the run as if a stop request arrived.
    fn cancellation(&self) -> Option<CancellationToken> {
        None
    }

    /// Observer for console control events.
    ///
    /// When present, every signal delivered while running is passed to the
    /// handler and only a [`Disposition::Stop`] ends the run. When absent, any
    /// watched signal stops the service.
    fn control_handler(&mut self) -> Option<&mut dyn ControlHandler> {
        None
    }
}

/// Decides what a control event means for a running service.
pub trait ControlHandler {
    /// Handles one event.
    fn handle(&mut self, event: &ControlEvent) -> Disposition;
}

/// Outcome of [`ControlHandler::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep running and wait for the next event.
    Continue,
    /// Stop the service.
    Stop,
}

/// What the runner learnt about the process before calling [`Service::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    managed: bool,
    service_name: String,
}

impl Environment {
    pub(crate) fn new(managed: bool, service_name: impl Into<String>) -> Self {
        Self {
            managed,
            service_name: service_name.into(),
        }
    }

    /// Reports whether the process runs under the host service manager.
    pub fn is_managed_host(&self) -> bool {
        self.managed
    }

    /// Name the service is dispatched under when managed.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}
