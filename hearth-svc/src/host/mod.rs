//! Host service manager protocol.
//!
//! The manager calls [`Handler::execute`] on a thread it owns, delivers
//! [`ChangeRequest`]s one at a time and expects status reports in order
//! through a [`StatusReporter`]. [`ServiceHost`] is the seam between the
//! runner and the real manager so the protocol can be driven in-process.

use std::ffi::OsString;
use std::fmt;
use std::ops::BitOr;
use std::sync::mpsc::{self, Receiver, RecvError, Sender};
use std::time::Duration;

use thiserror::Error;

use crate::control::ControlEvent;

pub(crate) mod controller;
#[cfg(windows)]
mod windows;

/// Lifecycle state as reported to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not running.
    Stopped,
    /// Starting up.
    StartPending,
    /// Shutting down.
    StopPending,
    /// Running.
    Running,
    /// Resuming from pause.
    ContinuePending,
    /// Pausing.
    PausePending,
    /// Paused.
    Paused,
    /// Any value this crate does not know; echoed back untouched.
    Unknown(u32),
}

/// Control commands the service declares it will accept.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Accepts(u32);

impl Accepts {
    /// No commands.
    pub const NONE: Accepts = Accepts(0);
    /// Stop requests.
    pub const STOP: Accepts = Accepts(0x1);
    /// Pause and continue requests.
    pub const PAUSE_CONTINUE: Accepts = Accepts(0x2);
    /// System shutdown notifications.
    pub const SHUTDOWN: Accepts = Accepts(0x4);

    /// Raw bit set.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Accepts) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Accepts {
    type Output = Accepts;

    fn bitor(self, rhs: Self) -> Self::Output {
        Accepts(self.0 | rhs.0)
    }
}

impl fmt::Debug for Accepts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Accepts::STOP) {
            names.push("STOP");
        }
        if self.contains(Accepts::PAUSE_CONTINUE) {
            names.push("PAUSE_CONTINUE");
        }
        if self.contains(Accepts::SHUTDOWN) {
            names.push("SHUTDOWN");
        }
        write!(f, "Accepts({})", names.join(" | "))
    }
}

/// One status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Reported state.
    pub state: State,
    /// Commands the manager may deliver while in this state.
    pub accepts: Accepts,
    /// Progress counter for pending states.
    pub checkpoint: u32,
    /// Time the manager should allow before the next report.
    pub wait_hint: Duration,
}

impl Status {
    /// Status in `state` that accepts nothing.
    pub fn new(state: State) -> Self {
        Self {
            state,
            accepts: Accepts::NONE,
            checkpoint: 0,
            wait_hint: Duration::ZERO,
        }
    }

    /// Pending status with a progress checkpoint and wait hint.
    pub fn pending(state: State) -> Self {
        Self {
            state,
            accepts: Accepts::NONE,
            checkpoint: 1,
            wait_hint: Duration::from_secs(10),
        }
    }

    /// Replaces the accepted commands.
    pub fn accepting(mut self, accepts: Accepts) -> Self {
        self.accepts = accepts;
        self
    }
}

/// Command delivered by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop the service.
    Stop,
    /// Pause the service.
    Pause,
    /// Resume a paused service.
    Continue,
    /// Report the current status.
    Interrogate,
    /// The system is shutting down.
    Shutdown,
    /// Anything else the manager may send.
    Other,
}

/// A command together with the status the manager last saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    /// Delivered command.
    pub command: Command,
    /// Status at delivery time.
    pub current_status: Status,
}

/// Value returned by a [`Handler`]: whether the run failed, plus an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// The service ended because of an error.
    pub failed: bool,
    /// Service-specific exit code.
    pub code: u32,
}

impl ExitStatus {
    /// Clean exit.
    pub const SUCCESS: ExitStatus = ExitStatus {
        failed: false,
        code: 0,
    };
    /// `start` failed.
    pub const START_FAILED: ExitStatus = ExitStatus {
        failed: true,
        code: 1,
    };
    /// `stop` failed.
    pub const STOP_FAILED: ExitStatus = ExitStatus {
        failed: true,
        code: 2,
    };
}

/// Sink for in-order status reports.
pub trait StatusReporter {
    /// Reports one status.
    fn report(&mut self, status: Status);
}

/// Manager-side sender of [`ChangeRequest`]s.
#[derive(Debug, Clone)]
pub struct RequestSender {
    events: Sender<ControlEvent>,
}

impl RequestSender {
    /// Delivers one request. Returns `false` once the handler has exited.
    pub fn send(&self, request: ChangeRequest) -> bool {
        self.events.send(ControlEvent::from_request(request)).is_ok()
    }
}

/// Handler-side end of the request channel.
///
/// Requests arrive already translated into [`ControlEvent`]s. The handler can
/// publish synthetic events of its own through the publisher, which is handed
/// out once; `recv` fails once the manager and that publisher are both gone.
#[derive(Debug)]
pub struct Requests {
    publisher: Option<Sender<ControlEvent>>,
    events: Receiver<ControlEvent>,
}

impl Requests {
    /// Blocks for the next event.
    pub fn recv(&self) -> Result<ControlEvent, RecvError> {
        self.events.recv()
    }

    pub(crate) fn take_publisher(&mut self) -> Option<Sender<ControlEvent>> {
        self.publisher.take()
    }
}

/// Creates a connected request channel.
pub fn request_channel() -> (RequestSender, Requests) {
    let (tx, rx) = mpsc::channel();
    (
        RequestSender { events: tx.clone() },
        Requests {
            publisher: Some(tx),
            events: rx,
        },
    )
}

/// Entry point the manager runs on its own thread.
pub trait Handler: Send {
    /// Runs the service until it exits.
    fn execute(
        &mut self,
        args: Vec<OsString>,
        requests: Requests,
        reporter: &mut dyn StatusReporter,
    ) -> ExitStatus;
}

/// Errors raised by the host manager itself.
#[derive(Debug, Error)]
pub enum HostError {
    /// No service manager exists on this platform.
    #[error("running under a service manager is not supported on this platform")]
    Unsupported,
    /// Another dispatch is still in progress in this process.
    #[error("a service dispatch is already in progress")]
    AlreadyDispatching,
    /// The Windows service API failed.
    #[cfg(windows)]
    #[error(transparent)]
    Dispatcher(#[from] windows_service::Error),
    /// Any other manager failure.
    #[error("{0}")]
    Other(String),
}

/// The service manager.
pub trait ServiceHost {
    /// Hands `handler` to the manager under `name` and blocks until the
    /// manager is done with it.
    fn run(&self, name: &str, handler: Box<dyn Handler>) -> Result<(), HostError>;
}

/// The platform's service manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl SystemHost {
    /// Builds the system host.
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
impl ServiceHost for SystemHost {
    fn run(&self, name: &str, handler: Box<dyn Handler>) -> Result<(), HostError> {
        windows::dispatch(name, handler)
    }
}

#[cfg(not(windows))]
impl ServiceHost for SystemHost {
    fn run(&self, _name: &str, _handler: Box<dyn Handler>) -> Result<(), HostError> {
        Err(HostError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlKind, Origin};

    #[test]
    fn accepts_combine_and_contain() {
        let accepts = Accepts::STOP | Accepts::SHUTDOWN;
        assert!(accepts.contains(Accepts::STOP));
        assert!(accepts.contains(Accepts::SHUTDOWN));
        assert!(!accepts.contains(Accepts::PAUSE_CONTINUE));
        assert_eq!(accepts.bits(), 0x5);
        assert_eq!(format!("{accepts:?}"), "Accepts(STOP | SHUTDOWN)");
    }

    #[test]
    fn exit_codes_follow_the_manager_convention() {
        assert_eq!(ExitStatus::SUCCESS, ExitStatus { failed: false, code: 0 });
        assert_eq!(ExitStatus::START_FAILED.code, 1);
        assert_eq!(ExitStatus::STOP_FAILED.code, 2);
    }

    #[test]
    fn requests_arrive_as_control_events() {
        let (sender, requests) = request_channel();
        let request = ChangeRequest {
            command: Command::Interrogate,
            current_status: Status::new(State::Paused),
        };

        assert!(sender.send(request));

        let event = requests.recv().expect("request should be queued");
        assert_eq!(event.kind(), ControlKind::Interrogate);
        assert_eq!(event.origin(), &Origin::Host(Command::Interrogate));
        assert_eq!(event.status(), Some(&Status::new(State::Paused)));
    }

    #[test]
    fn dropping_the_manager_side_closes_the_channel() {
        let (sender, mut requests) = request_channel();
        drop(requests.take_publisher());
        drop(sender);

        assert!(requests.recv().is_err());
        assert!(requests.take_publisher().is_none());
    }

    #[cfg(not(windows))]
    #[test]
    fn system_host_is_unsupported_off_windows() {
        struct Never;
        impl Handler for Never {
            fn execute(
                &mut self,
                _args: Vec<OsString>,
                _requests: Requests,
                _reporter: &mut dyn StatusReporter,
            ) -> ExitStatus {
                unreachable!("handler must not run")
            }
        }

        let error = SystemHost::new()
            .run("hearth", Box::new(Never))
            .expect_err("no manager off Windows");
        assert!(matches!(error, HostError::Unsupported));
    }
}
