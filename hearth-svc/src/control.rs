//! Canonical control events.
//!
//! Console signals, manager commands and cancellation all end up as a
//! [`ControlEvent`] so the runner only reasons about one vocabulary.

use crate::host::{ChangeRequest, Command, Status};
use crate::signal::Signal;

/// Normalised meaning of an external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Stop the service.
    Stop,
    /// The machine or session is going away.
    Shutdown,
    /// Report the current status.
    Interrogate,
    /// Pause the service.
    Pause,
    /// Resume the service.
    Continue,
    /// Anything without a lifecycle meaning.
    Other,
}

impl ControlKind {
    /// `Stop` or `Shutdown`.
    pub fn is_stop(self) -> bool {
        matches!(self, ControlKind::Stop | ControlKind::Shutdown)
    }
}

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A console signal.
    Signal(Signal),
    /// A service manager command.
    Host(Command),
    /// The service's cancellation token fired.
    Cancellation,
}

/// One control event, consumed once by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    kind: ControlKind,
    origin: Origin,
    status: Option<Status>,
}

impl ControlEvent {
    /// Translates a console signal.
    ///
    /// Interrupts and quits are stop requests, `SIGTERM` is treated as a
    /// shutdown, the rest carry no lifecycle meaning.
    pub fn from_signal(signal: Signal) -> Self {
        let kind = match signal {
            Signal::Interrupt | Signal::Quit => ControlKind::Stop,
            Signal::Terminate => ControlKind::Shutdown,
            Signal::Hangup | Signal::User1 | Signal::User2 => ControlKind::Other,
        };
        Self {
            kind,
            origin: Origin::Signal(signal),
            status: None,
        }
    }

    /// Translates a manager request, keeping its status for echoing.
    pub fn from_request(request: ChangeRequest) -> Self {
        let kind = match request.command {
            Command::Stop => ControlKind::Stop,
            Command::Shutdown => ControlKind::Shutdown,
            Command::Interrogate => ControlKind::Interrogate,
            Command::Pause => ControlKind::Pause,
            Command::Continue => ControlKind::Continue,
            Command::Other => ControlKind::Other,
        };
        Self {
            kind,
            origin: Origin::Host(request.command),
            status: Some(request.current_status),
        }
    }

    /// Synthetic stop published when cancellation fires.
    pub fn cancelled() -> Self {
        Self {
            kind: ControlKind::Stop,
            origin: Origin::Cancellation,
            status: None,
        }
    }

    /// Normalised kind.
    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    /// Event source.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Status the manager attached, if any.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Whether the event came from the cancellation token.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.origin, Origin::Cancellation)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::host::State;

    #[rstest]
    #[case(Signal::Interrupt, ControlKind::Stop)]
    #[case(Signal::Quit, ControlKind::Stop)]
    #[case(Signal::Terminate, ControlKind::Shutdown)]
    #[case(Signal::Hangup, ControlKind::Other)]
    #[case(Signal::User1, ControlKind::Other)]
    #[case(Signal::User2, ControlKind::Other)]
    fn signals_map_onto_canonical_kinds(#[case] signal: Signal, #[case] expected: ControlKind) {
        let event = ControlEvent::from_signal(signal);
        assert_eq!(event.kind(), expected);
        assert_eq!(event.status(), None);
    }

    #[rstest]
    #[case(Command::Stop, ControlKind::Stop)]
    #[case(Command::Shutdown, ControlKind::Shutdown)]
    #[case(Command::Interrogate, ControlKind::Interrogate)]
    #[case(Command::Pause, ControlKind::Pause)]
    #[case(Command::Continue, ControlKind::Continue)]
    #[case(Command::Other, ControlKind::Other)]
    fn commands_map_onto_canonical_kinds(#[case] command: Command, #[case] expected: ControlKind) {
        let event = ControlEvent::from_request(ChangeRequest {
            command,
            current_status: Status::new(State::Unknown(0x99)),
        });
        assert_eq!(event.kind(), expected);
        assert_eq!(event.status().map(|s| s.state), Some(State::Unknown(0x99)));
    }

    #[test]
    fn cancellation_is_a_stop() {
        let event = ControlEvent::cancelled();
        assert!(event.kind().is_stop());
        assert!(event.is_cancellation());
    }

    #[test]
    fn only_stop_and_shutdown_are_stops() {
        assert!(ControlKind::Shutdown.is_stop());
        assert!(!ControlKind::Interrogate.is_stop());
        assert!(!ControlKind::Other.is_stop());
    }
}
