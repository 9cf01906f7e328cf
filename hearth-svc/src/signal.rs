//! Console termination signals and the listener that forwards them.

use std::fmt;
use std::io;
use std::sync::mpsc::Sender;

use thiserror::Error;

use crate::control::ControlEvent;

const SIGNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signal");

/// Catchable process signals, named portably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// `SIGINT`, or Ctrl+C / Ctrl+Break on a Windows console.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGHUP`.
    Hangup,
    /// `SIGQUIT`.
    Quit,
    /// `SIGUSR1`.
    User1,
    /// `SIGUSR2`.
    User2,
}

impl Signal {
    /// Signals watched when the caller does not choose any.
    ///
    /// A Windows console only delivers interrupts, so the default there is
    /// narrower than on unix.
    pub fn platform_defaults() -> &'static [Signal] {
        if cfg!(windows) {
            &[Signal::Interrupt]
        } else {
            &[Signal::Interrupt, Signal::Terminate]
        }
    }

    /// Conventional upper-case name, e.g. `SIGHUP`.
    pub fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
            Signal::Quit => "SIGQUIT",
            Signal::User1 => "SIGUSR1",
            Signal::User2 => "SIGUSR2",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors reported while installing signal listeners.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Where a listener publishes the signals it receives.
///
/// Each delivered signal becomes a [`ControlEvent`] on the runner's event
/// channel.
#[derive(Debug, Clone)]
pub struct SignalSink {
    events: Sender<ControlEvent>,
}

impl SignalSink {
    pub(crate) fn new(events: Sender<ControlEvent>) -> Self {
        Self { events }
    }

    /// Publishes one signal. Returns `false` once nobody is listening.
    pub fn deliver(&self, signal: Signal) -> bool {
        tracing::debug!(target: SIGNAL_TARGET, %signal, "signal received");
        self.events.send(ControlEvent::from_signal(signal)).is_ok()
    }
}

/// Keeps a listener registered; dropping it unregisters.
#[must_use = "dropping the guard stops signal delivery"]
pub struct SignalGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SignalGuard {
    /// Guard that runs `release` when dropped.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for SignalGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalGuard")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

/// Abstraction over process signal delivery.
pub trait SignalSource: Send + Sync {
    /// Starts forwarding every signal in `signals` to `sink` until the guard
    /// is dropped.
    fn listen(&self, signals: &[Signal], sink: SignalSink) -> Result<SignalGuard, BridgeError>;
}

/// Listener backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignals;

impl SystemSignals {
    /// Builds the system listener.
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
mod imp {
    use std::thread;

    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
    use signal_hook::iterator::Signals;
    use tracing::{info, warn};

    use super::{BridgeError, Signal, SignalGuard, SignalSink, SystemSignals, SIGNAL_TARGET};

    fn raw(signal: Signal) -> i32 {
        match signal {
            Signal::Interrupt => SIGINT,
            Signal::Terminate => SIGTERM,
            Signal::Hangup => SIGHUP,
            Signal::Quit => SIGQUIT,
            Signal::User1 => SIGUSR1,
            Signal::User2 => SIGUSR2,
        }
    }

    fn from_raw(raw: i32) -> Option<Signal> {
        match raw {
            SIGINT => Some(Signal::Interrupt),
            SIGTERM => Some(Signal::Terminate),
            SIGHUP => Some(Signal::Hangup),
            SIGQUIT => Some(Signal::Quit),
            SIGUSR1 => Some(Signal::User1),
            SIGUSR2 => Some(Signal::User2),
            _ => None,
        }
    }

    impl super::SignalSource for SystemSignals {
        fn listen(
            &self,
            signals: &[Signal],
            sink: SignalSink,
        ) -> Result<SignalGuard, BridgeError> {
            let mut iterator = Signals::new(signals.iter().copied().map(raw))
                .map_err(|source| BridgeError::Install { source })?;
            let handle = iterator.handle();
            let forwarder = thread::Builder::new()
                .name("hearth-signals".into())
                .spawn(move || {
                    for raw in iterator.forever() {
                        let Some(signal) = from_raw(raw) else {
                            continue;
                        };
                        if !sink.deliver(signal) {
                            break;
                        }
                    }
                })
                .map_err(|source| BridgeError::Install { source })?;
            info!(target: SIGNAL_TARGET, ?signals, "listening for signals");
            Ok(SignalGuard::new(move || {
                handle.close();
                if forwarder.join().is_err() {
                    warn!(target: SIGNAL_TARGET, "signal forwarder panicked");
                }
            }))
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::io;

    use parking_lot::Mutex;
    use tracing::{info, warn};

    use super::{BridgeError, Signal, SignalGuard, SignalSink, SystemSignals, SIGNAL_TARGET};

    struct Console {
        installed: bool,
        sink: Option<SignalSink>,
    }

    // ctrlc allows one handler per process; each run re-points it at its own sink.
    static CONSOLE: Mutex<Console> = Mutex::new(Console {
        installed: false,
        sink: None,
    });

    fn on_console_event() {
        if let Some(sink) = CONSOLE.lock().sink.as_ref() {
            sink.deliver(Signal::Interrupt);
        }
    }

    impl super::SignalSource for SystemSignals {
        fn listen(
            &self,
            signals: &[Signal],
            sink: SignalSink,
        ) -> Result<SignalGuard, BridgeError> {
            for signal in signals.iter().filter(|s| **s != Signal::Interrupt) {
                warn!(
                    target: SIGNAL_TARGET,
                    %signal,
                    "signal cannot be delivered to a Windows console; ignoring"
                );
            }
            if !signals.contains(&Signal::Interrupt) {
                return Ok(SignalGuard::noop());
            }
            let mut console = CONSOLE.lock();
            if !console.installed {
                ctrlc::set_handler(on_console_event).map_err(|error| BridgeError::Install {
                    source: io::Error::other(error),
                })?;
                console.installed = true;
            }
            console.sink = Some(sink);
            info!(target: SIGNAL_TARGET, "listening for console interrupts");
            Ok(SignalGuard::new(|| {
                CONSOLE.lock().sink = None;
            }))
        }
    }
}
