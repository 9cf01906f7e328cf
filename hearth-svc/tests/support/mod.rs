//! In-process fakes for the probe, the service manager and signal delivery.

#![allow(dead_code)]

use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::anyhow;
use parking_lot::Mutex;

use hearth_svc::{
    request_channel, BridgeError, CancellationToken, ChangeRequest, Command, Config,
    ControlEvent, ControlHandler, Disposition, Environment, ExitStatus, Handler, HostError,
    HostProbe, ProbeError, RequestSender, Service, ServiceHost, Signal, SignalGuard, SignalSink,
    SignalSource, State, Status, StatusReporter,
};

/// Config that never touches the test process's working directory.
pub fn test_config() -> Config {
    Config::new("hearth-test").with_change_to_executable_dir(false)
}

/// How many times each callback ran.
#[derive(Debug, Default, Clone)]
pub struct Calls {
    init: Arc<AtomicUsize>,
    start: Arc<AtomicUsize>,
    stop: Arc<AtomicUsize>,
    managed: Arc<Mutex<Option<bool>>>,
    handled: Arc<Mutex<Vec<ControlEvent>>>,
}

impl Calls {
    pub fn init(&self) -> usize {
        self.init.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> usize {
        self.start.load(Ordering::SeqCst)
    }

    pub fn stop(&self) -> usize {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn managed(&self) -> Option<bool> {
        *self.managed.lock()
    }

    pub fn handled(&self) -> Vec<ControlEvent> {
        self.handled.lock().clone()
    }
}

/// Configurable service body.
pub struct Program {
    calls: Calls,
    init_error: Option<&'static str>,
    start_error: Option<&'static str>,
    stop_error: Option<&'static str>,
    token: Option<CancellationToken>,
    dispositions: Option<Vec<Disposition>>,
}

impl Program {
    pub fn new() -> (Self, Calls) {
        let calls = Calls::default();
        let program = Self {
            calls: calls.clone(),
            init_error: None,
            start_error: None,
            stop_error: None,
            token: None,
            dispositions: None,
        };
        (program, calls)
    }

    pub fn failing_init(mut self, message: &'static str) -> Self {
        self.init_error = Some(message);
        self
    }

    pub fn failing_start(mut self, message: &'static str) -> Self {
        self.start_error = Some(message);
        self
    }

    pub fn failing_stop(mut self, message: &'static str) -> Self {
        self.stop_error = Some(message);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Installs a control handler answering events in order; once the list is
    /// exhausted every further event stops the service.
    pub fn with_dispositions(mut self, dispositions: Vec<Disposition>) -> Self {
        self.dispositions = Some(dispositions.into_iter().rev().collect());
        self
    }
}

impl Service for Program {
    fn init(&mut self, env: &Environment) -> anyhow::Result<()> {
        self.calls.init.fetch_add(1, Ordering::SeqCst);
        *self.calls.managed.lock() = Some(env.is_managed_host());
        match self.init_error {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        match self.start_error {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        match self.stop_error {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn cancellation(&self) -> Option<CancellationToken> {
        self.token.clone()
    }

    fn control_handler(&mut self) -> Option<&mut dyn ControlHandler> {
        if self.dispositions.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl ControlHandler for Program {
    fn handle(&mut self, event: &ControlEvent) -> Disposition {
        self.calls.handled.lock().push(event.clone());
        self.dispositions
            .as_mut()
            .and_then(Vec::pop)
            .unwrap_or(Disposition::Stop)
    }
}

/// Probe with a canned answer.
pub struct FixedProbe {
    managed: bool,
    error: Option<&'static str>,
}

impl FixedProbe {
    pub fn interactive() -> Self {
        Self {
            managed: false,
            error: None,
        }
    }

    pub fn managed() -> Self {
        Self {
            managed: true,
            error: None,
        }
    }

    pub fn failing(message: &'static str) -> Self {
        Self {
            managed: false,
            error: Some(message),
        }
    }
}

impl HostProbe for FixedProbe {
    fn is_managed(&self) -> Result<bool, ProbeError> {
        match self.error {
            Some(message) => Err(ProbeError::Query {
                source: std::io::Error::other(message),
            }),
            None => Ok(self.managed),
        }
    }
}

/// What the scripted manager observed during one dispatch.
#[derive(Debug, Default, Clone)]
pub struct HostRecord {
    statuses: Arc<Mutex<Vec<Status>>>,
    exit: Arc<Mutex<Option<ExitStatus>>>,
    dispatched: Arc<AtomicUsize>,
}

impl HostRecord {
    pub fn states(&self) -> Vec<State> {
        self.statuses.lock().iter().map(|s| s.state).collect()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().clone()
    }

    pub fn exit(&self) -> Option<ExitStatus> {
        *self.exit.lock()
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

/// Service manager that runs the handler on its own thread and replays a
/// script of requests once the service reports `Running`.
pub struct ScriptedHost {
    script: Vec<(Command, State)>,
    refuse: Option<&'static str>,
    fail_after: Option<&'static str>,
    record: HostRecord,
}

impl ScriptedHost {
    pub fn new(script: Vec<(Command, State)>) -> (Self, HostRecord) {
        let record = HostRecord::default();
        let host = Self {
            script,
            refuse: None,
            fail_after: None,
            record: record.clone(),
        };
        (host, record)
    }

    /// Fails the dispatch without ever calling the handler.
    pub fn refusing(mut self, message: &'static str) -> Self {
        self.refuse = Some(message);
        self
    }

    /// Runs the handler, then reports a manager failure anyway.
    pub fn failing_after_run(mut self, message: &'static str) -> Self {
        self.fail_after = Some(message);
        self
    }
}

struct ScriptedReporter {
    statuses: Arc<Mutex<Vec<Status>>>,
    sender: RequestSender,
    script: Vec<(Command, State)>,
}

impl StatusReporter for ScriptedReporter {
    fn report(&mut self, status: Status) {
        let running = status.state == State::Running;
        self.statuses.lock().push(status);
        if running {
            for (command, state) in self.script.drain(..) {
                let request = ChangeRequest {
                    command,
                    current_status: Status::new(state),
                };
                assert!(self.sender.send(request), "handler should be listening");
            }
        }
    }
}

impl ServiceHost for ScriptedHost {
    fn run(&self, _name: &str, mut handler: Box<dyn Handler>) -> Result<(), HostError> {
        if let Some(message) = self.refuse {
            return Err(HostError::Other(message.to_owned()));
        }
        self.record.dispatched.fetch_add(1, Ordering::SeqCst);

        let (sender, requests) = request_channel();
        let mut reporter = ScriptedReporter {
            statuses: Arc::clone(&self.record.statuses),
            sender,
            script: self.script.clone(),
        };
        let exit = thread::Builder::new()
            .name("scripted-manager".into())
            .spawn(move || handler.execute(Vec::<OsString>::new(), requests, &mut reporter))
            .map_err(|error| HostError::Other(error.to_string()))?
            .join()
            .map_err(|_| HostError::Other("manager thread panicked".into()))?;
        *self.record.exit.lock() = Some(exit);

        match self.fail_after {
            Some(message) => Err(HostError::Other(message.to_owned())),
            None => Ok(()),
        }
    }
}

/// Signal source fed by the test.
///
/// Raised signals are queued until a run listens, then forwarded only if the
/// run registered them.
#[derive(Default, Clone)]
pub struct FakeSignals {
    inner: Arc<Mutex<FakeSignalState>>,
}

#[derive(Default)]
struct FakeSignalState {
    pending: Vec<Signal>,
    registered: Vec<Signal>,
    sink: Option<SignalSink>,
    listens: usize,
}

impl FakeSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, signal: Signal) {
        let mut state = self.inner.lock();
        match state.sink.as_ref() {
            Some(sink) => {
                if state.registered.contains(&signal) {
                    sink.deliver(signal);
                }
            }
            None => state.pending.push(signal),
        }
    }

    pub fn registered(&self) -> Vec<Signal> {
        self.inner.lock().registered.clone()
    }

    pub fn listens(&self) -> usize {
        self.inner.lock().listens
    }

    pub fn is_listening(&self) -> bool {
        self.inner.lock().sink.is_some()
    }
}

impl SignalSource for FakeSignals {
    fn listen(&self, signals: &[Signal], sink: SignalSink) -> Result<SignalGuard, BridgeError> {
        let mut state = self.inner.lock();
        state.listens += 1;
        state.registered = signals.to_vec();
        for signal in std::mem::take(&mut state.pending) {
            if signals.contains(&signal) {
                sink.deliver(signal);
            }
        }
        state.sink = Some(sink);
        let inner = Arc::clone(&self.inner);
        Ok(SignalGuard::new(move || {
            inner.lock().sink = None;
        }))
    }
}

/// Signal source whose installation always fails.
pub struct BrokenSignals;

impl SignalSource for BrokenSignals {
    fn listen(&self, _signals: &[Signal], _sink: SignalSink) -> Result<SignalGuard, BridgeError> {
        Err(BridgeError::Install {
            source: std::io::Error::other("sigaction refused"),
        })
    }
}
