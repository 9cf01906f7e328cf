//! Lifecycle orchestration.

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};

use tracing::{info, warn};

use crate::cancel::{CancellationToken, Registration};
use crate::config::Config;
use crate::control::ControlEvent;
use crate::error::RunError;
use crate::host::controller::{Controller, ErrorSlot, FailedPhase};
use crate::host::{ServiceHost, SystemHost};
use crate::probe::{HostProbe, SystemProbe};
use crate::service::{Disposition, Environment, Service};
use crate::signal::{SignalSink, SignalSource, SystemSignals};

const RUN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Runs `service` with the default [`Config`].
///
/// Blocks until the service manager stops the service, a watched console
/// signal arrives, or the service's cancellation token fires.
pub fn run<S: Service>(service: S) -> Result<(), RunError> {
    run_with_config(service, Config::default())
}

/// Runs `service` with an explicit configuration.
pub fn run_with_config<S: Service>(service: S, config: Config) -> Result<(), RunError> {
    run_with(
        service,
        &config,
        &SystemProbe::new(),
        &SystemHost::new(),
        &SystemSignals::new(),
    )
}

/// Runs `service` with injected collaborators.
pub fn run_with<S, P, H, B>(
    service: S,
    config: &Config,
    probe: &P,
    host: &H,
    signals: &B,
) -> Result<(), RunError>
where
    S: Service,
    P: HostProbe + ?Sized,
    H: ServiceHost + ?Sized,
    B: SignalSource + ?Sized,
{
    let managed = probe.is_managed()?;
    info!(
        target: RUN_TARGET,
        managed,
        service = config.service_name(),
        "hosting mode resolved"
    );
    if managed && config.change_to_executable_dir() {
        enter_executable_dir()?;
    }

    let environment = Environment::new(managed, config.service_name());
    let mut handle = ServiceHandle::new(service, environment);
    handle.init()?;

    if managed {
        handle.run_managed(config, host)
    } else {
        handle.run_interactive(config, signals)
    }
}

/// State bound to one run.
struct ServiceHandle<S> {
    service: S,
    environment: Environment,
    cancellation: Option<CancellationToken>,
}

impl<S: Service> ServiceHandle<S> {
    fn new(service: S, environment: Environment) -> Self {
        Self {
            service,
            environment,
            cancellation: None,
        }
    }

    /// Runs `init`, then queries the cancellation capability so services can
    /// build their token while initialising.
    fn init(&mut self) -> Result<(), RunError> {
        self.service.init(&self.environment).map_err(RunError::Init)?;
        self.cancellation = self.service.cancellation();
        Ok(())
    }

    fn run_managed<H>(self, config: &Config, host: &H) -> Result<(), RunError>
    where
        H: ServiceHost + ?Sized,
    {
        let errors = ErrorSlot::default();
        errors.clear();
        let controller = Controller::new(self.service, self.cancellation, errors.clone());
        let host_result = host.run(config.service_name(), Box::new(controller));

        // A staged application error outranks whatever the manager reported.
        if let Some(staged) = errors.take() {
            return Err(match staged.phase {
                FailedPhase::Start => RunError::Start(staged.error),
                FailedPhase::Stop => RunError::Stop(staged.error),
            });
        }
        host_result.map_err(RunError::from)
    }

    fn run_interactive<B>(mut self, config: &Config, signals: &B) -> Result<(), RunError>
    where
        B: SignalSource + ?Sized,
    {
        self.service.start().map_err(RunError::Start)?;
        info!(target: RUN_TARGET, "service started");

        let waited = self.wait_for_stop(config, signals);
        let stopped = self.service.stop().map_err(RunError::Stop);
        info!(target: RUN_TARGET, ok = stopped.is_ok(), "service stopped");
        stopped?;
        waited
    }

    /// Blocks until a stop condition is met. Listener failures are returned
    /// only after the caller has had a chance to stop the service.
    fn wait_for_stop<B>(&mut self, config: &Config, signals: &B) -> Result<(), RunError>
    where
        B: SignalSource + ?Sized,
    {
        let (tx, rx) = mpsc::channel();
        let watched = config.effective_signals();
        let _guard = signals.listen(&watched, SignalSink::new(tx.clone()))?;
        let _registration = self.watch_cancellation(tx);
        self.wait_on(&rx);
        Ok(())
    }

    fn watch_cancellation(&self, tx: mpsc::Sender<ControlEvent>) -> Option<Registration> {
        self.cancellation.as_ref().map(|token| {
            token.on_cancel(move || {
                let _ = tx.send(ControlEvent::cancelled());
            })
        })
    }

    fn wait_on(&mut self, events: &Receiver<ControlEvent>) {
        loop {
            let Ok(event) = events.recv() else {
                warn!(target: RUN_TARGET, "all event sources closed; stopping");
                return;
            };
            if event.is_cancellation() {
                info!(target: RUN_TARGET, "cancellation requested");
                return;
            }
            let disposition = match self.service.control_handler() {
                Some(handler) => handler.handle(&event),
                None => Disposition::Stop,
            };
            info!(
                target: RUN_TARGET,
                origin = ?event.origin(),
                kind = ?event.kind(),
                ?disposition,
                "control event received"
            );
            if disposition == Disposition::Stop {
                return;
            }
        }
    }
}

fn enter_executable_dir() -> Result<(), RunError> {
    enter_parent_of(env::current_exe())
}

fn enter_parent_of(exe: io::Result<PathBuf>) -> Result<(), RunError> {
    let exe = exe.map_err(|source| RunError::ExecutablePath { source })?;
    let Some(dir) = exe.parent() else {
        return Ok(());
    };
    env::set_current_dir(dir).map_err(|source| RunError::WorkingDir {
        path: dir.to_path_buf(),
        source,
    })?;
    info!(target: RUN_TARGET, dir = %dir.display(), "working directory changed");
    Ok(())
}
