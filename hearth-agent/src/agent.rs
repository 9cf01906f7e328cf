//! Ticker workload hosted by the runner.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use hearth_svc::{
    CancellationReason, CancellationSource, CancellationToken, ControlEvent, ControlHandler,
    ControlKind, Disposition, Environment, Service,
};

use crate::telemetry;

const AGENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::agent");

type Spawner = fn(String, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>;

fn os_thread(name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(body)
}

/// Runtime knobs for the agent.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_filter: String,
    pub tick: Duration,
    pub run_for: Option<Duration>,
}

/// Producer/consumer ticker: one thread counts ticks, another logs them.
pub struct Agent {
    settings: Settings,
    cancel: Option<CancellationSource>,
    exits: Vec<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    reloads: usize,
    spawner: Spawner,
}

impl Agent {
    pub fn new(settings: Settings) -> Self {
        let cancel = settings.run_for.map(|_| CancellationSource::new());
        Self {
            settings,
            cancel,
            exits: Vec::new(),
            workers: Vec::new(),
            reloads: 0,
            spawner: os_thread,
        }
    }

    fn spawn(&mut self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let worker = (self.spawner)(name.to_owned(), Box::new(body))
            .with_context(|| format!("failed to spawn {name} thread"))?;
        self.workers.push(worker);
        Ok(())
    }

    fn spawn_ticker(&mut self) -> Result<()> {
        let tick = self.settings.tick;
        let (exit_tx, exit_rx) = mpsc::channel::<()>();
        let (ticks_tx, ticks_rx) = mpsc::channel::<u64>();
        self.exits.push(exit_tx);

        self.spawn("agent-producer", move || {
            let mut count = 0u64;
            loop {
                match exit_rx.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => {
                        count += 1;
                        if ticks_tx.send(count).is_err() {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })?;

        self.spawn("agent-consumer", move || {
            for count in ticks_rx {
                info!(target: AGENT_TARGET, count, "tick");
            }
        })
    }

    fn spawn_deadline(&mut self) -> Result<()> {
        let (Some(run_for), Some(source)) = (self.settings.run_for, self.cancel.clone()) else {
            return Ok(());
        };
        let (exit_tx, exit_rx) = mpsc::channel::<()>();
        self.exits.push(exit_tx);

        self.spawn("agent-deadline", move || {
            if let Err(RecvTimeoutError::Timeout) = exit_rx.recv_timeout(run_for) {
                info!(target: AGENT_TARGET, ?run_for, "run time elapsed");
                source.cancel(CancellationReason::SupervisorCancel);
            }
        })
    }

    fn shutdown_workers(&mut self) -> Result<()> {
        for exit in self.exits.drain(..) {
            let _ = exit.send(());
        }
        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            warn!(target: AGENT_TARGET, panicked, "worker threads panicked");
            return Err(anyhow!("{panicked} agent worker(s) panicked"));
        }
        Ok(())
    }

    /// Number of reload requests handled so far.
    pub fn reloads(&self) -> usize {
        self.reloads
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }
}

impl Service for Agent {
    fn init(&mut self, env: &Environment) -> Result<()> {
        telemetry::initialise(&self.settings.log_filter, env.is_managed_host())?;
        if env.is_managed_host() {
            info!(
                target: AGENT_TARGET,
                service = env.service_name(),
                log = %telemetry::log_file_path().display(),
                "running under the service manager"
            );
        } else {
            info!(target: AGENT_TARGET, "running in a console");
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(anyhow!("agent already started"));
        }
        if let Err(error) = self.spawn_ticker().and_then(|()| self.spawn_deadline()) {
            // The runner does not call stop after a failed start.
            if let Err(cleanup) = self.shutdown_workers() {
                warn!(target: AGENT_TARGET, error = %cleanup, "cleanup after failed start");
            }
            return Err(error);
        }
        info!(target: AGENT_TARGET, tick = ?self.settings.tick, "agent started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        info!(target: AGENT_TARGET, "agent stopping");
        self.shutdown_workers()?;
        info!(target: AGENT_TARGET, reloads = self.reloads(), "agent stopped");
        Ok(())
    }

    fn cancellation(&self) -> Option<CancellationToken> {
        self.cancel.as_ref().map(CancellationSource::token)
    }

    fn control_handler(&mut self) -> Option<&mut dyn ControlHandler> {
        Some(self)
    }
}

impl ControlHandler for Agent {
    fn handle(&mut self, event: &ControlEvent) -> Disposition {
        match event.kind() {
            ControlKind::Other => {
                self.reloads += 1;
                info!(
                    target: AGENT_TARGET,
                    origin = ?event.origin(),
                    reloads = self.reloads,
                    "reload requested"
                );
                Disposition::Continue
            }
            _ => Disposition::Stop,
        }
    }
}
