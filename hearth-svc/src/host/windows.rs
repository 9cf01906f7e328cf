//! Windows Service Control Manager adapter.
//!
//! The dispatcher calls back into a plain `extern "system"` entry point, so the
//! handler for the current dispatch is parked in a process-wide slot and picked
//! up by `service_main` on the manager's thread.

use std::ffi::OsString;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};
use windows_service::define_windows_service;
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
    ServiceType,
};
use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
};
use windows_service::service_dispatcher;

use super::{
    request_channel, Accepts, ChangeRequest, Command, ExitStatus, Handler, HostError, State,
    Status, StatusReporter,
};

const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");
const SERVICE_TYPE: ServiceType = ServiceType::OWN_PROCESS;

struct Dispatch {
    name: String,
    handler: Box<dyn Handler>,
    outcome: Arc<Mutex<Option<HostError>>>,
}

static PENDING: Mutex<Option<Dispatch>> = Mutex::new(None);

define_windows_service!(ffi_service_main, service_main);

pub(super) fn dispatch(name: &str, handler: Box<dyn Handler>) -> Result<(), HostError> {
    let outcome = Arc::new(Mutex::new(None));
    {
        let mut pending = PENDING.lock();
        if pending.is_some() {
            return Err(HostError::AlreadyDispatching);
        }
        *pending = Some(Dispatch {
            name: name.to_owned(),
            handler,
            outcome: Arc::clone(&outcome),
        });
    }
    info!(target: HOST_TARGET, service = name, "starting service dispatcher");
    // Blocks until service_main returns.
    let result = service_dispatcher::start(name, ffi_service_main);
    // Clear the slot if the dispatcher never reached service_main.
    PENDING.lock().take();
    result?;
    match outcome.lock().take() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn service_main(args: Vec<OsString>) {
    let Some(Dispatch {
        name,
        mut handler,
        outcome,
    }) = PENDING.lock().take()
    else {
        error!(target: HOST_TARGET, "service main invoked without a pending handler");
        return;
    };

    let (sender, requests) = request_channel();
    let last = Arc::new(Mutex::new(Status::new(State::Stopped)));
    let current = Arc::clone(&last);

    let control = move |control: ServiceControl| -> ServiceControlHandlerResult {
        let (command, result) = match control {
            ServiceControl::Stop => (Command::Stop, ServiceControlHandlerResult::NoError),
            ServiceControl::Shutdown => (Command::Shutdown, ServiceControlHandlerResult::NoError),
            ServiceControl::Pause => (Command::Pause, ServiceControlHandlerResult::NoError),
            ServiceControl::Continue => (Command::Continue, ServiceControlHandlerResult::NoError),
            ServiceControl::Interrogate => {
                (Command::Interrogate, ServiceControlHandlerResult::NoError)
            }
            other => {
                warn!(target: HOST_TARGET, control = ?other, "unhandled control");
                (Command::Other, ServiceControlHandlerResult::NotImplemented)
            }
        };
        let request = ChangeRequest {
            command,
            current_status: current.lock().clone(),
        };
        if !sender.send(request) {
            warn!(target: HOST_TARGET, ?command, "handler already exited; control dropped");
        }
        result
    };

    let handle = match service_control_handler::register(&name, control) {
        Ok(handle) => handle,
        Err(error) => {
            error!(target: HOST_TARGET, error = %error, "failed to register control handler");
            *outcome.lock() = Some(HostError::Dispatcher(error));
            return;
        }
    };

    let mut reporter = ScmReporter { handle, last };
    let exit = handler.execute(args, requests, &mut reporter);
    reporter.finish(exit);
}

struct ScmReporter {
    handle: ServiceStatusHandle,
    last: Arc<Mutex<Status>>,
}

impl ScmReporter {
    fn set(&self, state: ServiceState, status: &Status, exit_code: ServiceExitCode) {
        let result = self.handle.set_service_status(ServiceStatus {
            service_type: SERVICE_TYPE,
            current_state: state,
            controls_accepted: controls_accepted(status.accepts),
            exit_code,
            checkpoint: status.checkpoint,
            wait_hint: status.wait_hint,
            process_id: None,
        });
        if let Err(error) = result {
            warn!(target: HOST_TARGET, error = %error, ?state, "failed to report status");
        }
    }

    fn finish(&mut self, exit: ExitStatus) {
        let stopped = Status::new(State::Stopped);
        self.set(ServiceState::Stopped, &stopped, exit_code(exit));
        *self.last.lock() = stopped;
    }
}

impl StatusReporter for ScmReporter {
    fn report(&mut self, status: Status) {
        let Some(state) = service_state(status.state) else {
            warn!(target: HOST_TARGET, state = ?status.state, "state has no SCM equivalent");
            return;
        };
        self.set(state, &status, ServiceExitCode::Win32(0));
        *self.last.lock() = status;
    }
}

fn exit_code(exit: ExitStatus) -> ServiceExitCode {
    if exit.failed {
        ServiceExitCode::ServiceSpecific(exit.code)
    } else {
        ServiceExitCode::Win32(0)
    }
}

fn service_state(state: State) -> Option<ServiceState> {
    match state {
        State::Stopped => Some(ServiceState::Stopped),
        State::StartPending => Some(ServiceState::StartPending),
        State::StopPending => Some(ServiceState::StopPending),
        State::Running => Some(ServiceState::Running),
        State::ContinuePending => Some(ServiceState::ContinuePending),
        State::PausePending => Some(ServiceState::PausePending),
        State::Paused => Some(ServiceState::Paused),
        State::Unknown(_) => None,
    }
}

fn controls_accepted(accepts: Accepts) -> ServiceControlAccept {
    let mut controls = ServiceControlAccept::empty();
    if accepts.contains(Accepts::STOP) {
        controls |= ServiceControlAccept::STOP;
    }
    if accepts.contains(Accepts::PAUSE_CONTINUE) {
        controls |= ServiceControlAccept::PAUSE_CONTINUE;
    }
    if accepts.contains(Accepts::SHUTDOWN) {
        controls |= ServiceControlAccept::SHUTDOWN;
    }
    controls
}
