//! Runner configuration.

use crate::signal::Signal;

const DEFAULT_SERVICE_NAME: &str = "Hearth";

/// Options for one [`crate::run_with_config`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    service_name: String,
    signals: Vec<Signal>,
    change_to_executable_dir: bool,
}

impl Config {
    /// Configuration for a service dispatched under `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            signals: Vec::new(),
            change_to_executable_dir: true,
        }
    }

    /// Signals that stop the service in a console. Empty selects
    /// [`Signal::platform_defaults`].
    pub fn with_signals(mut self, signals: impl IntoIterator<Item = Signal>) -> Self {
        self.signals = signals.into_iter().collect();
        self
    }

    /// Whether a managed run moves into the executable's directory before
    /// `init`. The service manager starts services in the system directory.
    pub fn with_change_to_executable_dir(mut self, enabled: bool) -> Self {
        self.change_to_executable_dir = enabled;
        self
    }

    /// Name handed to the service dispatcher.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Signal set actually watched in a console.
    pub fn effective_signals(&self) -> Vec<Signal> {
        if self.signals.is_empty() {
            Signal::platform_defaults().to_vec()
        } else {
            self.signals.clone()
        }
    }

    /// See [`Config::with_change_to_executable_dir`].
    pub fn change_to_executable_dir(&self) -> bool {
        self.change_to_executable_dir
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}
