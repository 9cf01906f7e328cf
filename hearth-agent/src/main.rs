//! Hearth Agent - demonstration service
//!
//! Runs a ticker workload either from a console or as a Windows Service.
//! Service registration is left to `sc.exe`; this binary only hosts the body.

mod agent;
mod telemetry;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use hearth_svc::{Config, Signal};

use crate::agent::{Agent, Settings};

#[derive(Debug, Parser)]
#[command(name = "agent", version, about = "Hearth demonstration agent")]
struct Args {
    /// Name registered with the service manager.
    #[arg(long, env = "HEARTH_SERVICE_NAME", default_value = "HearthAgent")]
    service_name: String,

    /// Tracing filter directives.
    #[arg(long, env = "HEARTH_LOG", default_value = "info")]
    log: String,

    /// Interval between ticks, in milliseconds.
    #[arg(long, env = "HEARTH_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,

    /// Stop on our own after this many milliseconds.
    #[arg(long, env = "HEARTH_RUN_FOR_MS")]
    run_for_ms: Option<u64>,

    /// Console signal to watch; repeat to watch several. Defaults to the
    /// platform's interrupt and terminate signals.
    #[arg(long = "signal", value_enum)]
    signals: Vec<SignalArg>,

    /// Keep the working directory when running as a service.
    #[arg(long)]
    keep_working_dir: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SignalArg {
    Int,
    Term,
    Hup,
    Quit,
    Usr1,
    Usr2,
}

impl From<SignalArg> for Signal {
    fn from(arg: SignalArg) -> Self {
        match arg {
            SignalArg::Int => Signal::Interrupt,
            SignalArg::Term => Signal::Terminate,
            SignalArg::Hup => Signal::Hangup,
            SignalArg::Quit => Signal::Quit,
            SignalArg::Usr1 => Signal::User1,
            SignalArg::Usr2 => Signal::User2,
        }
    }
}

impl Args {
    fn config(&self) -> Config {
        Config::new(self.service_name.clone())
            .with_signals(self.signals.iter().copied().map(Signal::from))
            .with_change_to_executable_dir(!self.keep_working_dir)
    }

    fn settings(&self) -> Settings {
        Settings {
            log_filter: self.log.clone(),
            tick: Duration::from_millis(self.tick_ms.max(1)),
            run_for: self.run_for_ms.map(Duration::from_millis),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let agent = Agent::new(args.settings());
    hearth_svc::run_with_config(agent, args.config())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_signal_flags_build_the_watch_list() {
        let args = Args::try_parse_from(["agent", "--signal", "hup", "--signal", "usr1"])
            .expect("arguments should parse");

        let config = args.config();

        assert_eq!(
            config.effective_signals(),
            vec![Signal::Hangup, Signal::User1]
        );
    }

    #[test]
    fn no_signal_flags_fall_back_to_platform_defaults() {
        let args = Args::try_parse_from(["agent"]).expect("arguments should parse");

        assert_eq!(
            args.config().effective_signals(),
            Signal::platform_defaults().to_vec()
        );
        assert!(args.config().change_to_executable_dir());
    }

    #[test]
    fn durations_come_from_millisecond_flags() {
        let args = Args::try_parse_from(["agent", "--tick-ms", "250", "--run-for-ms", "1500"])
            .expect("arguments should parse");

        let settings = args.settings();

        assert_eq!(settings.tick, Duration::from_millis(250));
        assert_eq!(settings.run_for, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn unknown_signal_names_are_rejected() {
        assert!(Args::try_parse_from(["agent", "--signal", "segv"]).is_err());
    }
}
