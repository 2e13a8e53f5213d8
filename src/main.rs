use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use nix::sys::signal::Signal;
use shell_supervisor::{ChildWatcher, Config, Interpreter, RestartPolicy, default_commands};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// Interactive shell that restarts background jobs killed by a signal.
struct ShellArgs {
    /// never relaunch terminated background children
    #[argh(switch)]
    no_restart: bool,

    /// extra signal that ends a child for good, e.g. SIGABRT (repeatable)
    #[argh(option)]
    fatal_signal: Vec<String>,

    /// milliseconds between status polls while a foreground child runs
    #[argh(option, default = "20")]
    poll_ms: u64,

    /// milliseconds between idle sweeps for terminated children
    #[argh(option, default = "500")]
    sweep_ms: u64,

    /// tracing filter directive; overrides RUST_LOG
    #[argh(option)]
    log: Option<String>,
}

impl ShellArgs {
    fn config(&self) -> Result<Config> {
        let mut restart = if self.no_restart {
            RestartPolicy::disabled()
        } else {
            RestartPolicy::default()
        };
        for name in &self.fatal_signal {
            let signal = Signal::from_str(name).with_context(|| format!("unknown signal {name}"))?;
            if !restart.fatal_signals.contains(&signal) {
                restart.fatal_signals.push(signal);
            }
        }
        Ok(Config {
            restart,
            foreground_poll: Duration::from_millis(self.poll_ms.max(1)),
            sweep_interval: Duration::from_millis(self.sweep_ms.max(1)),
        })
    }
}

fn main() -> Result<()> {
    // Must precede every other thread so they all inherit the blocked SIGCHLD.
    let watcher = ChildWatcher::install().context("failed to install the child watcher")?;

    let args: ShellArgs = argh::from_env();
    init_tracing(args.log.as_deref())?;
    let config = args.config()?;
    info!(
        restart = config.restart.enabled,
        fatal = ?config.restart.fatal_signals,
        "shell starting"
    );

    let mut shell = Interpreter::new(&config, default_commands()).with_notices(watcher.notices());
    shell.repl()
}

fn init_tracing(directive: Option<&str>) -> Result<()> {
    let env_filter = match directive {
        Some(directive) => EnvFilter::try_new(directive).context("invalid --log filter")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))
}
