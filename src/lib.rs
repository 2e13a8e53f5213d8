//! A small interactive shell that supervises the programs it launches.
//!
//! Every external program runs as a tracked child process. The shell records
//! each launch in a [`ProcessTable`], reaps children as they terminate and
//! relaunches background children that were killed by a recoverable signal.
//! Built-in commands (`show`, `query`, `cd`, `clear`, `exit`) inspect that
//! table or the shell itself without spawning anything.
//!
//! The main entry point is [`Interpreter`], which dispatches input lines to a
//! set of pluggable factories. [`Supervisor`] is the launch/reap/restart core
//! and can be driven directly.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
mod external;
pub mod handoff;
mod interpreter;
pub mod launcher;
pub mod reaper;
pub mod redirect;
pub mod supervisor;
pub mod table;
pub mod tokenizer;
pub mod watcher;

/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{Interpreter, default_commands};

pub use command::RunMode;
pub use config::{Config, RestartPolicy};
pub use error::{HandoffError, LaunchError, SupervisorError, WatchError};
pub use launcher::LaunchRequest;
pub use supervisor::Supervisor;
pub use table::{Outcome, ProcessRecord, ProcessState, ProcessTable, RecordId};
pub use tokenizer::{Invocation, parse_line};
pub use watcher::ChildWatcher;
