use crate::env::Environment;
use crate::supervisor::Supervisor;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Signaled foreground children map to `128 + signal`, as POSIX shells do.
pub type ExitCode = i32;

/// Whether the controller blocks on a launched child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// The controller waits until the child terminates.
    #[default]
    Foreground,
    /// The controller returns at once; the reaper settles the child later.
    Background,
}

impl RunMode {
    pub fn is_foreground(self) -> bool {
        self == RunMode::Foreground
    }
}

/// Everything a command may touch while it runs.
///
/// Built-ins use `env` and read the process table through `supervisor`;
/// external commands hand themselves to the supervisor's launcher.
pub struct Context<'a> {
    pub env: &'a mut Environment,
    pub supervisor: &'a mut Supervisor,
    pub mode: RunMode,
    pub redirect: bool,
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl and by external commands.
pub trait ExecutableCommand {
    /// Executes the command, writing user-facing output to `stdout`.
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        ctx: &mut Context<'_>,
    ) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a token sequence.
///
/// `tokens[0]` is the command name; the remaining tokens are passed verbatim,
/// including any redirection suffix. Returns `None` when the factory doesn't
/// recognize the name.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided tokens.
    fn try_create(
        &self,
        env: &Environment,
        tokens: &[String],
    ) -> Option<Box<dyn ExecutableCommand>>;
}
