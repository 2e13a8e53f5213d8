use crate::command::{CommandFactory, Context, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use crate::redirect::{self, RedirectTarget};
use crate::table::{ProcessRecord, ProcessState};
use anyhow::{Context as _, Result};
use argh::{EarlyExit, FromArgs};
use nix::unistd::Pid;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in the controller without spawning a child process, so they never appear in
/// the process table.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "show" or "cd".
    fn name() -> &'static str;

    /// Executes the command.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, ctx: &mut Context<'_>) -> Result<ExitCode>;
}

/// A parsed builtin plus the redirection suffix that was split off its arguments.
struct Builtin<T> {
    cmd: T,
    output: Option<RedirectTarget>,
}

impl<T: BuiltinCommand> ExecutableCommand for Builtin<T> {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let Builtin { cmd, output } = *self;
        let mut file: File;
        let out: &mut dyn Write = match output {
            Some(RedirectTarget::Path(dest)) => {
                file = OpenOptions::new()
                    .read(true)
                    .append(true)
                    .create(true)
                    .open(&dest)
                    .with_context(|| format!("Cannot redirect output to {dest}"))?;
                &mut file
            }
            Some(RedirectTarget::MissingDestination) => {
                eprintln!("Cannot redirect output. No destination specified.");
                stdout
            }
            None => stdout,
        };
        match cmd.execute(out, ctx) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(out, "{e:#}")?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        _ctx: &mut Context<'_>,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", self.output.trim_end())?;
        Ok(if self.is_error { 1 } else { 0 })
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        tokens: &[String],
    ) -> Option<Box<dyn ExecutableCommand>> {
        let (name, rest) = tokens.split_first()?;
        if name != T::name() {
            return None;
        }
        let (args, output) = redirect::split(rest);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Some(match T::from_args(&[name], &args) {
            Ok(cmd) => Box::new(Builtin { cmd, output }),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    /// Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let env = &mut *ctx.env;
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Err(anyhow::anyhow!("cd: no target and HOME not set")),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: can't canonicalize {}", new_dir.display()))?;

        // Children inherit the process working directory.
        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List every process this shell has launched in this session.
pub struct Show {}

impl BuiltinCommand for Show {
    fn name() -> &'static str {
        "show"
    }

    fn execute(self, stdout: &mut dyn Write, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let table = ctx.supervisor.table();
        if table.is_empty() {
            writeln!(stdout, "Simple shell has not run any processes yet.")?;
            return Ok(0);
        }
        writeln!(stdout, "Pids of processes that simple shell has run in this session:\n")?;
        for record in table.iter() {
            writeln!(stdout, "Command: {}", record.tokens.join(" "))?;
            write_record(stdout, record)?;
            writeln!(stdout, "+++++++++\n")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the state of a process this shell has launched.
pub struct Query {
    #[argh(positional)]
    /// process id to look up.
    pub pid: i32,
}

impl BuiltinCommand for Query {
    fn name() -> &'static str {
        "query"
    }

    fn execute(self, stdout: &mut dyn Write, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let record = ctx
            .supervisor
            .table()
            .latest(Pid::from_raw(self.pid))
            .ok_or_else(|| {
                anyhow::anyhow!("Simple Shell has not run a process of the specified pid")
            })?;
        write_record(stdout, record)?;
        Ok(0)
    }
}

/// Pid, reaped flag and status; pending children show their live `/proc` state.
fn write_record(out: &mut dyn Write, record: &ProcessRecord) -> std::io::Result<()> {
    writeln!(out, "Pid: {}", record.pid)?;
    writeln!(out, "Reaped: {}", record.reaped)?;
    match record.state {
        ProcessState::Pending => writeln!(out, "{}", record.status()),
        ProcessState::Terminated(_) => writeln!(out, "State: {}", record.status()),
    }
}

#[derive(FromArgs)]
/// Clear the terminal.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn execute(self, stdout: &mut dyn Write, _ctx: &mut Context<'_>) -> Result<ExitCode> {
        write!(stdout, "\x1b[2J\x1b[H")?;
        stdout.flush()?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut Context<'_>) -> Result<ExitCode> {
        ctx.env.should_exit = true;
        Ok(0)
    }
}
