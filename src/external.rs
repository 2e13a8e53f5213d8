use crate::command::{CommandFactory, Context, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use crate::launcher::LaunchRequest;
use crate::table::{Outcome, ProcessState};
use anyhow::Result;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A program found on disk, run as a tracked child process.
pub struct ExternalCommand {
    program: PathBuf,
    tokens: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: PathBuf, tokens: Vec<String>) -> Self {
        Self { program, tokens }
    }
}

impl CommandFactory for Factory<ExternalCommand> {
    fn try_create(
        &self,
        env: &Environment,
        tokens: &[String],
    ) -> Option<Box<dyn ExecutableCommand>> {
        let name = tokens.first()?;
        let executable = find_command_path(&env.search_path(), Path::new(name))?;
        Some(Box::new(ExternalCommand::new(
            executable.into_owned(),
            tokens.to_vec(),
        )))
    }
}

impl ExecutableCommand for ExternalCommand {
    fn execute(
        self: Box<Self>,
        _stdout: &mut dyn Write,
        ctx: &mut Context<'_>,
    ) -> Result<ExitCode> {
        let request = LaunchRequest::new(self.program, self.tokens, ctx.mode, ctx.redirect);
        let id = ctx.supervisor.launch(request)?;
        if !ctx.mode.is_foreground() {
            return Ok(0);
        }
        let state = ctx.supervisor.table().get(id).map(|record| record.state);
        Ok(match state {
            Some(ProcessState::Terminated(outcome)) => exit_code(outcome),
            _ => -1,
        })
    }
}

/// Shell-style exit code: the status itself, or `128 + signal`.
fn exit_code(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Exited(code) => code,
        Outcome::Signaled(signal) => 128 + signal as i32,
    }
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// Only executable regular files count as a match.
///
/// - Absolute path: returns it if it is an existing file.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo`: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    if path.starts_with("./") {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => None,
        // Single component -> search in PATH
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        // Multiple components -> relative to the current dir
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if is_executable(path) { Some(path) } else { None }
}

/// A regular file with at least one execute bit set.
pub(crate) fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
