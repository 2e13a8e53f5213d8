//! Spawns external programs and registers them before they run.
//!
//! A launch forks the controller. The child sends its pid back through a
//! private pipe, applies any `>` redirection, then parks on a
//! [`HandoffWait`]. The parent reads the pid, appends the record to the
//! process table and only then releases the child into `execv`. A child that
//! exits immediately therefore always has a record waiting for the reaper.
//!
//! Everything the child touches is allocated before the fork, including the
//! null-terminated `argv` array; between `fork` and `execv` the child makes
//! raw syscalls only.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;

use nix::fcntl::{OFlag, open};
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::{ForkResult, Pid, close, dup2, fork, getpid, pipe};
use tracing::{debug, info, warn};

use crate::command::RunMode;
use crate::error::LaunchError;
use crate::handoff::{HandoffChannel, HandoffWait, SpawnKey};
use crate::redirect::{self, RedirectTarget};
use crate::table::{ProcessTable, RecordId};
use crate::watcher;

/// Mode bits of a redirection file the child creates.
const REDIRECT_FILE_MODE: libc::mode_t = 0o644;

/// One program to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Resolved executable; `tokens[0]` stays the name the user typed.
    pub program: PathBuf,
    /// Command name and arguments as entered, redirection suffix included.
    pub tokens: Vec<String>,
    pub mode: RunMode,
    /// Whether the child should look for a `>` suffix.
    pub redirect: bool,
}

impl LaunchRequest {
    pub fn new(
        program: impl Into<PathBuf>,
        tokens: Vec<String>,
        mode: RunMode,
        redirect: bool,
    ) -> Self {
        Self {
            program: program.into(),
            tokens,
            mode,
            redirect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChildRedirect {
    File(CString),
    MissingDestination,
}

/// The child's side of a launch, prepared in the parent.
#[derive(Debug)]
struct ExecPlan {
    program: CString,
    argv: Vec<CString>,
    /// Pointers into `argv` followed by a null pointer, as `execv(2)` wants.
    argv_ptrs: Vec<*const libc::c_char>,
    redirect: Option<ChildRedirect>,
}

fn c_string(value: &[u8], shown: impl FnOnce() -> String) -> Result<CString, LaunchError> {
    CString::new(value).map_err(|_| LaunchError::InvalidArgument(shown()))
}

impl ExecPlan {
    fn new(request: &LaunchRequest) -> Result<Self, LaunchError> {
        let (argv, target) = if request.redirect {
            redirect::split(&request.tokens)
        } else {
            (&request.tokens[..], None)
        };
        if argv.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }

        let program = c_string(request.program.as_os_str().as_bytes(), || {
            request.program.display().to_string()
        })?;
        let argv = argv
            .iter()
            .map(|token| c_string(token.as_bytes(), || token.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let argv_ptrs = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain([ptr::null()])
            .collect();
        let redirect = match target {
            Some(RedirectTarget::Path(dest)) => {
                Some(ChildRedirect::File(c_string(dest.as_bytes(), || dest.clone())?))
            }
            Some(RedirectTarget::MissingDestination) => Some(ChildRedirect::MissingDestination),
            None => None,
        };

        Ok(Self {
            program,
            argv,
            argv_ptrs,
            redirect,
        })
    }
}

#[derive(Debug, Default)]
pub struct Launcher {
    next_key: u64,
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fork, register and release one child.
    ///
    /// Returns once the record is in `table` and the child has been released;
    /// waiting for a foreground child is up to the caller. On error no record
    /// is added, and a child that was already forked exits on its own when
    /// its handoff is dropped.
    pub fn launch(
        &mut self,
        table: &mut ProcessTable,
        request: &LaunchRequest,
    ) -> Result<RecordId, LaunchError> {
        let plan = ExecPlan::new(request)?;
        let key = SpawnKey(self.next_key);
        self.next_key += 1;

        let (pid_rx, pid_tx) = pipe().map_err(LaunchError::PidChannel)?;
        let (pid_rx, pid_tx) = (File::from(pid_rx), File::from(pid_tx));
        let handoff = HandoffChannel::open(key)?;

        // SAFETY: the child only runs `run_child`, which uses data prepared
        // above and ends in `execv` or `_exit` without returning.
        match unsafe { fork() }.map_err(LaunchError::Fork)? {
            ForkResult::Child => {
                drop(pid_rx);
                run_child(&plan, pid_tx, handoff.into_wait())
            }
            ForkResult::Parent { child } => {
                drop(pid_tx);
                let release = handoff.into_release();
                let pid = read_pid(pid_rx)
                    .map_err(|source| LaunchError::PidReport { child, source })?;
                debug_assert_eq!(pid, child);
                info!(
                    %pid,
                    %key,
                    tokens = ?request.tokens,
                    mode = ?request.mode,
                    "parent read child pid"
                );

                let id = table.append(
                    pid,
                    request.program.clone(),
                    request.tokens.clone(),
                    request.mode,
                );
                if let Err(err) = release.release() {
                    // The child is already gone; the reaper settles the record.
                    warn!(%pid, %err, "child exited before release");
                } else {
                    debug!(%pid, %key, "child released");
                }
                Ok(id)
            }
        }
    }
}

fn read_pid(mut rx: File) -> io::Result<Pid> {
    let mut buf = [0u8; size_of::<libc::pid_t>()];
    rx.read_exact(&mut buf)?;
    Ok(Pid::from_raw(libc::pid_t::from_ne_bytes(buf)))
}

fn run_child(plan: &ExecPlan, mut pid_tx: File, handoff: HandoffWait) -> ! {
    if pid_tx.write_all(&getpid().as_raw().to_ne_bytes()).is_err() {
        child_report(&[b"Error writing pid to parent\n"]);
    }
    drop(pid_tx);

    match &plan.redirect {
        None => {}
        Some(ChildRedirect::MissingDestination) => {
            child_report(&[b"Cannot redirect output. No destination specified.\n"]);
        }
        Some(ChildRedirect::File(path)) => redirect_output(path),
    }

    if handoff.await_and_close().is_err() {
        child_report(&[
            b"Parent abandoned launch, not executing ",
            plan.program.as_bytes(),
            b"\n",
        ]);
        child_exit();
    }

    if watcher::child_signal_set().thread_unblock().is_err() {
        child_report(&[b"Cannot unblock SIGCHLD for ", plan.program.as_bytes(), b"\n"]);
    }
    // SAFETY: `program` and every entry of `argv_ptrs` point into CStrings
    // owned by `plan`, and `argv_ptrs` ends with a null pointer.
    unsafe { libc::execv(plan.program.as_ptr(), plan.argv_ptrs.as_ptr()) };
    child_report(&[b"Exec failed: ", plan.program.as_bytes(), b"\n"]);
    child_exit()
}

/// Leave a child that never reached its program.
fn child_exit() -> ! {
    // SAFETY: `_exit` skips atexit handlers and stdio buffers, which belong
    // to the parent.
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

fn redirect_output(path: &CStr) {
    let flags = OFlag::O_RDWR | OFlag::O_APPEND | OFlag::O_CREAT;
    let fd = match open(path, flags, Mode::from_bits_truncate(REDIRECT_FILE_MODE)) {
        Ok(fd) => fd,
        Err(_) => {
            child_report(&[b"Cannot redirect output. Error opening the destination file.\n"]);
            return;
        }
    };
    if dup2(fd, libc::STDOUT_FILENO).is_err() || dup2(fd, libc::STDERR_FILENO).is_err() {
        child_report(&[b"Cannot redirect output.\n"]);
    }
    let _ = close(fd);
}

/// Unbuffered, lock-free write to stderr, usable between `fork` and `exec`.
fn child_report(parts: &[&[u8]]) {
    let stderr = io::stderr();
    for part in parts {
        let _ = nix::unistd::write(stderr.as_fd(), part);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    fn argv(plan: &ExecPlan) -> Vec<&str> {
        plan.argv.iter().map(|a| a.to_str().unwrap()).collect()
    }

    fn request(program: &str, tokens: &[&str], redirect: bool) -> LaunchRequest {
        LaunchRequest::new(program, toks(tokens), RunMode::Foreground, redirect)
    }

    #[test]
    fn plan_without_redirect_keeps_all_tokens() {
        let plan = ExecPlan::new(&request("/bin/echo", &["echo", ">", "x"], false)).unwrap();
        assert_eq!(plan.program.to_str().unwrap(), "/bin/echo");
        assert_eq!(argv(&plan), ["echo", ">", "x"]);
        assert_eq!(plan.redirect, None);
    }

    #[test]
    fn plan_with_redirect_truncates_argv() {
        let plan = ExecPlan::new(&request("/usr/bin/prog", &["prog", ">", "/tmp/out.txt"], true))
            .unwrap();
        assert_eq!(argv(&plan), ["prog"]);
        assert_eq!(
            plan.redirect,
            Some(ChildRedirect::File(CString::new("/tmp/out.txt").unwrap()))
        );
    }

    #[test]
    fn plan_with_dangling_marker() {
        let plan = ExecPlan::new(&request("/bin/ls", &["ls", ">"], true)).unwrap();
        assert_eq!(argv(&plan), ["ls"]);
        assert_eq!(plan.redirect, Some(ChildRedirect::MissingDestination));
    }

    #[test]
    fn plan_argv_pointers_are_null_terminated() {
        let plan = ExecPlan::new(&request("/bin/echo", &["echo", "a", "b"], false)).unwrap();
        assert_eq!(plan.argv_ptrs.len(), 4);
        assert!(plan.argv_ptrs[3].is_null());
        for (arg, ptr) in plan.argv.iter().zip(&plan.argv_ptrs) {
            assert_eq!(arg.as_ptr(), *ptr);
        }
    }

    #[test]
    fn plan_rejects_empty_argv() {
        let plan = ExecPlan::new(&request("/bin/ls", &[">", "out"], true));
        assert!(matches!(plan, Err(LaunchError::EmptyCommand)));

        let plan = ExecPlan::new(&request("/bin/ls", &[], false));
        assert!(matches!(plan, Err(LaunchError::EmptyCommand)));
    }

    #[test]
    fn plan_rejects_nul_bytes() {
        let plan = ExecPlan::new(&request("/bin/echo", &["echo", "a\0b"], false));
        assert!(matches!(plan, Err(LaunchError::InvalidArgument(arg)) if arg == "a\0b"));

        let plan = ExecPlan::new(&request("/bin/echo", &["echo", ">", "o\0ut"], true));
        assert!(matches!(plan, Err(LaunchError::InvalidArgument(arg)) if arg == "o\0ut"));
    }
}
