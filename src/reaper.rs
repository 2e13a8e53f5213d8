//! Reconciles the process table with children that have terminated.
//!
//! The reaper runs in the controller's context whenever a child notice
//! arrives (several terminations may hide behind one notice) and on the idle
//! sweep. It drains every terminated child, settles the matching record and
//! returns the restarts the policy asks for; launching them is the
//! supervisor's job.

use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, info, trace, warn};

use crate::config::RestartPolicy;
use crate::redirect;
use crate::table::{Outcome, ProcessTable};

/// Source of child wait statuses.
pub trait ChildWaiter {
    /// Non-blocking wait on `target`, or on any child when `None`.
    fn try_wait(&mut self, target: Option<Pid>) -> nix::Result<WaitStatus>;
}

/// `waitpid(2)` with `WNOHANG`.
#[derive(Debug, Default)]
pub struct SystemWaiter;

impl ChildWaiter for SystemWaiter {
    fn try_wait(&mut self, target: Option<Pid>) -> nix::Result<WaitStatus> {
        waitpid(target, Some(WaitPidFlag::WNOHANG))
    }
}

/// A child that has finished, decoded from its wait status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub pid: Pid,
    pub outcome: Outcome,
}

impl Termination {
    /// `None` for statuses that do not mean the child is gone.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(pid, code) => Some(Self {
                pid,
                outcome: Outcome::Exited(code),
            }),
            WaitStatus::Signaled(pid, signal, _core_dumped) => Some(Self {
                pid,
                outcome: Outcome::Signaled(signal),
            }),
            _ => None,
        }
    }
}

/// A background job to launch again with its original tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    /// Pid of the child that died.
    pub pid: Pid,
    pub signal: Signal,
    /// Executable the child was first launched from.
    pub program: PathBuf,
    pub tokens: Vec<String>,
    /// Recomputed from `tokens`.
    pub redirect: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Reaper {
    policy: RestartPolicy,
}

impl Reaper {
    pub fn new(policy: RestartPolicy) -> Self {
        Self { policy }
    }

    /// Reap every terminated child until none remain.
    ///
    /// Leaves the table untouched when no child changed state.
    pub fn drain(
        &self,
        table: &mut ProcessTable,
        waiter: &mut dyn ChildWaiter,
    ) -> Vec<RestartRequest> {
        let mut restarts = Vec::new();
        loop {
            match waiter.try_wait(None) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(err) => {
                    warn!(%err, "waitpid failed while reaping");
                    break;
                }
                Ok(status) => match Termination::from_wait_status(status) {
                    Some(termination) => restarts.extend(self.settle(table, termination)),
                    None => trace!(?status, "ignoring non-terminal child state"),
                },
            }
        }
        restarts
    }

    /// Record one termination and apply the restart policy to it.
    pub fn settle(
        &self,
        table: &mut ProcessTable,
        termination: Termination,
    ) -> Option<RestartRequest> {
        let Termination { pid, outcome } = termination;
        let Some(record) = table.settle(pid, outcome) else {
            debug!(%pid, %outcome, "terminated child has no record");
            return None;
        };
        info!(%pid, record = record.id.index(), %outcome, "child reaped");

        let Outcome::Signaled(signal) = outcome else {
            return None;
        };
        if !self.policy.is_restartable(signal) {
            debug!(%pid, %signal, "signal is final, not restarting");
            return None;
        }
        if record.mode.is_foreground() {
            debug!(%pid, %signal, "foreground child, not restarting");
            return None;
        }
        Some(RestartRequest {
            pid,
            signal,
            program: record.program.clone(),
            tokens: record.tokens.clone(),
            redirect: redirect::requested(&record.tokens),
        })
    }
}
