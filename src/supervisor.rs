//! The controller's handle on everything it has launched.
//!
//! [`Supervisor`] owns the process table, the launcher and the reaper. All of
//! them are driven from the controller thread: launches happen when a command
//! runs, reaping happens when a [`ChildNotice`] arrives, on the idle sweep and
//! while a foreground child is being waited on.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, never};
use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use tracing::{error, info, warn};

use crate::command::RunMode;
use crate::config::Config;
use crate::error::{LaunchError, SupervisorError};
use crate::external::{find_command_path, is_executable};
use crate::launcher::{LaunchRequest, Launcher};
use crate::reaper::{ChildWaiter, Reaper, RestartRequest, SystemWaiter, Termination};
use crate::table::{ProcessTable, RecordId};
use crate::watcher::ChildNotice;

pub struct Supervisor {
    table: ProcessTable,
    launcher: Launcher,
    reaper: Reaper,
    waiter: SystemWaiter,
    notices: Receiver<ChildNotice>,
    search_path: OsString,
    foreground_poll: Duration,
}

impl Supervisor {
    /// A supervisor resolving programs through `search_path` (a `PATH` value).
    ///
    /// Without [`Supervisor::with_notices`] it relies on polling alone.
    pub fn new(config: &Config, search_path: impl Into<OsString>) -> Self {
        Self {
            table: ProcessTable::new(),
            launcher: Launcher::new(),
            reaper: Reaper::new(config.restart.clone()),
            waiter: SystemWaiter,
            notices: never(),
            search_path: search_path.into(),
            foreground_poll: config.foreground_poll,
        }
    }

    /// Wake foreground waits as soon as the child watcher reports.
    pub fn with_notices(mut self, notices: Receiver<ChildNotice>) -> Self {
        self.notices = notices;
        self
    }

    /// Read-only view for `show` and `query`.
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Look a program name up the way `launch` callers are expected to.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        find_command_path(&self.search_path, Path::new(name)).map(|path| path.into_owned())
    }

    /// Start a child and register it.
    ///
    /// Foreground launches return only once the child's record is reaped;
    /// background launches return right after registration.
    pub fn launch(&mut self, request: LaunchRequest) -> Result<RecordId, LaunchError> {
        let id = self.launcher.launch(&mut self.table, &request)?;
        if request.mode.is_foreground() {
            self.wait_foreground(id)?;
        }
        Ok(id)
    }

    /// Reconcile the table with every child that has terminated, relaunching
    /// the ones the restart policy picks. Returns the relaunched records.
    pub fn reap(&mut self) -> Vec<RecordId> {
        let restarts = self.reaper.drain(&mut self.table, &mut self.waiter);
        let mut relaunched = Vec::with_capacity(restarts.len());
        for restart in restarts {
            println!("About to restart child {}", restart.pid);
            match self.recover(restart) {
                Ok(id) => relaunched.push(id),
                Err(err) => {
                    error!(%err, "restart failed");
                    eprintln!("{err}");
                }
            }
        }
        relaunched
    }

    /// Launch a dead background job again, always in the background.
    ///
    /// The executable resolved at the first launch is reused, so a later `cd`
    /// or `PATH` change cannot swap the program behind a restart.
    pub fn recover(&mut self, restart: RestartRequest) -> Result<RecordId, SupervisorError> {
        if !is_executable(&restart.program) {
            return Err(SupervisorError::ReplayUnresolved(restart.tokens.join(" ")));
        }

        let request = LaunchRequest::new(
            restart.program,
            restart.tokens,
            RunMode::Background,
            restart.redirect,
        );
        let id = self.launch(request)?;
        info!(
            old_pid = %restart.pid,
            signal = %restart.signal,
            record = id.index(),
            "background child restarted"
        );
        Ok(id)
    }

    fn is_reaped(&self, id: RecordId) -> bool {
        self.table.get(id).is_some_and(|record| record.reaped)
    }

    /// Poll this child until it is gone, reaping anything else that ends
    /// meanwhile.
    fn wait_foreground(&mut self, id: RecordId) -> Result<(), LaunchError> {
        let Some(pid) = self.table.get(id).map(|record| record.pid) else {
            return Ok(());
        };
        loop {
            match self.waiter.try_wait(Some(pid)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    if let Some(termination) = Termination::from_wait_status(status) {
                        let restart = self.reaper.settle(&mut self.table, termination);
                        debug_assert!(restart.is_none(), "foreground children are never restarted");
                        return Ok(());
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    // Collected by the drain below on an earlier pass.
                    if !self.is_reaped(id) {
                        warn!(%pid, "foreground child vanished without a status");
                    }
                    return Ok(());
                }
                Err(source) => return Err(LaunchError::Wait { pid, source }),
            }

            let _ = self.notices.recv_timeout(self.foreground_poll);
            self.reap();
            if self.is_reaped(id) {
                return Ok(());
            }
        }
    }
}
