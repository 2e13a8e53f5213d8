//! Append-only log of every child the shell has launched.
//!
//! The controller owns the table. Records are appended by the launcher before
//! the child is released and settled by the reaper (or a foreground wait)
//! once termination is observed. Nothing is ever removed, so a pid recycled by
//! the OS can appear more than once; the live-pid index always points at the
//! most recent spawn attempt for a pid, which is the only authoritative one.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::command::RunMode;

/// Handle of one spawn attempt; its position in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(usize);

impl RecordId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Called `exit` (or returned from `main`) with this status.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    /// Presumed alive.
    #[default]
    Pending,
    Terminated(Outcome),
}

impl ProcessState {
    pub const PENDING_CODE: i32 = -1;

    /// The tri-state integer form: `-1` pending, `0` exited, else the signal.
    pub fn code(&self) -> i32 {
        match self {
            ProcessState::Pending => Self::PENDING_CODE,
            ProcessState::Terminated(Outcome::Exited(_)) => 0,
            ProcessState::Terminated(Outcome::Signaled(signal)) => *signal as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub id: RecordId,
    pub pid: Pid,
    /// Executable resolved at the first launch; restarts reuse it.
    pub program: PathBuf,
    pub reaped: bool,
    /// Command name and arguments exactly as entered, redirection included.
    pub tokens: Vec<String>,
    pub state: ProcessState,
    pub mode: RunMode,
}

impl ProcessRecord {
    /// Human readable status; pending children are looked up in `/proc`.
    pub fn status(&self) -> String {
        match self.state {
            ProcessState::Pending => live_status(self.pid),
            ProcessState::Terminated(outcome) => outcome.to_string(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Exited(_) => write!(f, "Terminated normally"),
            Outcome::Signaled(signal) => write!(f, "Terminated by signal {}", *signal as i32),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProcessTable {
    records: Vec<ProcessRecord>,
    live: HashMap<Pid, RecordId>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned child. The record is fully built before it
    /// becomes visible.
    pub fn append(
        &mut self,
        pid: Pid,
        program: PathBuf,
        tokens: Vec<String>,
        mode: RunMode,
    ) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(ProcessRecord {
            id,
            pid,
            program,
            reaped: false,
            tokens,
            state: ProcessState::Pending,
            mode,
        });
        if let Some(stale) = self.live.insert(pid, id) {
            warn!(
                %pid,
                stale = stale.index(),
                record = id.index(),
                "pid reused while still tracked"
            );
        }
        debug!(%pid, record = id.index(), "record appended");
        id
    }

    /// Mark the most recent record for `pid` as reaped with `outcome`.
    ///
    /// Returns `None` if no live record matches; a record is settled at most
    /// once.
    pub fn settle(&mut self, pid: Pid, outcome: Outcome) -> Option<&ProcessRecord> {
        let id = self.live.remove(&pid)?;
        let record = &mut self.records[id.0];
        record.reaped = true;
        record.state = ProcessState::Terminated(outcome);
        Some(record)
    }

    pub fn get(&self, id: RecordId) -> Option<&ProcessRecord> {
        self.records.get(id.0)
    }

    /// The most recently appended record for `pid`, settled or not.
    pub fn latest(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.records.iter().rev().find(|r| r.pid == pid)
    }

    /// Records in launch order.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.iter()
    }

    /// Number of children still presumed alive.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The `Name:` and `State:` lines of `/proc/<pid>/status`.
pub fn live_status(pid: Pid) -> String {
    match fs::read_to_string(format!("/proc/{pid}/status")) {
        Ok(status) => status
            .lines()
            .filter(|line| line.starts_with("Name:") || line.starts_with("State:"))
            .collect::<Vec<_>>()
            .join("\n"),
        Err(err) => {
            debug!(%pid, %err, "cannot read process status");
            "Unable to read process status".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    /// Register a child launched from a placeholder executable.
    fn register(table: &mut ProcessTable, pid: Pid, tokens: &[&str], mode: RunMode) -> RecordId {
        table.append(pid, PathBuf::from("/usr/bin/prog"), toks(tokens), mode)
    }

    #[test]
    fn append_starts_pending() {
        let mut table = ProcessTable::new();
        let pid = Pid::from_raw(100);
        let id = register(&mut table, pid, &["sleep", "1"], RunMode::Background);

        let record = table.get(id).unwrap();
        assert!(!record.reaped);
        assert_eq!(record.state, ProcessState::Pending);
        assert_eq!(record.state.code(), -1);
        assert_eq!(record.tokens, toks(&["sleep", "1"]));
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn settle_marks_reaped_once() {
        let mut table = ProcessTable::new();
        let pid = Pid::from_raw(101);
        let id = register(&mut table, pid, &["true"], RunMode::Foreground);

        let settled = table.settle(pid, Outcome::Exited(0)).unwrap();
        assert!(settled.reaped);
        assert_eq!(settled.state.code(), 0);

        assert!(table.settle(pid, Outcome::Signaled(Signal::SIGTERM)).is_none());
        assert_eq!(
            table.get(id).unwrap().state,
            ProcessState::Terminated(Outcome::Exited(0))
        );
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn settle_unknown_pid_changes_nothing() {
        let mut table = ProcessTable::new();
        register(&mut table, Pid::from_raw(102), &["a"], RunMode::Background);
        assert!(table.settle(Pid::from_raw(999), Outcome::Exited(0)).is_none());
        assert!(table.iter().all(|r| !r.reaped));
    }

    #[test]
    fn reused_pid_settles_most_recent_record() {
        let mut table = ProcessTable::new();
        let pid = Pid::from_raw(103);
        let first = register(&mut table, pid, &["first"], RunMode::Background);
        table.settle(pid, Outcome::Exited(0));
        let second = register(&mut table, pid, &["second"], RunMode::Background);

        let settled = table.settle(pid, Outcome::Signaled(Signal::SIGTERM)).unwrap();
        assert_eq!(settled.id, second);
        assert_eq!(
            table.get(first).unwrap().state,
            ProcessState::Terminated(Outcome::Exited(0))
        );
        assert_eq!(table.latest(pid).unwrap().tokens, toks(&["second"]));
    }

    #[test]
    fn status_strings() {
        assert_eq!(Outcome::Exited(3).to_string(), "Terminated normally");
        assert_eq!(
            Outcome::Signaled(Signal::SIGTERM).to_string(),
            "Terminated by signal 15"
        );
        assert_eq!(ProcessState::Terminated(Outcome::Signaled(Signal::SIGKILL)).code(), 9);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn live_status_reads_own_process() {
        let status = live_status(nix::unistd::getpid());
        assert!(status.starts_with("Name:"), "unexpected status: {status}");
        assert!(status.contains("State:"));
    }
}
