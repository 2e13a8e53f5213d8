//! Error types of the process-supervision core.
//!
//! The command layer works with [`anyhow::Result`]; everything below it
//! (handoff, launcher, reaper, supervisor) reports these typed errors so the
//! interpreter can tell a failed spawn apart from an internal inconsistency.

use std::io;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

use crate::handoff::SpawnKey;

/// Failure to set up the one-shot handoff between parent and child.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// The underlying pipe could not be created.
    #[error("cannot create handoff channel {key}: {source}")]
    Create { key: SpawnKey, source: Errno },
    /// The release byte could not be delivered to the child.
    #[error("cannot release handoff channel {key}: {source}")]
    Release { key: SpawnKey, source: io::Error },
    /// The parent closed the channel without releasing it, or the read failed.
    #[error("handoff channel {key} closed before release: {source}")]
    Abandoned { key: SpawnKey, source: io::Error },
}

/// Reasons a launch attempt is abandoned. None of these leave a record behind.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("empty command")]
    EmptyCommand,
    #[error("argument contains an interior NUL byte: {0:?}")]
    InvalidArgument(String),
    #[error("cannot create pid channel: {0}")]
    PidChannel(#[source] Errno),
    #[error(transparent)]
    Handoff(#[from] HandoffError),
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),
    #[error("cannot read pid of child {child}: {source}")]
    PidReport { child: Pid, source: io::Error },
    #[error("waiting on child {pid} failed: {source}")]
    Wait { pid: Pid, source: Errno },
}

/// Errors surfaced by [`crate::Supervisor`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// A command accepted once before can no longer be resolved for replay.
    #[error("internal inconsistency: no handler to replay `{0}`")]
    ReplayUnresolved(String),
}

/// The `SIGCHLD` listener could not be started.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot block SIGCHLD: {0}")]
    Mask(#[source] Errno),
    #[error("cannot spawn child watcher thread: {0}")]
    Spawn(#[source] io::Error),
}
