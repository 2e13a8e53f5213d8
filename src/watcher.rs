//! Turns `SIGCHLD` into queued notices for the controller.
//!
//! `SIGCHLD` is blocked in the calling thread and accepted synchronously with
//! `sigwait` on a dedicated listener thread, which pushes a [`ChildNotice`]
//! into a single-slot queue. Nothing is reaped here: the controller drains
//! terminated children itself when it picks up a notice, so the process table
//! is only ever touched from one place.
//!
//! Threads inherit the signal mask of the thread that spawns them, so
//! [`ChildWatcher::install`] has to run on the main thread before any other
//! thread exists. Launched children get the signal unblocked again right
//! before `execv`.

use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use nix::sys::signal::{SigSet, Signal};
use tracing::{debug, warn};

use crate::error::WatchError;

/// "At least one child changed state since the last notice was taken."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildNotice;

/// The set containing only `SIGCHLD`.
pub fn child_signal_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set
}

#[derive(Debug)]
pub struct ChildWatcher {
    notices: Receiver<ChildNotice>,
}

impl ChildWatcher {
    /// Block `SIGCHLD` in this thread and start the listener.
    pub fn install() -> Result<Self, WatchError> {
        let set = child_signal_set();
        set.thread_block().map_err(WatchError::Mask)?;

        let (tx, notices) = bounded(1);
        thread::Builder::new()
            .name("sigchld-watcher".into())
            .spawn(move || listen(set, tx))
            .map_err(WatchError::Spawn)?;
        debug!("child watcher installed");
        Ok(Self { notices })
    }

    /// Receiving end of the notice queue; clones share the same queue.
    pub fn notices(&self) -> Receiver<ChildNotice> {
        self.notices.clone()
    }
}

fn listen(set: SigSet, tx: Sender<ChildNotice>) {
    loop {
        if let Err(err) = set.wait() {
            warn!(%err, "sigwait failed, child watcher stopping");
            return;
        }
        match tx.try_send(ChildNotice) {
            // A pending notice already covers this one: the reaper drains
            // every terminated child per notice.
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}
