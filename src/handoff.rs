//! One-shot "your record now exists" signal from the parent to a new child.
//!
//! A channel is opened right before the fork, so both processes inherit it.
//! Afterwards each side keeps exactly one end: the parent turns the channel
//! into a [`HandoffRelease`], the child into a [`HandoffWait`]. The child
//! blocks in [`HandoffWait::await_and_close`] until the parent has appended
//! its record to the process table and called [`HandoffRelease::release`].
//! If the parent drops the release end without releasing, the child sees
//! end-of-file and must give up instead of running unregistered.
//!
//! Channels are keyed by the spawn attempt, not by pid, and are never reused.

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};

use nix::unistd::pipe;

use crate::error::HandoffError;

const READY: u8 = 1;

/// Identifier of a single spawn attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpawnKey(pub u64);

impl fmt::Display for SpawnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Both ends of a freshly opened channel, before the fork.
#[derive(Debug)]
pub struct HandoffChannel {
    key: SpawnKey,
    wait: File,
    release: File,
}

/// Parent side: signals the child exactly once.
#[derive(Debug)]
pub struct HandoffRelease {
    key: SpawnKey,
    file: File,
}

/// Child side: blocks until the parent releases.
#[derive(Debug)]
pub struct HandoffWait {
    key: SpawnKey,
    file: File,
}

impl HandoffChannel {
    /// Create a zero-initialized channel for spawn attempt `key`.
    pub fn open(key: SpawnKey) -> Result<Self, HandoffError> {
        let (wait, release) = pipe().map_err(|source| HandoffError::Create { key, source })?;
        Ok(Self {
            key,
            wait: File::from(wait),
            release: File::from(release),
        })
    }

    pub fn key(&self) -> SpawnKey {
        self.key
    }

    /// Keep the parent's end, closing the child's end in this process.
    pub fn into_release(self) -> HandoffRelease {
        drop(self.wait);
        HandoffRelease {
            key: self.key,
            file: self.release,
        }
    }

    /// Keep the child's end, closing the parent's end in this process.
    pub fn into_wait(self) -> HandoffWait {
        drop(self.release);
        HandoffWait {
            key: self.key,
            file: self.wait,
        }
    }
}

impl HandoffRelease {
    /// Unblock the child. Consumes the end, so a channel releases at most once.
    pub fn release(mut self) -> Result<(), HandoffError> {
        let key = self.key;
        self.file
            .write_all(&[READY])
            .map_err(|source| HandoffError::Release { key, source })
    }
}

impl HandoffWait {
    /// Block until released, then close the channel.
    ///
    /// Only performs `read(2)` and `close(2)`, so it is safe to call between
    /// `fork` and `exec`.
    pub fn await_and_close(mut self) -> Result<(), HandoffError> {
        let key = self.key;
        let mut byte = [0u8; 1];
        self.file
            .read_exact(&mut byte)
            .map_err(|source| HandoffError::Abandoned { key, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn split(channel: HandoffChannel) -> (HandoffRelease, HandoffWait) {
        let HandoffChannel { key, wait, release } = channel;
        (
            HandoffRelease { key, file: release },
            HandoffWait { key, file: wait },
        )
    }

    #[test]
    fn release_unblocks_waiter() {
        let channel = HandoffChannel::open(SpawnKey(1)).unwrap();
        assert_eq!(channel.key(), SpawnKey(1));
        let (release, wait) = split(channel);

        let waiter = thread::spawn(move || wait.await_and_close());
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished(), "waiter must block until release");

        release.release().unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn dropping_release_end_abandons_waiter() {
        let (release, wait) = split(HandoffChannel::open(SpawnKey(2)).unwrap());
        drop(release);

        let err = wait.await_and_close().unwrap_err();
        assert!(matches!(err, HandoffError::Abandoned { key: SpawnKey(2), .. }));
    }

    #[test]
    fn release_before_wait_is_not_lost() {
        let (release, wait) = split(HandoffChannel::open(SpawnKey(3)).unwrap());
        release.release().unwrap();
        wait.await_and_close().unwrap();
    }
}
