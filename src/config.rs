//! Runtime knobs of the supervisor.

use std::time::Duration;

use nix::sys::signal::Signal;

/// Decides whether a background child killed by a signal gets relaunched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    /// Signals treated as unrecoverable: a child killed by one stays dead.
    pub fatal_signals: Vec<Signal>,
}

impl RestartPolicy {
    /// A policy that never restarts anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_restartable(&self, signal: Signal) -> bool {
        self.enabled && !self.fatal_signals.contains(&signal)
    }
}

impl Default for RestartPolicy {
    /// Memory faults and `SIGKILL` are final; every other signal restarts.
    fn default() -> Self {
        Self {
            enabled: true,
            fatal_signals: vec![Signal::SIGSEGV, Signal::SIGKILL],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub restart: RestartPolicy,
    /// How often a foreground wait re-polls its child without a notice.
    pub foreground_poll: Duration,
    /// How often the idle controller sweeps for terminated children.
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            restart: RestartPolicy::default(),
            foreground_poll: Duration::from_millis(20),
            sweep_interval: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_spares_segv_and_kill() {
        let policy = RestartPolicy::default();
        assert!(policy.is_restartable(Signal::SIGTERM));
        assert!(policy.is_restartable(Signal::SIGINT));
        assert!(policy.is_restartable(Signal::SIGABRT));
        assert!(!policy.is_restartable(Signal::SIGSEGV));
        assert!(!policy.is_restartable(Signal::SIGKILL));
    }

    #[test]
    fn disabled_policy_restarts_nothing() {
        let policy = RestartPolicy::disabled();
        assert!(!policy.is_restartable(Signal::SIGTERM));
    }

    #[test]
    fn extra_fatal_signals() {
        let mut policy = RestartPolicy::default();
        policy.fatal_signals.push(Signal::SIGABRT);
        assert!(!policy.is_restartable(Signal::SIGABRT));
        assert!(policy.is_restartable(Signal::SIGHUP));
    }
}
