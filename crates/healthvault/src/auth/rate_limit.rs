//! Sliding-window failed-attempt tracking.

use std::collections::{HashMap, VecDeque};

/// Failed authentication timestamps per identity.
///
/// Entries older than the window are pruned whenever the identity is
/// checked, and identities with no attempt left in the window are dropped
/// by [`FailedAttemptLog::sweep`], which also runs at most once per window
/// from [`FailedAttemptLog::try_reserve`].
#[derive(Debug)]
pub struct FailedAttemptLog {
    attempts: HashMap<String, VecDeque<u64>>,
    window_micros: u64,
    max_attempts: usize,
    next_sweep: u64,
}

impl FailedAttemptLog {
    pub fn new(window_micros: u64, max_attempts: usize) -> Self {
        Self {
            attempts: HashMap::new(),
            window_micros,
            max_attempts,
            next_sweep: 0,
        }
    }

    fn cutoff(&self, now: u64) -> u64 {
        now.saturating_sub(self.window_micros)
    }

    /// Drop attempts that fell out of the window ending at `now`.
    fn prune(&mut self, identity: &str, now: u64) -> usize {
        let cutoff = self.cutoff(now);
        let Some(times) = self.attempts.get_mut(identity) else {
            return 0;
        };
        while times.front().is_some_and(|&t| t <= cutoff) {
            times.pop_front();
        }
        let remaining = times.len();
        if remaining == 0 {
            self.attempts.remove(identity);
        }
        remaining
    }

    /// Whether `identity` has hit the limit within the window ending at `now`.
    pub fn is_limited(&mut self, identity: &str, now: u64) -> bool {
        self.prune(identity, now) >= self.max_attempts
    }

    fn record(&mut self, identity: &str, now: u64) {
        self.attempts
            .entry(identity.to_string())
            .or_default()
            .push_back(now);
    }

    /// Count an attempt at `now` unless `identity` is already limited.
    ///
    /// The attempt is charged before the credential is checked; a successful
    /// check then calls [`FailedAttemptLog::clear`]. Returns `false` when the
    /// limit was already reached and nothing was recorded.
    pub fn try_reserve(&mut self, identity: &str, now: u64) -> bool {
        if now >= self.next_sweep {
            self.sweep(now);
            self.next_sweep = now.saturating_add(self.window_micros);
        }
        if self.is_limited(identity, now) {
            return false;
        }
        self.record(identity, now);
        true
    }

    /// Forget all failures for `identity`.
    pub fn clear(&mut self, identity: &str) {
        self.attempts.remove(identity);
    }

    /// Drop every identity whose attempts all fell out of the window ending
    /// at `now`. Returns how many identities were removed.
    pub fn sweep(&mut self, now: u64) -> usize {
        let cutoff = self.cutoff(now);
        let before = self.attempts.len();
        self.attempts
            .retain(|_, times| times.back().is_some_and(|&t| t > cutoff));
        before - self.attempts.len()
    }

    /// Failures currently held for `identity`, without pruning.
    pub fn count(&self, identity: &str) -> usize {
        self.attempts.get(identity).map_or(0, VecDeque::len)
    }

    /// Identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}
