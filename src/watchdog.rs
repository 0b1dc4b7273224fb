//! Stall detection for the cosimulation loop.

use crate::error::{BridgeError, Result};

/// Raises a fatal [`BridgeError::Timeout`] once no commit has been observed
/// for more than `timeout` cycles. Fires at most once; the error is terminal
/// for the run, so repeated ticks after firing stay quiet.
#[derive(Debug)]
pub struct WatchdogTimer {
    timeout: u64,
    last_commit_cycle: u64,
    fired: bool,
}

impl WatchdogTimer {
    /// Create a watchdog with the configured window.
    pub fn new(timeout: u64) -> Self {
        Self {
            timeout,
            last_commit_cycle: 0,
            fired: false,
        }
    }

    /// Record a successful commit at `cycle`, resetting the window.
    pub fn commit_at(&mut self, cycle: u64) {
        self.last_commit_cycle = cycle;
    }

    /// Cycle of the last recorded commit.
    pub fn last_commit_cycle(&self) -> u64 {
        self.last_commit_cycle
    }

    /// Tick once per model cycle.
    pub fn tick(&mut self, cycle: u64) -> Result<()> {
        if self.fired {
            return Ok(());
        }
        if cycle.saturating_sub(self.last_commit_cycle) > self.timeout {
            self.fired = true;
            return Err(BridgeError::Timeout {
                timeout: self.timeout,
                last_commit: self.last_commit_cycle,
                cycle,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_after_window_never_earlier() {
        let mut wd = WatchdogTimer::new(5);
        wd.commit_at(10);

        for cycle in 11..=15 {
            wd.tick(cycle).unwrap();
        }
        let err = wd.tick(16).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Timeout { timeout: 5, last_commit: 10, cycle: 16 }
        ));
    }

    #[test]
    fn test_commit_resets_window() {
        let mut wd = WatchdogTimer::new(5);
        wd.commit_at(10);
        for cycle in 11..=15 {
            wd.tick(cycle).unwrap();
        }
        wd.commit_at(15);
        wd.tick(20).unwrap();
        assert!(wd.tick(21).is_err());
    }

    #[test]
    fn test_fires_exactly_once() {
        let mut wd = WatchdogTimer::new(2);
        assert!(wd.tick(3).is_err());
        // Terminal for the run; later ticks stay quiet.
        assert!(wd.tick(4).is_ok());
        assert!(wd.tick(100).is_ok());
    }
}
