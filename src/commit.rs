//! Commit matching: correlating DUT retirement signals to queued events and
//! retiring them in program order.
//!
//! Retirement is contiguous from the queue tail. A committed event buried
//! beneath uncommitted ones stays queued, which tolerates the limited
//! out-of-order completion that per-slot multi-cycle instructions exhibit.

use crate::error::{BridgeError, Result};
use crate::event::{EventQueue, ReferenceEvent};
use crate::oracle;
use crate::reference::ReferenceModel;
use crate::watchdog::WatchdogTimer;

/// One cycle of commit/retire-signal activity.
#[derive(Debug, Clone, Copy)]
pub struct CommitBeat {
    /// Retiring program counter.
    pub pc: u32,
    /// A scalar write-back accompanies this retirement.
    pub wb_valid: bool,
    /// Write-back destination register.
    pub rd: u8,
    /// Write-back value.
    pub value: u32,
}

/// Correlates retirement pulses to pending events and pops the tail.
#[derive(Debug, Default)]
pub struct CommitMatcher {
    /// Events marked committed so far.
    pub commits: u64,
}

impl CommitMatcher {
    /// Create a fresh matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle an asserted retirement signal. Returns the events popped from
    /// the tail, oldest first.
    pub fn observe<R: ReferenceModel>(
        &mut self,
        queue: &mut EventQueue,
        reference: &R,
        watchdog: &mut WatchdogTimer,
        beat: &CommitBeat,
        cycle: u64,
    ) -> Result<Vec<ReferenceEvent>> {
        let mut marked = 0usize;

        if beat.pc == reference.trap_vector() {
            // Trap entry retires every pending trapping event: traps may
            // complete out of the tracked instruction's own program order
            // relative to the queue, and abort their remaining effects.
            for event in queue.iter_mut() {
                if event.is_trap && !event.committed {
                    log::debug!(
                        "trap entry at 0x{:08x} retires trapping pc 0x{:08x}",
                        beat.pc,
                        event.pc
                    );
                    event.committed = true;
                    marked += 1;
                }
            }
        } else if self.match_event(queue, beat, cycle)? {
            marked += 1;
        } else {
            // Tolerated: a multi-cycle slot may pulse retire before its
            // write-back arrives.
            log::debug!(
                "retirement at pc 0x{:08x} left nothing committed (cycle {})",
                beat.pc,
                cycle
            );
        }

        if marked > 0 {
            self.commits += marked as u64;
            watchdog.commit_at(cycle);
        }

        // In-order retirement: pop while the tail is committed.
        let mut popped = Vec::new();
        while queue.oldest().map(|e| e.committed).unwrap_or(false) {
            let event = queue.pop_oldest().expect("tail checked above");
            log::debug!("retired pc 0x{:08x} inst 0x{:08x}", event.pc, event.insn);
            popped.push(event);
        }
        Ok(popped)
    }

    /// Find and mark the event the beat retires. Returns whether one was
    /// marked.
    fn match_event(
        &mut self,
        queue: &mut EventQueue,
        beat: &CommitBeat,
        cycle: u64,
    ) -> Result<bool> {
        // Oldest first: the earliest pending instance of this pc retires.
        for event in queue.iter_mut() {
            if event.committed || event.pc != beat.pc {
                continue;
            }

            if event.is_multicycle {
                // Completion is the scalar write-back, not the pulse itself.
                let Some(scalar) = event.scalar.as_mut() else {
                    continue;
                };
                if !beat.wb_valid || beat.rd != scalar.reg {
                    return Ok(false);
                }
                if beat.value != scalar.value {
                    return Err(BridgeError::ScalarMismatch {
                        pc: event.pc,
                        reg: scalar.reg,
                        expected: scalar.value,
                        observed: beat.value,
                        cycle,
                    });
                }
                scalar.written = true;
            } else if let Some(scalar) = event.scalar.as_mut() {
                if !beat.wb_valid {
                    return Err(BridgeError::CompletionViolation {
                        pc: event.pc,
                        insn: event.insn,
                        missing: 1,
                        first_offset: scalar.reg as u32,
                        cycle,
                    });
                }
                if beat.rd != scalar.reg || beat.value != scalar.value {
                    return Err(BridgeError::ScalarMismatch {
                        pc: event.pc,
                        reg: scalar.reg,
                        expected: scalar.value,
                        observed: beat.value,
                        cycle,
                    });
                }
                scalar.written = true;
            }

            oracle::check_ready_for_commit(event, cycle)?;
            event.committed = true;
            return Ok(true);
        }
        Ok(false)
    }
}
