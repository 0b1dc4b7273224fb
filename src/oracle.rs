//! The verification oracle.
//!
//! Every byte the reference model wrote to memory or to the vector register
//! file while executing a tracked instruction must be observed, with an
//! identical value, on the DUT's own write ports before that instruction is
//! allowed to commit.
//!
//! Observed bytes are matched against outstanding events newest-to-oldest,
//! skipping already-committed ones; the first event holding a record at the
//! exact offset wins. A value mismatch is fatal. Bytes with no matching
//! record are tolerated silently: a full-granule writeback legitimately
//! carries unchanged bytes the snapshot diff never recorded.

use smallvec::SmallVec;

use crate::error::{BridgeError, Result};
use crate::event::EventQueue;

/// One cycle of vector-register write-port activity.
#[derive(Debug, Clone)]
pub struct VrfWriteBeat {
    /// Execution lane the write came from.
    pub lane: u8,
    /// Destination vector register id.
    pub reg: u8,
    /// Byte offset within the register.
    pub offset: u32,
    /// Byte lane mask.
    pub mask: u64,
    /// Data lanes.
    pub data: SmallVec<[u8; 32]>,
}

/// Matches DUT memory traffic against expected-write/-read records.
#[derive(Debug, Default)]
pub struct MemoryDiffTracker {
    /// Bytes verified against an expected-write record.
    pub bytes_verified: u64,
    /// Observed bytes with no matching record (unchanged-granule fill).
    pub bytes_ignored: u64,
}

impl MemoryDiffTracker {
    /// Create a fresh tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match one DUT-written memory byte against outstanding expectations.
    pub fn observe_write(
        &mut self,
        queue: &mut EventQueue,
        addr: u32,
        observed: u8,
        cycle: u64,
    ) -> Result<()> {
        // Newest-to-oldest: the youngest event owning this offset is the one
        // whose value memory will finally hold.
        let mut newest_first: Vec<_> = queue.iter_mut().collect();
        newest_first.reverse();
        for event in newest_first {
            if event.committed {
                continue;
            }
            if let Some(record) = event.mem_writes.get_mut(&addr) {
                if record.expected != observed {
                    return Err(BridgeError::VerificationMismatch {
                        pc: event.pc,
                        insn: event.insn,
                        offset: addr,
                        expected: record.expected,
                        observed,
                        cycle,
                    });
                }
                record.executed = true;
                self.bytes_verified += 1;
                log::trace!(
                    "mem write 0x{:08x}=0x{:02x} matched pc 0x{:08x}",
                    addr,
                    observed,
                    event.pc
                );
                return Ok(());
            }
        }
        self.bytes_ignored += 1;
        log::trace!("mem write 0x{:08x}=0x{:02x} unmatched, ignored", addr, observed);
        Ok(())
    }

    /// Mark an expected-read record executed and yield the value the DUT
    /// must be served. `None` means no outstanding event covers the byte and
    /// the caller should fall back to raw reference memory.
    pub fn observe_read(&mut self, queue: &mut EventQueue, addr: u32) -> Option<u8> {
        let mut newest_first: Vec<_> = queue.iter_mut().collect();
        newest_first.reverse();
        for event in newest_first {
            if event.committed {
                continue;
            }
            if let Some(record) = event.mem_reads.get_mut(&addr) {
                record.executed = true;
                self.bytes_verified += 1;
                return Some(record.expected);
            }
        }
        None
    }
}

/// Matches DUT vector-register write-port traffic against expectations.
#[derive(Debug)]
pub struct RegisterFileShadow {
    /// Flat VRF stride: bytes per architectural vector register.
    vrf_bytes_per_register: u32,
    /// Bytes verified against an expected-write record.
    pub bytes_verified: u64,
}

impl RegisterFileShadow {
    /// Create a shadow for the configured register granularity.
    pub fn new(vrf_bytes_per_register: u32) -> Self {
        Self {
            vrf_bytes_per_register,
            bytes_verified: 0,
        }
    }

    /// Flat byte offset of `(reg, byte_offset)`.
    pub fn flat_offset(&self, reg: u8, offset: u32) -> u32 {
        reg as u32 * self.vrf_bytes_per_register + offset
    }

    /// Match every masked byte of a write-port beat against outstanding
    /// expectations.
    pub fn observe_write(
        &mut self,
        queue: &mut EventQueue,
        beat: &VrfWriteBeat,
        cycle: u64,
    ) -> Result<()> {
        for (i, value) in beat.data.iter().enumerate() {
            if beat.mask & (1u64 << i) == 0 {
                continue;
            }
            let flat = self.flat_offset(beat.reg, beat.offset + i as u32);
            self.observe_byte(queue, flat, *value, cycle)?;
        }
        Ok(())
    }

    fn observe_byte(
        &mut self,
        queue: &mut EventQueue,
        flat: u32,
        observed: u8,
        cycle: u64,
    ) -> Result<()> {
        let mut newest_first: Vec<_> = queue.iter_mut().collect();
        newest_first.reverse();
        for event in newest_first {
            if event.committed {
                continue;
            }
            let Some(vrf) = event.vrf.as_mut() else {
                continue;
            };
            if let Some(record) = vrf.record_mut(flat) {
                if record.expected != observed {
                    return Err(BridgeError::VerificationMismatch {
                        pc: event.pc,
                        insn: event.insn,
                        offset: flat,
                        expected: record.expected,
                        observed,
                        cycle,
                    });
                }
                record.executed = true;
                self.bytes_verified += 1;
                log::trace!(
                    "vrf write byte {} = 0x{:02x} matched pc 0x{:08x}",
                    flat,
                    observed,
                    event.pc
                );
                return Ok(());
            }
        }
        log::trace!("vrf write byte {} = 0x{:02x} unmatched, ignored", flat, observed);
        Ok(())
    }
}

/// Assert that every expectation of an event has been satisfied; called by
/// the commit matcher before retiring it.
pub fn check_ready_for_commit(event: &crate::event::ReferenceEvent, cycle: u64) -> Result<()> {
    let missing = event.unexecuted_count();
    if missing > 0 {
        return Err(BridgeError::CompletionViolation {
            pc: event.pc,
            insn: event.insn,
            missing,
            first_offset: event.first_unexecuted_offset().unwrap_or(0),
            cycle,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedOp, ScriptedReference};

    fn queue_with_store(addr: u32, bytes: &[u8]) -> EventQueue {
        let op = ScriptedOp::vector_store(0x1000, 0x0205_8027, addr, bytes);
        let mut reference = ScriptedReference::new(vec![op]);
        let mut queue = EventQueue::new(4);
        queue.refill(&mut reference, 0).unwrap();
        queue
    }

    #[test]
    fn test_matching_write_marks_executed() {
        let mut queue = queue_with_store(0x2000, &[0x11, 0x22]);
        let mut tracker = MemoryDiffTracker::new();

        tracker.observe_write(&mut queue, 0x2000, 0x11, 7).unwrap();
        tracker.observe_write(&mut queue, 0x2001, 0x22, 7).unwrap();

        assert_eq!(tracker.bytes_verified, 2);
        assert_eq!(queue.oldest().unwrap().unexecuted_count(), 0);
    }

    #[test]
    fn test_mismatching_write_is_fatal() {
        let mut queue = queue_with_store(0x2000, &[0x11]);
        let mut tracker = MemoryDiffTracker::new();

        let err = tracker.observe_write(&mut queue, 0x2000, 0x99, 7).unwrap_err();
        match err {
            BridgeError::VerificationMismatch { offset, expected, observed, .. } => {
                assert_eq!(offset, 0x2000);
                assert_eq!(expected, 0x11);
                assert_eq!(observed, 0x99);
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn test_unmatched_write_tolerated() {
        let mut queue = queue_with_store(0x2000, &[0x11]);
        let mut tracker = MemoryDiffTracker::new();

        // Granule fill outside any expectation: ignored, not fatal.
        tracker.observe_write(&mut queue, 0x3000, 0x55, 7).unwrap();
        assert_eq!(tracker.bytes_ignored, 1);
    }

    #[test]
    fn test_newest_match_wins() {
        // Two stores to the same address; the younger event owns the byte.
        let ops = vec![
            ScriptedOp::vector_store(0x1000, 0x0205_8027, 0x2000, &[0x11]),
            ScriptedOp::vector_store(0x1004, 0x0205_8027, 0x2000, &[0x22]),
        ];
        let mut reference = ScriptedReference::new(ops);
        let mut queue = EventQueue::new(4);
        queue.refill(&mut reference, 0).unwrap();
        let mut tracker = MemoryDiffTracker::new();

        tracker.observe_write(&mut queue, 0x2000, 0x22, 3).unwrap();

        let events: Vec<_> = queue.iter().collect();
        assert!(!events[0].mem_writes[&0x2000].executed);
        assert!(events[1].mem_writes[&0x2000].executed);
    }

    #[test]
    fn test_vrf_shadow_mask_and_offset() {
        let op = ScriptedOp::vector_arith(0x1000, 0x5700_0057, 2, &[(4, 0xAA), (5, 0xBB)]);
        let mut reference = ScriptedReference::new(vec![op]);
        let mut queue = EventQueue::new(4);
        queue.refill(&mut reference, 0).unwrap();

        let mut shadow = RegisterFileShadow::new(128);
        let beat = VrfWriteBeat {
            lane: 0,
            reg: 2,
            offset: 4,
            mask: 0b11,
            data: SmallVec::from_slice(&[0xAA, 0xBB]),
        };
        shadow.observe_write(&mut queue, &beat, 9).unwrap();
        assert_eq!(shadow.bytes_verified, 2);
        assert_eq!(queue.oldest().unwrap().unexecuted_count(), 0);
    }

    #[test]
    fn test_vrf_mismatch_cites_offsets() {
        let op = ScriptedOp::vector_arith(0x1000, 0x5700_0057, 0, &[(0, 0x01)]);
        let mut reference = ScriptedReference::new(vec![op]);
        let mut queue = EventQueue::new(4);
        queue.refill(&mut reference, 0).unwrap();

        let mut shadow = RegisterFileShadow::new(128);
        let beat = VrfWriteBeat {
            lane: 1,
            reg: 0,
            offset: 0,
            mask: 0b1,
            data: SmallVec::from_slice(&[0x02]),
        };
        let err = shadow.observe_write(&mut queue, &beat, 11).unwrap_err();
        assert!(matches!(err, BridgeError::VerificationMismatch { offset: 0, cycle: 11, .. }));
    }

    #[test]
    fn test_check_ready_for_commit() {
        let mut queue = queue_with_store(0x2000, &[0x11, 0x22]);
        {
            let event = queue.oldest().unwrap();
            let err = check_ready_for_commit(event, 20).unwrap_err();
            assert!(matches!(err, BridgeError::CompletionViolation { missing: 2, .. }));
        }

        let mut tracker = MemoryDiffTracker::new();
        tracker.observe_write(&mut queue, 0x2000, 0x11, 21).unwrap();
        tracker.observe_write(&mut queue, 0x2001, 0x22, 21).unwrap();
        check_ready_for_commit(queue.oldest().unwrap(), 22).unwrap();
    }
}
