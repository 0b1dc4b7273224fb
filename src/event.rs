//! Pending-event queue: per-instruction expectation records produced by
//! single-stepping the reference model.
//!
//! The reference model runs ahead of the DUT by up to `queue_capacity`
//! instructions. Each tracked instruction becomes a [`ReferenceEvent`]
//! holding every byte-level side effect the DUT must reproduce before that
//! instruction may retire.
//!
//! Expectations are populated by snapshot diffing: before executing a
//! tracked instruction the byte range it may overwrite is captured; after
//! execution only the bytes that actually changed become expected-write
//! records. This keeps masked and partially-inactive operations from
//! producing false expectations.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::error::{BridgeError, Result};
use crate::reference::{CsrSnapshot, DecodedEffect, EffectClass, ReferenceModel};

/// One expected byte and whether the DUT has produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRecord {
    /// Value the reference model computed.
    pub expected: u8,
    /// Set once the DUT visibly produced this byte.
    pub executed: bool,
}

impl ByteRecord {
    fn new(expected: u8) -> Self {
        Self { expected, executed: false }
    }
}

/// Expected scalar register write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarWrite {
    /// Destination register id.
    pub reg: u8,
    /// Reference-computed value.
    pub value: u32,
    /// Set once the DUT reported the write at commit time.
    pub written: bool,
}

/// Expected vector-register-file write: a flat byte range plus per-byte
/// records for the bytes that actually changed.
#[derive(Debug, Clone, Default)]
pub struct VrfExpectation {
    /// First flat VRF byte offset the instruction may overwrite.
    pub start: u32,
    /// Length of the overwritable range in bytes.
    pub len: u32,
    /// Changed bytes only, as `(flat_offset, record)` in ascending order.
    pub records: SmallVec<[(u32, ByteRecord); 64]>,
}

impl VrfExpectation {
    /// Find the record at an exact flat offset.
    pub fn record_mut(&mut self, offset: u32) -> Option<&mut ByteRecord> {
        self.records
            .iter_mut()
            .find(|(o, _)| *o == offset)
            .map(|(_, r)| r)
    }
}

/// Per-instruction expectation record. Owned exclusively by the queue until
/// popped after commit.
#[derive(Debug, Clone)]
pub struct ReferenceEvent {
    /// Program counter.
    pub pc: u32,
    /// Raw instruction encoding.
    pub insn: u32,
    /// Effect classification.
    pub class: EffectClass,
    /// First scalar operand at decode time.
    pub rs1: u32,
    /// Second scalar operand at decode time.
    pub rs2: u32,
    /// Vector CSR snapshot at decode time.
    pub csr: CsrSnapshot,
    /// Offered to the DUT's issue handshake and accepted.
    pub issued: bool,
    /// Retired by the commit matcher.
    pub committed: bool,
    /// Traps instead of completing normally.
    pub is_trap: bool,
    /// Completion is signalled by a scalar write-back, not a bare pulse.
    pub is_multicycle: bool,
    /// Per-slot tag allocated by the DUT at issue time, if the protocol
    /// does that; used to correlate bus transactions.
    pub tag: Option<u8>,
    /// Expected scalar register write-back.
    pub scalar: Option<ScalarWrite>,
    /// Expected memory writes, `address -> record`.
    pub mem_writes: BTreeMap<u32, ByteRecord>,
    /// Expected memory reads, `address -> record`.
    pub mem_reads: BTreeMap<u32, ByteRecord>,
    /// Expected vector-register-file writes.
    pub vrf: Option<VrfExpectation>,
}

impl ReferenceEvent {
    fn from_effect(effect: &DecodedEffect) -> Self {
        Self {
            pc: effect.pc,
            insn: effect.insn,
            class: effect.class,
            rs1: effect.rs1,
            rs2: effect.rs2,
            csr: effect.csr,
            issued: false,
            committed: false,
            is_trap: effect.is_trap,
            is_multicycle: effect.is_multicycle,
            tag: None,
            scalar: None,
            mem_writes: BTreeMap::new(),
            mem_reads: BTreeMap::new(),
            vrf: None,
        }
    }

    /// Count of expectation records the DUT has not yet satisfied.
    pub fn unexecuted_count(&self) -> usize {
        let mem = self
            .mem_writes
            .values()
            .chain(self.mem_reads.values())
            .filter(|r| !r.executed)
            .count();
        let vrf = self
            .vrf
            .as_ref()
            .map(|v| v.records.iter().filter(|(_, r)| !r.executed).count())
            .unwrap_or(0);
        mem + vrf
    }

    /// Offset of the first unsatisfied record, for diagnostics.
    pub fn first_unexecuted_offset(&self) -> Option<u32> {
        if let Some((addr, _)) = self
            .mem_writes
            .iter()
            .chain(self.mem_reads.iter())
            .find(|(_, r)| !r.executed)
        {
            return Some(*addr);
        }
        self.vrf
            .as_ref()
            .and_then(|v| v.records.iter().find(|(_, r)| !r.executed))
            .map(|(o, _)| *o)
    }
}

/// Pre-execution capture of the state a tracked instruction may overwrite.
struct PreSnapshot {
    /// VRF bytes over the declared range.
    vrf_bytes: Vec<u8>,
    /// Memory bytes over the declared footprint (stores only).
    mem_bytes: Vec<u8>,
}

/// Bounded FIFO of pending events.
///
/// Front is the oldest (retirement end), back is the newest. Capacity is
/// small (8-10 in practice), so the linear scans used by the issue adapter,
/// the diff tracker and the commit matcher are a deliberate bound, not an
/// accident of container choice.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<ReferenceEvent>,
    capacity: usize,
}

impl EventQueue {
    /// Create an empty queue with the configured capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no events are pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-to-newest iteration.
    pub fn iter(&self) -> impl Iterator<Item = &ReferenceEvent> {
        self.events.iter()
    }

    /// Oldest-to-newest mutable iteration.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ReferenceEvent> {
        self.events.iter_mut()
    }

    /// Oldest pending event.
    pub fn oldest(&self) -> Option<&ReferenceEvent> {
        self.events.front()
    }

    /// Pop the oldest pending event.
    pub fn pop_oldest(&mut self) -> Option<ReferenceEvent> {
        self.events.pop_front()
    }

    /// Refill the queue by single-stepping the reference model until the
    /// queue is full or the program exits. Untracked instructions are
    /// executed by the model internally and never queued.
    pub fn refill<R: ReferenceModel>(&mut self, reference: &mut R, cycle: u64) -> Result<()> {
        while self.events.len() < self.capacity {
            if reference.exited() {
                break;
            }
            match reference.step() {
                Some(effect) => {
                    let mut event = ReferenceEvent::from_effect(&effect);
                    let pre = Self::pre_snapshot(&effect, reference);
                    reference.commit_step();
                    Self::diff_snapshot(&mut event, &effect, &pre, reference);
                    log::debug!(
                        "queued pc 0x{:08x} inst 0x{:08x} ({:?}, {} expected bytes)",
                        event.pc,
                        event.insn,
                        event.class,
                        event.unexecuted_count()
                    );
                    self.push(event, cycle)?;
                }
                // Untracked instruction, already applied internally.
                None => {}
            }
        }
        Ok(())
    }

    fn push(&mut self, event: ReferenceEvent, cycle: u64) -> Result<()> {
        if self.events.len() >= self.capacity {
            return Err(BridgeError::QueueInvariantViolation {
                detail: format!(
                    "push would exceed capacity {} (pc 0x{:08x})",
                    self.capacity, event.pc
                ),
                cycle,
            });
        }
        self.events.push_back(event);
        Ok(())
    }

    /// Capture the byte ranges the instruction may overwrite, before it runs.
    fn pre_snapshot<R: ReferenceModel>(effect: &DecodedEffect, reference: &R) -> PreSnapshot {
        let vrf_bytes = match effect.vrf_range {
            Some((start, len)) => (0..len).map(|i| reference.vrf_byte(start + i)).collect(),
            None => Vec::new(),
        };
        let mem_bytes = match (effect.class, effect.mem_footprint) {
            (EffectClass::VectorStore, Some(fp)) => {
                (0..fp.len).map(|i| reference.read_mem(fp.base + i)).collect()
            }
            _ => Vec::new(),
        };
        PreSnapshot { vrf_bytes, mem_bytes }
    }

    /// Compare post-execution state against the snapshot and populate the
    /// expectation maps for bytes that actually changed.
    fn diff_snapshot<R: ReferenceModel>(
        event: &mut ReferenceEvent,
        effect: &DecodedEffect,
        pre: &PreSnapshot,
        reference: &R,
    ) {
        if let Some(rd) = effect.scalar_rd {
            // Recorded unconditionally: a multi-cycle op may rewrite an
            // identical value and commit matching still needs the record.
            event.scalar = Some(ScalarWrite {
                reg: rd,
                value: reference.read_scalar(rd),
                written: false,
            });
        }

        if let Some((start, len)) = effect.vrf_range {
            let mut exp = VrfExpectation {
                start,
                len,
                records: SmallVec::new(),
            };
            for i in 0..len {
                let now = reference.vrf_byte(start + i);
                if now != pre.vrf_bytes[i as usize] {
                    exp.records.push((start + i, ByteRecord::new(now)));
                }
            }
            if !exp.records.is_empty() {
                event.vrf = Some(exp);
            }
        }

        if let Some(fp) = effect.mem_footprint {
            match effect.class {
                EffectClass::VectorStore => {
                    for i in 0..fp.len {
                        let now = reference.read_mem(fp.base + i);
                        if now != pre.mem_bytes[i as usize] {
                            event.mem_writes.insert(fp.base + i, ByteRecord::new(now));
                        }
                    }
                }
                EffectClass::VectorLoad => {
                    // Loads leave memory untouched; the expected read value
                    // is re-derived from raw memory, not an access log.
                    for i in 0..fp.len {
                        let value = reference.read_mem(fp.base + i);
                        event.mem_reads.insert(fp.base + i, ByteRecord::new(value));
                    }
                }
                EffectClass::VectorArith => {}
            }
        }
    }
}
