//! Instruction issue: driving the oldest un-issued event onto the DUT's
//! issue handshake.
//!
//! Driving is side-effect free; only the cycle where the DUT's ready
//! asserts mutates the event (`issued` flag plus the per-slot tag, when the
//! protocol allocates one at issue time).

use crate::error::{BridgeError, Result};
use crate::event::EventQueue;
use crate::reference::CsrSnapshot;

/// Issue-input signal group for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct IssueSignals {
    /// Raw instruction encoding.
    pub insn: u32,
    /// First scalar operand.
    pub rs1: u32,
    /// Second scalar operand.
    pub rs2: u32,
    /// Vector CSR snapshot.
    pub csr: CsrSnapshot,
}

/// Offers the oldest un-issued event's operands to the DUT each cycle.
#[derive(Debug, Default)]
pub struct InstructionIssueAdapter {
    /// Instructions accepted by the DUT so far.
    pub issued: u64,
}

impl InstructionIssueAdapter {
    /// Create a fresh adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals to drive this cycle: the oldest un-issued event, if any.
    /// No event means the issue-valid line stays low.
    pub fn offer(&self, queue: &EventQueue) -> Option<IssueSignals> {
        // Oldest-first scan; queue capacity is small by construction.
        queue.iter().find(|e| !e.issued).map(|e| IssueSignals {
            insn: e.insn,
            rs1: e.rs1,
            rs2: e.rs2,
            csr: e.csr,
        })
    }

    /// The DUT's issue-ready handshake asserted this cycle: mark the oldest
    /// un-issued event issued and record its slot tag.
    ///
    /// Firing with no un-issued event means the queue was not refilled
    /// correctly, which is a programming-invariant break, not a recoverable
    /// condition.
    pub fn fired(&mut self, queue: &mut EventQueue, tag: Option<u8>, cycle: u64) -> Result<()> {
        let event = queue.iter_mut().find(|e| !e.issued).ok_or_else(|| {
            BridgeError::QueueInvariantViolation {
                detail: "issue handshake fired with no un-issued event".to_string(),
                cycle,
            }
        })?;
        event.issued = true;
        event.tag = tag;
        self.issued += 1;
        log::debug!(
            "issued pc 0x{:08x} inst 0x{:08x} tag {:?}",
            event.pc,
            event.insn,
            tag
        );
        Ok(())
    }
}
