//! Error taxonomy for the cosimulation bridge.
//!
//! Every variant here is fatal for the running cosimulation: once the
//! reference and DUT streams diverge, continuing would make all further
//! verification meaningless, so nothing is retried. Each variant carries
//! enough context (pc, addresses, values, cycle) for the harness to report
//! the divergence without re-running.

use thiserror::Error;

/// Result alias used throughout the bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Fatal cosimulation errors.
///
/// The harness classifies a run by the variant it receives: a clean exit is
/// `Ok`, a `Timeout` is a hang, everything else is a divergence or a
/// malformed DUT.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The DUT emitted a malformed or unsupported bus beat.
    #[error("protocol violation on bank {bank} at cycle {cycle}: {detail} (addr 0x{address:08x})")]
    ProtocolViolation {
        /// Channel bank the beat arrived on.
        bank: usize,
        /// Address carried by the offending beat.
        address: u32,
        /// What was wrong with it.
        detail: String,
        /// Cycle the beat was observed.
        cycle: u64,
    },

    /// A DUT-written byte differs from the reference-expected byte.
    #[error(
        "verification mismatch at pc 0x{pc:08x} (inst 0x{insn:08x}): \
         offset 0x{offset:08x} expected 0x{expected:02x} observed 0x{observed:02x} at cycle {cycle}"
    )]
    VerificationMismatch {
        /// Program counter of the instruction whose expectation failed.
        pc: u32,
        /// Raw instruction encoding.
        insn: u32,
        /// Byte address (memory) or flat VRF byte offset.
        offset: u32,
        /// Value the reference model computed.
        expected: u8,
        /// Value the DUT produced.
        observed: u8,
        /// Cycle the mismatching byte arrived.
        cycle: u64,
    },

    /// The DUT retired an instruction without performing an expected effect.
    #[error(
        "completion violation at pc 0x{pc:08x} (inst 0x{insn:08x}): \
         {missing} expected byte(s) never observed, first at offset 0x{first_offset:08x}, cycle {cycle}"
    )]
    CompletionViolation {
        /// Program counter of the retiring instruction.
        pc: u32,
        /// Raw instruction encoding.
        insn: u32,
        /// Count of records still unexecuted at commit time.
        missing: usize,
        /// Offset of the first unexecuted record.
        first_offset: u32,
        /// Cycle of the retirement.
        cycle: u64,
    },

    /// The DUT reported a scalar write-back value the reference disagrees with.
    #[error(
        "scalar write mismatch at pc 0x{pc:08x}: x{reg} expected 0x{expected:08x} \
         observed 0x{observed:08x} at cycle {cycle}"
    )]
    ScalarMismatch {
        /// Program counter of the retiring instruction.
        pc: u32,
        /// Destination register id.
        reg: u8,
        /// Reference-computed value.
        expected: u32,
        /// DUT-reported value.
        observed: u32,
        /// Cycle of the retirement.
        cycle: u64,
    },

    /// No instruction committed within the watchdog window.
    #[error("watchdog timeout: no commit for {timeout} cycles (last commit at cycle {last_commit}, now {cycle})")]
    Timeout {
        /// Configured window in cycles.
        timeout: u64,
        /// Cycle of the last successful commit.
        last_commit: u64,
        /// Cycle the watchdog fired.
        cycle: u64,
    },

    /// A programming-invariant break in queue management.
    #[error("queue invariant violation at cycle {cycle}: {detail}")]
    QueueInvariantViolation {
        /// What went wrong.
        detail: String,
        /// Cycle the violation was detected.
        cycle: u64,
    },
}

impl BridgeError {
    /// True for errors that indicate the DUT and reference diverged, as
    /// opposed to a hang or a malformed interface.
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            Self::VerificationMismatch { .. }
                | Self::CompletionViolation { .. }
                | Self::ScalarMismatch { .. }
        )
    }
}
