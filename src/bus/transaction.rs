//! A single reconstructed bus transaction.
//!
//! Transactions move through a fixed phase sequence:
//!
//! ```text
//! ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌───────────┐  ┌──────┐
//! │ Requesting │─►│ Committing │─►│ Processing │─►│ Returning │─►│ Done │
//! │ (beats in) │  │ (verify +  │  │ (memory op,│  │ (beats    │  │      │
//! │            │  │  latency)  │  │  fetch)    │  │  out)     │  │      │
//! └────────────┘  └────────────┘  └────────────┘  └───────────┘  └──────┘
//! ```
//!
//! A write partial smaller than the memory granule stalls in `Requesting`
//! with `muxin_read_required` set until the granule read resolves; only then
//! is it eligible for `Committing`.

use smallvec::SmallVec;

use super::BusOpcode;

/// Transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Accumulating request beats.
    #[default]
    Requesting,
    /// Write bytes being verified and committed to memory.
    Committing,
    /// Memory-side operation (read fetch / write drain).
    Processing,
    /// Response beats being returned to the DUT.
    Returning,
    /// Fully retired; may be dropped from the bank.
    Done,
}

/// One outstanding bus transaction on a channel bank.
#[derive(Debug, Clone)]
pub struct BusTransaction {
    /// Transaction start address.
    pub address: u32,
    /// Decoded kind. Never `Atomic`; those are rejected before tracking.
    pub opcode: BusOpcode,
    /// Declared total size in bytes.
    pub size: u32,
    /// Source/tag id from the request channel.
    pub source: u8,
    /// Cycle of the first request beat; also the key in the bank map.
    pub start_cycle: u64,
    /// Current phase.
    pub phase: Phase,
    /// Write payload bytes received so far.
    pub bytes_received: u32,
    /// Write bytes verified and committed to memory.
    pub bytes_committed: u32,
    /// Bytes drained by the memory side after commit.
    pub bytes_processed: u32,
    /// Response data bytes returned to the DUT.
    pub bytes_returned: u32,
    /// Fixed-latency countdown; `Processing` is unreachable before zero.
    pub remaining_cycles: u64,
    /// Partial write needs a full-granule read before it may commit.
    pub muxin_read_required: bool,
    /// The granule read has been issued to the memory side.
    pub muxin_read_sent: bool,
    /// Received write bytes awaiting commit, `(address, value)` in arrival
    /// order.
    payload: SmallVec<[(u32, u8); 16]>,
    /// Read data awaiting return.
    return_data: SmallVec<[u8; 64]>,
}

impl BusTransaction {
    /// Create a transaction from its first request beat.
    pub fn new(
        address: u32,
        opcode: BusOpcode,
        size: u32,
        source: u8,
        start_cycle: u64,
        latency: u64,
        granule_bytes: u32,
    ) -> Self {
        debug_assert_ne!(opcode, BusOpcode::Atomic);
        let muxin = opcode == BusOpcode::WritePartial && size < granule_bytes;
        Self {
            address,
            opcode,
            size,
            source,
            start_cycle,
            phase: Phase::Requesting,
            bytes_received: 0,
            bytes_committed: 0,
            bytes_processed: 0,
            bytes_returned: 0,
            remaining_cycles: latency,
            muxin_read_required: muxin,
            muxin_read_sent: false,
            payload: SmallVec::new(),
            return_data: SmallVec::new(),
        }
    }

    /// Whether this is a write of either flavor.
    pub fn is_write(&self) -> bool {
        matches!(self.opcode, BusOpcode::WriteFull | BusOpcode::WritePartial)
    }

    /// Record one received write byte.
    pub fn push_payload(&mut self, addr: u32, value: u8) {
        self.payload.push((addr, value));
        self.bytes_received += 1;
        debug_assert!(self.bytes_received <= self.size);
    }

    /// All request beats have arrived. Reads complete their request phase on
    /// the beat that created them.
    pub fn request_complete(&self) -> bool {
        match self.opcode {
            BusOpcode::Read => true,
            _ => self.bytes_received == self.size,
        }
    }

    /// Eligible to start committing bytes to memory.
    pub fn commit_eligible(&self) -> bool {
        self.request_complete() && !self.muxin_read_required
    }

    /// Tick the fixed-latency counter.
    pub fn tick_latency(&mut self) {
        self.remaining_cycles = self.remaining_cycles.saturating_sub(1);
    }

    /// Drain up to `max` committed-pending write bytes for verification.
    pub fn take_commit_chunk(&mut self, max: u32) -> SmallVec<[(u32, u8); 16]> {
        let n = (max as usize).min(self.payload.len());
        let chunk: SmallVec<[(u32, u8); 16]> = self.payload.drain(..n).collect();
        self.bytes_committed += chunk.len() as u32;
        debug_assert!(self.bytes_committed <= self.bytes_received);
        chunk
    }

    /// All write bytes are committed (vacuously true for reads).
    pub fn commit_complete(&self) -> bool {
        !self.is_write() || self.bytes_committed == self.size
    }

    /// Store fetched read data during `Processing`.
    pub fn set_return_data(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len() as u32, self.size);
        self.return_data = SmallVec::from_slice(data);
    }

    /// Next response chunk of at most `granule` bytes (reads).
    pub fn return_chunk(&self, granule: u32) -> &[u8] {
        let from = self.bytes_returned as usize;
        let to = (self.bytes_returned + granule).min(self.size) as usize;
        &self.return_data[from..to]
    }

    /// Advance the returned-byte counter after a response beat fired.
    pub fn advance_returned(&mut self, n: u32) {
        self.bytes_returned += n;
        debug_assert!(self.bytes_returned <= self.size);
    }

    /// Response fully delivered: single ack for writes, all data for reads.
    pub fn return_complete(&self) -> bool {
        match self.opcode {
            BusOpcode::Read => self.bytes_returned == self.size,
            _ => self.phase == Phase::Done,
        }
    }

    /// Nothing left to do; the bank may drop the record.
    pub fn fully_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_txn(opcode: BusOpcode, size: u32) -> BusTransaction {
        BusTransaction::new(0x1000, opcode, size, 1, 10, 4, 8)
    }

    #[test]
    fn test_write_request_accumulation() {
        let mut t = write_txn(BusOpcode::WriteFull, 16);
        assert!(!t.request_complete());

        for i in 0..16 {
            t.push_payload(0x1000 + i, i as u8);
        }
        assert!(t.request_complete());
        assert!(t.commit_eligible());
        assert_eq!(t.bytes_received, 16);
    }

    #[test]
    fn test_read_request_complete_immediately() {
        let t = BusTransaction::new(0x2000, BusOpcode::Read, 32, 0, 5, 4, 8);
        assert!(t.request_complete());
        assert!(t.commit_eligible());
    }

    #[test]
    fn test_partial_write_needs_muxin() {
        let mut t = write_txn(BusOpcode::WritePartial, 2);
        t.push_payload(0x1002, 0xAA);
        t.push_payload(0x1003, 0xBB);
        assert!(t.request_complete());
        assert!(t.muxin_read_required);
        assert!(!t.commit_eligible());

        t.muxin_read_required = false;
        assert!(t.commit_eligible());
    }

    #[test]
    fn test_granule_sized_partial_write_skips_muxin() {
        let t = write_txn(BusOpcode::WritePartial, 8);
        assert!(!t.muxin_read_required);
    }

    #[test]
    fn test_commit_chunk_counters() {
        let mut t = write_txn(BusOpcode::WriteFull, 16);
        for i in 0..16 {
            t.push_payload(0x1000 + i, i as u8);
        }

        let chunk = t.take_commit_chunk(8);
        assert_eq!(chunk.len(), 8);
        assert_eq!(t.bytes_committed, 8);
        assert!(!t.commit_complete());

        let chunk = t.take_commit_chunk(8);
        assert_eq!(chunk.len(), 8);
        assert!(t.commit_complete());

        // Counter ordering invariant
        assert!(t.bytes_committed <= t.bytes_received);
        assert!(t.bytes_received <= t.size);
    }

    #[test]
    fn test_read_return_chunks() {
        let mut t = BusTransaction::new(0x2000, BusOpcode::Read, 16, 0, 5, 0, 8);
        let data: Vec<u8> = (0..16).collect();
        t.set_return_data(&data);

        assert_eq!(t.return_chunk(8), &data[0..8]);
        t.advance_returned(8);
        assert_eq!(t.return_chunk(8), &data[8..16]);
        t.advance_returned(8);
        assert!(t.return_complete());
    }

    #[test]
    fn test_latency_countdown() {
        let mut t = write_txn(BusOpcode::WriteFull, 8);
        assert_eq!(t.remaining_cycles, 4);
        for _ in 0..6 {
            t.tick_latency();
        }
        assert_eq!(t.remaining_cycles, 0);
    }
}
