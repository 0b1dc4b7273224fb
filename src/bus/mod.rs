//! Bus protocol decoding and transaction tracking.
//!
//! The DUT's memory interface is a set of independently-ordered channel
//! banks, each carrying one request beat and one response beat per cycle.
//! This subsystem reconstructs whole logical transactions from those beats:
//!
//! ```text
//!  request beats          ┌──────────────────┐        response beats
//! ─────────────────────►  │   ChannelBank    │  ◄─────────────────────
//!  (addr,op,size,mask,    │  ┌────────────┐  │   (opcode,data,denied)
//!   data,valid)           │  │Transaction │  │
//!                         │  │  tracker   │  │
//!                         │  └────────────┘  │
//!                         └──────────────────┘
//! ```
//!
//! The opcode set and widths come from a [`BusSpec`] so one tracker serves
//! every bridge variant; [`VectorBusSpec`] is the stock implementation fed
//! from [`BridgeConfig`](crate::config::BridgeConfig).
//!
//! Atomic opcodes are a documented unsupported region: they decode to
//! [`BusOpcode::Atomic`] and the tracker rejects them fatally rather than
//! approximating semantics the core does not have.

pub mod tracker;
pub mod transaction;

pub use tracker::{BusTransactionTracker, ChannelBank, MuxinRead};
pub use transaction::{BusTransaction, Phase};

use smallvec::SmallVec;

use crate::config::BridgeConfig;

/// Raw opcode values of the stock vector-core bus.
pub const OP_READ: u8 = 0;
pub const OP_WRITE_FULL: u8 = 1;
pub const OP_WRITE_PARTIAL: u8 = 2;
pub const OP_ATOMIC: u8 = 3;

/// Decoded transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOpcode {
    /// Read `size` bytes from `address`.
    Read,
    /// Write covering whole granules.
    WriteFull,
    /// Write smaller than the memory granule; needs a muxin read.
    WritePartial,
    /// Atomic read-modify-write. Unsupported, always rejected.
    Atomic,
}

/// One cycle of request-channel activity on a bank.
#[derive(Debug, Clone)]
pub struct RequestBeat {
    /// Transaction start address (first beat) / burst continuation address.
    pub address: u32,
    /// Raw opcode, decoded through the active [`BusSpec`].
    pub opcode: u8,
    /// Declared total transaction size in bytes.
    pub size: u32,
    /// Source/tag id correlating the transaction to an issued instruction.
    pub source: u8,
    /// Byte lane mask for this beat.
    pub mask: u64,
    /// Payload byte lanes for this beat (writes).
    pub data: SmallVec<[u8; 16]>,
}

/// One cycle of response-channel activity on a bank.
#[derive(Debug, Clone)]
pub struct ResponseBeat {
    /// Kind of the transaction being answered.
    pub opcode: BusOpcode,
    /// Data lanes (reads); empty for write acknowledgments.
    pub data: SmallVec<[u8; 16]>,
    /// Response was denied by the memory side. The stock bridge never
    /// denies; the field exists because the DUT port has it.
    pub denied: bool,
    /// Source/tag id echoed from the request.
    pub source: u8,
}

/// Protocol description: opcode decode plus negotiated widths.
pub trait BusSpec {
    /// Decode a raw opcode field. `None` means a malformed beat.
    fn decode_opcode(&self, raw: u8) -> Option<BusOpcode>;

    /// Negotiated maximum bytes per transaction.
    fn burst_bytes(&self) -> u32;

    /// Bus width per beat and natural write granule of the memory side.
    fn granule_bytes(&self) -> u32;
}

/// The stock vector-core bus protocol, widths taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct VectorBusSpec {
    burst_bytes: u32,
    granule_bytes: u32,
}

impl VectorBusSpec {
    /// Build from bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            burst_bytes: config.burst_bytes,
            granule_bytes: config.granule_bytes,
        }
    }
}

impl BusSpec for VectorBusSpec {
    fn decode_opcode(&self, raw: u8) -> Option<BusOpcode> {
        match raw {
            OP_READ => Some(BusOpcode::Read),
            OP_WRITE_FULL => Some(BusOpcode::WriteFull),
            OP_WRITE_PARTIAL => Some(BusOpcode::WritePartial),
            OP_ATOMIC => Some(BusOpcode::Atomic),
            _ => None,
        }
    }

    fn burst_bytes(&self) -> u32 {
        self.burst_bytes
    }

    fn granule_bytes(&self) -> u32 {
        self.granule_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_decode() {
        let spec = VectorBusSpec::from_config(&BridgeConfig::default());
        assert_eq!(spec.decode_opcode(OP_READ), Some(BusOpcode::Read));
        assert_eq!(spec.decode_opcode(OP_WRITE_PARTIAL), Some(BusOpcode::WritePartial));
        assert_eq!(spec.decode_opcode(OP_ATOMIC), Some(BusOpcode::Atomic));
        assert_eq!(spec.decode_opcode(7), None);
    }

    #[test]
    fn test_widths_from_config() {
        let config = BridgeConfig {
            burst_bytes: 32,
            granule_bytes: 4,
            ..BridgeConfig::default()
        };
        let spec = VectorBusSpec::from_config(&config);
        assert_eq!(spec.burst_bytes(), 32);
        assert_eq!(spec.granule_bytes(), 4);
    }
}
