//! Per-channel-bank transaction tracking.
//!
//! Each bank models one ordered bus port: request beats are folded into
//! outstanding [`BusTransaction`]s, write bytes are verified against the
//! oracle as they commit, and responses are emitted strictly in arrival
//! order through a per-bank FIFO.
//!
//! Granule addresses are assumed power-of-two aligned widths; the muxin
//! alignment mask relies on it.

use std::collections::{BTreeMap, VecDeque};

use smallvec::SmallVec;

use super::transaction::{BusTransaction, Phase};
use super::{BusOpcode, BusSpec, RequestBeat, ResponseBeat};
use crate::error::{BridgeError, Result};
use crate::event::EventQueue;
use crate::oracle::MemoryDiffTracker;
use crate::reference::ReferenceModel;

/// A pending full-granule read required before a sub-granule write commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxinRead {
    /// Key of the transaction waiting on the read.
    pub key: u64,
    /// Granule-aligned address to read.
    pub address: u32,
}

/// One independently-ordered bus port.
///
/// The response FIFO's front is the current in-flight response; the request
/// cursor points at the transaction still accumulating beats.
#[derive(Debug, Default)]
pub struct ChannelBank {
    /// Outstanding transactions keyed by start cycle.
    outstanding: BTreeMap<u64, BusTransaction>,
    /// Transaction currently receiving request beats.
    inflight_req: Option<u64>,
    /// Completed transactions awaiting response emission, arrival order.
    resp_fifo: VecDeque<u64>,
}

impl ChannelBank {
    /// Number of outstanding transactions.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Look up a transaction by key.
    pub fn transaction(&self, key: u64) -> Option<&BusTransaction> {
        self.outstanding.get(&key)
    }
}

/// Reconstructs logical transactions from per-cycle beats across all banks.
#[derive(Debug)]
pub struct BusTransactionTracker<S: BusSpec> {
    spec: S,
    banks: Vec<ChannelBank>,
    latency: u64,
    /// Total muxin reads issued, across all banks.
    pub muxin_reads: u64,
}

impl<S: BusSpec> BusTransactionTracker<S> {
    /// Create a tracker for `channel_banks` ports with the given fixed
    /// memory latency.
    pub fn new(spec: S, channel_banks: usize, latency: u64) -> Self {
        Self {
            spec,
            banks: (0..channel_banks).map(|_| ChannelBank::default()).collect(),
            latency,
            muxin_reads: 0,
        }
    }

    /// Access a bank for inspection.
    pub fn bank(&self, bank: usize) -> &ChannelBank {
        &self.banks[bank]
    }

    /// No transactions outstanding on any bank.
    pub fn is_idle(&self) -> bool {
        self.banks.iter().all(|b| b.outstanding.is_empty())
    }

    /// Decode and fold one request beat into its transaction.
    pub fn request_beat(&mut self, bank_idx: usize, beat: &RequestBeat, cycle: u64) -> Result<()> {
        let opcode = self.spec.decode_opcode(beat.opcode).ok_or_else(|| {
            BridgeError::ProtocolViolation {
                bank: bank_idx,
                address: beat.address,
                detail: format!("malformed beat: unknown opcode {:#x}", beat.opcode),
                cycle,
            }
        })?;
        if opcode == BusOpcode::Atomic {
            return Err(BridgeError::ProtocolViolation {
                bank: bank_idx,
                address: beat.address,
                detail: "atomic opcodes are unsupported".to_string(),
                cycle,
            });
        }
        if beat.size > self.spec.burst_bytes() {
            return Err(BridgeError::ProtocolViolation {
                bank: bank_idx,
                address: beat.address,
                detail: format!(
                    "request size {} exceeds negotiated burst width {}",
                    beat.size,
                    self.spec.burst_bytes()
                ),
                cycle,
            });
        }
        if beat.data.len() as u32 > self.spec.granule_bytes() {
            return Err(BridgeError::ProtocolViolation {
                bank: bank_idx,
                address: beat.address,
                detail: format!("beat carries {} lanes, bus width is {}", beat.data.len(), self.spec.granule_bytes()),
                cycle,
            });
        }

        let granule = self.spec.granule_bytes();
        let bank = &mut self.banks[bank_idx];
        let key = match bank.inflight_req {
            Some(key) => key,
            None => {
                let txn = BusTransaction::new(
                    beat.address,
                    opcode,
                    beat.size,
                    beat.source,
                    cycle,
                    self.latency,
                    granule,
                );
                log::debug!(
                    "bank {} new {:?} txn at 0x{:08x}, {} bytes, source {}",
                    bank_idx,
                    opcode,
                    beat.address,
                    beat.size,
                    beat.source
                );
                bank.outstanding.insert(cycle, txn);
                bank.inflight_req = Some(cycle);
                cycle
            }
        };

        let txn = bank
            .outstanding
            .get_mut(&key)
            .expect("request cursor points at a live transaction");
        if txn.is_write() {
            for (i, value) in beat.data.iter().enumerate() {
                if beat.mask & (1u64 << i) == 0 {
                    continue;
                }
                if txn.bytes_received >= txn.size {
                    return Err(BridgeError::ProtocolViolation {
                        bank: bank_idx,
                        address: beat.address,
                        detail: format!("write payload exceeds declared size {}", txn.size),
                        cycle,
                    });
                }
                txn.push_payload(beat.address + i as u32, *value);
            }
        }
        if txn.request_complete() {
            bank.inflight_req = None;
        }
        Ok(())
    }

    /// Advance every outstanding transaction by one cycle: latency ticks,
    /// write-byte verification against the oracle, read-data fetch, and
    /// response scheduling.
    pub fn tick<R: ReferenceModel>(
        &mut self,
        queue: &mut EventQueue,
        reference: &R,
        mem: &mut MemoryDiffTracker,
        cycle: u64,
    ) -> Result<()> {
        let granule = self.spec.granule_bytes();
        for bank_idx in 0..self.banks.len() {
            self.service_muxin(bank_idx);

            let keys: Vec<u64> = self.banks[bank_idx].outstanding.keys().copied().collect();
            // Responses leave in arrival order: a transaction may only be
            // scheduled once every earlier one on the bank already has been.
            let mut earlier_scheduled = true;
            for key in keys {
                let txn = self.banks[bank_idx]
                    .outstanding
                    .get_mut(&key)
                    .expect("key enumerated above");
                txn.tick_latency();

                if txn.phase == Phase::Requesting && txn.commit_eligible() {
                    txn.phase = Phase::Committing;
                    log::trace!("bank {} txn @{} -> Committing", bank_idx, key);
                }

                let mut chunk: SmallVec<[(u32, u8); 16]> = SmallVec::new();
                if txn.phase == Phase::Committing && txn.is_write() {
                    chunk = txn.take_commit_chunk(granule);
                }

                let enter_processing = txn.phase == Phase::Committing
                    && txn.commit_complete()
                    && txn.remaining_cycles == 0
                    && earlier_scheduled;
                let is_read = txn.opcode == BusOpcode::Read;
                let (addr, size) = (txn.address, txn.size);
                let scheduled = matches!(txn.phase, Phase::Returning | Phase::Done);

                for (a, b) in chunk {
                    mem.observe_write(queue, a, b, cycle)?;
                }

                if enter_processing {
                    // Expected-read records win over raw memory: the
                    // reference runs ahead and raw bytes may already hold a
                    // future value.
                    let data = if is_read {
                        let mut data = Vec::with_capacity(size as usize);
                        for i in 0..size {
                            let byte = mem
                                .observe_read(queue, addr + i)
                                .unwrap_or_else(|| reference.read_mem(addr + i));
                            data.push(byte);
                        }
                        Some(data)
                    } else {
                        None
                    };

                    let bank = &mut self.banks[bank_idx];
                    let txn = bank.outstanding.get_mut(&key).expect("key enumerated above");
                    txn.phase = Phase::Processing;
                    match data {
                        Some(d) => txn.set_return_data(&d),
                        None => txn.bytes_processed = txn.bytes_committed,
                    }
                    txn.phase = Phase::Returning;
                    bank.resp_fifo.push_back(key);
                    log::trace!("bank {} txn @{} -> Returning", bank_idx, key);
                }

                earlier_scheduled = earlier_scheduled && (scheduled || enter_processing);
            }
        }
        Ok(())
    }

    /// Issue the next pending muxin granule read, marking it sent.
    pub fn issue_mem_request(&mut self, bank_idx: usize) -> Option<MuxinRead> {
        let granule = self.spec.granule_bytes();
        let bank = &mut self.banks[bank_idx];
        for (key, txn) in bank.outstanding.iter_mut() {
            if txn.muxin_read_required && !txn.muxin_read_sent {
                txn.muxin_read_sent = true;
                return Some(MuxinRead {
                    key: *key,
                    address: txn.address & !(granule - 1),
                });
            }
        }
        None
    }

    /// The muxin read for `key` has resolved; the write may now commit.
    pub fn resolve_muxin(&mut self, bank_idx: usize, key: u64) {
        if let Some(txn) = self.banks[bank_idx].outstanding.get_mut(&key) {
            txn.muxin_read_required = false;
        }
    }

    /// Issue and resolve pending muxin reads against the internal memory
    /// side. The fetched granule only feeds the read-modify-write merge, so
    /// no data is returned here.
    fn service_muxin(&mut self, bank_idx: usize) {
        while let Some(req) = self.issue_mem_request(bank_idx) {
            log::debug!("bank {} muxin read at 0x{:08x}", bank_idx, req.address);
            self.muxin_reads += 1;
            self.resolve_muxin(bank_idx, req.key);
        }
    }

    /// Peek the response beat the bank would emit this cycle.
    pub fn next_response(&self, bank_idx: usize) -> Option<ResponseBeat> {
        let bank = &self.banks[bank_idx];
        let key = *bank.resp_fifo.front()?;
        let txn = bank.outstanding.get(&key)?;
        if txn.phase != Phase::Returning {
            return None;
        }
        let beat = match txn.opcode {
            BusOpcode::Read => ResponseBeat {
                opcode: BusOpcode::Read,
                data: SmallVec::from_slice(txn.return_chunk(self.spec.granule_bytes())),
                denied: false,
                source: txn.source,
            },
            op => ResponseBeat {
                opcode: op,
                data: SmallVec::new(),
                denied: false,
                source: txn.source,
            },
        };
        Some(beat)
    }

    /// The DUT accepted the offered response beat; advance or retire the
    /// transaction.
    pub fn response_fired(&mut self, bank_idx: usize) {
        let granule = self.spec.granule_bytes();
        let bank = &mut self.banks[bank_idx];
        let Some(&key) = bank.resp_fifo.front() else {
            return;
        };
        let Some(txn) = bank.outstanding.get_mut(&key) else {
            return;
        };
        let finished = match txn.opcode {
            BusOpcode::Read => {
                let n = (txn.size - txn.bytes_returned).min(granule);
                txn.advance_returned(n);
                txn.bytes_returned == txn.size
            }
            // Writes acknowledge with a single beat.
            _ => true,
        };
        if finished {
            txn.phase = Phase::Done;
            log::debug!("bank {} txn @{} done", bank_idx, key);
            bank.resp_fifo.pop_front();
            bank.outstanding.remove(&key);
        }
    }
}
