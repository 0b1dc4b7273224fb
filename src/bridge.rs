//! The cosimulation bridge.
//!
//! One explicitly constructed [`Bridge`] value ties the subsystems together
//! and is owned by the cycle-driving loop; the adapter that pokes DUT
//! signals each cycle gets it by reference. There is no global instance.
//!
//! # Usage
//!
//! ```ignore
//! let mut bridge = Bridge::new(config, reference);
//! loop {
//!     bridge.tick()?;
//!     if let Some(signals) = bridge.issue_slot() {
//!         dut.drive_issue(&signals);
//!     }
//!     // ...poke/peek the remaining DUT ports...
//!     if bridge.status() == RunStatus::Exited {
//!         break;
//!     }
//!     dut.step_clock();
//! }
//! ```

use crate::bus::{BusTransactionTracker, RequestBeat, ResponseBeat, VectorBusSpec};
use crate::commit::{CommitBeat, CommitMatcher};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::event::{EventQueue, ReferenceEvent};
use crate::issue::{InstructionIssueAdapter, IssueSignals};
use crate::oracle::{MemoryDiffTracker, RegisterFileShadow, VrfWriteBeat};
use crate::reference::ReferenceModel;
use crate::watchdog::WatchdogTimer;

/// Where the run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Work remains: pending events or outstanding bus traffic.
    Running,
    /// The reference hit its exit marker and everything has drained.
    Exited,
}

/// The differential-testing bridge between one reference model and one DUT.
pub struct Bridge<R: ReferenceModel> {
    config: BridgeConfig,
    reference: R,
    queue: EventQueue,
    tracker: BusTransactionTracker<VectorBusSpec>,
    mem: MemoryDiffTracker,
    shadow: RegisterFileShadow,
    issue: InstructionIssueAdapter,
    matcher: CommitMatcher,
    watchdog: WatchdogTimer,
    cycle: u64,
}

impl<R: ReferenceModel> Bridge<R> {
    /// Construct a bridge around a reference model.
    pub fn new(config: BridgeConfig, reference: R) -> Self {
        log::info!(
            "bridge up: queue {} deep, {} banks, burst {} bytes, timeout {} cycles",
            config.queue_capacity,
            config.channel_banks,
            config.burst_bytes,
            config.timeout_cycles
        );
        Self {
            reference,
            queue: EventQueue::new(config.queue_capacity),
            tracker: BusTransactionTracker::new(
                VectorBusSpec::from_config(&config),
                config.channel_banks,
                config.memory_latency_cycles,
            ),
            mem: MemoryDiffTracker::new(),
            shadow: RegisterFileShadow::new(config.vrf_bytes_per_register),
            issue: InstructionIssueAdapter::new(),
            matcher: CommitMatcher::new(),
            watchdog: WatchdogTimer::new(config.timeout_cycles),
            config,
            cycle: 0,
        }
    }

    /// Current model cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The pending-event queue, for inspection.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// The reference model, for inspection.
    pub fn reference(&self) -> &R {
        &self.reference
    }

    /// Advance the bridge by one model cycle: watchdog, queue refill, bus
    /// transaction progress.
    pub fn tick(&mut self) -> Result<()> {
        self.cycle += 1;
        self.watchdog.tick(self.cycle)?;
        self.queue.refill(&mut self.reference, self.cycle)?;
        self.tracker
            .tick(&mut self.queue, &self.reference, &mut self.mem, self.cycle)?;
        Ok(())
    }

    /// Signals to drive on the DUT's issue port this cycle.
    pub fn issue_slot(&self) -> Option<IssueSignals> {
        self.issue.offer(&self.queue)
    }

    /// The DUT accepted the offered instruction.
    pub fn issue_fired(&mut self, tag: Option<u8>) -> Result<()> {
        self.issue.fired(&mut self.queue, tag, self.cycle)
    }

    /// A request beat arrived on `bank`.
    pub fn request_beat(&mut self, bank: usize, beat: &RequestBeat) -> Result<()> {
        self.tracker.request_beat(bank, beat, self.cycle)
    }

    /// The response beat `bank` would emit this cycle.
    pub fn next_response(&self, bank: usize) -> Option<ResponseBeat> {
        self.tracker.next_response(bank)
    }

    /// The DUT accepted the offered response beat on `bank`.
    pub fn response_fired(&mut self, bank: usize) {
        self.tracker.response_fired(bank)
    }

    /// A vector-register write-port beat was observed.
    pub fn vrf_write(&mut self, beat: &VrfWriteBeat) -> Result<()> {
        self.shadow.observe_write(&mut self.queue, beat, self.cycle)
    }

    /// The commit/retire signal asserted. Returns the events retired from
    /// the queue tail, oldest first.
    pub fn commit(&mut self, beat: &CommitBeat) -> Result<Vec<ReferenceEvent>> {
        self.matcher.observe(
            &mut self.queue,
            &self.reference,
            &mut self.watchdog,
            beat,
            self.cycle,
        )
    }

    /// Run status: `Exited` once the reference program is done and every
    /// pending event and bus transaction has drained.
    pub fn status(&self) -> RunStatus {
        if self.reference.exited() && self.queue.is_empty() && self.tracker.is_idle() {
            RunStatus::Exited
        } else {
            RunStatus::Running
        }
    }

    /// One-line progress summary for the harness log.
    pub fn log_status(&self) {
        log::info!(
            "cycle {}: {} pending, {} issued, {} committed, {} bytes verified",
            self.cycle,
            self.queue.len(),
            self.issue.issued,
            self.matcher.commits,
            self.mem.bytes_verified + self.shadow.bytes_verified,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusOpcode, OP_READ, OP_WRITE_FULL};
    use crate::error::BridgeError;
    use crate::testing::{ScriptedOp, ScriptedReference};
    use smallvec::SmallVec;

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            memory_latency_cycles: 0,
            ..BridgeConfig::default()
        }
    }

    fn read_beat(address: u32, size: u32) -> RequestBeat {
        RequestBeat {
            address,
            opcode: OP_READ,
            size,
            source: 0,
            mask: 0,
            data: SmallVec::new(),
        }
    }

    fn vrf_beat(reg: u8, offset: u32, data: &[u8]) -> VrfWriteBeat {
        VrfWriteBeat {
            lane: 0,
            reg,
            offset,
            mask: (1u64 << data.len()) - 1,
            data: SmallVec::from_slice(data),
        }
    }

    fn pulse(pc: u32) -> CommitBeat {
        CommitBeat { pc, wb_valid: false, rd: 0, value: 0 }
    }

    /// A 16-byte vector load observed as a bus read plus two 8-byte
    /// write-port beats; afterwards no expectation remains and the commit
    /// succeeds.
    #[test]
    fn test_scenario_vector_load_two_beats() -> anyhow::Result<()> {
        crate::testing::init_logging();
        let mut op = ScriptedOp::vector_load(0x2000, 0x0200_5007, 0x1000, 16);
        op.vrf_writes = (0..16).map(|i| (i, i as u8)).collect();
        let mut reference = ScriptedReference::new(vec![op]);
        for i in 0..16u32 {
            reference.poke_mem(0x1000 + i, i as u8);
        }
        let mut bridge = Bridge::new(fast_config(), reference);

        bridge.tick()?;
        assert_eq!(bridge.queue().len(), 1);

        // Issue handshake fires.
        let signals = bridge.issue_slot().expect("one un-issued event");
        assert_eq!(signals.insn, 0x0200_5007);
        bridge.issue_fired(Some(0))?;

        // The DUT fetches the 16 bytes over the bus.
        bridge.request_beat(0, &read_beat(0x1000, 16))?;
        bridge.tick()?;
        let r1 = bridge.next_response(0).expect("first read chunk");
        assert_eq!(r1.data.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        bridge.response_fired(0);
        let r2 = bridge.next_response(0).expect("second read chunk");
        assert_eq!(r2.data.as_slice(), &[8, 9, 10, 11, 12, 13, 14, 15]);
        bridge.response_fired(0);

        // The loaded bytes land in the register file across two beats.
        bridge.vrf_write(&vrf_beat(0, 0, &[0, 1, 2, 3, 4, 5, 6, 7]))?;
        bridge.vrf_write(&vrf_beat(0, 8, &[8, 9, 10, 11, 12, 13, 14, 15]))?;
        assert_eq!(bridge.queue().oldest().unwrap().unexecuted_count(), 0);

        let popped = bridge.commit(&pulse(0x2000))?;
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].pc, 0x2000);
        assert_eq!(bridge.status(), RunStatus::Exited);
        Ok(())
    }

    /// A write-port byte differing from the expectation raises a
    /// VerificationMismatch citing offset, expected and observed values.
    #[test]
    fn test_scenario_write_port_mismatch() {
        let op = ScriptedOp::vector_arith(0x3000, 0x5700_0057, 1, &[(0, 0x42)]);
        let reference = ScriptedReference::new(vec![op]);
        let mut bridge = Bridge::new(fast_config(), reference);
        bridge.tick().unwrap();

        let err = bridge.vrf_write(&vrf_beat(1, 0, &[0x43])).unwrap_err();
        match err {
            BridgeError::VerificationMismatch { pc, offset, expected, observed, .. } => {
                assert_eq!(pc, 0x3000);
                assert_eq!(offset, 128); // reg 1, byte 0, default stride
                assert_eq!(expected, 0x42);
                assert_eq!(observed, 0x43);
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    /// Queue filled to capacity 10 then drained one commit at a time; the
    /// pc sequence popped from the tail preserves program order.
    #[test]
    fn test_scenario_program_order_preserved() -> anyhow::Result<()> {
        let ops: Vec<_> = (0..10u32)
            .map(|i| ScriptedOp::vector_arith(0x4000 + i * 4, 0x5700_0057, 0, &[(i, i as u8 + 1)]))
            .collect();
        let reference = ScriptedReference::new(ops);
        let config = BridgeConfig {
            queue_capacity: 10,
            ..fast_config()
        };
        let mut bridge = Bridge::new(config, reference);

        bridge.tick()?;
        assert_eq!(bridge.queue().len(), 10);

        let mut retired = Vec::new();
        for i in 0..10u32 {
            // Each op owns one distinct register byte; satisfy it first.
            let value = i as u8 + 1;
            bridge.vrf_write(&vrf_beat(0, i, &[value]))?;
            let popped = bridge.commit(&pulse(0x4000 + i * 4))?;
            retired.extend(popped.into_iter().map(|e| e.pc));
            bridge.tick()?;
        }

        let expected: Vec<u32> = (0..10).map(|i| 0x4000 + i * 4).collect();
        assert_eq!(retired, expected);
        assert_eq!(bridge.status(), RunStatus::Exited);
        Ok(())
    }

    /// A full store round trip: issue, burst write over the bus, ack,
    /// commit.
    #[test]
    fn test_store_round_trip_over_bus() -> anyhow::Result<()> {
        crate::testing::init_logging();
        let bytes: Vec<u8> = (1..=16).collect();
        let op = ScriptedOp::vector_store(0x5000, 0x0205_8027, 0x8000, &bytes);
        let reference = ScriptedReference::new(vec![op]);
        let mut bridge = Bridge::new(fast_config(), reference);

        bridge.tick()?;
        bridge.issue_fired(Some(1))?;

        for half in 0..2u32 {
            let base = 0x8000 + half * 8;
            let beat = RequestBeat {
                address: base,
                opcode: OP_WRITE_FULL,
                size: 16,
                source: 1,
                mask: 0xFF,
                data: SmallVec::from_slice(&bytes[(half * 8) as usize..(half * 8 + 8) as usize]),
            };
            bridge.request_beat(0, &beat)?;
            bridge.tick()?;
        }
        bridge.tick()?;

        let ack = bridge.next_response(0).expect("write acknowledged");
        assert_eq!(ack.opcode, BusOpcode::WriteFull);
        bridge.response_fired(0);

        let popped = bridge.commit(&pulse(0x5000))?;
        assert_eq!(popped.len(), 1);
        assert_eq!(bridge.status(), RunStatus::Exited);
        Ok(())
    }

    /// No commit for `timeout` cycles raises Timeout exactly once.
    #[test]
    fn test_scenario_timeout_fires_once() {
        let reference = ScriptedReference::new(Vec::new());
        let config = BridgeConfig {
            timeout_cycles: 10,
            ..fast_config()
        };
        let mut bridge = Bridge::new(config, reference);

        let mut errors = 0;
        for _ in 0..20 {
            if let Err(e) = bridge.tick() {
                assert!(matches!(e, BridgeError::Timeout { timeout: 10, .. }));
                errors += 1;
            }
        }
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_issue_without_pending_event_is_fatal() {
        let reference = ScriptedReference::new(Vec::new());
        let mut bridge = Bridge::new(fast_config(), reference);
        bridge.tick().unwrap();

        assert!(bridge.issue_slot().is_none());
        let err = bridge.issue_fired(None).unwrap_err();
        assert!(matches!(err, BridgeError::QueueInvariantViolation { .. }));
    }
}
