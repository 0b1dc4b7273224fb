//! A scripted reference model for tests.

use std::collections::{BTreeMap, VecDeque};

use crate::reference::{
    CsrSnapshot, DecodedEffect, EffectClass, MemFootprint, ReferenceModel,
};

/// Flat VRF stride used by the scripted model; matches the default
/// `vrf_bytes_per_register` configuration.
pub const VRF_STRIDE: u32 = 128;

/// One scripted instruction and the effects it replays.
#[derive(Debug, Clone)]
pub struct ScriptedOp {
    /// Program counter.
    pub pc: u32,
    /// Raw instruction encoding.
    pub insn: u32,
    /// Whether the bridge should track this instruction.
    pub tracked: bool,
    /// Effect classification (tracked ops only).
    pub class: EffectClass,
    /// Scalar operands at decode time.
    pub rs1: u32,
    /// Second scalar operand.
    pub rs2: u32,
    /// Vector CSR snapshot at decode time.
    pub csr: CsrSnapshot,
    /// Scalar destination register, if the op writes one back.
    pub scalar_rd: Option<u8>,
    /// Value the scalar destination receives.
    pub scalar_value: u32,
    /// Destination vector register.
    pub vd: u8,
    /// VRF bytes written on execute, `(offset within vd, value)`.
    pub vrf_writes: Vec<(u32, u8)>,
    /// Memory footprint base (loads and stores).
    pub mem_base: u32,
    /// Memory footprint length.
    pub mem_len: u32,
    /// Bytes stored at `mem_base..` on execute (stores only).
    pub mem_bytes: Vec<u8>,
    /// The op traps instead of completing normally.
    pub is_trap: bool,
    /// Completion is signalled by a scalar write-back.
    pub is_multicycle: bool,
}

impl ScriptedOp {
    fn base(pc: u32, insn: u32, class: EffectClass) -> Self {
        Self {
            pc,
            insn,
            tracked: true,
            class,
            rs1: 0,
            rs2: 0,
            csr: CsrSnapshot::default(),
            scalar_rd: None,
            scalar_value: 0,
            vd: 0,
            vrf_writes: Vec::new(),
            mem_base: 0,
            mem_len: 0,
            mem_bytes: Vec::new(),
            is_trap: false,
            is_multicycle: false,
        }
    }

    /// An instruction outside the tracked class; executed internally.
    pub fn untracked(pc: u32) -> Self {
        Self {
            tracked: false,
            ..Self::base(pc, 0x0000_0013, EffectClass::VectorArith)
        }
    }

    /// A vector arithmetic op writing `writes` bytes of register `vd`.
    pub fn vector_arith(pc: u32, insn: u32, vd: u8, writes: &[(u32, u8)]) -> Self {
        Self {
            vd,
            vrf_writes: writes.to_vec(),
            ..Self::base(pc, insn, EffectClass::VectorArith)
        }
    }

    /// A vector store of `bytes` to `addr`.
    pub fn vector_store(pc: u32, insn: u32, addr: u32, bytes: &[u8]) -> Self {
        Self {
            mem_base: addr,
            mem_len: bytes.len() as u32,
            mem_bytes: bytes.to_vec(),
            ..Self::base(pc, insn, EffectClass::VectorStore)
        }
    }

    /// A vector load of `len` bytes from `addr` into register 0. Set
    /// `vrf_writes` to declare the bytes that land in the register file.
    pub fn vector_load(pc: u32, insn: u32, addr: u32, len: u32) -> Self {
        Self {
            mem_base: addr,
            mem_len: len,
            ..Self::base(pc, insn, EffectClass::VectorLoad)
        }
    }
}

/// Replays a fixed instruction sequence through the [`ReferenceModel`]
/// surface.
#[derive(Debug)]
pub struct ScriptedReference {
    ops: VecDeque<ScriptedOp>,
    /// Decoded tracked op awaiting `commit_step()`.
    pending: Option<ScriptedOp>,
    mem: BTreeMap<u32, u8>,
    scalars: [u32; 32],
    vrf: BTreeMap<u32, u8>,
    trap_vector: u32,
}

impl ScriptedReference {
    /// Create a model that will replay `ops` in order.
    pub fn new(ops: Vec<ScriptedOp>) -> Self {
        Self {
            ops: ops.into(),
            pending: None,
            mem: BTreeMap::new(),
            scalars: [0; 32],
            vrf: BTreeMap::new(),
            trap_vector: 0x100,
        }
    }

    /// Override the architectural trap-entry address.
    pub fn with_trap_vector(mut self, trap_vector: u32) -> Self {
        self.trap_vector = trap_vector;
        self
    }

    /// Seed one byte of reference memory.
    pub fn poke_mem(&mut self, addr: u32, value: u8) {
        self.mem.insert(addr, value);
    }

    /// Seed a scalar register.
    pub fn poke_scalar(&mut self, reg: u8, value: u32) {
        self.scalars[reg as usize] = value;
    }

    /// Seed one byte of the flat vector register file.
    pub fn poke_vrf(&mut self, offset: u32, value: u8) {
        self.vrf.insert(offset, value);
    }

    fn apply(&mut self, op: &ScriptedOp) {
        if let Some(rd) = op.scalar_rd {
            self.scalars[rd as usize] = op.scalar_value;
        }
        for (offset, value) in &op.vrf_writes {
            self.vrf.insert(op.vd as u32 * VRF_STRIDE + offset, *value);
        }
        for (i, byte) in op.mem_bytes.iter().enumerate() {
            self.mem.insert(op.mem_base + i as u32, *byte);
        }
    }
}

impl ReferenceModel for ScriptedReference {
    fn step(&mut self) -> Option<DecodedEffect> {
        assert!(
            self.pending.is_none(),
            "step() called with a tracked instruction still pending"
        );
        let op = self.ops.pop_front()?;
        if !op.tracked {
            self.apply(&op);
            return None;
        }

        let effect = DecodedEffect {
            pc: op.pc,
            insn: op.insn,
            class: op.class,
            rs1: op.rs1,
            rs2: op.rs2,
            csr: op.csr,
            scalar_rd: op.scalar_rd,
            vrf_range: match op.class {
                EffectClass::VectorStore => None,
                _ => Some((op.vd as u32 * VRF_STRIDE, VRF_STRIDE)),
            },
            mem_footprint: match op.class {
                EffectClass::VectorArith => None,
                _ => Some(MemFootprint { base: op.mem_base, len: op.mem_len }),
            },
            is_trap: op.is_trap,
            is_multicycle: op.is_multicycle,
        };
        self.pending = Some(op);
        Some(effect)
    }

    fn commit_step(&mut self) {
        let op = self
            .pending
            .take()
            .expect("commit_step() without a pending tracked instruction");
        self.apply(&op);
    }

    fn read_mem(&self, addr: u32) -> u8 {
        self.mem.get(&addr).copied().unwrap_or(0)
    }

    fn read_scalar(&self, reg: u8) -> u32 {
        self.scalars[reg as usize]
    }

    fn vrf_byte(&self, offset: u32) -> u8 {
        self.vrf.get(&offset).copied().unwrap_or(0)
    }

    fn trap_vector(&self) -> u32 {
        self.trap_vector
    }

    fn exited(&self) -> bool {
        self.ops.is_empty() && self.pending.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_decode_then_commit() {
        let op = ScriptedOp::vector_store(0x1000, 0x0205_8027, 0x2000, &[0xAA]);
        let mut reference = ScriptedReference::new(vec![op]);

        let effect = reference.step().expect("tracked op decodes");
        assert_eq!(effect.pc, 0x1000);
        // Not yet executed: memory still holds the old value.
        assert_eq!(reference.read_mem(0x2000), 0x00);

        reference.commit_step();
        assert_eq!(reference.read_mem(0x2000), 0xAA);
        assert!(reference.exited());
    }

    #[test]
    fn test_untracked_applied_internally() {
        let mut op = ScriptedOp::untracked(0x1000);
        op.scalar_rd = Some(5);
        op.scalar_value = 77;
        let mut reference = ScriptedReference::new(vec![op]);

        assert!(reference.step().is_none());
        assert_eq!(reference.read_scalar(5), 77);
        assert!(reference.exited());
    }

    #[test]
    fn test_vrf_writes_land_at_register_stride() {
        let op = ScriptedOp::vector_arith(0x1000, 0x5700_0057, 3, &[(2, 0xCC)]);
        let mut reference = ScriptedReference::new(vec![op]);
        reference.step().unwrap();
        reference.commit_step();
        assert_eq!(reference.vrf_byte(3 * VRF_STRIDE + 2), 0xCC);
    }
}
