//! Instruction encoding
//!
//! Programs are kept as decoded [`Instruction`]s. A 64-bit immediate load
//! occupies two raw 8-byte slots but is a single `Instruction`, so an
//! instruction index is not a raw slot index.
//!
//! Only the handful of opcodes the loader has to recognize get names here;
//! every other opcode round-trips untouched.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use static_assertions::const_assert_eq;

use crate::error::SpecError;
use crate::spec::Endianness;

/// Size of one raw instruction slot in bytes.
pub const INSN_SIZE: usize = 8;

/// Helper id of `bpf_tail_call`.
pub const FN_TAIL_CALL: i64 = 12;

// Instruction classes (low 3 bits of the opcode)
pub const CLASS_LD: u8 = 0x00;
pub const CLASS_ALU: u8 = 0x04;
pub const CLASS_JMP: u8 = 0x05;
pub const CLASS_ALU64: u8 = 0x07;

// Operation field (high 4 bits)
pub const OP_MOV: u8 = 0xb0;
pub const OP_CALL: u8 = 0x80;
pub const OP_EXIT: u8 = 0x90;

// Operand source
pub const SRC_K: u8 = 0x00;
pub const SRC_X: u8 = 0x08;

// Load mode and size
pub const MODE_IMM: u8 = 0x00;
pub const SIZE_DW: u8 = 0x18;

/// An instruction opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode(pub u8);

impl OpCode {
    /// `lddw`: load a 64-bit immediate.
    pub const LOAD_IMM_DW: OpCode = OpCode(CLASS_LD | MODE_IMM | SIZE_DW);
    /// `mov64 dst, imm`
    pub const MOV64_IMM: OpCode = OpCode(CLASS_ALU64 | OP_MOV | SRC_K);
    /// `mov64 dst, src`
    pub const MOV64_REG: OpCode = OpCode(CLASS_ALU64 | OP_MOV | SRC_X);
    /// `call imm`
    pub const CALL: OpCode = OpCode(CLASS_JMP | OP_CALL);
    /// `exit`
    pub const EXIT: OpCode = OpCode(CLASS_JMP | OP_EXIT);

    pub fn class(self) -> u8 {
        self.0 & 0x07
    }

    pub fn is_alu(self) -> bool {
        matches!(self.class(), CLASS_ALU | CLASS_ALU64)
    }

    /// Returns true for a 32- or 64-bit `mov`, whatever its operand source.
    pub fn is_mov(self) -> bool {
        self.is_alu() && self.0 & 0xf0 == OP_MOV
    }

    /// Returns true if the second operand is the immediate rather than a
    /// register.
    pub fn is_imm_source(self) -> bool {
        self.0 & SRC_X == SRC_K
    }
}

const_assert_eq!(OpCode::LOAD_IMM_DW.0, 0x18);
const_assert_eq!(OpCode::MOV64_IMM.0, 0xb7);
const_assert_eq!(OpCode::CALL.0, 0x85);

/// A register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(pub u8);

impl Register {
    pub const R0: Register = Register(0);
    pub const R1: Register = Register(1);
    pub const R2: Register = Register(2);
    pub const R3: Register = Register(3);
    pub const R4: Register = Register(4);
    pub const R5: Register = Register(5);
    pub const R6: Register = Register(6);
    pub const R7: Register = Register(7);
    pub const R8: Register = Register(8);
    pub const R9: Register = Register(9);
    pub const R10: Register = Register(10);

    /// Source register of a `lddw` whose immediate is a map file descriptor.
    pub const PSEUDO_MAP_FD: Register = Register(1);
    /// Source register of a `call` to a helper function.
    pub const PSEUDO_HELPER: Register = Register(0);
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub dst: Register,
    pub src: Register,
    pub offset: i16,
    pub constant: i64,
    /// Symbol this instruction was relocated against, e.g. a map name.
    pub reference: Option<String>,
}

/// A program body.
pub type Instructions = Vec<Instruction>;

impl Instruction {
    pub fn new(opcode: OpCode, dst: Register, src: Register, offset: i16, constant: i64) -> Self {
        Self {
            opcode,
            dst,
            src,
            offset,
            constant,
            reference: None,
        }
    }

    /// `lddw dst, <map>`, with the map left as a symbolic reference.
    pub fn load_map_ptr(dst: Register, map: impl Into<String>) -> Self {
        Self::new(OpCode::LOAD_IMM_DW, dst, Register::PSEUDO_MAP_FD, 0, 0).with_reference(map)
    }

    pub fn mov64_imm(dst: Register, value: i32) -> Self {
        Self::new(OpCode::MOV64_IMM, dst, Register::R0, 0, value as i64)
    }

    pub fn mov64_reg(dst: Register, src: Register) -> Self {
        Self::new(OpCode::MOV64_REG, dst, src, 0, 0)
    }

    /// Call to a helper function by id.
    pub fn call(helper: i64) -> Self {
        Self::new(OpCode::CALL, Register::R0, Register::PSEUDO_HELPER, 0, helper)
    }

    pub fn exit() -> Self {
        Self::new(OpCode::EXIT, Register::R0, Register::R0, 0, 0)
    }

    pub fn with_reference(mut self, symbol: impl Into<String>) -> Self {
        self.reference = Some(symbol.into());
        self
    }

    pub fn is_load_imm64(&self) -> bool {
        self.opcode == OpCode::LOAD_IMM_DW
    }

    /// Returns true for a call to a kernel helper (as opposed to a
    /// bpf-to-bpf or kfunc call).
    pub fn is_builtin_call(&self) -> bool {
        self.opcode == OpCode::CALL && self.src == Register::PSEUDO_HELPER
    }

    /// Number of raw 8-byte slots this instruction occupies.
    pub fn width(&self) -> usize {
        if self.is_load_imm64() { 2 } else { 1 }
    }
}

/// Decodes a raw instruction stream.
pub fn decode(raw: &[u8], order: Endianness) -> Result<Instructions, SpecError> {
    match order {
        Endianness::Little => decode_with::<LittleEndian>(raw, order),
        Endianness::Big => decode_with::<BigEndian>(raw, order),
    }
}

/// Encodes instructions into their raw form. Symbolic references are not
/// resolved; their immediates are written as they are.
pub fn encode(insns: &[Instruction], order: Endianness) -> Vec<u8> {
    match order {
        Endianness::Little => encode_with::<LittleEndian>(insns, order),
        Endianness::Big => encode_with::<BigEndian>(insns, order),
    }
}

fn decode_with<B: ByteOrder>(raw: &[u8], order: Endianness) -> Result<Instructions, SpecError> {
    let mut insns = Vec::with_capacity(raw.len() / INSN_SIZE);
    let mut off = 0;
    while off < raw.len() {
        let slot = raw
            .get(off..off + INSN_SIZE)
            .ok_or(SpecError::TruncatedInstruction(off))?;
        let (dst, src) = split_regs(slot[1], order);
        let mut insn = Instruction::new(
            OpCode(slot[0]),
            dst,
            src,
            B::read_i16(&slot[2..4]),
            B::read_i32(&slot[4..8]) as i64,
        );

        if insn.is_load_imm64() {
            let hi = raw
                .get(off + INSN_SIZE..off + 2 * INSN_SIZE)
                .ok_or(SpecError::IncompleteLoadImm64(off))?;
            let upper = B::read_u32(&hi[4..8]) as u64;
            let lower = B::read_u32(&slot[4..8]) as u64;
            insn.constant = ((upper << 32) | lower) as i64;
        }

        off += insn.width() * INSN_SIZE;
        insns.push(insn);
    }
    Ok(insns)
}

fn encode_with<B: ByteOrder>(insns: &[Instruction], order: Endianness) -> Vec<u8> {
    let mut raw = Vec::with_capacity(insns.len() * INSN_SIZE);
    for insn in insns {
        let mut slot = [0u8; INSN_SIZE];
        slot[0] = insn.opcode.0;
        slot[1] = join_regs(insn.dst, insn.src, order);
        B::write_i16(&mut slot[2..4], insn.offset);
        B::write_u32(&mut slot[4..8], insn.constant as u64 as u32);
        raw.extend_from_slice(&slot);

        if insn.is_load_imm64() {
            let mut hi = [0u8; INSN_SIZE];
            B::write_u32(&mut hi[4..8], ((insn.constant as u64) >> 32) as u32);
            raw.extend_from_slice(&hi);
        }
    }
    raw
}

fn split_regs(regs: u8, order: Endianness) -> (Register, Register) {
    match order {
        Endianness::Little => (Register(regs & 0x0f), Register(regs >> 4)),
        Endianness::Big => (Register(regs >> 4), Register(regs & 0x0f)),
    }
}

fn join_regs(dst: Register, src: Register, order: Endianness) -> u8 {
    match order {
        Endianness::Little => (src.0 << 4) | (dst.0 & 0x0f),
        Endianness::Big => (dst.0 << 4) | (src.0 & 0x0f),
    }
}
