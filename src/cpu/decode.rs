//! Instruction decoder.
//!
//! Every instruction starts with one opcode byte. The high nibble selects
//! one of 16 families, the low nibble carries register selectors, variant
//! bits or flag selectors. Some instructions take one more byte (immediate
//! value or address) which is fetched at execution time, see
//! [`Instruction::operand_len`].
//!
//! Decoding is total: every one of the 256 byte values maps to an
//! [`Instruction`]. Families without a defined body decode to
//! [`Instruction::Reserved`].

use crate::cpu::registers::{Flag, Reg};
use serde::{Serialize, Deserialize};

/// Source kind for `MOV Rd, src` (family 0x1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovSource {
    /// Next byte is the value.
    Immediate,
    /// Next byte is a data address.
    Memory,
    /// Copy of ACC.
    Acc,
    /// Copy of PC as it stands after the opcode fetch.
    Pc,
}

impl MovSource {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => MovSource::Immediate,
            1 => MovSource::Memory,
            2 => MovSource::Acc,
            _ => MovSource::Pc,
        }
    }

    fn bits(self) -> u8 {
        match self {
            MovSource::Immediate => 0,
            MovSource::Memory => 1,
            MovSource::Acc => 2,
            MovSource::Pc => 3,
        }
    }
}

/// Source kind for `MOV ACC, src` (family 0x3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccSource {
    Immediate,
    Memory,
}

/// Destination of `MOV dst, Rs` (family 0x2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreTarget {
    /// Next byte is a data address receiving the register.
    Memory,
    /// ACC receives the register. Never produced by [`decode`].
    Acc,
}

/// Destination selector wired into family 0x2.
///
/// The selector is fixed: the instruction byte has no bits for it, so the
/// `Acc` branch of the executor is unreachable from program bytes.
pub const STORE_TARGET: StoreTarget = StoreTarget::Memory;

/// Boolean operation for family 0x8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicOp {
    And,
    Or,
    /// Unary, the source register is ignored.
    Not,
    Xor,
}

impl LogicOp {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => LogicOp::And,
            1 => LogicOp::Or,
            2 => LogicOp::Not,
            _ => LogicOp::Xor,
        }
    }

    fn bits(self) -> u8 {
        match self {
            LogicOp::And => 0,
            LogicOp::Or => 1,
            LogicOp::Not => 2,
            LogicOp::Xor => 3,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
            LogicOp::Not => "NOT",
            LogicOp::Xor => "XOR",
        }
    }
}

/// Decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Data Transfer ====================

    /// 0x0 `MOV Rd, Rs`
    MovReg { dst: Reg, src: Reg },

    /// 0x1 `MOV Rd, src`
    MovLoad { dst: Reg, src: MovSource },

    /// 0x2 `MOV [addr], Rs`
    MovStore { src: Reg, target: StoreTarget },

    /// 0x3 `MOV ACC, src`
    MovAcc { src: AccSource },

    /// 0xD `XCHG ACC, Rn`
    Xchg { reg: Reg },

    // ==================== Arithmetic / Logic ====================

    /// 0x4 `INC Rn`
    IncReg { reg: Reg },

    /// 0x4 `DEC Rn`
    DecReg { reg: Reg },

    /// 0x6 `INC ACC`
    IncAcc,

    /// 0x6 `DEC ACC`
    DecAcc,

    /// 0x7 `CLR ACC`
    ClearAcc,

    /// 0x8 `op ACC, Rn`
    Logic { op: LogicOp, src: Reg },

    // ==================== Control Flow ====================

    /// 0x5 conditional jump to the absolute address in the next byte.
    ///
    /// Taken when `(flag == polarity) != direct`.
    Jump { flag: Flag, polarity: bool, direct: bool },

    /// 0xC `CALL addr`
    Call,

    /// 0xC `RET`
    Ret,

    // ==================== Flags / Machine ====================

    /// 0xE set or clear a flag. Only CF and ZF are encodable.
    SetFlag { flag: Flag, value: bool },

    /// 0xF full engine reset.
    Reset,

    /// Families 0x9, 0xA and 0xB have no defined behavior and execute as
    /// no-ops. Holds the whole opcode byte.
    Reserved { opcode: u8 },
}

impl Instruction {
    /// Number of operand bytes fetched after the opcode byte.
    pub fn operand_len(&self) -> u8 {
        match self {
            Instruction::MovLoad { src: MovSource::Immediate | MovSource::Memory, .. } => 1,
            Instruction::MovStore { target: StoreTarget::Memory, .. } => 1,
            Instruction::MovAcc { .. } => 1,
            Instruction::Jump { .. } => 1,
            Instruction::Call => 1,
            _ => 0,
        }
    }

    /// Opcode family (high nibble).
    pub fn family(&self) -> u8 {
        encode(self) >> 4
    }

    /// Whether the instruction has no defined behavior.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Instruction::Reserved { .. })
    }
}

/// Opcode family values (high nibble).
mod family {
    pub const MOV_REG: u8 = 0x0;
    pub const MOV_LOAD: u8 = 0x1;
    pub const MOV_STORE: u8 = 0x2;
    pub const MOV_ACC: u8 = 0x3;
    pub const INC_DEC_REG: u8 = 0x4;
    pub const JUMP: u8 = 0x5;
    pub const INC_DEC_ACC: u8 = 0x6;
    pub const CLEAR_ACC: u8 = 0x7;
    pub const LOGIC_REG: u8 = 0x8;
    pub const ARITH_REG: u8 = 0x9;
    pub const LOGIC_IMM: u8 = 0xA;
    pub const ARITH_IMM: u8 = 0xB;
    pub const CALL_RET: u8 = 0xC;
    pub const XCHG: u8 = 0xD;
    pub const SET_FLAG: u8 = 0xE;
    pub const RESET: u8 = 0xF;
}

/// Decode an opcode byte.
///
/// Bits not listed for a family are ignored.
pub fn decode(byte: u8) -> Instruction {
    let high = byte >> 4;
    let low = byte & 0x0F;
    let bit = |n: u8| low & (1 << n) != 0;

    match high {
        family::MOV_REG => Instruction::MovReg {
            dst: Reg::from_bits(low >> 2),
            src: Reg::from_bits(low),
        },
        family::MOV_LOAD => Instruction::MovLoad {
            dst: Reg::from_bits(low >> 2),
            src: MovSource::from_bits(low),
        },
        family::MOV_STORE => Instruction::MovStore {
            src: Reg::from_bits(low),
            target: STORE_TARGET,
        },
        family::MOV_ACC => Instruction::MovAcc {
            src: if bit(0) { AccSource::Memory } else { AccSource::Immediate },
        },
        family::INC_DEC_REG => {
            let reg = Reg::from_bits(low);
            if bit(2) {
                Instruction::DecReg { reg }
            } else {
                Instruction::IncReg { reg }
            }
        }
        family::JUMP => Instruction::Jump {
            flag: Flag::from_bits(low),
            polarity: bit(2),
            direct: bit(3),
        },
        family::INC_DEC_ACC => {
            if bit(0) {
                Instruction::IncAcc
            } else {
                Instruction::DecAcc
            }
        }
        family::CLEAR_ACC => Instruction::ClearAcc,
        family::LOGIC_REG => Instruction::Logic {
            op: LogicOp::from_bits(low >> 2),
            src: Reg::from_bits(low),
        },
        family::ARITH_REG | family::LOGIC_IMM | family::ARITH_IMM => {
            Instruction::Reserved { opcode: byte }
        }
        family::CALL_RET => {
            if bit(0) {
                Instruction::Call
            } else {
                Instruction::Ret
            }
        }
        family::XCHG => Instruction::Xchg {
            reg: Reg::from_bits(low),
        },
        family::SET_FLAG => Instruction::SetFlag {
            flag: if bit(1) { Flag::Zero } else { Flag::Carry },
            value: bit(0),
        },
        _ => Instruction::Reset,
    }
}

/// Encode an instruction back to its opcode byte.
///
/// Ignored bits are left clear. `StoreTarget::Acc` and flags other than
/// CF/ZF have no encoding of their own and come out as the memory store
/// and CF forms respectively.
pub fn encode(instr: &Instruction) -> u8 {
    let (high, low): (u8, u8) = match *instr {
        Instruction::MovReg { dst, src } => (family::MOV_REG, dst.bits() << 2 | src.bits()),
        Instruction::MovLoad { dst, src } => (family::MOV_LOAD, dst.bits() << 2 | src.bits()),
        Instruction::MovStore { src, .. } => (family::MOV_STORE, src.bits()),
        Instruction::MovAcc { src } => (family::MOV_ACC, (src == AccSource::Memory) as u8),
        Instruction::IncReg { reg } => (family::INC_DEC_REG, reg.bits()),
        Instruction::DecReg { reg } => (family::INC_DEC_REG, 0x4 | reg.bits()),
        Instruction::Jump { flag, polarity, direct } => {
            (family::JUMP, (direct as u8) << 3 | (polarity as u8) << 2 | flag.bits())
        }
        Instruction::IncAcc => (family::INC_DEC_ACC, 0x1),
        Instruction::DecAcc => (family::INC_DEC_ACC, 0x0),
        Instruction::ClearAcc => (family::CLEAR_ACC, 0),
        Instruction::Logic { op, src } => (family::LOGIC_REG, op.bits() << 2 | src.bits()),
        Instruction::Reserved { opcode } => (opcode >> 4, opcode & 0x0F),
        Instruction::Call => (family::CALL_RET, 0x1),
        Instruction::Ret => (family::CALL_RET, 0x0),
        Instruction::Xchg { reg } => (family::XCHG, reg.bits()),
        Instruction::SetFlag { flag, value } => {
            (family::SET_FLAG, ((flag == Flag::Zero) as u8) << 1 | value as u8)
        }
        Instruction::Reset => (family::RESET, 0),
    };

    high << 4 | low
}
