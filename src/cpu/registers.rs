//! CPU registers and flags.
//!
//! The machine has:
//! - AX, BX, CX, DX: four 8-bit general purpose registers
//! - ACC: 8-bit accumulator, the implicit operand of most ALU instructions
//! - PC: 8-bit program counter (wraps at 256)
//! - CT: single-slot return address written by CALL
//! - CF, ZF, SF, PF: carry, zero, sign and parity flags

use serde::{Serialize, Deserialize};

/// General purpose register selector (two bits in the instruction byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reg {
    Ax,
    Bx,
    Cx,
    Dx,
}

impl Reg {
    /// All registers in encoding order.
    pub const ALL: [Reg; 4] = [Reg::Ax, Reg::Bx, Reg::Cx, Reg::Dx];

    /// Decode from the low two bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        Self::ALL[usize::from(bits & 0x3)]
    }

    /// Encode as a two-bit field.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Assembly name of the register.
    pub fn name(self) -> &'static str {
        match self {
            Reg::Ax => "AX",
            Reg::Bx => "BX",
            Reg::Cx => "CX",
            Reg::Dx => "DX",
        }
    }
}

/// Flag selector used by the conditional jump family.
///
/// Encoding order is CF, SF, ZF, PF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    Carry,
    Sign,
    Zero,
    Parity,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::Carry, Flag::Sign, Flag::Zero, Flag::Parity];

    /// Decode from the low two bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        Self::ALL[usize::from(bits & 0x3)]
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Flag::Carry => "CF",
            Flag::Sign => "SF",
            Flag::Zero => "ZF",
            Flag::Parity => "PF",
        }
    }
}

/// The four status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub cf: bool,
    pub zf: bool,
    pub sf: bool,
    pub pf: bool,
}

impl Flags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Carry => self.cf,
            Flag::Sign => self.sf,
            Flag::Zero => self.zf,
            Flag::Parity => self.pf,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Carry => self.cf = value,
            Flag::Sign => self.sf = value,
            Flag::Zero => self.zf = value,
            Flag::Parity => self.pf = value,
        }
    }
}

/// The register file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// AX, BX, CX, DX in encoding order.
    pub gp: [u8; 4],

    /// Accumulator.
    pub acc: u8,

    /// Program counter: address of the next byte to fetch.
    pub pc: u8,

    /// Call target: return address saved by the most recent CALL.
    pub ct: u8,

    /// Status flags.
    pub flags: Flags,
}

impl Registers {
    /// Create a register file with all values zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every register and flag to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Read a general purpose register.
    #[inline]
    pub fn get(&self, reg: Reg) -> u8 {
        self.gp[usize::from(reg.bits())]
    }

    /// Write a general purpose register.
    #[inline]
    pub fn set(&mut self, reg: Reg, value: u8) {
        self.gp[usize::from(reg.bits())] = value;
    }

    /// Increment the program counter by 1, wrapping at 256.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> u8 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// Set the program counter to an absolute address.
    pub fn jump(&mut self, addr: u8) {
        self.pc = addr;
    }
}
