//! CPU emulation.
//!
//! This module implements the complete machine:
//! - 256 byte cells: 128 program cells followed by 128 data cells
//! - registers AX..DX, the accumulator, PC and the CALL return slot CT
//! - 16 opcode families selected by the high nibble of each instruction byte

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod runner;

pub use memory::{Memory, MemoryError};
pub use registers::{Flag, Flags, Reg, Registers};
pub use decode::{Instruction, LogicOp, MovSource, AccSource, StoreTarget};
pub use execute::{Cpu, CpuError, CpuSnapshot, CpuState, Step};
pub use runner::{CancelToken, FreeRun, Stopped};
