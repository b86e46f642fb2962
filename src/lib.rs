//! # Nibble Emulator
//!
//! An instructional 8-bit CPU simulator.
//!
//! The machine has a single 256-byte address space split into a program
//! half and a data half, four general purpose registers, an accumulator
//! and 16 opcode families keyed on the high nibble of each instruction
//! byte. The engine only moves when its driver calls [`Cpu::step`].

pub mod cpu;
pub mod asm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuError, CpuSnapshot, CpuState, Instruction, Memory, MemoryError, Registers, Step};
pub use cpu::{CancelToken, FreeRun};
pub use asm::{disassemble, load_image, save_image, ImageError, ProgramImage};
