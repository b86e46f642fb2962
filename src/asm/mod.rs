//! Program images and disassembly.
//!
//! This module provides:
//! - Raw program image loading/saving (`.bin` files, at most 128 bytes)
//! - A disassembler (bytes → readable text)

pub mod disasm;
pub mod image;

pub use disasm::{disassemble, disassemble_instruction};
pub use image::{load_image, save_image, ImageError, ProgramImage};
