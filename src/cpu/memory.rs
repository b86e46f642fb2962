//! Partitioned memory subsystem.
//!
//! 256 byte cells split in two halves: the low half holds the program
//! ("ROM") and is only writable through [`Memory::force_write`], the high
//! half is data ("RAM") and accepts ordinary writes.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Total number of addressable cells.
pub const MEMORY_SIZE: usize = 256;

/// Size of the program partition `[0, 128)`.
pub const PROGRAM_SIZE: usize = 128;

/// First address of the data partition `[128, 256)`.
pub const DATA_BASE: u8 = 0x80;

/// Byte-addressable memory: 128 program cells followed by 128 data cells.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMemory")]
pub struct Memory {
    cells: Vec<u8>,
}

/// Serialized form, checked for length before it becomes a [`Memory`].
#[derive(Deserialize)]
struct RawMemory {
    cells: Vec<u8>,
}

impl TryFrom<RawMemory> for Memory {
    type Error = MemoryError;

    fn try_from(raw: RawMemory) -> Result<Self, Self::Error> {
        if raw.cells.len() != MEMORY_SIZE {
            return Err(MemoryError::SizeMismatch {
                size: raw.cells.len(),
                expected: MEMORY_SIZE,
            });
        }
        Ok(Self { cells: raw.cells })
    }
}

impl Memory {
    /// Create a memory with every cell zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    /// Create a memory whose program partition starts with `image`.
    ///
    /// Cells not covered by the image start at zero.
    pub fn from_program(image: &[u8]) -> Result<Self, MemoryError> {
        let mut mem = Self::new();
        mem.load_program(image)?;
        Ok(mem)
    }

    /// Read any cell, program or data.
    #[inline]
    pub fn read(&self, addr: u8) -> Result<u8, MemoryError> {
        let index = Self::index(addr)?;
        Ok(self.cells[index])
    }

    /// Write a data cell. The program partition is rejected.
    pub fn write(&mut self, addr: u8, value: u8) -> Result<(), MemoryError> {
        let index = Self::index(addr)?;
        if index < PROGRAM_SIZE {
            return Err(MemoryError::ProtectedRegion(addr));
        }
        self.cells[index] = value;
        Ok(())
    }

    /// Write any cell, including the program partition.
    ///
    /// This is the memory-editor path: instruction execution never goes
    /// through here.
    pub fn force_write(&mut self, addr: u8, value: u8) -> Result<(), MemoryError> {
        let index = Self::index(addr)?;
        self.cells[index] = value;
        Ok(())
    }

    /// Zero the data partition, or the whole space when `clear_program` is set.
    pub fn reset(&mut self, clear_program: bool) {
        let start = if clear_program { 0 } else { PROGRAM_SIZE };
        self.cells[start..].fill(0);
    }

    /// Replace the program partition with `image`, zero-filling the rest of it.
    ///
    /// The data partition is left alone.
    pub fn load_program(&mut self, image: &[u8]) -> Result<(), MemoryError> {
        if image.len() > PROGRAM_SIZE {
            return Err(MemoryError::ProgramTooLarge {
                size: image.len(),
                max: PROGRAM_SIZE,
            });
        }

        self.cells[..PROGRAM_SIZE].fill(0);
        self.cells[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Map an 8-bit operand onto the data partition.
    ///
    /// The low 7 bits select the cell, offset from [`DATA_BASE`].
    #[inline]
    pub fn data_address(operand: u8) -> u8 {
        DATA_BASE | (operand & 0x7F)
    }

    /// The program partition as a slice.
    pub fn program(&self) -> &[u8] {
        &self.cells[..PROGRAM_SIZE]
    }

    /// The data partition as a slice.
    pub fn data(&self) -> &[u8] {
        &self.cells[PROGRAM_SIZE..]
    }

    /// Dump memory contents (for debugging).
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, u8)> {
        let start = start.min(MEMORY_SIZE);
        let end = start.saturating_add(count).min(MEMORY_SIZE);
        (start..end)
            .map(|i| (i, self.cells[i]))
            .collect()
    }

    // Unreachable for u8 addresses; guards a wider address type.
    fn index(addr: u8) -> Result<usize, MemoryError> {
        let index = usize::from(addr);
        if index >= MEMORY_SIZE {
            return Err(MemoryError::OutOfRange(index));
        }
        Ok(index)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only count non-zero cells
        let program = self.program().iter().filter(|&&b| b != 0).count();
        let data = self.data().iter().filter(|&&b| b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_program_cells", &program)
            .field("non_zero_data_cells", &data)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Address is outside `[0, 256)`.
    #[error("memory address {0} out of range (0-255)")]
    OutOfRange(usize),

    /// Restricted write aimed at the program partition.
    #[error("address {0:#04x} is in the protected program region")]
    ProtectedRegion(u8),

    /// Program image does not fit the program partition.
    #[error("program size {size} exceeds program region of {max} bytes")]
    ProgramTooLarge { size: usize, max: usize },

    /// Deserialized memory does not have exactly 256 cells.
    #[error("memory has {size} cells, expected {expected}")]
    SizeMismatch { size: usize, expected: usize },
}
