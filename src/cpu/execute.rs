//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//! One call to [`Cpu::step`] runs exactly one instruction; there is no run
//! loop of its own, the driver decides when to step.

use crate::cpu::{Memory, Registers};
use crate::cpu::decode::{self, AccSource, Instruction, LogicOp, MovSource, StoreTarget};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::{Flag, Reg};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// Not bound to a program: built with [`Cpu::idle`] or cleared by
    /// [`Cpu::full_reset`]. `step` is refused.
    Idle,
    /// A program is loaded; `step` may be called.
    Ready,
}

/// What a single step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Address the opcode byte was fetched from.
    pub address: u8,
    /// The raw opcode byte.
    pub opcode: u8,
    /// The decoded instruction.
    pub instruction: Instruction,
    /// Operand byte, for instructions that take one.
    pub operand: Option<u8>,
}

impl Step {
    /// Whether the step hit a reserved opcode and did nothing.
    pub fn was_ignored(&self) -> bool {
        self.instruction.is_reserved()
    }
}

/// Read-only view of the engine, as shown by a front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub ax: u8,
    pub bx: u8,
    pub cx: u8,
    pub dx: u8,
    pub acc: u8,
    pub pc: u8,
    pub ct: u8,
    /// Byte at PC, not yet fetched.
    pub ir: u8,
    pub cf: bool,
    pub zf: bool,
    pub sf: bool,
    pub pf: bool,
    pub steps: u64,
}

/// The CPU engine. Owns its memory.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    regs: Registers,
    mem: Memory,
    state: CpuState,
    /// Instruction count since the last reset.
    steps: u64,
    last_step: Option<Step>,
}

impl Cpu {
    /// Create an engine bound to `mem`, ready to step.
    pub fn new(mem: Memory) -> Self {
        Self {
            regs: Registers::new(),
            mem,
            state: CpuState::Ready,
            steps: 0,
            last_step: None,
        }
    }

    /// Create an engine over blank memory with no program.
    pub fn idle() -> Self {
        Self {
            state: CpuState::Idle,
            ..Self::new(Memory::new())
        }
    }

    /// Build memory from a program image and bind an engine to it.
    pub fn from_image(image: &[u8]) -> Result<Self, CpuError> {
        let mem = Memory::from_program(image)?;
        Ok(Self::new(mem))
    }

    /// Load a program image into this engine's memory and reset registers.
    ///
    /// The data partition is cleared as well.
    pub fn load_program(&mut self, image: &[u8]) -> Result<(), CpuError> {
        self.mem.load_program(image)?;
        self.reset();
        self.state = CpuState::Ready;
        debug!(len = image.len(), "program loaded");
        Ok(())
    }

    /// Zero registers, flags, PC and CT, and clear the data partition.
    ///
    /// The program partition is kept.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.reset(false);
        self.steps = 0;
        self.last_step = None;
        debug!("cpu reset");
    }

    /// Like [`Cpu::reset`] but also wipes the program. The engine goes
    /// back to [`CpuState::Idle`] until a new program is loaded.
    pub fn full_reset(&mut self) {
        self.reset();
        self.mem.reset(true);
        self.state = CpuState::Idle;
        debug!("cpu full reset");
    }

    /// Execute a single instruction.
    ///
    /// All operand bytes are fetched before any register or memory cell is
    /// written, so an error leaves the machine as it was.
    pub fn step(&mut self) -> Result<Step, CpuError> {
        if self.state != CpuState::Ready {
            return Err(CpuError::NotReady(self.state));
        }

        let saved_pc = self.regs.pc;
        let result = self.fetch_and_execute();
        if result.is_err() {
            self.regs.pc = saved_pc;
        }
        let step = result?;

        self.steps += 1;
        self.last_step = Some(step);
        Ok(step)
    }

    /// Run at most `max_steps` instructions.
    ///
    /// Returns the number of instructions executed.
    pub fn run_limited(&mut self, max_steps: u64) -> Result<u64, CpuError> {
        for done in 0..max_steps {
            if let Err(e) = self.step() {
                debug!(done, error = %e, "run stopped");
                return Err(e);
            }
        }
        Ok(max_steps)
    }

    fn fetch_and_execute(&mut self) -> Result<Step, CpuError> {
        // Fetch
        let address = self.regs.pc;
        let opcode = self.fetch()?;

        // Decode
        let instruction = decode::decode(opcode);

        // Operand (if any) is consumed before execution
        let operand = match instruction.operand_len() {
            0 => None,
            _ => Some(self.fetch()?),
        };

        trace!(pc = address, opcode, ?instruction, ?operand, "execute");

        // Execute
        self.execute(instruction, operand)?;

        Ok(Step {
            address,
            opcode,
            instruction,
            operand,
        })
    }

    /// Read the byte at PC and advance PC.
    fn fetch(&mut self) -> Result<u8, CpuError> {
        let byte = self.mem.read(self.regs.pc)?;
        self.regs.advance_pc();
        Ok(byte)
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction, operand: Option<u8>) -> Result<(), CpuError> {
        let operand = operand.unwrap_or_default();

        match instr {
            // ==================== Data Transfer ====================

            Instruction::MovReg { dst, src } => {
                let value = self.regs.get(src);
                self.regs.set(dst, value);
            }

            Instruction::MovLoad { dst, src } => {
                let value = match src {
                    MovSource::Immediate => operand,
                    MovSource::Memory => self.load_data(operand)?,
                    MovSource::Acc => self.regs.acc,
                    MovSource::Pc => self.regs.pc,
                };
                self.regs.set(dst, value);
            }

            Instruction::MovStore { src, target } => {
                let value = self.regs.get(src);
                match target {
                    StoreTarget::Memory => {
                        self.mem.write(Memory::data_address(operand), value)?;
                    }
                    // Unreachable from program bytes, see decode::STORE_TARGET
                    StoreTarget::Acc => self.regs.acc = value,
                }
            }

            Instruction::MovAcc { src } => {
                self.regs.acc = match src {
                    AccSource::Immediate => operand,
                    AccSource::Memory => self.load_data(operand)?,
                };
            }

            Instruction::Xchg { reg } => {
                let value = self.regs.get(reg);
                self.regs.set(reg, self.regs.acc);
                self.regs.acc = value;
            }

            // ==================== Arithmetic / Logic ====================

            Instruction::IncReg { reg } => {
                let value = self.regs.get(reg).wrapping_add(1);
                self.regs.set(reg, value);
            }

            Instruction::DecReg { reg } => {
                let value = self.regs.get(reg).wrapping_sub(1);
                self.regs.set(reg, value);
            }

            Instruction::IncAcc => self.regs.acc = self.regs.acc.wrapping_add(1),

            Instruction::DecAcc => self.regs.acc = self.regs.acc.wrapping_sub(1),

            Instruction::ClearAcc => self.regs.acc = 0,

            Instruction::Logic { op, src } => {
                let rhs = self.regs.get(src);
                let acc = self.regs.acc;
                self.regs.acc = match op {
                    LogicOp::And => acc & rhs,
                    LogicOp::Or => acc | rhs,
                    LogicOp::Not => !acc,
                    LogicOp::Xor => acc ^ rhs,
                };
            }

            // ==================== Control Flow ====================

            Instruction::Jump { flag, polarity, direct } => {
                if self.jump_taken(flag, polarity, direct) {
                    self.regs.jump(operand);
                }
            }

            Instruction::Call => {
                // PC already points past the target byte
                self.regs.ct = self.regs.pc;
                self.regs.jump(operand);
            }

            Instruction::Ret => {
                let ct = self.regs.ct;
                self.regs.jump(ct);
            }

            // ==================== Flags / Machine ====================

            Instruction::SetFlag { flag, value } => {
                self.regs.flags.set(flag, value);
            }

            Instruction::Reset => self.reset(),

            Instruction::Reserved { opcode } => {
                debug!(opcode, family = opcode >> 4, "ignoring reserved instruction");
            }
        }

        Ok(())
    }

    /// `(flag XNOR polarity) XOR direct`
    fn jump_taken(&self, flag: Flag, polarity: bool, direct: bool) -> bool {
        let flag_value = self.regs.flags.get(flag);
        (flag_value == polarity) != direct
    }

    /// Read the data cell selected by an address operand.
    fn load_data(&self, operand: u8) -> Result<u8, CpuError> {
        Ok(self.mem.read(Memory::data_address(operand))?)
    }

    // ==================== Accessors ====================

    pub fn ax(&self) -> u8 {
        self.regs.get(Reg::Ax)
    }

    pub fn bx(&self) -> u8 {
        self.regs.get(Reg::Bx)
    }

    pub fn cx(&self) -> u8 {
        self.regs.get(Reg::Cx)
    }

    pub fn dx(&self) -> u8 {
        self.regs.get(Reg::Dx)
    }

    /// Read a general purpose register by selector.
    pub fn reg(&self, reg: Reg) -> u8 {
        self.regs.get(reg)
    }

    pub fn acc(&self) -> u8 {
        self.regs.acc
    }

    pub fn pc(&self) -> u8 {
        self.regs.pc
    }

    pub fn ct(&self) -> u8 {
        self.regs.ct
    }

    /// The byte at PC, without advancing PC.
    pub fn ir(&self) -> Result<u8, CpuError> {
        Ok(self.mem.read(self.regs.pc)?)
    }

    pub fn cf(&self) -> bool {
        self.regs.flags.cf
    }

    pub fn zf(&self) -> bool {
        self.regs.flags.zf
    }

    pub fn sf(&self) -> bool {
        self.regs.flags.sf
    }

    pub fn pf(&self) -> bool {
        self.regs.flags.pf
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    /// Mutable memory access for the memory editor (`force_write`).
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Get the last executed step.
    pub fn last_step(&self) -> Option<Step> {
        self.last_step
    }

    /// Capture every register and flag at once.
    pub fn snapshot(&self) -> CpuSnapshot {
        let flags = self.regs.flags;
        CpuSnapshot {
            ax: self.ax(),
            bx: self.bx(),
            cx: self.cx(),
            dx: self.dx(),
            acc: self.regs.acc,
            pc: self.regs.pc,
            ct: self.regs.ct,
            // The 8-bit PC always lands inside memory
            ir: self.ir().unwrap_or_default(),
            cf: flags.cf,
            zf: flags.zf,
            sf: flags.sf,
            pf: flags.pf,
            steps: self.steps,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::idle()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not ready: {0:?}")]
    NotReady(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("free-run worker panicked")]
    WorkerPanicked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;

    fn cpu_with(program: &[u8]) -> Cpu {
        Cpu::from_image(program).unwrap()
    }

    #[test]
    fn test_idle_cpu_refuses_to_step() {
        let mut cpu = Cpu::idle();
        assert_eq!(cpu.step(), Err(CpuError::NotReady(CpuState::Idle)));
        assert_eq!(cpu.pc(), 0);
    }

    #[test]
    fn test_mov_register_to_register() {
        // MOV DX, BX
        let mut cpu = cpu_with(&[0x0D]);
        cpu.regs.set(Reg::Bx, 0x33);

        cpu.step().unwrap();
        assert_eq!(cpu.dx(), 0x33);
        assert_eq!(cpu.bx(), 0x33);
        assert_eq!(cpu.pc(), 1);
    }

    #[test]
    fn test_mov_load_sources() {
        // MOV BX, [0x05]; MOV CX, ACC; MOV DX, PC
        let mut cpu = cpu_with(&[0x15, 0x05, 0x1A, 0x1F]);
        cpu.mem.write(0x85, 0x77).unwrap();
        cpu.regs.acc = 0x12;

        cpu.step().unwrap();
        assert_eq!(cpu.bx(), 0x77);
        assert_eq!(cpu.pc(), 2);

        cpu.step().unwrap();
        assert_eq!(cpu.cx(), 0x12);

        cpu.step().unwrap();
        // PC after the opcode fetch
        assert_eq!(cpu.dx(), 4);
    }

    #[test]
    fn test_store_goes_to_data_partition() {
        // MOV [0x0F], CX with a program-looking address
        let mut cpu = cpu_with(&[0x22, 0x0F]);
        cpu.regs.set(Reg::Cx, 0xAB);

        let step = cpu.step().unwrap();
        assert_eq!(step.operand, Some(0x0F));
        assert_eq!(cpu.memory().read(0x8F).unwrap(), 0xAB);
        assert_eq!(cpu.memory().read(0x0F).unwrap(), 0);
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn test_store_acc_branch() {
        let mut cpu = cpu_with(&[]);
        cpu.regs.set(Reg::Bx, 0x5A);
        let instr = Instruction::MovStore { src: Reg::Bx, target: StoreTarget::Acc };

        cpu.execute(instr, None).unwrap();
        assert_eq!(cpu.acc(), 0x5A);
    }

    #[test]
    fn test_mov_acc_immediate_and_memory() {
        let mut cpu = cpu_with(&[0x30, 0x2A, 0x31, 0x90]);
        cpu.mem.write(0x90, 0x66).unwrap();

        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 0x2A);
        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 0x66);
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_inc_dec_wraps() {
        // INC AX; DEC BX; INC ACC; DEC ACC; DEC ACC
        let mut cpu = cpu_with(&[0x40, 0x45, 0x61, 0x60, 0x60]);
        cpu.regs.set(Reg::Ax, 0xFF);

        cpu.run_limited(2).unwrap();
        assert_eq!(cpu.ax(), 0x00);
        assert_eq!(cpu.bx(), 0xFF);

        cpu.run_limited(3).unwrap();
        assert_eq!(cpu.acc(), 0xFF);
        assert_eq!(cpu.registers().flags, crate::cpu::Flags::default());
    }

    #[test]
    fn test_clear_acc() {
        let mut cpu = cpu_with(&[0x7F]);
        cpu.regs.acc = 0x99;
        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 0);
    }

    #[test]
    fn test_logic_ops() {
        // AND BX; OR CX; XOR DX; NOT
        let mut cpu = cpu_with(&[0x81, 0x86, 0x8F, 0x88]);
        cpu.regs.acc = 0b1111_0000;
        cpu.regs.set(Reg::Bx, 0b1010_1010);
        cpu.regs.set(Reg::Cx, 0b0000_0101);
        cpu.regs.set(Reg::Dx, 0b1111_1111);

        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 0b1010_0000);
        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 0b1010_0101);
        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 0b0101_1010);
        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 0b1010_0101);
    }

    #[test]
    fn test_jump_condition_table() {
        for byte in 0x50..=0x5Fu8 {
            for flag_value in [false, true] {
                let mut cpu = cpu_with(&[byte, 0x40]);
                let Instruction::Jump { flag, polarity, direct } = decode::decode(byte) else {
                    panic!("not a jump: {:#04x}", byte);
                };
                cpu.regs.flags.set(flag, flag_value);

                cpu.step().unwrap();
                let expected = if (flag_value == polarity) != direct { 0x40 } else { 2 };
                assert_eq!(cpu.pc(), expected, "byte {:#04x} flag {}", byte, flag_value);
            }
        }
    }

    #[test]
    fn test_call_and_ret() {
        // 0: CALL 0x10 ... 0x10: RET
        let mut program = vec![0u8; 0x11];
        program[0] = encode(&Instruction::Call);
        program[1] = 0x10;
        program[0x10] = encode(&Instruction::Ret);
        let mut cpu = cpu_with(&program);

        cpu.step().unwrap();
        assert_eq!(cpu.pc(), 0x10);
        assert_eq!(cpu.ct(), 0x02);

        cpu.step().unwrap();
        assert_eq!(cpu.pc(), 0x02);
    }

    #[test]
    fn test_nested_call_overwrites_ct() {
        // 0: CALL 4; 4: CALL 8; 8: RET
        let mut cpu = cpu_with(&[0xC1, 0x04, 0, 0, 0xC1, 0x08, 0, 0, 0xC0]);

        cpu.run_limited(3).unwrap();
        assert_eq!(cpu.ct(), 0x06);
        assert_eq!(cpu.pc(), 0x06);
    }

    #[test]
    fn test_xchg() {
        let mut cpu = cpu_with(&[0xD2]);
        cpu.regs.acc = 1;
        cpu.regs.set(Reg::Cx, 2);

        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 2);
        assert_eq!(cpu.cx(), 1);
    }

    #[test]
    fn test_set_clear_flags() {
        let mut cpu = cpu_with(&[0xE1, 0xE3, 0xE0]);

        cpu.step().unwrap();
        assert!(cpu.cf());
        cpu.step().unwrap();
        assert!(cpu.zf());
        cpu.step().unwrap();
        assert!(!cpu.cf());
        assert!(cpu.zf());
        assert!(!cpu.sf() && !cpu.pf());
    }

    #[test]
    fn test_reserved_is_traced_noop() {
        let mut cpu = cpu_with(&[0x9F, 0xA0, 0xB7]);
        cpu.regs.acc = 0x44;
        let before = cpu.regs.clone();

        for expected_pc in 1..=3 {
            let step = cpu.step().unwrap();
            assert!(step.was_ignored());
            assert_eq!(step.operand, None);
            assert_eq!(cpu.pc(), expected_pc);
        }
        assert_eq!(cpu.regs.acc, before.acc);
        assert_eq!(cpu.regs.gp, before.gp);
        assert_eq!(cpu.steps(), 3);
    }

    #[test]
    fn test_reset_instruction_keeps_program() {
        let mut cpu = cpu_with(&[0x30, 0x2A, 0xF0]);
        cpu.mem.write(0xA0, 1).unwrap();

        cpu.run_limited(2).unwrap();
        assert_eq!(cpu.acc(), 0);
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.memory().read(0xA0).unwrap(), 0);
        assert_eq!(cpu.memory().read(0).unwrap(), 0x30);
        assert_eq!(cpu.state(), CpuState::Ready);
    }

    #[test]
    fn test_full_reset_goes_idle() {
        let mut cpu = cpu_with(&[0x30, 0x01]);
        cpu.full_reset();

        assert_eq!(cpu.state(), CpuState::Idle);
        assert_eq!(cpu.memory().read(0).unwrap(), 0);
        assert!(cpu.step().is_err());

        cpu.load_program(&[0x61]).unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.acc(), 1);
    }

    #[test]
    fn test_ir_peeks_without_advancing() {
        let cpu = cpu_with(&[0x7A]);
        assert_eq!(cpu.ir().unwrap(), 0x7A);
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.snapshot().ir, 0x7A);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut cpu = cpu_with(&[0x1C, 0x05]);
        cpu.step().unwrap();

        let json = serde_json::to_string(&cpu.snapshot()).unwrap();
        assert!(json.contains("\"dx\":5"));
        assert!(json.contains("\"pc\":2"));
    }

    #[test]
    fn test_last_step_tracks_and_resets() {
        let mut cpu = cpu_with(&[0x1C, 0x05, 0x9F]);
        assert_eq!(cpu.last_step(), None);

        cpu.step().unwrap();
        let last = cpu.last_step().unwrap();
        assert_eq!(last.address, 0);
        assert_eq!(last.opcode, 0x1C);
        assert_eq!(last.operand, Some(0x05));

        cpu.step().unwrap();
        assert!(cpu.last_step().unwrap().was_ignored());

        cpu.reset();
        assert_eq!(cpu.last_step(), None);
    }

    #[test]
    fn test_deserialize_rejects_short_memory() {
        let mut cpu = cpu_with(&[0x61]);
        cpu.step().unwrap();

        let mut value = serde_json::to_value(&cpu).unwrap();
        let back: Cpu = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(back.snapshot(), cpu.snapshot());

        value["mem"]["cells"] = serde_json::json!([0x61]);
        assert!(serde_json::from_value::<Cpu>(value).is_err());
    }
}
