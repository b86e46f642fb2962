//! Disassembler for program images.
//!
//! Converts raw program bytes back to readable assembly.

use crate::cpu::decode::{decode, AccSource, Instruction, LogicOp, MovSource, StoreTarget};
use crate::cpu::memory::Memory;
use crate::cpu::registers::Flag;

/// Disassemble a single instruction to text.
///
/// `operand` is the byte following the opcode, if the instruction takes one.
pub fn disassemble_instruction(instr: &Instruction, operand: Option<u8>) -> String {
    let imm = || match operand {
        Some(b) => format!("{:02X}h", b),
        None => "??".to_string(),
    };
    let data = || match operand {
        Some(b) => format!("[{:02X}h]", Memory::data_address(b)),
        None => "[??]".to_string(),
    };

    match *instr {
        // Transfer
        Instruction::MovReg { dst, src } => format!("MOV {}, {}", dst.name(), src.name()),
        Instruction::MovLoad { dst, src } => {
            let src = match src {
                MovSource::Immediate => imm(),
                MovSource::Memory => data(),
                MovSource::Acc => "ACC".to_string(),
                MovSource::Pc => "PC".to_string(),
            };
            format!("MOV {}, {}", dst.name(), src)
        }
        Instruction::MovStore { src, target: StoreTarget::Memory } => {
            format!("MOV {}, {}", data(), src.name())
        }
        Instruction::MovStore { src, target: StoreTarget::Acc } => {
            format!("MOV ACC, {}", src.name())
        }
        Instruction::MovAcc { src: AccSource::Immediate } => format!("MOV ACC, {}", imm()),
        Instruction::MovAcc { src: AccSource::Memory } => format!("MOV ACC, {}", data()),
        Instruction::Xchg { reg } => format!("XCHG ACC, {}", reg.name()),

        // Arithmetic / logic
        Instruction::IncReg { reg } => format!("INC {}", reg.name()),
        Instruction::DecReg { reg } => format!("DEC {}", reg.name()),
        Instruction::IncAcc => "INC ACC".to_string(),
        Instruction::DecAcc => "DEC ACC".to_string(),
        Instruction::ClearAcc => "CLR ACC".to_string(),
        Instruction::Logic { op: LogicOp::Not, .. } => "NOT ACC".to_string(),
        Instruction::Logic { op, src } => format!("{} ACC, {}", op.mnemonic(), src.name()),

        // Control
        Instruction::Jump { flag, polarity, direct } => {
            format!("{} {}", jump_mnemonic(flag, polarity != direct), imm())
        }
        Instruction::Call => format!("CALL {}", imm()),
        Instruction::Ret => "RET".to_string(),

        // Machine
        Instruction::SetFlag { flag, value } => {
            format!("{} {}", if value { "SET" } else { "CLR" }, flag.name())
        }
        Instruction::Reset => "RST".to_string(),
        Instruction::Reserved { opcode } => format!("DB {:02X}h", opcode),
    }
}

/// Disassemble a program image.
pub fn disassemble(bytes: &[u8]) -> String {
    let mut output = String::new();
    output.push_str("; Disassembly\n");
    output.push_str("; -----------\n\n");

    let mut addr = 0usize;
    while addr < bytes.len() {
        let instr = decode(bytes[addr]);
        let len = 1 + usize::from(instr.operand_len());
        let raw = &bytes[addr..(addr + len).min(bytes.len())];
        let operand = raw.get(1).copied();

        let hex: Vec<String> = raw.iter().map(|b| format!("{:02X}", b)).collect();
        let mut line = format!("{:03}: {:<16} ; {}", addr, disassemble_instruction(&instr, operand), hex.join(" "));
        if instr.is_reserved() {
            line.push_str(" (reserved)");
        }
        output.push_str(line.trim_end());
        output.push('\n');

        addr += len;
    }

    output
}

/// Jump mnemonic for the flag value that makes the jump taken.
fn jump_mnemonic(flag: Flag, taken_when: bool) -> &'static str {
    match (flag, taken_when) {
        (Flag::Carry, true) => "JC",
        (Flag::Carry, false) => "JNC",
        (Flag::Sign, true) => "JS",
        (Flag::Sign, false) => "JNS",
        (Flag::Zero, true) => "JZ",
        (Flag::Zero, false) => "JNZ",
        (Flag::Parity, true) => "JP",
        (Flag::Parity, false) => "JNP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_mov_immediate() {
        let result = disassemble_instruction(&decode(0x1C), Some(0x05));
        assert_eq!(result, "MOV DX, 05h");
    }

    #[test]
    fn test_disassemble_shows_data_address() {
        assert_eq!(disassemble_instruction(&decode(0x22), Some(0x0F)), "MOV [8Fh], CX");
        assert_eq!(disassemble_instruction(&decode(0x31), Some(0x90)), "MOV ACC, [90h]");
    }

    #[test]
    fn test_disassemble_jumps() {
        // CF must be clear for 0x50 to jump
        assert_eq!(disassemble_instruction(&decode(0x50), Some(0x40)), "JNC 40h");
        assert_eq!(disassemble_instruction(&decode(0x54), Some(0x40)), "JC 40h");
        assert_eq!(disassemble_instruction(&decode(0x5E), Some(0x00)), "JNZ 00h");
    }

    #[test]
    fn test_disassemble_program() {
        let text = disassemble(&[0x30, 0x2A, 0x9A, 0xF0, 0xC1]);
        assert!(text.contains("000: MOV ACC, 2Ah"));
        assert!(text.contains("002: DB 9Ah"));
        assert!(text.contains("(reserved)"));
        assert!(text.contains("003: RST"));
        // Truncated operand at the end of the image
        assert!(text.contains("004: CALL ??"));
    }
}
