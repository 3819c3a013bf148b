//! x86-64 本地指令模型
//!
//! 只建模边界重建和本地逃逸需要的那部分：压栈/出栈、标志保存恢复、`rdtsc`、`cpuid`。
//! 其余指令以 `Other` 原样保留，重建时被忽略。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::width::Width;

/// 完整的 64 位本地寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NativeReg {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rflags,
}

impl NativeReg {
    pub const ALL: [NativeReg; 17] = [
        NativeReg::Rax,
        NativeReg::Rcx,
        NativeReg::Rdx,
        NativeReg::Rbx,
        NativeReg::Rsp,
        NativeReg::Rbp,
        NativeReg::Rsi,
        NativeReg::Rdi,
        NativeReg::R8,
        NativeReg::R9,
        NativeReg::R10,
        NativeReg::R11,
        NativeReg::R12,
        NativeReg::R13,
        NativeReg::R14,
        NativeReg::R15,
        NativeReg::Rflags,
    ];

    // 64 / 32 / 16 / 8 位名称
    const fn names(self) -> [&'static str; 4] {
        match self {
            NativeReg::Rax => ["rax", "eax", "ax", "al"],
            NativeReg::Rcx => ["rcx", "ecx", "cx", "cl"],
            NativeReg::Rdx => ["rdx", "edx", "dx", "dl"],
            NativeReg::Rbx => ["rbx", "ebx", "bx", "bl"],
            NativeReg::Rsp => ["rsp", "esp", "sp", "spl"],
            NativeReg::Rbp => ["rbp", "ebp", "bp", "bpl"],
            NativeReg::Rsi => ["rsi", "esi", "si", "sil"],
            NativeReg::Rdi => ["rdi", "edi", "di", "dil"],
            NativeReg::R8 => ["r8", "r8d", "r8w", "r8b"],
            NativeReg::R9 => ["r9", "r9d", "r9w", "r9b"],
            NativeReg::R10 => ["r10", "r10d", "r10w", "r10b"],
            NativeReg::R11 => ["r11", "r11d", "r11w", "r11b"],
            NativeReg::R12 => ["r12", "r12d", "r12w", "r12b"],
            NativeReg::R13 => ["r13", "r13d", "r13w", "r13b"],
            NativeReg::R14 => ["r14", "r14d", "r14w", "r14b"],
            NativeReg::R15 => ["r15", "r15d", "r15w", "r15b"],
            NativeReg::Rflags => ["rflags", "eflags", "flags", "flags.b"],
        }
    }
}

/// 本地寄存器的一个低位视图（`eax` = `rax` 的低 32 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NativeRegister {
    pub reg: NativeReg,
    pub width: Width,
}

impl NativeRegister {
    pub const RAX: Self = Self::full(NativeReg::Rax);
    pub const RBX: Self = Self::full(NativeReg::Rbx);
    pub const RCX: Self = Self::full(NativeReg::Rcx);
    pub const RDX: Self = Self::full(NativeReg::Rdx);
    pub const RSP: Self = Self::full(NativeReg::Rsp);
    pub const RFLAGS: Self = Self::full(NativeReg::Rflags);
    pub const EAX: Self = Self::new(NativeReg::Rax, Width::Dword);
    pub const EBX: Self = Self::new(NativeReg::Rbx, Width::Dword);
    pub const ECX: Self = Self::new(NativeReg::Rcx, Width::Dword);
    pub const EDX: Self = Self::new(NativeReg::Rdx, Width::Dword);

    pub const fn new(reg: NativeReg, width: Width) -> Self {
        Self { reg, width }
    }

    pub const fn full(reg: NativeReg) -> Self {
        Self::new(reg, Width::Qword)
    }

    pub fn name(&self) -> &'static str {
        let names = self.reg.names();
        match self.width {
            Width::Qword => names[0],
            Width::Dword => names[1],
            Width::Word => names[2],
            Width::Byte | Width::Bit => names[3],
        }
    }
}

impl fmt::Display for NativeRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NativeRegister {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        for reg in NativeReg::ALL {
            for (name, width) in reg.names().iter().zip(Width::STORAGE.iter().rev()) {
                if *name == lower {
                    return Ok(NativeRegister::new(reg, *width));
                }
            }
        }
        Err(ParseError::Register(s.to_string()))
    }
}

/// 本地指令操作数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeOperand {
    Register(NativeRegister),
    /// 内存操作数，保留原始文本
    Memory(String),
    Immediate(u64),
}

impl fmt::Display for NativeOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeOperand::Register(reg) => write!(f, "{reg}"),
            NativeOperand::Memory(text) => f.write_str(text),
            NativeOperand::Immediate(value) => write!(f, "{value:#x}"),
        }
    }
}

/// 本地指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeInstruction {
    Push(NativeOperand),
    Pop(NativeOperand),
    Pushfq,
    Popfq,
    Rdtsc,
    Cpuid,
    /// 与重建无关的其他指令
    Other(String),
}

impl NativeInstruction {
    /// 压入寄存器
    pub fn push(reg: NativeRegister) -> Self {
        NativeInstruction::Push(NativeOperand::Register(reg))
    }

    /// 弹出到寄存器
    pub fn pop(reg: NativeRegister) -> Self {
        NativeInstruction::Pop(NativeOperand::Register(reg))
    }

    pub fn mnemonic(&self) -> &str {
        match self {
            NativeInstruction::Push(_) => "push",
            NativeInstruction::Pop(_) => "pop",
            NativeInstruction::Pushfq => "pushfq",
            NativeInstruction::Popfq => "popfq",
            NativeInstruction::Rdtsc => "rdtsc",
            NativeInstruction::Cpuid => "cpuid",
            NativeInstruction::Other(text) => text.split_whitespace().next().unwrap_or(""),
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, NativeInstruction::Push(_) | NativeInstruction::Pushfq)
    }

    pub fn is_pop(&self) -> bool {
        matches!(self, NativeInstruction::Pop(_) | NativeInstruction::Popfq)
    }
}

impl fmt::Display for NativeInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeInstruction::Push(op) => write!(f, "push {op}"),
            NativeInstruction::Pop(op) => write!(f, "pop {op}"),
            NativeInstruction::Other(text) => f.write_str(text),
            other => f.write_str(other.mnemonic()),
        }
    }
}

fn parse_operand(text: &str) -> Result<NativeOperand, ParseError> {
    let text = text.trim();
    if text.contains('[') {
        return Ok(NativeOperand::Memory(text.to_string()));
    }
    if let Some(hex) = text.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16)
            .map(NativeOperand::Immediate)
            .map_err(|_| ParseError::Instruction(text.to_string()));
    }
    if let Ok(value) = text.parse::<u64>() {
        return Ok(NativeOperand::Immediate(value));
    }
    text.parse::<NativeRegister>().map(NativeOperand::Register)
}

impl FromStr for NativeInstruction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(ParseError::Instruction(s.to_string()));
        }
        let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (text, ""),
        };
        let instr = match (mnemonic.to_ascii_lowercase().as_str(), rest.is_empty()) {
            ("push", false) => NativeInstruction::Push(parse_operand(rest)?),
            ("pop", false) => NativeInstruction::Pop(parse_operand(rest)?),
            ("push" | "pop", true) => return Err(ParseError::Instruction(s.to_string())),
            ("pushfq", true) => NativeInstruction::Pushfq,
            ("popfq", true) => NativeInstruction::Popfq,
            ("rdtsc", true) => NativeInstruction::Rdtsc,
            ("cpuid", true) => NativeInstruction::Cpuid,
            _ => NativeInstruction::Other(text.to_string()),
        };
        Ok(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!("eax".parse::<NativeRegister>(), Ok(NativeRegister::EAX));
        assert_eq!(
            "r9w".parse::<NativeRegister>(),
            Ok(NativeRegister::new(NativeReg::R9, Width::Word))
        );
        assert_eq!(NativeRegister::new(NativeReg::Rsi, Width::Byte).name(), "sil");
        assert!("xmm0".parse::<NativeRegister>().is_err());
    }

    #[test]
    fn test_parse_instructions() {
        assert_eq!(
            "push rax".parse::<NativeInstruction>(),
            Ok(NativeInstruction::push(NativeRegister::RAX))
        );
        assert_eq!("pushfq".parse::<NativeInstruction>(), Ok(NativeInstruction::Pushfq));
        assert_eq!(
            "push qword ptr [rip+0x1000]".parse::<NativeInstruction>(),
            Ok(NativeInstruction::Push(NativeOperand::Memory(
                "qword ptr [rip+0x1000]".to_string()
            )))
        );
        assert_eq!(
            "push 0x10".parse::<NativeInstruction>(),
            Ok(NativeInstruction::Push(NativeOperand::Immediate(0x10)))
        );
        assert_eq!(
            "mov rbp, rsp".parse::<NativeInstruction>(),
            Ok(NativeInstruction::Other("mov rbp, rsp".to_string()))
        );
    }

    #[test]
    fn test_display() {
        let instr = NativeInstruction::pop(NativeRegister::RBX);
        assert_eq!(instr.to_string(), "pop rbx");
        assert_eq!(NativeInstruction::Popfq.to_string(), "popfq");
    }
}
