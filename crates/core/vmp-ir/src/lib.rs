//! # vmp-ir - 可移植符号 IR
//!
//! 提升后的虚拟机代码在这里表示为与后端无关的指令序列，供后续自动分析使用。
//!
//! ## 结构
//!
//! ```text
//! Routine
//!   └─ BasicBlock (label, 仅追加)
//!        └─ Instruction { op, sp_offset }
//!             └─ Op: mov / resize / binary / not / compare / ldd / str / native / ret
//! ```
//!
//! 栈访问都写成 `$sp ± 常量位移`，`sp_offset` 记录发射时虚拟栈指针的净位移。
//! 本地逃逸（入口/出口胶水、`rdtsc` 等）是带读写钉住列表的不透明 `NativeBlock`。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vmp_core::{NativeInstruction, NativeReg, NativeRegister, VirtualRegister, Width};

pub mod interp;
pub mod optimizer;
pub mod semantics;

pub use interp::{EvalError, Machine};
pub use optimizer::{OptimizationStats, optimize};

/// 临时量：当前代码单元内唯一，不与寄存器文件或栈指针别名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Temp {
    pub id: u32,
    pub width: Width,
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}:{}", self.id, self.width)
    }
}

/// IR 操作数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Imm { value: u64, width: Width },
    Temp(Temp),
    Register(VirtualRegister),
    /// 虚拟栈指针（64 位）
    StackPointer,
    /// 当前条件码状态（64 位，RFLAGS 布局）
    Flags,
    Native(NativeRegister),
}

impl Operand {
    /// 截断到宽度的立即数
    pub const fn imm(value: u64, width: Width) -> Self {
        Operand::Imm {
            value: width.truncate(value),
            width,
        }
    }

    pub const fn width(&self) -> Width {
        match self {
            Operand::Imm { width, .. } => *width,
            Operand::Temp(t) => t.width,
            Operand::Register(reg) => reg.width,
            Operand::StackPointer | Operand::Flags => Width::Qword,
            Operand::Native(reg) => reg.width,
        }
    }

    pub const fn is_writable(&self) -> bool {
        !matches!(self, Operand::Imm { .. })
    }

    pub const fn as_temp(&self) -> Option<Temp> {
        match self {
            Operand::Temp(t) => Some(*t),
            _ => None,
        }
    }

    pub const fn as_imm(&self) -> Option<u64> {
        match self {
            Operand::Imm { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl From<Temp> for Operand {
    fn from(t: Temp) -> Self {
        Operand::Temp(t)
    }
}

impl From<VirtualRegister> for Operand {
    fn from(reg: VirtualRegister) -> Self {
        Operand::Register(reg)
    }
}

impl From<NativeRegister> for Operand {
    fn from(reg: NativeRegister) -> Self {
        Operand::Native(reg)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm { value, width } => write!(f, "{value:#x}:{width}"),
            Operand::Temp(t) => write!(f, "{t}"),
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::StackPointer => f.write_str("$sp"),
            Operand::Flags => f.write_str("$flags"),
            Operand::Native(reg) => write!(f, "{reg}"),
        }
    }
}

/// 二元运算（双地址：`dst = dst op src`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    And,
    Or,
    /// 移位量按操作数位宽取模
    Shl,
    Shr,
    Mul,
    UMulHi,
    UDiv,
    URem,
}

impl BinaryOp {
    pub const fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::Mul => "mul",
            BinaryOp::UMulHi => "mulhi",
            BinaryOp::UDiv => "div",
            BinaryOp::URem => "rem",
        }
    }
}

/// 比较条件，结果写入 1 位临时量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Eq,
    Ne,
    Ult,
    Slt,
}

impl Condition {
    pub const fn name(self) -> &'static str {
        match self {
            Condition::Eq => "te",
            Condition::Ne => "tne",
            Condition::Ult => "tul",
            Condition::Slt => "tl",
        }
    }
}

/// 本地逃逸的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscapeKind {
    /// 入口序言：保存本地寄存器/标志
    Entry,
    /// 出口尾声：恢复本地寄存器/标志
    Exit,
    /// 依赖环境的指令（rdtsc、cpuid）
    Inline,
}

/// 不透明的本地指令块，带输入/输出寄存器钉住列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeBlock {
    pub kind: EscapeKind,
    pub instructions: Vec<NativeInstruction>,
    pub reads: Vec<NativeReg>,
    pub writes: Vec<NativeReg>,
}

impl NativeBlock {
    pub fn new(kind: EscapeKind, instructions: Vec<NativeInstruction>) -> Self {
        Self {
            kind,
            instructions,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn pin_read(mut self, reg: NativeReg) -> Self {
        if !self.reads.contains(&reg) {
            self.reads.push(reg);
        }
        self
    }

    pub fn pin_write(mut self, reg: NativeReg) -> Self {
        if !self.writes.contains(&reg) {
            self.writes.push(reg);
        }
        self
    }
}

/// IR 操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Mov { dst: Operand, src: Operand },
    /// 零/符号扩展或截断
    Resize {
        dst: Operand,
        src: Operand,
        signed: bool,
    },
    Binary {
        op: BinaryOp,
        dst: Operand,
        src: Operand,
    },
    Not { dst: Operand },
    Compare {
        cond: Condition,
        dst: Operand,
        lhs: Operand,
        rhs: Operand,
    },
    Load {
        dst: Operand,
        base: Operand,
        offset: i64,
    },
    Store {
        base: Operand,
        offset: i64,
        src: Operand,
    },
    Native(NativeBlock),
    Ret,
}

impl Op {
    /// 被写入的操作数
    pub fn destination(&self) -> Option<&Operand> {
        match self {
            Op::Mov { dst, .. }
            | Op::Resize { dst, .. }
            | Op::Binary { dst, .. }
            | Op::Not { dst }
            | Op::Compare { dst, .. }
            | Op::Load { dst, .. } => Some(dst),
            Op::Store { .. } | Op::Native(_) | Op::Ret => None,
        }
    }

    /// 被读取的操作数（双地址操作包含目的操作数）
    pub fn sources(&self) -> Vec<&Operand> {
        match self {
            Op::Mov { src, .. } | Op::Resize { src, .. } => vec![src],
            Op::Binary { dst, src, .. } => vec![dst, src],
            Op::Not { dst } => vec![dst],
            Op::Compare { lhs, rhs, .. } => vec![lhs, rhs],
            Op::Load { base, .. } => vec![base],
            Op::Store { base, src, .. } => vec![base, src],
            Op::Native(_) | Op::Ret => Vec::new(),
        }
    }

    /// 除写目的操作数外没有副作用
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Op::Mov { .. } | Op::Resize { .. } | Op::Binary { .. } | Op::Not { .. } | Op::Compare { .. }
        )
    }
}

fn fmt_offset(offset: i64) -> String {
    if offset < 0 {
        format!("-{:#x}", offset.unsigned_abs())
    } else {
        format!("+{offset:#x}")
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Mov { dst, src } => write!(f, "mov     {dst}, {src}"),
            Op::Resize { dst, src, signed } => {
                let name = if dst.width() < src.width() {
                    "trunc"
                } else if *signed {
                    "movsx"
                } else {
                    "movzx"
                };
                write!(f, "{name:<7} {dst}, {src}")
            }
            Op::Binary { op, dst, src } => write!(f, "{:<7} {dst}, {src}", op.name()),
            Op::Not { dst } => write!(f, "not     {dst}"),
            Op::Compare {
                cond,
                dst,
                lhs,
                rhs,
            } => write!(f, "{:<7} {dst}, {lhs}, {rhs}", cond.name()),
            Op::Load { dst, base, offset } => {
                write!(f, "ldd     {dst}, {base}, {}", fmt_offset(*offset))
            }
            Op::Store { base, offset, src } => {
                write!(f, "str     {base}, {}, {src}", fmt_offset(*offset))
            }
            Op::Native(block) => {
                let kind = match block.kind {
                    EscapeKind::Entry => "entry",
                    EscapeKind::Exit => "exit",
                    EscapeKind::Inline => "inline",
                };
                let body: Vec<String> = block.instructions.iter().map(|i| i.to_string()).collect();
                write!(f, "native.{kind} [{}]", body.join("; "))?;
                if !block.reads.is_empty() {
                    write!(f, " vpinr{:?}", block.reads)?;
                }
                if !block.writes.is_empty() {
                    write!(f, " vpinw{:?}", block.writes)?;
                }
                Ok(())
            }
            Op::Ret => f.write_str("vexit"),
        }
    }
}

/// 带发射时栈位移的指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Op,
    pub sp_offset: i64,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>6}] {}", fmt_offset(self.sp_offset), self.op)
    }
}

/// 仅追加的基本块
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
        }
    }

    pub fn append(&mut self, op: Op, sp_offset: i64) {
        self.instructions.push(Instruction { op, sp_offset });
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = &Op> {
        self.instructions.iter().map(|i| &i.op)
    }

    /// 是否以 `ret` 结束
    pub fn is_terminated(&self) -> bool {
        matches!(self.instructions.last(), Some(Instruction { op: Op::Ret, .. }))
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for instr in &self.instructions {
            writeln!(f, "  {instr}")?;
        }
        Ok(())
    }
}

/// 序列化错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("failed to encode routine: {0}")]
    Encode(String),
    #[error("failed to decode routine: {0}")]
    Decode(String),
}

/// 一个提升后的函数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub name: String,
    pub context_slots: usize,
    pub blocks: Vec<BasicBlock>,
}

impl Routine {
    pub fn new(name: impl Into<String>, context_slots: usize, entry: BasicBlock) -> Self {
        Self {
            name: name.into(),
            context_slots,
            blocks: vec![entry],
        }
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }

    /// 编码为 bincode 字节
    pub fn to_bytes(&self) -> Result<Vec<u8>, IrError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| IrError::Encode(e.to_string()))
    }

    /// 从 bincode 字节解码
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IrError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(routine, _)| routine)
            .map_err(|e| IrError::Decode(e.to_string()))
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "routine {} (context: {} slots)", self.name, self.context_slots)?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> BasicBlock {
        let t0 = Temp { id: 0, width: Width::Qword };
        let mut block = BasicBlock::new("entry");
        block.append(
            Op::Mov {
                dst: t0.into(),
                src: Operand::imm(0x1234, Width::Qword),
            },
            0,
        );
        block.append(
            Op::Store {
                base: Operand::StackPointer,
                offset: -8,
                src: t0.into(),
            },
            -8,
        );
        block.append(Op::Ret, -8);
        block
    }

    #[test]
    fn test_imm_truncates() {
        assert_eq!(Operand::imm(0x1ff, Width::Byte).as_imm(), Some(0xff));
    }

    #[test]
    fn test_operand_display() {
        let reg = VirtualRegister::full(3);
        assert_eq!(Operand::Register(reg).to_string(), "vr3:64");
        assert_eq!(Operand::Native(NativeRegister::EAX).to_string(), "eax");
        assert_eq!(Operand::StackPointer.to_string(), "$sp");
    }

    #[test]
    fn test_block_text() {
        let block = sample_block();
        assert!(block.is_terminated());
        let text = block.to_string();
        assert!(text.contains("mov     t0:64, 0x1234:64"));
        assert!(text.contains("str     $sp, -0x8, t0:64"));
    }

    #[test]
    fn test_sources_include_two_address_destination() {
        let t0 = Temp { id: 0, width: Width::Dword };
        let t1 = Temp { id: 1, width: Width::Dword };
        let op = Op::Binary {
            op: BinaryOp::Add,
            dst: t0.into(),
            src: t1.into(),
        };
        assert_eq!(op.sources(), vec![&Operand::Temp(t0), &Operand::Temp(t1)]);
        assert!(op.is_pure());
    }

    #[test]
    fn test_routine_bytes_roundtrip() {
        let routine = Routine::new("f", 24, sample_block());
        let bytes = routine.to_bytes().expect("encode");
        assert_eq!(Routine::from_bytes(&bytes), Ok(routine));
    }
}
