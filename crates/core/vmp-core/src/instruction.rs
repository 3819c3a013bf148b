//! 已解码的虚拟指令
//!
//! 由外部反汇编/profile 匹配器产生，每次提升恰好消费一次。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LiftError, LiftResult};
use crate::mnemonic::Mnemonic;
use crate::native::NativeInstruction;
use crate::width::Width;

/// 虚拟指令操作数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VmOperand {
    /// 解码器没有捕获操作数
    #[default]
    Absent,
    /// 操作码不带操作数
    None,
    /// 带宽度的立即数
    Immediate { value: u64, width: Width },
}

impl VmOperand {
    pub const fn imm(value: u64, width: Width) -> Self {
        VmOperand::Immediate { value, width }
    }

    /// 以指定宽度取出立即数
    ///
    /// 宽度在取出时检查，不做任何隐式重解释。
    pub fn immediate(&self, expected: Width) -> LiftResult<u64> {
        match *self {
            VmOperand::Immediate { value, width } if width == expected => Ok(value),
            VmOperand::Immediate { width, .. } => Err(LiftError::WidthMismatch {
                what: "immediate operand",
                expected,
                found: width,
            }),
            VmOperand::Absent | VmOperand::None => Err(LiftError::InvalidOperand(format!(
                "expected a {expected}-bit immediate, found no operand"
            ))),
        }
    }

    /// 断言没有立即数
    pub fn expect_none(&self) -> LiftResult<()> {
        match self {
            VmOperand::Absent | VmOperand::None => Ok(()),
            VmOperand::Immediate { value, width } => Err(LiftError::InvalidOperand(format!(
                "unexpected {width}-bit immediate {value:#x}"
            ))),
        }
    }
}

impl fmt::Display for VmOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmOperand::Absent | VmOperand::None => Ok(()),
            VmOperand::Immediate { value, width } => write!(f, "{value:#x}:{width}"),
        }
    }
}

/// 一条虚拟指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstruction {
    pub mnemonic: Mnemonic,
    pub operand: VmOperand,
    /// 仅 `VMENTER`/`VMEXIT` 携带 handler 的本地指令序列
    pub natives: Vec<NativeInstruction>,
}

impl VmInstruction {
    pub fn new(mnemonic: Mnemonic, operand: VmOperand) -> Self {
        Self {
            mnemonic,
            operand,
            natives: Vec::new(),
        }
    }

    /// 不带操作数的指令
    pub fn bare(mnemonic: Mnemonic) -> Self {
        Self::new(mnemonic, VmOperand::None)
    }

    /// 带立即数的指令
    pub fn imm(mnemonic: Mnemonic, value: u64, width: Width) -> Self {
        Self::new(mnemonic, VmOperand::imm(value, width))
    }

    /// 边界指令
    pub fn boundary(mnemonic: Mnemonic, natives: Vec<NativeInstruction>) -> Self {
        Self {
            mnemonic,
            operand: VmOperand::None,
            natives,
        }
    }
}

impl fmt::Display for VmInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        if let VmOperand::Immediate { .. } = self.operand {
            write!(f, " {}", self.operand)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_extraction() {
        let op = VmOperand::imm(0x10, Width::Byte);
        assert_eq!(op.immediate(Width::Byte), Ok(0x10));
        assert_eq!(
            op.immediate(Width::Word),
            Err(LiftError::WidthMismatch {
                what: "immediate operand",
                expected: Width::Word,
                found: Width::Byte,
            })
        );
        assert!(VmOperand::Absent.immediate(Width::Byte).is_err());
    }

    #[test]
    fn test_expect_none() {
        assert!(VmOperand::None.expect_none().is_ok());
        assert!(VmOperand::Absent.expect_none().is_ok());
        assert!(VmOperand::imm(1, Width::Byte).expect_none().is_err());
    }

    #[test]
    fn test_display() {
        let instr = VmInstruction::imm(Mnemonic::LCONSTQ, 0x1234, Width::Qword);
        assert_eq!(instr.to_string(), "LCONSTQ 0x1234:64");
        assert_eq!(VmInstruction::bare(Mnemonic::ADDQ).to_string(), "ADDQ");
    }
}
