//! 提升错误类型
//!
//! 所有提升错误对当前会话都是致命的：出错后代码单元整体丢弃，不返回部分结果。

use thiserror::Error;

use crate::mnemonic::Mnemonic;
use crate::width::Width;

/// Lifting error taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiftError {
    /// 助记符不在 lifter 表中
    #[error("no lifter registered for mnemonic {0}")]
    UnknownMnemonic(Mnemonic),

    /// 操作数宽度与操作码约定不符
    #[error("width mismatch in {what}: expected {expected} bits, found {found} bits")]
    WidthMismatch {
        what: &'static str,
        expected: Width,
        found: Width,
    },

    /// 子寄存器越过槽边界或超出寄存器文件
    #[error("sub-register at context offset {offset:#x} with size {size} is out of bounds")]
    RegisterOutOfBounds { offset: u64, size: u32 },

    /// 操作数形状不合法（缺少立即数、向立即数写入等）
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// 入口/出口重建失败
    #[error("missing or mismatched boundary handler: {0}")]
    MissingBoundaryHandler(String),

    /// 后端定案/代码生成失败
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// 会话配置不合法
    #[error("invalid lift configuration: {0}")]
    Config(String),
}

/// 解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown mnemonic `{0}`")]
    Mnemonic(String),

    #[error("unknown native register `{0}`")]
    Register(String),

    #[error("malformed native instruction `{0}`")]
    Instruction(String),
}

pub type LiftResult<T> = Result<T, LiftError>;
