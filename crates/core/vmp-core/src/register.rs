//! 虚拟寄存器文件寻址
//!
//! 虚拟机上下文是 N 个 8 字节槽组成的字节寻址区域。上下文偏移 `o` 与宽度 `w`
//! 映射到子寄存器 `(o / 8, w, (o % 8) * 8)`；子寄存器不允许跨越槽边界。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LiftError, LiftResult};
use crate::width::Width;

/// 每个槽的字节数
pub const SLOT_BYTES: u64 = 8;

/// 默认槽数
pub const DEFAULT_CONTEXT_SLOTS: usize = 24;

/// 槽数上限（上下文偏移是单字节立即数）
pub const MAX_CONTEXT_SLOTS: usize = 32;

/// 寄存器文件中的子寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VirtualRegister {
    /// 槽索引
    pub slot: u32,
    /// 访问宽度
    pub width: Width,
    /// 槽内位偏移
    pub bit_offset: u32,
}

impl VirtualRegister {
    /// 由上下文偏移构造子寄存器
    ///
    /// `offset % 8 + width.bytes() <= 8` 且槽索引小于 `slots`，否则返回
    /// `RegisterOutOfBounds`，不会折返到相邻槽。
    pub fn from_context(offset: u64, width: Width, slots: usize) -> LiftResult<Self> {
        let out_of_bounds = LiftError::RegisterOutOfBounds {
            offset,
            size: width.bytes(),
        };
        if !width.is_storage() {
            return Err(out_of_bounds);
        }
        if offset % SLOT_BYTES + u64::from(width.bytes()) > SLOT_BYTES {
            return Err(out_of_bounds);
        }
        let slot = offset / SLOT_BYTES;
        if slot >= slots as u64 {
            return Err(out_of_bounds);
        }
        Ok(Self {
            slot: slot as u32,
            width,
            bit_offset: ((offset % SLOT_BYTES) * 8) as u32,
        })
    }

    /// 整个槽
    pub const fn full(slot: u32) -> Self {
        Self {
            slot,
            width: Width::Qword,
            bit_offset: 0,
        }
    }

    /// 在寄存器文件中的字节偏移
    pub const fn byte_offset(&self) -> u64 {
        self.slot as u64 * SLOT_BYTES + (self.bit_offset / 8) as u64
    }
}

impl fmt::Display for VirtualRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vr{}", self.slot)?;
        if self.bit_offset != 0 {
            write!(f, "@{}", self.bit_offset)?;
        }
        write!(f, ":{}", self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_context() {
        let reg = VirtualRegister::from_context(0x12, Width::Word, DEFAULT_CONTEXT_SLOTS)
            .expect("in bounds");
        assert_eq!(reg.slot, 2);
        assert_eq!(reg.bit_offset, 16);
        assert_eq!(reg.byte_offset(), 0x12);
        assert_eq!(reg.to_string(), "vr2@16:16");
    }

    #[test]
    fn test_straddling_slot_fails() {
        let err = VirtualRegister::from_context(0x0c, Width::Qword, DEFAULT_CONTEXT_SLOTS)
            .unwrap_err();
        assert_eq!(
            err,
            LiftError::RegisterOutOfBounds {
                offset: 0x0c,
                size: 8
            }
        );
        assert!(VirtualRegister::from_context(0x07, Width::Word, DEFAULT_CONTEXT_SLOTS).is_err());
        assert!(VirtualRegister::from_context(0x07, Width::Byte, DEFAULT_CONTEXT_SLOTS).is_ok());
    }

    #[test]
    fn test_slot_limit() {
        assert!(VirtualRegister::from_context(8 * 24, Width::Qword, 24).is_err());
        assert!(VirtualRegister::from_context(8 * 23, Width::Qword, 24).is_ok());
    }

    #[test]
    fn test_bit_width_rejected() {
        assert!(VirtualRegister::from_context(0, Width::Bit, 24).is_err());
    }
}
