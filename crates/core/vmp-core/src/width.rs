//! 操作数宽度
//!
//! 虚拟机的每个操作码族都以宽度为参数（B/W/DW/Q），`Width::Bit` 仅用于标志计算中的布尔临时量。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 值宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Width {
    /// 1 位布尔值
    Bit,
    /// 8 位
    Byte,
    /// 16 位
    Word,
    /// 32 位
    Dword,
    /// 64 位
    Qword,
}

impl Width {
    /// 所有可以存放在栈或寄存器文件中的宽度
    pub const STORAGE: [Width; 4] = [Width::Byte, Width::Word, Width::Dword, Width::Qword];

    /// 位数
    pub const fn bits(self) -> u32 {
        match self {
            Width::Bit => 1,
            Width::Byte => 8,
            Width::Word => 16,
            Width::Dword => 32,
            Width::Qword => 64,
        }
    }

    /// 字节数（`Bit` 按 1 字节计）
    pub const fn bytes(self) -> u32 {
        match self {
            Width::Bit | Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
            Width::Qword => 8,
        }
    }

    /// 由字节数构造存储宽度
    pub const fn from_bytes(bytes: u32) -> Option<Width> {
        match bytes {
            1 => Some(Width::Byte),
            2 => Some(Width::Word),
            4 => Some(Width::Dword),
            8 => Some(Width::Qword),
            _ => None,
        }
    }

    /// 低位掩码
    pub const fn mask(self) -> u64 {
        match self {
            Width::Qword => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    /// 符号位
    pub const fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }

    /// 截断到该宽度
    pub const fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }

    /// 从该宽度符号扩展到 64 位
    pub const fn sign_extend(self, value: u64) -> u64 {
        let value = self.truncate(value);
        if value & self.sign_bit() != 0 {
            value | !self.mask()
        } else {
            value
        }
    }

    /// 是否可以作为内存/栈/寄存器文件的访问宽度
    pub const fn is_storage(self) -> bool {
        !matches!(self, Width::Bit)
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks() {
        assert_eq!(Width::Bit.mask(), 1);
        assert_eq!(Width::Byte.mask(), 0xff);
        assert_eq!(Width::Dword.mask(), 0xffff_ffff);
        assert_eq!(Width::Qword.mask(), u64::MAX);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(Width::Byte.sign_extend(0x80), 0xffff_ffff_ffff_ff80);
        assert_eq!(Width::Byte.sign_extend(0x17f), 0x7f);
        assert_eq!(Width::Word.sign_extend(0xfffe), u64::MAX - 1);
        assert_eq!(Width::Qword.sign_extend(5), 5);
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(Width::from_bytes(4), Some(Width::Dword));
        assert_eq!(Width::from_bytes(3), None);
    }
}
