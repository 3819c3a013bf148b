//! IR 操作的具体语义
//!
//! 解释器与常量折叠共用这一份定义，对象代码后端的下降规则与之一致
//! （移位量按位宽取模、结果截断到操作数宽度）。

use vmp_core::Width;

use crate::{BinaryOp, Condition};

/// 计算二元运算；除数为零时返回 `None`
pub fn binary(op: BinaryOp, lhs: u64, rhs: u64, width: Width) -> Option<u64> {
    let l = width.truncate(lhs);
    let r = width.truncate(rhs);
    let bits = width.bits();
    let value = match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::And => l & r,
        BinaryOp::Or => l | r,
        BinaryOp::Shl => l << (r % u64::from(bits)),
        BinaryOp::Shr => l >> (r % u64::from(bits)),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::UMulHi => ((u128::from(l) * u128::from(r)) >> bits) as u64,
        BinaryOp::UDiv => l.checked_div(r)?,
        BinaryOp::URem => l.checked_rem(r)?,
    };
    Some(width.truncate(value))
}

/// 比较
pub fn compare(cond: Condition, lhs: u64, rhs: u64, width: Width) -> bool {
    let l = width.truncate(lhs);
    let r = width.truncate(rhs);
    match cond {
        Condition::Eq => l == r,
        Condition::Ne => l != r,
        Condition::Ult => l < r,
        Condition::Slt => (width.sign_extend(l) as i64) < (width.sign_extend(r) as i64),
    }
}

/// 按位取反
pub fn not(value: u64, width: Width) -> u64 {
    width.truncate(!value)
}

/// 扩展或截断
pub fn resize(value: u64, from: Width, to: Width, signed: bool) -> u64 {
    if signed {
        to.truncate(from.sign_extend(value))
    } else {
        to.truncate(from.truncate(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_add() {
        assert_eq!(binary(BinaryOp::Add, u64::MAX, 1, Width::Qword), Some(0));
        assert_eq!(binary(BinaryOp::Add, 0xff, 1, Width::Byte), Some(0));
        assert_eq!(binary(BinaryOp::Sub, 0, 1, Width::Word), Some(0xffff));
    }

    #[test]
    fn test_shift_amount_is_modulo_width() {
        assert_eq!(binary(BinaryOp::Shl, 1, 65, Width::Qword), Some(2));
        assert_eq!(binary(BinaryOp::Shr, 0x80, 7, Width::Byte), Some(1));
        assert_eq!(binary(BinaryOp::Shl, 1, 8, Width::Byte), Some(1));
    }

    #[test]
    fn test_mulhi_and_division() {
        assert_eq!(binary(BinaryOp::UMulHi, u64::MAX, 2, Width::Qword), Some(1));
        assert_eq!(binary(BinaryOp::UMulHi, 0x8000, 4, Width::Word), Some(2));
        assert_eq!(binary(BinaryOp::UDiv, 7, 2, Width::Dword), Some(3));
        assert_eq!(binary(BinaryOp::URem, 7, 2, Width::Dword), Some(1));
        assert_eq!(binary(BinaryOp::UDiv, 7, 0, Width::Dword), None);
    }

    #[test]
    fn test_compare() {
        assert!(compare(Condition::Slt, 0x80, 0, Width::Byte));
        assert!(!compare(Condition::Ult, 0x80, 0, Width::Byte));
        assert!(compare(Condition::Eq, 0x100, 0, Width::Byte));
    }

    #[test]
    fn test_resize() {
        assert_eq!(resize(0xff, Width::Byte, Width::Qword, true), u64::MAX);
        assert_eq!(resize(0xff, Width::Byte, Width::Qword, false), 0xff);
        assert_eq!(resize(0x1234_5678, Width::Dword, Width::Word, false), 0x5678);
        assert_eq!(resize(1, Width::Bit, Width::Qword, true), u64::MAX);
        assert_eq!(not(0, Width::Bit), 1);
    }
}
