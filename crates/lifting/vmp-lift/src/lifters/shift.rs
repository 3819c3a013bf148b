//! `SHR*` / `SHL*` / `SHLD*` / `SHRD*`
//!
//! 移位在 64 位域内计算，移位量像 CPU 一样先与 `0x1f`（64 位操作为 `0x3f`）相与。
//! 移位量为零时 CF 记为 0。

use vmp_core::{LiftResult, VmOperand, Width};
use vmp_ir::{BinaryOp, Condition, Operand, Temp};

use super::Shape;
use crate::builder::IrBuilder;
use crate::flags;

const fn count_mask(width: Width) -> u64 {
    match width {
        Width::Qword => 0x3f,
        _ => 0x1f,
    }
}

fn qword(value: u64) -> Operand {
    Operand::imm(value, Width::Qword)
}

/// 弹出移位量并掩码到 64 位临时量
fn pop_count(b: &mut dyn IrBuilder, width: Width) -> LiftResult<Temp> {
    let raw = b.pop_tmp(Width::Byte)?;
    let count = b.extend(raw.into(), Width::Qword, false)?;
    b.binary(BinaryOp::And, count.into(), qword(count_mask(width)))?;
    Ok(count)
}

/// 取 `value` 的最低位，移位量为零时得到 0
fn carry_bit(b: &mut dyn IrBuilder, value: Temp, count: Temp) -> LiftResult<Temp> {
    b.binary(BinaryOp::And, value.into(), qword(1))?;
    let cf = b.extend(value.into(), Width::Bit, false)?;
    let shifted = b.test(Condition::Ne, count.into(), qword(0))?;
    b.binary(BinaryOp::And, cf.into(), shifted.into())?;
    Ok(cf)
}

/// 右移最后移出的位：`((v << 1) >> count) & 1`
fn right_carry(b: &mut dyn IrBuilder, wide: Temp, count: Temp) -> LiftResult<Temp> {
    let t = b.compute(BinaryOp::Shl, wide.into(), qword(1))?;
    b.binary(BinaryOp::Shr, t.into(), count.into())?;
    carry_bit(b, t, count)
}

/// 左移最后移出的位，即原值的第 `width - count` 位
fn left_carry(b: &mut dyn IrBuilder, width: Width, wide: Temp, count: Temp) -> LiftResult<Temp> {
    let t = if width == Width::Qword {
        let amount = b.compute(BinaryOp::Sub, qword(64), count.into())?;
        b.compute(BinaryOp::Shr, wide.into(), amount.into())?
    } else {
        let t = b.compute(BinaryOp::Shl, wide.into(), count.into())?;
        b.binary(BinaryOp::Shr, t.into(), qword(u64::from(width.bits())))?;
        t
    };
    carry_bit(b, t, count)
}

fn finish(b: &mut dyn IrBuilder, width: Width, before: Temp, wide: Temp, cf: Temp) -> LiftResult<()> {
    let result = b.extend(wide.into(), width, false)?;
    let flags = flags::shift(b, before.into(), result.into(), cf.into())?;
    b.push(Operand::Temp(result))?;
    flags::publish(b, flags)
}

pub(super) fn shr(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let value = b.pop_tmp(shape.width)?;
    let count = pop_count(b, shape.width)?;
    let wide = b.extend(value.into(), Width::Qword, false)?;
    let result = b.compute(BinaryOp::Shr, wide.into(), count.into())?;
    let cf = right_carry(b, wide, count)?;
    finish(b, shape.width, value, result, cf)
}

pub(super) fn shl(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let value = b.pop_tmp(shape.width)?;
    let count = pop_count(b, shape.width)?;
    let wide = b.extend(value.into(), Width::Qword, false)?;
    let result = b.compute(BinaryOp::Shl, wide.into(), count.into())?;
    let cf = left_carry(b, shape.width, wide, count)?;
    finish(b, shape.width, value, result, cf)
}

/// 双精度左移：`(dst << c) | (src >> (w - c))`
pub(super) fn shld(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let width = shape.width;
    let dst = b.pop_tmp(width)?;
    let src = b.pop_tmp(width)?;
    let count = pop_count(b, width)?;
    let wide_dst = b.extend(dst.into(), Width::Qword, false)?;
    let wide_src = b.extend(src.into(), Width::Qword, false)?;

    let result = b.compute(BinaryOp::Shl, wide_dst.into(), count.into())?;
    // 拆成两次右移，count 为零时不会移动整个位宽
    let amount = b.compute(BinaryOp::Sub, qword(u64::from(width.bits() - 1)), count.into())?;
    let fill = b.compute(BinaryOp::Shr, wide_src.into(), qword(1))?;
    b.binary(BinaryOp::Shr, fill.into(), amount.into())?;
    b.binary(BinaryOp::Or, result.into(), fill.into())?;

    let cf = left_carry(b, width, wide_dst, count)?;
    finish(b, width, dst, result, cf)
}

/// 双精度右移：`(dst >> c) | (src << (w - c))`
pub(super) fn shrd(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let width = shape.width;
    let dst = b.pop_tmp(width)?;
    let src = b.pop_tmp(width)?;
    let count = pop_count(b, width)?;
    let wide_dst = b.extend(dst.into(), Width::Qword, false)?;
    let wide_src = b.extend(src.into(), Width::Qword, false)?;

    let result = b.compute(BinaryOp::Shr, wide_dst.into(), count.into())?;
    let amount = b.compute(BinaryOp::Sub, qword(u64::from(width.bits() - 1)), count.into())?;
    let fill = b.compute(BinaryOp::Shl, wide_src.into(), qword(1))?;
    b.binary(BinaryOp::Shl, fill.into(), amount.into())?;
    b.binary(BinaryOp::Or, result.into(), fill.into())?;

    let cf = right_carry(b, wide_dst, count)?;
    finish(b, width, dst, result, cf)
}
