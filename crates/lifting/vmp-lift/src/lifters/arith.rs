//! `ADD*` / `MUL*` / `DIV*`

use vmp_core::{LiftResult, VmOperand, Width};
use vmp_ir::{BinaryOp, Operand};

use super::Shape;
use crate::builder::IrBuilder;
use crate::flags;

/// 加法：第一个弹出的值处于被加数位置
pub(super) fn add(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let augend = b.pop_tmp(shape.width)?;
    let addend = b.pop_tmp(shape.width)?;
    let sum = b.compute(BinaryOp::Add, augend.into(), addend.into())?;
    let flags = flags::add(b, augend.into(), addend.into(), sum.into())?;
    b.push(Operand::Temp(sum))?;
    flags::publish(b, flags)
}

/// 无符号乘法，依次压入低半部分、高半部分和标志
pub(super) fn mul(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let lhs = b.pop_tmp(shape.width)?;
    let rhs = b.pop_tmp(shape.width)?;
    let lo = b.compute(BinaryOp::Mul, lhs.into(), rhs.into())?;
    let hi = b.compute(BinaryOp::UMulHi, lhs.into(), rhs.into())?;
    let flags = flags::mul(b, lo.into(), hi.into())?;
    b.push(Operand::Temp(lo))?;
    b.push(Operand::Temp(hi))?;
    flags::publish(b, flags)
}

/// 无符号除法
///
/// 栈上依次是被除数高半部分、低半部分和除数；在 64 位域内计算，商溢出时截断到操作宽度。
/// 依次压入商、余数和标志。
pub(super) fn div(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let width = shape.width;
    let hi = b.pop_tmp(width)?;
    let lo = b.pop_tmp(width)?;
    let divisor = b.pop_tmp(width)?;

    let dividend = b.extend(hi.into(), Width::Qword, false)?;
    b.binary(
        BinaryOp::Shl,
        dividend.into(),
        Operand::imm(u64::from(width.bits()), Width::Qword),
    )?;
    let low = b.extend(lo.into(), Width::Qword, false)?;
    b.binary(BinaryOp::Or, dividend.into(), low.into())?;
    let wide_divisor = b.extend(divisor.into(), Width::Qword, false)?;

    let quotient = b.compute(BinaryOp::UDiv, dividend.into(), wide_divisor.into())?;
    let remainder = b.compute(BinaryOp::URem, dividend.into(), wide_divisor.into())?;
    let quotient = b.extend(quotient.into(), width, false)?;
    let remainder = b.extend(remainder.into(), width, false)?;

    let flags = flags::logic(b, quotient.into())?;
    b.push(Operand::Temp(quotient))?;
    b.push(Operand::Temp(remainder))?;
    flags::publish(b, flags)
}
