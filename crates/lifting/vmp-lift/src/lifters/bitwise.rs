//! `NAND*` / `NOR*`

use vmp_core::{LiftResult, VmOperand};
use vmp_ir::{BinaryOp, Operand, Temp};

use super::Shape;
use crate::builder::IrBuilder;
use crate::flags;

fn inverted_pair(b: &mut dyn IrBuilder, shape: Shape) -> LiftResult<(Temp, Temp)> {
    let a = b.pop_tmp(shape.width)?;
    let c = b.pop_tmp(shape.width)?;
    b.not(a.into())?;
    b.not(c.into())?;
    Ok((a, c))
}

fn finish(b: &mut dyn IrBuilder, result: Temp) -> LiftResult<()> {
    let flags = flags::logic(b, result.into())?;
    b.push(Operand::Temp(result))?;
    flags::publish(b, flags)
}

/// `~a | ~b`
pub(super) fn nand(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let (a, c) = inverted_pair(b, shape)?;
    b.binary(BinaryOp::Or, a.into(), c.into())?;
    finish(b, a)
}

/// `~a & ~b`
pub(super) fn nor(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let (a, c) = inverted_pair(b, shape)?;
    b.binary(BinaryOp::And, a.into(), c.into())?;
    finish(b, a)
}
