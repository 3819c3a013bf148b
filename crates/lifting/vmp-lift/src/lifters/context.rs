//! `SREG*` / `LREG*`

use vmp_core::{LiftResult, VmOperand, Width};
use vmp_ir::Operand;

use super::Shape;
use crate::builder::IrBuilder;

/// 出栈并写入上下文偏移处的子寄存器
pub(super) fn sreg(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    let offset = operand.immediate(Width::Byte)?;
    let reg = b.state().register(offset, shape.width)?;
    let value = b.pop_tmp(shape.width)?;
    b.mov(reg.into(), value.into())
}

/// 读出子寄存器并压栈
pub(super) fn lreg(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    let offset = operand.immediate(Width::Byte)?;
    let reg = b.state().register(offset, shape.width)?;
    let value = b.tmp(shape.width);
    b.mov(value.into(), reg.into())?;
    b.push(Operand::Temp(value))
}
