//! `READ*` / `WRITE*`

use vmp_core::{LiftResult, VmOperand, Width};
use vmp_ir::Operand;

use super::Shape;
use crate::builder::IrBuilder;

pub(super) fn read(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let address = b.pop_tmp(Width::Qword)?;
    let value = b.tmp(shape.width);
    b.load(value.into(), address.into(), 0)?;
    b.push(Operand::Temp(value))
}

/// 先弹出地址，再弹出要写入的值
pub(super) fn write(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let address = b.pop_tmp(Width::Qword)?;
    let value = b.pop_tmp(shape.width)?;
    b.store(address.into(), 0, value.into())
}
