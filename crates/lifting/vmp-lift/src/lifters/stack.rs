//! `PUSHVSP` / `POPVSP` / `LFLAGS`

use vmp_core::{LiftResult, VmOperand};
use vmp_ir::Operand;

use super::Shape;
use crate::builder::IrBuilder;

/// 把虚拟栈指针本身作为栈值压入
pub(super) fn pushvsp(b: &mut dyn IrBuilder, _shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    b.push(Operand::StackPointer)
}

/// 栈顶值成为新的虚拟栈指针
pub(super) fn popvsp(b: &mut dyn IrBuilder, _shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    b.pop(Operand::StackPointer)
}

pub(super) fn lflags(b: &mut dyn IrBuilder, _shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    b.popf()
}
