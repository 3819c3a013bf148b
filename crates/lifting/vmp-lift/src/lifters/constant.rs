//! `LCONST*`

use vmp_core::{LiftResult, VmOperand};
use vmp_ir::Operand;

use super::Shape;
use crate::builder::IrBuilder;

/// 压入立即数：先截断到源宽度，再扩展到目的宽度
pub(super) fn lconst(b: &mut dyn IrBuilder, shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    let raw = operand.immediate(shape.source)?;
    let narrowed = shape.source.truncate(raw);
    let value = if shape.signed {
        shape.source.sign_extend(narrowed)
    } else {
        narrowed
    };
    b.push(Operand::imm(value, shape.width))
}
