//! 依赖运行环境的操作码：`RDTSC` / `CPUID`
//!
//! 这是唯一有意打破符号域的地方：发射钉住寄存器的本地块，再把结果压栈。

use vmp_core::{LiftResult, NativeInstruction, NativeReg, NativeRegister, VmOperand};
use vmp_ir::{EscapeKind, NativeBlock, Operand};

use super::Shape;
use crate::builder::IrBuilder;

fn push_native(b: &mut dyn IrBuilder, reg: NativeRegister) -> LiftResult<()> {
    let value = b.tmp(reg.width);
    b.mov(value.into(), reg.into())?;
    b.push(Operand::Temp(value))
}

/// 先压 `edx` 再压 `eax`，低 32 位位于栈顶
pub(super) fn rdtsc(b: &mut dyn IrBuilder, _shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let block = NativeBlock::new(EscapeKind::Inline, vec![NativeInstruction::Rdtsc])
        .pin_write(NativeReg::Rax)
        .pin_write(NativeReg::Rdx);
    b.native(block)?;
    push_native(b, NativeRegister::EDX)?;
    push_native(b, NativeRegister::EAX)
}

/// 弹出叶号到 `eax`，执行后依次压入 `eax`、`ebx`、`ecx`、`edx`
pub(super) fn cpuid(b: &mut dyn IrBuilder, _shape: Shape, operand: &VmOperand) -> LiftResult<()> {
    operand.expect_none()?;
    let leaf = b.pop_tmp(NativeRegister::EAX.width)?;
    b.mov(NativeRegister::EAX.into(), leaf.into())?;
    let block = NativeBlock::new(EscapeKind::Inline, vec![NativeInstruction::Cpuid])
        .pin_read(NativeReg::Rax)
        .pin_read(NativeReg::Rcx)
        .pin_write(NativeReg::Rax)
        .pin_write(NativeReg::Rbx)
        .pin_write(NativeReg::Rcx)
        .pin_write(NativeReg::Rdx);
    b.native(block)?;
    for reg in [
        NativeRegister::EAX,
        NativeRegister::EBX,
        NativeRegister::ECX,
        NativeRegister::EDX,
    ] {
        push_native(b, reg)?;
    }
    Ok(())
}
