//! 分派器：助记符 → lifter

use tracing::debug;
use vmp_core::{LiftError, LiftResult, Mnemonic, VmOperand};

use crate::builder::IrBuilder;
use crate::lifters;

/// 在 lifter 表上分派单条虚拟指令
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    /// 没有注册 lifter 的助记符以 `UnknownMnemonic` 失败，调用方必须放弃整个函数
    pub fn dispatch(
        &self,
        mnemonic: Mnemonic,
        operand: &VmOperand,
        unit: &mut dyn IrBuilder,
    ) -> LiftResult<()> {
        let entry = lifters::lookup(mnemonic).ok_or(LiftError::UnknownMnemonic(mnemonic))?;
        debug!(
            "提升 {} {} (栈位移 {})",
            mnemonic,
            operand,
            unit.state().stack.displacement()
        );
        (entry.lift)(unit, entry.shape, operand)
    }
}

/// 使用默认分派器分派
pub fn dispatch(mnemonic: Mnemonic, operand: &VmOperand, unit: &mut dyn IrBuilder) -> LiftResult<()> {
    Dispatcher::new().dispatch(mnemonic, operand, unit)
}
