//! 可移植符号 IR 后端
//!
//! 每条操作原样追加到基本块，并记录发射时的栈位移。定案时可选地运行块内优化。

use tracing::debug;
use vmp_core::{LiftError, LiftResult};
use vmp_ir::{BasicBlock, Op, OptimizationStats, Routine};

use crate::builder::{IrBuilder, UnitState, UnitSummary};

/// 符号后端的产物
#[derive(Debug, Clone)]
pub struct SymbolicOutput {
    pub routine: Routine,
    pub summary: UnitSummary,
    pub stats: OptimizationStats,
}

/// 构建 `vmp_ir` 例程的后端
#[derive(Debug)]
pub struct SymbolicBuilder {
    name: String,
    state: UnitState,
    block: BasicBlock,
    optimize: bool,
}

impl SymbolicBuilder {
    pub fn new(name: impl Into<String>, context_slots: usize) -> Self {
        Self {
            name: name.into(),
            state: UnitState::new(context_slots),
            block: BasicBlock::new("entry"),
            optimize: false,
        }
    }

    pub fn with_optimization(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// 构建中的基本块
    pub fn block(&self) -> &BasicBlock {
        &self.block
    }

    /// 定案：代码单元必须已经以 `ret` 结束
    pub fn finish(mut self) -> LiftResult<SymbolicOutput> {
        if !self.block.is_terminated() {
            return Err(LiftError::BackendFailure(format!(
                "code unit `{}` was finalized without an exit",
                self.name
            )));
        }
        let stats = if self.optimize {
            let stats = vmp_ir::optimize(&mut self.block);
            debug!(
                "优化 `{}`: 折叠 {} / 传播 {} / 删除 {}",
                self.name, stats.folded, stats.propagated, stats.eliminated
            );
            stats
        } else {
            OptimizationStats::default()
        };
        let summary = self.state.summary();
        let routine = Routine::new(self.name, self.state.context_slots(), self.block);
        Ok(SymbolicOutput {
            routine,
            summary,
            stats,
        })
    }
}

impl IrBuilder for SymbolicBuilder {
    fn state(&self) -> &UnitState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut UnitState {
        &mut self.state
    }

    fn emit(&mut self, op: Op) -> LiftResult<()> {
        if self.block.is_terminated() {
            return Err(LiftError::BackendFailure(format!(
                "`{op}` emitted after the exit of `{}`",
                self.name
            )));
        }
        self.block.append(op, self.state.stack.displacement());
        Ok(())
    }
}
