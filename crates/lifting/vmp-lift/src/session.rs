//! 提升会话
//!
//! 一个会话把一条已解码的指令流提升为一个代码单元：`VMENTER` 必须是第一条，
//! `VMEXIT` 必须是最后一条，其余指令逐条分派。任何错误都使整个代码单元作废。
//!
//! 会话之间互不共享状态，只共享只读的 lifter 表，因此多个函数可以并行提升。

use cranelift_module::Module;
use rayon::prelude::*;
use tracing::info;
use vmp_core::{LiftError, LiftResult, Mnemonic, VmInstruction};

use crate::backend::object::{CraneliftCompiler, ObjectCompiler};
use crate::backend::symbolic::{SymbolicBuilder, SymbolicOutput};
use crate::boundary;
use crate::builder::{IrBuilder, UnitSummary};
use crate::config::{LiftConfig, validate_context_slots, validate_symbol};
use crate::dispatch::Dispatcher;

/// 单个函数的提升驱动
#[derive(Debug, Clone, Copy, Default)]
pub struct LiftSession {
    dispatcher: Dispatcher,
}

impl LiftSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把整条指令流提升到 `unit`
    pub fn run(&self, stream: &[VmInstruction], unit: &mut dyn IrBuilder) -> LiftResult<()> {
        let (enter, rest) = stream
            .split_first()
            .filter(|(first, _)| first.mnemonic == Mnemonic::VMENTER)
            .ok_or_else(|| {
                LiftError::MissingBoundaryHandler("stream does not start with VMENTER".to_string())
            })?;
        let (exit, body) = rest
            .split_last()
            .filter(|(last, _)| last.mnemonic == Mnemonic::VMEXIT)
            .ok_or_else(|| {
                LiftError::MissingBoundaryHandler("stream does not end with VMEXIT".to_string())
            })?;

        info!("开始提升: {} 条虚拟指令", body.len());
        let frame = boundary::emit_entry(unit, &enter.natives)?;
        for instr in body {
            if instr.mnemonic.is_boundary() {
                return Err(LiftError::MissingBoundaryHandler(format!(
                    "{} inside the function body",
                    instr.mnemonic
                )));
            }
            self.dispatcher.dispatch(instr.mnemonic, &instr.operand, unit)?;
        }
        let displacement = unit.state().stack.displacement();
        boundary::emit_exit(unit, &frame, &exit.natives)?;
        info!("提升完成: 出口栈位移 {}", displacement);
        Ok(())
    }
}

/// 用符号后端提升一个函数
pub fn lift_symbolic(stream: &[VmInstruction], config: &LiftConfig) -> LiftResult<SymbolicOutput> {
    config.validate()?;
    lift_symbolic_named(&config.function_name, stream, config)
}

fn lift_symbolic_named(
    name: &str,
    stream: &[VmInstruction],
    config: &LiftConfig,
) -> LiftResult<SymbolicOutput> {
    validate_symbol(name)?;
    validate_context_slots(config.context_slots)?;
    info!("符号后端: `{}`", name);
    let mut builder = SymbolicBuilder::new(name, config.context_slots)
        .with_optimization(config.symbolic.optimize);
    LiftSession::new().run(stream, &mut builder)?;
    builder.finish()
}

/// 目标文件后端的产物
#[derive(Debug, Clone)]
pub struct ObjectOutput {
    pub bytes: Vec<u8>,
    pub summary: UnitSummary,
}

/// 把一个函数提升到已有的 Cranelift 编译器中
pub fn lift_object_into<M: Module>(
    compiler: &mut CraneliftCompiler<M>,
    name: &str,
    stream: &[VmInstruction],
    context_slots: usize,
) -> LiftResult<UnitSummary> {
    validate_symbol(name)?;
    info!("目标文件后端: `{}`", name);
    compiler.compile(name, context_slots, |unit| LiftSession::new().run(stream, unit))
}

/// 用目标文件后端提升一个函数并生成目标文件
pub fn lift_object(stream: &[VmInstruction], config: &LiftConfig) -> LiftResult<ObjectOutput> {
    config.validate()?;
    let mut compiler = ObjectCompiler::new(&config.object)?;
    let summary = lift_object_into(&mut compiler, &config.function_name, stream, config.context_slots)?;
    let bytes = compiler.finish()?;
    Ok(ObjectOutput { bytes, summary })
}

/// 批量提升中的一个函数
#[derive(Debug, Clone)]
pub struct LiftJob {
    pub name: String,
    pub stream: Vec<VmInstruction>,
}

impl LiftJob {
    pub fn new(name: impl Into<String>, stream: Vec<VmInstruction>) -> Self {
        Self {
            name: name.into(),
            stream,
        }
    }
}

/// 并行提升多个互相独立的函数，结果与输入一一对应
pub fn lift_symbolic_batch(jobs: &[LiftJob], config: &LiftConfig) -> Vec<LiftResult<SymbolicOutput>> {
    info!("批量提升 {} 个函数", jobs.len());
    jobs.par_iter()
        .map(|job| lift_symbolic_named(&job.name, &job.stream, config))
        .collect()
}
