//! 集成测试共用的指令流构造与执行工具

#![allow(dead_code)]

use vmp_core::{Mnemonic, NativeInstruction, VmInstruction, Width};
use vmp_ir::Machine;
use vmp_lift::{LiftConfig, SymbolicOutput, lift_symbolic};

pub fn config(optimize: bool) -> LiftConfig {
    let mut config = LiftConfig::default();
    config.symbolic.optimize = optimize;
    config
}

pub fn enter(natives: Vec<NativeInstruction>) -> VmInstruction {
    VmInstruction::boundary(Mnemonic::VMENTER, natives)
}

pub fn exit(natives: Vec<NativeInstruction>) -> VmInstruction {
    VmInstruction::boundary(Mnemonic::VMEXIT, natives)
}

/// 用空的入口/出口包住函数体
pub fn wrap(body: Vec<VmInstruction>) -> Vec<VmInstruction> {
    let mut stream = vec![enter(Vec::new())];
    stream.extend(body);
    stream.push(exit(Vec::new()));
    stream
}

pub fn bare(m: Mnemonic) -> VmInstruction {
    VmInstruction::bare(m)
}

pub fn imm(m: Mnemonic, value: u64, width: Width) -> VmInstruction {
    VmInstruction::imm(m, value, width)
}

/// 按宽度压入一个常量（字节值用零扩展的字压入）
pub fn lconst(value: u64, width: Width) -> VmInstruction {
    match width {
        Width::Byte => imm(Mnemonic::LCONSTBZXW, value, Width::Byte),
        Width::Word => imm(Mnemonic::LCONSTW, value, Width::Word),
        Width::Dword => imm(Mnemonic::LCONSTDW, value, Width::Dword),
        _ => imm(Mnemonic::LCONSTQ, value, Width::Qword),
    }
}

/// `RUST_LOG=vmp_lift=trace cargo test` 时输出提升日志
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn lift(stream: &[VmInstruction], optimize: bool) -> SymbolicOutput {
    init_tracing();
    lift_symbolic(stream, &config(optimize)).expect("lift")
}

pub fn execute(output: &SymbolicOutput, machine: Machine) -> Machine {
    let mut machine = machine;
    machine.run(&output.routine).expect("execute");
    assert!(machine.returned());
    machine
}

/// 提升并执行，优化前后结果必须一致
pub fn run_with(stream: &[VmInstruction], machine: Machine) -> Machine {
    let plain = execute(&lift(stream, false), machine.clone());
    let optimized = execute(&lift(stream, true), machine);
    assert_eq!(plain.exit_sp(), optimized.exit_sp());
    let exit_sp = plain.exit_sp().expect("exit boundary executed");
    assert_eq!(
        plain.read_memory(exit_sp, Width::Qword),
        optimized.read_memory(exit_sp, Width::Qword)
    );
    plain
}

pub fn run(stream: &[VmInstruction]) -> Machine {
    run_with(stream, Machine::new(vmp_core::DEFAULT_CONTEXT_SLOTS))
}

/// 出口时虚拟栈上偏移 `offset` 处的值
pub fn stack_at(m: &Machine, offset: u64, width: Width) -> u64 {
    let exit_sp = m.exit_sp().expect("exit boundary executed");
    m.read_memory(exit_sp + offset, width)
}

pub const CF: u64 = 1 << 0;
pub const ZF: u64 = 1 << 6;
pub const SF: u64 = 1 << 7;
pub const OF: u64 = 1 << 11;
pub const MODELED: u64 = CF | ZF | SF | OF;
