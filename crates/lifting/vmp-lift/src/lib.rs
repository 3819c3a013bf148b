//! # vmp-lift - 栈式虚拟机 handler 提升引擎
//!
//! 把代码虚拟化混淆器的虚拟指令流提升为 IR。
//!
//! ## 组成
//!
//! - [`builder`]：IR 构建器抽象（栈、寄存器文件、标志、本地逃逸）
//! - [`stack`]：符号虚拟栈指针的位移模型
//! - [`flags`]：SF/ZF/CF/OF 计算
//! - [`lifters`]：只读的 lifter 表，每个操作码族一个提升函数
//! - [`dispatch`]：助记符分派
//! - [`boundary`]：入口序言/出口尾声重建
//! - [`backend`]：符号 IR 后端与 Cranelift 目标文件后端
//! - [`session`]：会话驱动与并行批量提升
//!
//! ## 示例
//!
//! ```rust
//! use vmp_core::{Mnemonic, NativeInstruction, NativeRegister, VmInstruction, Width};
//! use vmp_lift::{LiftConfig, lift_symbolic};
//!
//! let stream = vec![
//!     VmInstruction::boundary(Mnemonic::VMENTER, vec![NativeInstruction::push(NativeRegister::RAX)]),
//!     VmInstruction::imm(Mnemonic::LCONSTQ, 0x1234, Width::Qword),
//!     VmInstruction::imm(Mnemonic::SREGQ, 0, Width::Byte),
//!     VmInstruction::imm(Mnemonic::LREGQ, 0, Width::Byte),
//!     VmInstruction::boundary(Mnemonic::VMEXIT, vec![NativeInstruction::pop(NativeRegister::RAX)]),
//! ];
//! let output = lift_symbolic(&stream, &LiftConfig::default())?;
//! assert_eq!(output.summary.displacement, -8);
//! # Ok::<(), vmp_core::LiftError>(())
//! ```

pub mod backend;
pub mod boundary;
pub mod builder;
pub mod config;
pub mod dispatch;
pub mod flags;
pub mod lifters;
pub mod session;
pub mod stack;

pub use backend::{CraneliftCompiler, ObjectCompiler, SymbolicBuilder, SymbolicOutput};
pub use builder::{IrBuilder, UnitState, UnitSummary};
pub use config::{ConfigError, LiftConfig, ObjectConfig, OptLevel, SymbolicConfig};
pub use dispatch::{Dispatcher, dispatch};
pub use flags::Flag;
pub use session::{
    LiftJob, LiftSession, ObjectOutput, lift_object, lift_object_into, lift_symbolic,
    lift_symbolic_batch,
};
pub use stack::VirtualStack;
