//! # vmp-core - 虚拟指令与寄存器模型
//!
//! 栈式虚拟化混淆器的指令模型：助记符、带宽度的操作数、边界 handler 的本地指令、
//! 字节寻址的虚拟寄存器文件，以及提升过程中的错误类型。
//!
//! ```rust
//! use vmp_core::{Mnemonic, VirtualRegister, VmInstruction, Width};
//!
//! let instr = VmInstruction::imm(Mnemonic::SREGQ, 0x10, Width::Byte);
//! let offset = instr.operand.immediate(Width::Byte)?;
//! let reg = VirtualRegister::from_context(offset, Width::Qword, 24)?;
//! assert_eq!(reg.slot, 2);
//! # Ok::<(), vmp_core::LiftError>(())
//! ```

pub mod error;
pub mod instruction;
pub mod mnemonic;
pub mod native;
pub mod register;
pub mod width;

pub use error::{LiftError, LiftResult, ParseError};
pub use instruction::{VmInstruction, VmOperand};
pub use mnemonic::Mnemonic;
pub use native::{NativeInstruction, NativeOperand, NativeReg, NativeRegister};
pub use register::{DEFAULT_CONTEXT_SLOTS, MAX_CONTEXT_SLOTS, SLOT_BYTES, VirtualRegister};
pub use width::Width;
