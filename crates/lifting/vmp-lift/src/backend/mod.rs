//! 构建器抽象的两个实现
//!
//! - [`symbolic`]：产生可移植的 `vmp_ir` 例程，供后续分析
//! - [`object`]：直接降级为 Cranelift IR 并写出可重定位目标文件

pub mod object;
pub mod symbolic;

pub use object::{CraneliftCompiler, ObjectCompiler, ObjectUnit};
pub use symbolic::{SymbolicBuilder, SymbolicOutput};
