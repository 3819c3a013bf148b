//! Lifter 表
//!
//! 每个操作码族只有一个提升函数，宽度由 [`Shape`] 参数给出。表在首次访问时构建一次，
//! 之后只读，可以在多个会话之间共享。

use std::collections::HashMap;
use std::sync::LazyLock;

use vmp_core::{LiftResult, Mnemonic, VmOperand, Width};

use crate::builder::IrBuilder;

mod arith;
mod bitwise;
mod constant;
mod context;
mod memory;
mod native;
mod shift;
mod stack;

/// 操作码的宽度形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// 操作宽度（压栈结果的宽度）
    pub width: Width,
    /// 立即数宽度，仅 `LCONST*` 使用
    pub source: Width,
    /// 立即数是否符号扩展
    pub signed: bool,
}

impl Shape {
    pub const fn of(width: Width) -> Self {
        Self {
            width,
            source: width,
            signed: false,
        }
    }

    pub const fn extend(source: Width, width: Width, signed: bool) -> Self {
        Self {
            width,
            source,
            signed,
        }
    }
}

/// 提升函数：只闭包于构建器抽象
pub type LiftFn = fn(&mut dyn IrBuilder, Shape, &VmOperand) -> LiftResult<()>;

/// 表项
#[derive(Clone, Copy)]
pub struct LifterEntry {
    pub mnemonic: Mnemonic,
    pub shape: Shape,
    pub lift: LiftFn,
}

impl std::fmt::Debug for LifterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifterEntry")
            .field("mnemonic", &self.mnemonic)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

fn build_table() -> HashMap<Mnemonic, LifterEntry> {
    use Mnemonic::*;
    use Width::{Byte, Dword, Qword, Word};

    let entries: &[(Mnemonic, Shape, LiftFn)] = &[
        (LCONSTQ, Shape::of(Qword), constant::lconst),
        (LCONSTDW, Shape::of(Dword), constant::lconst),
        (LCONSTW, Shape::of(Word), constant::lconst),
        (LCONSTBZXW, Shape::extend(Byte, Word, false), constant::lconst),
        (LCONSTBSXW, Shape::extend(Byte, Word, true), constant::lconst),
        (LCONSTBSXDW, Shape::extend(Byte, Dword, true), constant::lconst),
        (LCONSTBSXQ, Shape::extend(Byte, Qword, true), constant::lconst),
        (LCONSTWSXDW, Shape::extend(Word, Dword, true), constant::lconst),
        (LCONSTWSXQ, Shape::extend(Word, Qword, true), constant::lconst),
        (LCONSTDWSXQ, Shape::extend(Dword, Qword, true), constant::lconst),
        (SREGQ, Shape::of(Qword), context::sreg),
        (SREGDW, Shape::of(Dword), context::sreg),
        (SREGW, Shape::of(Word), context::sreg),
        (SREGB, Shape::of(Byte), context::sreg),
        (LREGQ, Shape::of(Qword), context::lreg),
        (LREGDW, Shape::of(Dword), context::lreg),
        (LREGW, Shape::of(Word), context::lreg),
        (LREGB, Shape::of(Byte), context::lreg),
        (ADDQ, Shape::of(Qword), arith::add),
        (ADDDW, Shape::of(Dword), arith::add),
        (ADDW, Shape::of(Word), arith::add),
        (ADDB, Shape::of(Byte), arith::add),
        (MULQ, Shape::of(Qword), arith::mul),
        (MULDW, Shape::of(Dword), arith::mul),
        (MULW, Shape::of(Word), arith::mul),
        (DIVDW, Shape::of(Dword), arith::div),
        (DIVW, Shape::of(Word), arith::div),
        (READQ, Shape::of(Qword), memory::read),
        (READDW, Shape::of(Dword), memory::read),
        (READW, Shape::of(Word), memory::read),
        (READB, Shape::of(Byte), memory::read),
        (WRITEQ, Shape::of(Qword), memory::write),
        (WRITEDW, Shape::of(Dword), memory::write),
        (WRITEW, Shape::of(Word), memory::write),
        (WRITEB, Shape::of(Byte), memory::write),
        (NANDQ, Shape::of(Qword), bitwise::nand),
        (NANDDW, Shape::of(Dword), bitwise::nand),
        (NANDW, Shape::of(Word), bitwise::nand),
        (NANDB, Shape::of(Byte), bitwise::nand),
        (NORQ, Shape::of(Qword), bitwise::nor),
        (NORDW, Shape::of(Dword), bitwise::nor),
        (NORW, Shape::of(Word), bitwise::nor),
        (NORB, Shape::of(Byte), bitwise::nor),
        (SHRQ, Shape::of(Qword), shift::shr),
        (SHRDW, Shape::of(Dword), shift::shr),
        (SHRW, Shape::of(Word), shift::shr),
        (SHRB, Shape::of(Byte), shift::shr),
        (SHLQ, Shape::of(Qword), shift::shl),
        (SHLDW, Shape::of(Dword), shift::shl),
        (SHLW, Shape::of(Word), shift::shl),
        (SHLB, Shape::of(Byte), shift::shl),
        (SHLDQ, Shape::of(Qword), shift::shld),
        (SHLDDW, Shape::of(Dword), shift::shld),
        (SHRDQ, Shape::of(Qword), shift::shrd),
        (SHRDDW, Shape::of(Dword), shift::shrd),
        (PUSHVSP, Shape::of(Qword), stack::pushvsp),
        (POPVSP, Shape::of(Qword), stack::popvsp),
        (LFLAGS, Shape::of(Qword), stack::lflags),
        (RDTSC, Shape::of(Dword), native::rdtsc),
        (CPUID, Shape::of(Dword), native::cpuid),
    ];

    entries
        .iter()
        .map(|&(mnemonic, shape, lift)| {
            (
                mnemonic,
                LifterEntry {
                    mnemonic,
                    shape,
                    lift,
                },
            )
        })
        .collect()
}

/// 进程级只读 lifter 表
pub static LIFTER_TABLE: LazyLock<HashMap<Mnemonic, LifterEntry>> = LazyLock::new(build_table);

/// 查找助记符的 lifter
pub fn lookup(mnemonic: Mnemonic) -> Option<&'static LifterEntry> {
    LIFTER_TABLE.get(&mnemonic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_non_control_mnemonic_has_a_lifter() {
        for &m in Mnemonic::ALL {
            let expected = !m.is_boundary() && !matches!(m, Mnemonic::JMP | Mnemonic::CALL);
            assert_eq!(lookup(m).is_some(), expected, "{m}");
        }
    }

    #[test]
    fn test_sign_extending_shapes() {
        let entry = lookup(Mnemonic::LCONSTBSXQ).unwrap();
        assert_eq!(entry.shape, Shape::extend(Width::Byte, Width::Qword, true));
        let entry = lookup(Mnemonic::LCONSTBZXW).unwrap();
        assert!(!entry.shape.signed);
    }
}
