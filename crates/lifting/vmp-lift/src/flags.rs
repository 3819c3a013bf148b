//! 条件码计算
//!
//! 所有标志都由 1 位临时量经比较操作得到，最后打包成 RFLAGS 布局的 64 位值。
//! 不使用任何后端特有的溢出/进位指令，两个后端的结果因此逐位一致。

use vmp_core::{LiftResult, Width};
use vmp_ir::{BinaryOp, Condition, Operand, Temp};

use crate::builder::IrBuilder;

/// RFLAGS 中被建模的标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Carry,
    Parity,
    Auxiliary,
    Zero,
    Sign,
    Direction,
    Overflow,
}

impl Flag {
    pub const fn bit(self) -> u32 {
        match self {
            Flag::Carry => 0,
            Flag::Parity => 2,
            Flag::Auxiliary => 4,
            Flag::Zero => 6,
            Flag::Sign => 7,
            Flag::Direction => 10,
            Flag::Overflow => 11,
        }
    }

    pub const fn mask(self) -> u64 {
        1 << self.bit()
    }
}

/// 结果的符号位
pub fn sign(b: &mut dyn IrBuilder, value: Operand) -> LiftResult<Temp> {
    b.test(Condition::Slt, value, Operand::imm(0, value.width()))
}

/// 结果是否为零
pub fn zero(b: &mut dyn IrBuilder, value: Operand) -> LiftResult<Temp> {
    b.test(Condition::Eq, value, Operand::imm(0, value.width()))
}

/// 把若干 1 位值打包为新的 64 位标志值，未列出的位为零
pub fn pack(b: &mut dyn IrBuilder, bits: &[(Flag, Operand)]) -> LiftResult<Temp> {
    let flags = b.tmp(Width::Qword);
    b.mov(flags.into(), Operand::imm(0, Width::Qword))?;
    for &(flag, bit) in bits {
        b.set_flag(flags.into(), flag, bit)?;
    }
    Ok(flags)
}

/// 安装为当前条件码并压栈
pub fn publish(b: &mut dyn IrBuilder, flags: Temp) -> LiftResult<()> {
    b.mov(Operand::Flags, flags.into())?;
    b.pushf()
}

/// 两个操作数符号相同而结果符号不同
fn signed_overflow(b: &mut dyn IrBuilder, sa: Temp, sb: Temp, sr: Temp) -> LiftResult<Temp> {
    let same = b.test(Condition::Eq, sa.into(), sb.into())?;
    let flipped = b.test(Condition::Ne, sr.into(), sa.into())?;
    b.binary(BinaryOp::And, same.into(), flipped.into())?;
    Ok(same)
}

/// 加法 `r = a + c`
///
/// CF = `r <u a`；OF = 两个操作数符号相同且结果符号不同。
pub fn add(b: &mut dyn IrBuilder, a: Operand, c: Operand, r: Operand) -> LiftResult<Temp> {
    let sa = sign(b, a)?;
    let sc = sign(b, c)?;
    let sr = sign(b, r)?;
    let zf = zero(b, r)?;
    let cf = b.test(Condition::Ult, r, a)?;
    let of = signed_overflow(b, sa, sc, sr)?;
    pack(
        b,
        &[
            (Flag::Carry, cf.into()),
            (Flag::Zero, zf.into()),
            (Flag::Sign, sr.into()),
            (Flag::Overflow, of.into()),
        ],
    )
}

/// 位运算：只有 SF/ZF，CF 与 OF 恒为零
pub fn logic(b: &mut dyn IrBuilder, r: Operand) -> LiftResult<Temp> {
    let sf = sign(b, r)?;
    let zf = zero(b, r)?;
    pack(
        b,
        &[
            (Flag::Carry, Operand::imm(0, Width::Bit)),
            (Flag::Zero, zf.into()),
            (Flag::Sign, sf.into()),
            (Flag::Overflow, Operand::imm(0, Width::Bit)),
        ],
    )
}

/// 移位：CF 由调用方给出的最后移出位决定，OF = 移位前后最高位不同
pub fn shift(b: &mut dyn IrBuilder, before: Operand, r: Operand, cf: Operand) -> LiftResult<Temp> {
    let sb = sign(b, before)?;
    let sr = sign(b, r)?;
    let zf = zero(b, r)?;
    let of = b.test(Condition::Ne, sb.into(), sr.into())?;
    pack(
        b,
        &[
            (Flag::Carry, cf),
            (Flag::Zero, zf.into()),
            (Flag::Sign, sr.into()),
            (Flag::Overflow, of.into()),
        ],
    )
}

/// 无符号乘法：CF = OF = 高半部分非零
pub fn mul(b: &mut dyn IrBuilder, lo: Operand, hi: Operand) -> LiftResult<Temp> {
    let sf = sign(b, lo)?;
    let zf = zero(b, lo)?;
    let wide = b.test(Condition::Ne, hi, Operand::imm(0, hi.width()))?;
    pack(
        b,
        &[
            (Flag::Carry, wide.into()),
            (Flag::Zero, zf.into()),
            (Flag::Sign, sf.into()),
            (Flag::Overflow, wide.into()),
        ],
    )
}
