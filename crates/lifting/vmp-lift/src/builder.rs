//! IR 构建器抽象
//!
//! 提升器只面向 [`IrBuilder`] 编写。后端只需实现 [`IrBuilder::emit`]（真正落地一条
//! 操作）和状态访问；栈、寄存器、标志等能力都是在此之上的提供方法，因此两个后端
//! 产生的栈位移和寄存器写集合必然一致。

use std::collections::BTreeSet;

use tracing::trace;
use vmp_core::{LiftError, LiftResult, NativeRegister, VirtualRegister, Width};
use vmp_ir::{BinaryOp, Condition, NativeBlock, Op, Operand, Temp};

use crate::flags::Flag;
use crate::stack::VirtualStack;

/// 一个代码单元的提升状态
#[derive(Debug, Clone)]
pub struct UnitState {
    pub stack: VirtualStack,
    next_temp: u32,
    written: BTreeSet<VirtualRegister>,
    context_slots: usize,
}

/// 代码单元的符号效果摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSummary {
    pub displacement: i64,
    pub rebases: usize,
    pub written: Vec<VirtualRegister>,
    pub temps: u32,
}

impl UnitState {
    pub fn new(context_slots: usize) -> Self {
        Self {
            stack: VirtualStack::new(),
            next_temp: 0,
            written: BTreeSet::new(),
            context_slots,
        }
    }

    pub fn context_slots(&self) -> usize {
        self.context_slots
    }

    pub fn alloc_temp(&mut self, width: Width) -> Temp {
        let id = self.next_temp;
        self.next_temp += 1;
        Temp { id, width }
    }

    /// 由上下文偏移解析子寄存器
    pub fn register(&self, offset: u64, width: Width) -> LiftResult<VirtualRegister> {
        VirtualRegister::from_context(offset, width, self.context_slots)
    }

    fn note_write(&mut self, operand: &Operand) {
        if let Operand::Register(reg) = operand {
            self.written.insert(*reg);
        }
    }

    pub fn written(&self) -> impl Iterator<Item = &VirtualRegister> {
        self.written.iter()
    }

    pub fn summary(&self) -> UnitSummary {
        UnitSummary {
            displacement: self.stack.displacement(),
            rebases: self.stack.rebases(),
            written: self.written.iter().copied().collect(),
            temps: self.next_temp,
        }
    }
}

fn same_width(what: &'static str, expected: Width, found: Width) -> LiftResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(LiftError::WidthMismatch {
            what,
            expected,
            found,
        })
    }
}

fn writable(operand: &Operand) -> LiftResult<()> {
    if operand.is_writable() {
        Ok(())
    } else {
        Err(LiftError::InvalidOperand(format!(
            "{operand} cannot be a destination"
        )))
    }
}

fn storage(what: &'static str, width: Width) -> LiftResult<()> {
    if width.is_storage() {
        Ok(())
    } else {
        Err(LiftError::InvalidOperand(format!(
            "{what} cannot access a {width}-bit value"
        )))
    }
}

/// 后端实现的构建器能力
pub trait IrBuilder {
    fn state(&self) -> &UnitState;
    fn state_mut(&mut self) -> &mut UnitState;

    /// 落地一条已经校验过的操作
    fn emit(&mut self, op: Op) -> LiftResult<()>;

    /// 记录并发射
    fn append(&mut self, op: Op) -> LiftResult<()> {
        if let Some(dst) = op.destination() {
            self.state_mut().note_write(dst);
        }
        trace!("{}", op);
        self.emit(op)
    }

    /// 新临时量
    fn tmp(&mut self, width: Width) -> Temp {
        self.state_mut().alloc_temp(width)
    }

    fn mov(&mut self, dst: Operand, src: Operand) -> LiftResult<()> {
        writable(&dst)?;
        same_width("mov", dst.width(), src.width())?;
        self.append(Op::Mov { dst, src })
    }

    /// 零/符号扩展或截断
    fn resize(&mut self, dst: Operand, src: Operand, signed: bool) -> LiftResult<()> {
        writable(&dst)?;
        self.append(Op::Resize { dst, src, signed })
    }

    /// `dst = dst op src`
    fn binary(&mut self, op: BinaryOp, dst: Operand, src: Operand) -> LiftResult<()> {
        writable(&dst)?;
        if !matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            same_width(op.name(), dst.width(), src.width())?;
        }
        self.append(Op::Binary { op, dst, src })
    }

    fn not(&mut self, dst: Operand) -> LiftResult<()> {
        writable(&dst)?;
        self.append(Op::Not { dst })
    }

    /// 比较结果写入 1 位目的操作数
    fn compare(&mut self, cond: Condition, dst: Operand, lhs: Operand, rhs: Operand) -> LiftResult<()> {
        writable(&dst)?;
        same_width(cond.name(), Width::Bit, dst.width())?;
        same_width(cond.name(), lhs.width(), rhs.width())?;
        self.append(Op::Compare {
            cond,
            dst,
            lhs,
            rhs,
        })
    }

    fn load(&mut self, dst: Operand, base: Operand, offset: i64) -> LiftResult<()> {
        writable(&dst)?;
        storage("load", dst.width())?;
        same_width("load address", Width::Qword, base.width())?;
        self.append(Op::Load { dst, base, offset })
    }

    fn store(&mut self, base: Operand, offset: i64, src: Operand) -> LiftResult<()> {
        storage("store", src.width())?;
        same_width("store address", Width::Qword, base.width())?;
        self.append(Op::Store { base, offset, src })
    }

    /// 带钉住寄存器的本地逃逸
    fn native(&mut self, block: NativeBlock) -> LiftResult<()> {
        self.append(Op::Native(block))
    }

    fn ret(&mut self) -> LiftResult<()> {
        self.append(Op::Ret)
    }

    // ---- 组合能力 ----

    /// 计算 `dst op src` 到新临时量
    fn compute(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> LiftResult<Temp> {
        let t = self.tmp(lhs.width());
        self.mov(t.into(), lhs)?;
        self.binary(op, t.into(), rhs)?;
        Ok(t)
    }

    /// 扩展/截断到新临时量
    fn extend(&mut self, src: Operand, width: Width, signed: bool) -> LiftResult<Temp> {
        let t = self.tmp(width);
        self.resize(t.into(), src, signed)?;
        Ok(t)
    }

    /// 比较到新的 1 位临时量
    fn test(&mut self, cond: Condition, lhs: Operand, rhs: Operand) -> LiftResult<Temp> {
        let t = self.tmp(Width::Bit);
        self.compare(cond, t.into(), lhs, rhs)?;
        Ok(t)
    }

    /// 压栈
    ///
    /// 压入 `$sp` 时写入的是压栈前的栈顶地址；字节值零扩展后占一个 2 字节槽。
    fn push(&mut self, src: Operand) -> LiftResult<()> {
        let src = match src {
            Operand::StackPointer => {
                let disp = self.state().stack.displacement();
                Operand::Temp(self.compute(
                    BinaryOp::Add,
                    Operand::StackPointer,
                    Operand::imm(disp as u64, Width::Qword),
                )?)
            }
            other if other.width() == Width::Byte => {
                Operand::Temp(self.extend(other, Width::Word, false)?)
            }
            other => other,
        };
        storage("push", src.width())?;
        let at = self.state_mut().stack.push(src.width());
        self.store(Operand::StackPointer, at, src)
    }

    /// 出栈
    ///
    /// 弹出到 `$sp` 时栈指针被整体替换，位移归零。
    fn pop(&mut self, dst: Operand) -> LiftResult<()> {
        if dst == Operand::StackPointer {
            let disp = self.state().stack.displacement();
            self.load(Operand::StackPointer, Operand::StackPointer, disp)?;
            self.state_mut().stack.rebase();
            return Ok(());
        }
        storage("pop", dst.width())?;
        let at = self.state().stack.displacement();
        self.load(dst, Operand::StackPointer, at)?;
        self.state_mut().stack.pop(dst.width());
        Ok(())
    }

    /// 弹出到新临时量
    fn pop_tmp(&mut self, width: Width) -> LiftResult<Temp> {
        let t = self.tmp(width);
        self.pop(t.into())?;
        Ok(t)
    }

    /// 压入当前条件码
    fn pushf(&mut self) -> LiftResult<()> {
        self.push(Operand::Flags)
    }

    /// 弹出并安装为当前条件码
    fn popf(&mut self) -> LiftResult<()> {
        self.pop(Operand::Flags)
    }

    /// 把一个 1 位值写入 64 位标志值的指定位
    fn set_flag(&mut self, flags: Operand, flag: Flag, bit: Operand) -> LiftResult<()> {
        same_width("flags", Width::Qword, flags.width())?;
        let shifted = self.extend(bit, Width::Qword, false)?;
        self.binary(BinaryOp::And, shifted.into(), Operand::imm(1, Width::Qword))?;
        self.binary(
            BinaryOp::Shl,
            shifted.into(),
            Operand::imm(u64::from(flag.bit()), Width::Qword),
        )?;
        self.binary(BinaryOp::And, flags, Operand::imm(!flag.mask(), Width::Qword))?;
        self.binary(BinaryOp::Or, flags, shifted.into())
    }

    /// 入口：把本地栈指针捕获为虚拟栈指针
    fn capture_sp(&mut self) -> LiftResult<()> {
        self.mov(Operand::StackPointer, Operand::Native(NativeRegister::RSP))?;
        self.state_mut().stack.reset();
        Ok(())
    }

    /// 出口：把虚拟栈顶交还给本地栈指针
    fn release_sp(&mut self) -> LiftResult<()> {
        let rsp = Operand::Native(NativeRegister::RSP);
        self.mov(rsp, Operand::StackPointer)?;
        let disp = self.state().stack.displacement();
        if disp != 0 {
            self.binary(BinaryOp::Add, rsp, Operand::imm(disp as u64, Width::Qword))?;
        }
        Ok(())
    }
}
