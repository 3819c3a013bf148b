//! 参考解释器
//!
//! 直接执行 IR，用来验证提升结果的语义：寄存器文件、按字节寻址的小端内存、
//! 虚拟栈指针、标志寄存器以及一组本地寄存器。本地逃逸块中只有
//! `push`/`pop`/`pushfq`/`popfq`/`rdtsc`/`cpuid` 可以被模拟。

use std::collections::HashMap;

use thiserror::Error;
use vmp_core::{NativeInstruction, NativeOperand, NativeReg, NativeRegister, Width};

use crate::semantics;
use crate::{EscapeKind, NativeBlock, Op, Operand, Routine};

/// 解释器默认的本地栈顶
pub const DEFAULT_STACK_TOP: u64 = 0x0000_7fff_ffff_0000;

/// 执行错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("temporary t{0} read before it was written")]
    UndefinedTemp(u32),
    #[error("division by zero")]
    DivideByZero,
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    #[error("native instruction cannot be emulated: {0}")]
    UnsupportedNative(String),
}

/// 机器状态
#[derive(Debug, Clone)]
pub struct Machine {
    context: Vec<u64>,
    temps: HashMap<u32, u64>,
    memory: HashMap<u64, u8>,
    natives: HashMap<NativeReg, u64>,
    sp: u64,
    flags: u64,
    tsc: u64,
    cpuid: [u32; 4],
    exit_sp: Option<u64>,
    returned: bool,
}

impl Machine {
    pub fn new(context_slots: usize) -> Self {
        let mut natives = HashMap::new();
        natives.insert(NativeReg::Rsp, DEFAULT_STACK_TOP);
        Self {
            context: vec![0; context_slots],
            temps: HashMap::new(),
            memory: HashMap::new(),
            natives,
            sp: 0,
            flags: 0,
            tsc: 0,
            cpuid: [0; 4],
            exit_sp: None,
            returned: false,
        }
    }

    pub fn with_native(mut self, reg: NativeReg, value: u64) -> Self {
        self.natives.insert(reg, value);
        self
    }

    pub fn with_tsc(mut self, tsc: u64) -> Self {
        self.tsc = tsc;
        self
    }

    /// `cpuid` 返回的 eax/ebx/ecx/edx
    pub fn with_cpuid(mut self, regs: [u32; 4]) -> Self {
        self.cpuid = regs;
        self
    }

    /// 执行整个函数，遇到 `ret` 停止
    pub fn run(&mut self, routine: &Routine) -> Result<(), EvalError> {
        for block in &routine.blocks {
            for op in block.ops() {
                self.execute(op)?;
                if self.returned {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, op: &Op) -> Result<(), EvalError> {
        match op {
            Op::Mov { dst, src } => {
                let value = self.read(src)?;
                self.write(dst, value)
            }
            Op::Resize { dst, src, signed } => {
                let value = self.read(src)?;
                self.write(dst, semantics::resize(value, src.width(), dst.width(), *signed))
            }
            Op::Binary { op, dst, src } => {
                let lhs = self.read(dst)?;
                let rhs = self.read(src)?;
                let value = semantics::binary(*op, lhs, rhs, dst.width())
                    .ok_or(EvalError::DivideByZero)?;
                self.write(dst, value)
            }
            Op::Not { dst } => {
                let value = self.read(dst)?;
                self.write(dst, semantics::not(value, dst.width()))
            }
            Op::Compare {
                cond,
                dst,
                lhs,
                rhs,
            } => {
                let l = self.read(lhs)?;
                let r = self.read(rhs)?;
                let value = semantics::compare(*cond, l, r, lhs.width());
                self.write(dst, u64::from(value))
            }
            Op::Load { dst, base, offset } => {
                let addr = self.read(base)?.wrapping_add(*offset as u64);
                let value = self.read_memory(addr, dst.width());
                self.write(dst, value)
            }
            Op::Store { base, offset, src } => {
                let addr = self.read(base)?.wrapping_add(*offset as u64);
                let value = self.read(src)?;
                self.write_memory(addr, value, src.width());
                Ok(())
            }
            Op::Native(block) => self.native_block(block),
            Op::Ret => {
                self.returned = true;
                Ok(())
            }
        }
    }

    fn read(&self, operand: &Operand) -> Result<u64, EvalError> {
        let value = match operand {
            Operand::Imm { value, .. } => *value,
            Operand::Temp(t) => *self.temps.get(&t.id).ok_or(EvalError::UndefinedTemp(t.id))?,
            Operand::Register(reg) => {
                let slot = self.slot(reg.slot)?;
                slot >> reg.bit_offset
            }
            Operand::StackPointer => self.sp,
            Operand::Flags => self.flags,
            Operand::Native(reg) => self.native(reg.reg),
        };
        Ok(operand.width().truncate(value))
    }

    fn write(&mut self, operand: &Operand, value: u64) -> Result<(), EvalError> {
        let value = operand.width().truncate(value);
        match operand {
            Operand::Imm { .. } => {
                return Err(EvalError::InvalidOperand(format!(
                    "immediate {operand} used as a destination"
                )));
            }
            Operand::Temp(t) => {
                self.temps.insert(t.id, value);
            }
            Operand::Register(reg) => {
                let mask = reg.width.mask() << reg.bit_offset;
                let slot = self
                    .context
                    .get_mut(reg.slot as usize)
                    .ok_or_else(|| EvalError::InvalidOperand(format!("no context slot {}", reg.slot)))?;
                *slot = (*slot & !mask) | (value << reg.bit_offset);
            }
            Operand::StackPointer => self.sp = value,
            Operand::Flags => self.flags = value,
            Operand::Native(reg) => self.write_native(*reg, value),
        }
        Ok(())
    }

    fn slot(&self, slot: u32) -> Result<u64, EvalError> {
        self.context
            .get(slot as usize)
            .copied()
            .ok_or_else(|| EvalError::InvalidOperand(format!("no context slot {slot}")))
    }

    fn write_native(&mut self, reg: NativeRegister, value: u64) {
        let mask = reg.width.mask();
        let old = self.native(reg.reg);
        self.natives.insert(reg.reg, (old & !mask) | (value & mask));
    }

    fn native_push(&mut self, value: u64, width: Width) {
        let rsp = self.native(NativeReg::Rsp).wrapping_sub(u64::from(width.bytes()));
        self.write_memory(rsp, value, width);
        self.natives.insert(NativeReg::Rsp, rsp);
    }

    fn native_pop(&mut self, width: Width) -> u64 {
        let rsp = self.native(NativeReg::Rsp);
        let value = self.read_memory(rsp, width);
        self.natives
            .insert(NativeReg::Rsp, rsp.wrapping_add(u64::from(width.bytes())));
        value
    }

    fn native_block(&mut self, block: &NativeBlock) -> Result<(), EvalError> {
        if block.kind == EscapeKind::Exit {
            self.exit_sp = Some(self.native(NativeReg::Rsp));
        }
        for instr in &block.instructions {
            match instr {
                NativeInstruction::Push(NativeOperand::Register(reg)) => {
                    let value = reg.width.truncate(self.native(reg.reg));
                    self.native_push(value, reg.width);
                }
                NativeInstruction::Push(NativeOperand::Immediate(value)) => {
                    self.native_push(*value, Width::Qword);
                }
                NativeInstruction::Pop(NativeOperand::Register(reg)) => {
                    let value = self.native_pop(reg.width);
                    self.write_native(*reg, value);
                }
                NativeInstruction::Pushfq => {
                    let value = self.native(NativeReg::Rflags);
                    self.native_push(value, Width::Qword);
                }
                NativeInstruction::Popfq => {
                    let value = self.native_pop(Width::Qword);
                    self.natives.insert(NativeReg::Rflags, value);
                }
                NativeInstruction::Rdtsc => {
                    self.natives.insert(NativeReg::Rax, self.tsc & 0xffff_ffff);
                    self.natives.insert(NativeReg::Rdx, self.tsc >> 32);
                }
                NativeInstruction::Cpuid => {
                    let [a, b, c, d] = self.cpuid;
                    self.natives.insert(NativeReg::Rax, u64::from(a));
                    self.natives.insert(NativeReg::Rbx, u64::from(b));
                    self.natives.insert(NativeReg::Rcx, u64::from(c));
                    self.natives.insert(NativeReg::Rdx, u64::from(d));
                }
                other => return Err(EvalError::UnsupportedNative(other.to_string())),
            }
        }
        Ok(())
    }

    pub fn context_slot(&self, slot: usize) -> Option<u64> {
        self.context.get(slot).copied()
    }

    pub fn set_context_slot(&mut self, slot: usize, value: u64) {
        if let Some(s) = self.context.get_mut(slot) {
            *s = value;
        }
    }

    pub fn native(&self, reg: NativeReg) -> u64 {
        self.natives.get(&reg).copied().unwrap_or(0)
    }

    pub fn sp(&self) -> u64 {
        self.sp
    }

    pub fn set_sp(&mut self, sp: u64) {
        self.sp = sp;
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u64) {
        self.flags = flags;
    }

    /// 出口尾声开始执行时的本地栈指针
    pub fn exit_sp(&self) -> Option<u64> {
        self.exit_sp
    }

    pub fn returned(&self) -> bool {
        self.returned
    }

    pub fn read_memory(&self, addr: u64, width: Width) -> u64 {
        (0..u64::from(width.bytes())).fold(0, |acc, i| {
            let byte = self.memory.get(&addr.wrapping_add(i)).copied().unwrap_or(0);
            acc | (u64::from(byte) << (i * 8))
        })
    }

    pub fn write_memory(&mut self, addr: u64, value: u64, width: Width) {
        for i in 0..u64::from(width.bytes()) {
            self.memory.insert(addr.wrapping_add(i), (value >> (i * 8)) as u8);
        }
    }
}
