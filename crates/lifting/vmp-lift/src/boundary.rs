//! 虚拟机边界重建
//!
//! 入口：重新发射入口 handler 中保存寄存器/标志的压栈序列，然后把本地栈指针捕获为
//! 虚拟栈指针。出口：把虚拟栈顶交还给本地栈指针，发射出口 handler 的出栈序列并结束
//! 代码单元。出口序列必须是入口序列的镜像，否则说明 handler 被错误识别。

use tracing::{debug, warn};
use vmp_core::{LiftError, LiftResult, NativeInstruction, NativeOperand, NativeReg};
use vmp_ir::{EscapeKind, NativeBlock};

use crate::builder::IrBuilder;

/// 入口保存了什么，出口据此校验
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFrame {
    pub saved: Vec<NativeInstruction>,
}

impl EntryFrame {
    /// 期望的出口恢复序列
    pub fn expected_exit(&self) -> Vec<NativeInstruction> {
        mirror(&self.saved)
    }
}

/// 入口中的压栈；内存操作数压栈替换为零占位
pub fn saving_sequence(natives: &[NativeInstruction]) -> Vec<NativeInstruction> {
    natives
        .iter()
        .filter(|instr| instr.is_push())
        .map(|instr| match instr {
            NativeInstruction::Push(NativeOperand::Memory(text)) => {
                warn!("入口压栈 `{}` 的源地址未知，以零占位", text);
                NativeInstruction::Push(NativeOperand::Immediate(0))
            }
            other => other.clone(),
        })
        .collect()
}

/// 出口中的出栈
pub fn restoring_sequence(natives: &[NativeInstruction]) -> Vec<NativeInstruction> {
    natives
        .iter()
        .filter(|instr| instr.is_pop())
        .cloned()
        .collect()
}

/// 入口保存序列的镜像：逆序，压栈变出栈；立即数占位由虚拟机自己消费，不参与镜像
pub fn mirror(saving: &[NativeInstruction]) -> Vec<NativeInstruction> {
    saving
        .iter()
        .rev()
        .filter_map(|instr| match instr {
            NativeInstruction::Push(NativeOperand::Register(reg)) => {
                Some(NativeInstruction::pop(*reg))
            }
            NativeInstruction::Pushfq => Some(NativeInstruction::Popfq),
            _ => None,
        })
        .collect()
}

fn render(seq: &[NativeInstruction]) -> String {
    seq.iter()
        .map(|instr| instr.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 校验出口序列并返回其恢复部分
pub fn verify_exit(
    frame: &EntryFrame,
    natives: &[NativeInstruction],
) -> LiftResult<Vec<NativeInstruction>> {
    let restoring = restoring_sequence(natives);
    let expected = frame.expected_exit();
    if restoring != expected {
        return Err(LiftError::MissingBoundaryHandler(format!(
            "exit restores [{}] but entry saved [{}], expected [{}]",
            render(&restoring),
            render(&frame.saved),
            render(&expected)
        )));
    }
    Ok(restoring)
}

fn touched(seq: &[NativeInstruction]) -> Vec<NativeReg> {
    let mut regs = Vec::new();
    for instr in seq {
        let reg = match instr {
            NativeInstruction::Push(NativeOperand::Register(r))
            | NativeInstruction::Pop(NativeOperand::Register(r)) => r.reg,
            NativeInstruction::Pushfq | NativeInstruction::Popfq => NativeReg::Rflags,
            _ => continue,
        };
        if !regs.contains(&reg) {
            regs.push(reg);
        }
    }
    regs
}

/// 发射入口序言并捕获虚拟栈指针
pub fn emit_entry(b: &mut dyn IrBuilder, natives: &[NativeInstruction]) -> LiftResult<EntryFrame> {
    let saved = saving_sequence(natives);
    let mut block = NativeBlock::new(EscapeKind::Entry, saved.clone());
    for reg in touched(&saved) {
        block = block.pin_read(reg);
    }
    block = block.pin_read(NativeReg::Rsp).pin_write(NativeReg::Rsp);
    debug!("入口保存 {} 条: [{}]", saved.len(), render(&saved));
    b.native(block)?;
    b.capture_sp()?;
    Ok(EntryFrame { saved })
}

/// 发射出口尾声并结束代码单元
pub fn emit_exit(
    b: &mut dyn IrBuilder,
    frame: &EntryFrame,
    natives: &[NativeInstruction],
) -> LiftResult<()> {
    let restoring = verify_exit(frame, natives)?;
    b.release_sp()?;
    let mut block = NativeBlock::new(EscapeKind::Exit, restoring).pin_read(NativeReg::Rsp);
    for reg in touched(&block.instructions) {
        block = block.pin_write(reg);
    }
    block = block.pin_write(NativeReg::Rsp);
    b.native(block)?;
    b.ret()
}
