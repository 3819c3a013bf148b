//! 基本块内优化
//!
//! 提升器对每条虚拟指令都按栈语义逐条展开，产生大量只用一次的临时量。
//! 这里提供两个块内 pass：
//!
//! - 常量传播/折叠：已知为常量的临时量代入源操作数，纯运算折叠为 `mov`
//! - 死临时量消除：删除结果从未被读取的纯运算
//!
//! 栈、寄存器文件、标志以及本地逃逸不受影响，所以观察到的语义不变。

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::semantics;
use crate::{BasicBlock, Op, Operand};

/// 优化统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationStats {
    /// 折叠为常量的运算数
    pub folded: usize,
    /// 代入常量的源操作数个数
    pub propagated: usize,
    /// 删除的指令数
    pub eliminated: usize,
}

impl OptimizationStats {
    fn changed(&self, other: &OptimizationStats) -> bool {
        self != other
    }
}

/// 块内优化 pass
pub trait OptimizationPass {
    fn name(&self) -> &'static str;
    fn run(&mut self, block: &mut BasicBlock, stats: &mut OptimizationStats);
}

/// 常量传播与折叠
#[derive(Debug, Default)]
pub struct ConstantPropagation {
    constants: HashMap<u32, u64>,
}

impl ConstantPropagation {
    fn substitute(&self, operand: &mut Operand, stats: &mut OptimizationStats) {
        if let Operand::Temp(t) = operand
            && let Some(&value) = self.constants.get(&t.id)
        {
            *operand = Operand::imm(value, t.width);
            stats.propagated += 1;
        }
    }

    fn fold(op: &Op) -> Option<u64> {
        match op {
            Op::Mov { src, .. } => src.as_imm(),
            Op::Resize { dst, src, signed } => src
                .as_imm()
                .map(|v| semantics::resize(v, src.width(), dst.width(), *signed)),
            Op::Binary { op, dst, src } => {
                semantics::binary(*op, dst.as_imm()?, src.as_imm()?, dst.width())
            }
            Op::Compare { cond, lhs, rhs, .. } => Some(u64::from(semantics::compare(
                *cond,
                lhs.as_imm()?,
                rhs.as_imm()?,
                lhs.width(),
            ))),
            _ => None,
        }
    }
}

impl OptimizationPass for ConstantPropagation {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn run(&mut self, block: &mut BasicBlock, stats: &mut OptimizationStats) {
        self.constants.clear();
        for instr in &mut block.instructions {
            match &mut instr.op {
                Op::Mov { src, .. } | Op::Resize { src, .. } => self.substitute(src, stats),
                Op::Binary { src, .. } => self.substitute(src, stats),
                Op::Compare { lhs, rhs, .. } => {
                    self.substitute(lhs, stats);
                    self.substitute(rhs, stats);
                }
                Op::Load { base, .. } => self.substitute(base, stats),
                Op::Store { base, src, .. } => {
                    self.substitute(base, stats);
                    self.substitute(src, stats);
                }
                Op::Not { .. } | Op::Native(_) | Op::Ret => {}
            }

            let Some(dst) = instr.op.destination().and_then(Operand::as_temp) else {
                continue;
            };

            // 双地址运算的目的操作数也是输入
            let known = self.constants.get(&dst.id).copied();
            let value = match &instr.op {
                Op::Binary { op, src, .. } => known.and_then(|lhs| {
                    semantics::binary(*op, lhs, src.as_imm()?, dst.width)
                }),
                Op::Not { .. } => known.map(|v| semantics::not(v, dst.width)),
                other => Self::fold(other),
            };

            match value {
                Some(value) => {
                    if !matches!(instr.op, Op::Mov { .. }) {
                        instr.op = Op::Mov {
                            dst: dst.into(),
                            src: Operand::imm(value, dst.width),
                        };
                        stats.folded += 1;
                    }
                    self.constants.insert(dst.id, dst.width.truncate(value));
                }
                None => {
                    self.constants.remove(&dst.id);
                }
            }
        }
    }
}

/// 死临时量消除
#[derive(Debug, Default)]
pub struct DeadTempElimination;

impl OptimizationPass for DeadTempElimination {
    fn name(&self) -> &'static str {
        "dead-temp-elimination"
    }

    fn run(&mut self, block: &mut BasicBlock, stats: &mut OptimizationStats) {
        let mut live: HashSet<u32> = HashSet::new();
        let mut keep = vec![true; block.instructions.len()];

        for (index, instr) in block.instructions.iter().enumerate().rev() {
            let dst = instr.op.destination().and_then(Operand::as_temp);
            if let Some(t) = dst {
                if instr.op.is_pure() && !live.contains(&t.id) {
                    keep[index] = false;
                    stats.eliminated += 1;
                    continue;
                }
                live.remove(&t.id);
            }
            live.extend(instr.op.sources().into_iter().filter_map(Operand::as_temp).map(|t| t.id));
        }

        let mut flags = keep.into_iter();
        block
            .instructions
            .retain(|_| flags.next().unwrap_or(true));
    }
}

/// 对单个基本块运行全部 pass 直到不再变化
pub fn optimize(block: &mut BasicBlock) -> OptimizationStats {
    const MAX_ROUNDS: usize = 4;

    let mut passes: Vec<Box<dyn OptimizationPass>> = vec![
        Box::new(ConstantPropagation::default()),
        Box::new(DeadTempElimination),
    ];
    let mut stats = OptimizationStats::default();
    for round in 0..MAX_ROUNDS {
        let before = stats;
        for pass in &mut passes {
            pass.run(block, &mut stats);
            trace!("第 {} 轮 {} 完成: {:?}", round, pass.name(), stats);
        }
        if !stats.changed(&before) {
            break;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryOp, Machine, Temp};
    use vmp_core::Width;

    fn t(id: u32, width: Width) -> Operand {
        Operand::Temp(Temp { id, width })
    }

    #[test]
    fn test_fold_constant_chain() {
        let mut block = BasicBlock::new("b");
        block.append(
            Op::Mov {
                dst: t(0, Width::Qword),
                src: Operand::imm(2, Width::Qword),
            },
            0,
        );
        block.append(
            Op::Binary {
                op: BinaryOp::Add,
                dst: t(0, Width::Qword),
                src: Operand::imm(3, Width::Qword),
            },
            0,
        );
        block.append(
            Op::Store {
                base: Operand::StackPointer,
                offset: -8,
                src: t(0, Width::Qword),
            },
            -8,
        );
        block.append(Op::Ret, -8);

        let stats = optimize(&mut block);
        assert!(stats.folded >= 1);
        assert_eq!(block.len(), 2);
        assert_eq!(
            block.instructions[0].op,
            Op::Store {
                base: Operand::StackPointer,
                offset: -8,
                src: Operand::imm(5, Width::Qword),
            }
        );
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let mut block = BasicBlock::new("b");
        block.append(
            Op::Mov {
                dst: t(0, Width::Dword),
                src: Operand::imm(9, Width::Dword),
            },
            0,
        );
        block.append(
            Op::Binary {
                op: BinaryOp::UDiv,
                dst: t(0, Width::Dword),
                src: Operand::imm(0, Width::Dword),
            },
            0,
        );
        block.append(
            Op::Mov {
                dst: Operand::Flags,
                src: t(0, Width::Dword),
            },
            0,
        );
        optimize(&mut block);
        assert!(
            block
                .ops()
                .any(|op| matches!(op, Op::Binary { op: BinaryOp::UDiv, .. }))
        );
    }

    #[test]
    fn test_loads_are_kept() {
        let mut block = BasicBlock::new("b");
        block.append(
            Op::Load {
                dst: t(0, Width::Qword),
                base: Operand::StackPointer,
                offset: 0,
            },
            0,
        );
        block.append(Op::Ret, 0);
        optimize(&mut block);
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_optimized_block_keeps_semantics() {
        let mut block = BasicBlock::new("b");
        block.append(
            Op::Load {
                dst: t(0, Width::Word),
                base: Operand::StackPointer,
                offset: 0,
            },
            0,
        );
        block.append(
            Op::Mov {
                dst: t(1, Width::Word),
                src: Operand::imm(0xff, Width::Word),
            },
            0,
        );
        block.append(Op::Not { dst: t(1, Width::Word) }, 0);
        block.append(
            Op::Binary {
                op: BinaryOp::And,
                dst: t(0, Width::Word),
                src: t(1, Width::Word),
            },
            0,
        );
        block.append(
            Op::Store {
                base: Operand::StackPointer,
                offset: 0,
                src: t(0, Width::Word),
            },
            0,
        );
        let original = block.clone();
        optimize(&mut block);
        assert!(block.len() < original.len());

        let run = |b: &BasicBlock| {
            let mut m = Machine::new(1);
            m.set_sp(0x100);
            m.write_memory(0x100, 0x1234, Width::Word);
            for op in b.ops() {
                m.execute(op).unwrap();
            }
            m.read_memory(0x100, Width::Word)
        };
        assert_eq!(run(&original), 0x1200);
        assert_eq!(run(&block), 0x1200);
    }
}
