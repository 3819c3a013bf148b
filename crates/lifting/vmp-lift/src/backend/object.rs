//! Cranelift 目标文件后端
//!
//! 提升器发出的每条操作直接降级为 Cranelift IR，之后由 Cranelift 的优化流水线处理，
//! 最终写出一个可重定位目标文件。
//!
//! 每个代码单元导出一个函数 `fn(native_sp: i64) -> i64`：
//!
//! - 参数是入口处捕获的本地栈指针，返回值是出口时交还的本地栈指针
//! - 寄存器文件是一个显式栈槽，入口处清零
//! - 临时量、虚拟栈指针、标志和本地寄存器都是 SSA 值（代码单元是直线代码）
//! - 入口/出口本地块由调用桩完成，这里不生成代码
//! - 内联本地块调用导入的 `vmp_native_<助记符>(reads..., out_ptr)`，结果按 `writes`
//!   顺序以 8 字节写入 `out_ptr`

use std::collections::HashMap;
use std::str::FromStr;

use cranelift::prelude::*;
use cranelift_codegen::Context;
use cranelift_codegen::ir::StackSlot;
use cranelift_codegen::isa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_module::{FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use target_lexicon::Triple;
use tracing::{debug, info};
use vmp_core::{LiftError, LiftResult, NativeReg, Width};
use vmp_ir::{BinaryOp, Condition, EscapeKind, NativeBlock, Op, Operand};

use crate::builder::{IrBuilder, UnitState, UnitSummary};
use crate::config::{ObjectConfig, validate_context_slots};

fn backend(context: &str, err: impl std::fmt::Display) -> LiftError {
    LiftError::BackendFailure(format!("{context}: {err}"))
}

const fn clif_type(width: Width) -> Type {
    match width {
        Width::Bit | Width::Byte => types::I8,
        Width::Word => types::I16,
        Width::Dword => types::I32,
        Width::Qword => types::I64,
    }
}

fn offset32(offset: i64) -> LiftResult<i32> {
    i32::try_from(offset)
        .map_err(|_| LiftError::BackendFailure(format!("displacement {offset:#x} exceeds 32 bits")))
}

/// 在任意 Cranelift 模块中定义提升函数的编译器
pub struct CraneliftCompiler<M: Module> {
    module: M,
    ctx: Context,
    builder_ctx: FunctionBuilderContext,
    imports: HashMap<String, FuncId>,
    compiled_count: usize,
}

/// 生成可重定位目标文件的编译器
pub type ObjectCompiler = CraneliftCompiler<ObjectModule>;

impl CraneliftCompiler<ObjectModule> {
    /// 按配置选择目标 ISA；未指定目标三元组时使用宿主
    pub fn new(config: &ObjectConfig) -> LiftResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", config.opt_level.as_str())
            .map_err(|e| backend("opt_level", e))?;
        flag_builder
            .set("is_pic", if config.is_pic { "true" } else { "false" })
            .map_err(|e| backend("is_pic", e))?;

        let isa_builder = match &config.target {
            Some(target) => {
                let triple = Triple::from_str(target)
                    .map_err(|e| backend(&format!("invalid target `{target}`"), e))?;
                isa::lookup(triple).map_err(|e| backend(&format!("target `{target}`"), e))?
            }
            None => cranelift_native::builder().map_err(|e| backend("host isa", e))?,
        };
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| backend("isa", e))?;

        let builder = ObjectBuilder::new(isa, "vmp_lifted", cranelift_module::default_libcall_names())
            .map_err(|e| backend("object builder", e))?;
        Ok(Self::with_module(ObjectModule::new(builder)))
    }

    /// 生成目标文件字节
    pub fn finish(self) -> LiftResult<Vec<u8>> {
        let count = self.compiled_count;
        let bytes = self
            .module
            .finish()
            .emit()
            .map_err(|e| backend("emit", e))?;
        info!("目标文件生成完成: {} 个函数, {} 字节", count, bytes.len());
        Ok(bytes)
    }
}

impl<M: Module> CraneliftCompiler<M> {
    pub fn with_module(module: M) -> Self {
        let ctx = module.make_context();
        Self {
            module,
            ctx,
            builder_ctx: FunctionBuilderContext::new(),
            imports: HashMap::new(),
            compiled_count: 0,
        }
    }

    /// 编译一个代码单元为导出函数 `name`
    ///
    /// `body` 通过 [`ObjectUnit`] 发射全部操作；出错时该函数不会被定义。
    pub fn compile<F>(&mut self, name: &str, context_slots: usize, body: F) -> LiftResult<UnitSummary>
    where
        F: FnOnce(&mut ObjectUnit<'_, M>) -> LiftResult<()>,
    {
        validate_context_slots(context_slots)?;
        self.module.clear_context(&mut self.ctx);
        self.ctx.func.signature.params.push(AbiParam::new(types::I64));
        self.ctx.func.signature.returns.push(AbiParam::new(types::I64));

        let summary = match self.build(context_slots, body) {
            Ok(summary) => summary,
            Err(err) => {
                // 未定案的构建器会把上下文留在脏状态
                self.builder_ctx = FunctionBuilderContext::new();
                return Err(err);
            }
        };

        let id = self
            .module
            .declare_function(name, Linkage::Export, &self.ctx.func.signature)
            .map_err(|e| backend("declare", e))?;
        self.module
            .define_function(id, &mut self.ctx)
            .map_err(|e| backend(&format!("define `{name}`"), e))?;
        self.compiled_count += 1;
        debug!("编译 `{}` 完成", name);
        Ok(summary)
    }

    fn build<F>(&mut self, context_slots: usize, body: F) -> LiftResult<UnitSummary>
    where
        F: FnOnce(&mut ObjectUnit<'_, M>) -> LiftResult<()>,
    {
        let pointer = self.module.target_config().pointer_type();
        let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let native_sp = builder
            .block_params(entry)
            .first()
            .copied()
            .ok_or_else(|| LiftError::BackendFailure("entry block has no parameter".to_string()))?;

        let bytes = u32::try_from(context_slots)
            .ok()
            .and_then(|slots| slots.checked_mul(8))
            .ok_or_else(|| LiftError::Config(format!("context_slots {context_slots} is too large")))?;
        let context =
            builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, bytes, 3));
        let zero = builder.ins().iconst(types::I64, 0);
        for slot in 0..context_slots {
            builder.ins().stack_store(zero, context, offset32(slot as i64 * 8)?);
        }

        let mut natives = HashMap::new();
        natives.insert(NativeReg::Rsp, native_sp);
        let mut unit = ObjectUnit {
            builder,
            module: &mut self.module,
            imports: &mut self.imports,
            pointer,
            context,
            state: UnitState::new(context_slots),
            temps: HashMap::new(),
            natives,
            sp: zero,
            flags: zero,
            terminated: false,
        };
        body(&mut unit)?;
        unit.finalize()
    }

    /// 已定义的函数数
    pub fn compiled_count(&self) -> usize {
        self.compiled_count
    }

    /// 交出底层模块（例如 JIT 模块需要调用方完成定义）
    pub fn into_module(self) -> M {
        self.module
    }
}

/// 正在构建的 Cranelift 函数
pub struct ObjectUnit<'a, M: Module> {
    builder: FunctionBuilder<'a>,
    module: &'a mut M,
    imports: &'a mut HashMap<String, FuncId>,
    pointer: Type,
    context: StackSlot,
    state: UnitState,
    temps: HashMap<u32, Value>,
    natives: HashMap<NativeReg, Value>,
    sp: Value,
    flags: Value,
    terminated: bool,
}

impl<M: Module> ObjectUnit<'_, M> {
    fn native_full(&mut self, reg: NativeReg) -> Value {
        match self.natives.get(&reg) {
            Some(v) => *v,
            None => self.builder.ins().iconst(types::I64, 0),
        }
    }

    fn value(&mut self, operand: &Operand) -> LiftResult<Value> {
        let ty = clif_type(operand.width());
        let value = match *operand {
            Operand::Imm { value, width } => {
                self.builder.ins().iconst(ty, width.truncate(value) as i64)
            }
            Operand::Temp(t) => *self.temps.get(&t.id).ok_or_else(|| {
                LiftError::BackendFailure(format!("temporary t{} read before it was written", t.id))
            })?,
            Operand::Register(reg) => {
                let offset = offset32(reg.byte_offset() as i64)?;
                self.builder.ins().stack_load(ty, self.context, offset)
            }
            Operand::StackPointer => self.sp,
            Operand::Flags => self.flags,
            Operand::Native(reg) => {
                let full = self.native_full(reg.reg);
                if reg.width == Width::Qword {
                    full
                } else {
                    self.builder.ins().ireduce(ty, full)
                }
            }
        };
        Ok(value)
    }

    fn assign(&mut self, operand: &Operand, value: Value) -> LiftResult<()> {
        match *operand {
            Operand::Imm { .. } => {
                return Err(LiftError::InvalidOperand(format!(
                    "{operand} cannot be a destination"
                )));
            }
            Operand::Temp(t) => {
                self.temps.insert(t.id, value);
            }
            Operand::Register(reg) => {
                let offset = offset32(reg.byte_offset() as i64)?;
                self.builder.ins().stack_store(value, self.context, offset);
            }
            Operand::StackPointer => self.sp = value,
            Operand::Flags => self.flags = value,
            Operand::Native(reg) => {
                let merged = if reg.width == Width::Qword {
                    value
                } else {
                    let old = self.native_full(reg.reg);
                    let kept = self.builder.ins().band_imm(old, !reg.width.mask() as i64);
                    let wide = self.builder.ins().uextend(types::I64, value);
                    self.builder.ins().bor(kept, wide)
                };
                self.natives.insert(reg.reg, merged);
            }
        }
        Ok(())
    }

    fn resize(&mut self, value: Value, from: Width, to: Width, signed: bool) -> Value {
        let (src_ty, dst_ty) = (clif_type(from), clif_type(to));
        if to == Width::Bit {
            let narrow = if src_ty == types::I8 {
                value
            } else {
                self.builder.ins().ireduce(types::I8, value)
            };
            return self.builder.ins().band_imm(narrow, 1);
        }
        if from == Width::Bit {
            let wide = if dst_ty == types::I8 {
                value
            } else {
                self.builder.ins().uextend(dst_ty, value)
            };
            return if signed { self.builder.ins().ineg(wide) } else { wide };
        }
        if src_ty == dst_ty {
            value
        } else if to > from && signed {
            self.builder.ins().sextend(dst_ty, value)
        } else if to > from {
            self.builder.ins().uextend(dst_ty, value)
        } else {
            self.builder.ins().ireduce(dst_ty, value)
        }
    }

    fn import(&mut self, name: &str, params: usize) -> LiftResult<FuncId> {
        if let Some(id) = self.imports.get(name) {
            return Ok(*id);
        }
        let mut sig = self.module.make_signature();
        for _ in 0..params {
            sig.params.push(AbiParam::new(types::I64));
        }
        sig.params.push(AbiParam::new(self.pointer));
        let id = self
            .module
            .declare_function(name, Linkage::Import, &sig)
            .map_err(|e| backend(&format!("import `{name}`"), e))?;
        self.imports.insert(name.to_string(), id);
        Ok(id)
    }

    fn native_call(&mut self, block: &NativeBlock) -> LiftResult<()> {
        let mnemonics: Vec<String> = block
            .instructions
            .iter()
            .map(|i| i.mnemonic().to_ascii_lowercase())
            .collect();
        let name = format!("vmp_native_{}", mnemonics.join("_"));
        let id = self.import(&name, block.reads.len())?;
        let callee = self.module.declare_func_in_func(id, self.builder.func);

        let out_bytes = (block.writes.len().max(1) as u32) * 8;
        let out = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, out_bytes, 3));
        let mut args = Vec::with_capacity(block.reads.len() + 1);
        for reg in &block.reads {
            args.push(self.native_full(*reg));
        }
        args.push(self.builder.ins().stack_addr(self.pointer, out, 0));
        self.builder.ins().call(callee, &args);

        for (index, reg) in block.writes.iter().enumerate() {
            let value = self
                .builder
                .ins()
                .stack_load(types::I64, out, offset32(index as i64 * 8)?);
            self.natives.insert(*reg, value);
        }
        Ok(())
    }

    fn finalize(self) -> LiftResult<UnitSummary> {
        if !self.terminated {
            return Err(LiftError::BackendFailure(
                "code unit was finalized without an exit".to_string(),
            ));
        }
        let summary = self.state.summary();
        self.builder.finalize();
        Ok(summary)
    }
}

impl<M: Module> IrBuilder for ObjectUnit<'_, M> {
    fn state(&self) -> &UnitState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut UnitState {
        &mut self.state
    }

    fn emit(&mut self, op: Op) -> LiftResult<()> {
        if self.terminated {
            return Err(LiftError::BackendFailure(format!("`{op}` emitted after the exit")));
        }
        match &op {
            Op::Mov { dst, src } => {
                let v = self.value(src)?;
                self.assign(dst, v)
            }
            Op::Resize { dst, src, signed } => {
                let v = self.value(src)?;
                let v = self.resize(v, src.width(), dst.width(), *signed);
                self.assign(dst, v)
            }
            Op::Binary { op, dst, src } => {
                let lhs = self.value(dst)?;
                let rhs = self.value(src)?;
                let ins = self.builder.ins();
                let v = match op {
                    BinaryOp::Add => ins.iadd(lhs, rhs),
                    BinaryOp::Sub => ins.isub(lhs, rhs),
                    BinaryOp::And => ins.band(lhs, rhs),
                    BinaryOp::Or => ins.bor(lhs, rhs),
                    BinaryOp::Shl => ins.ishl(lhs, rhs),
                    BinaryOp::Shr => ins.ushr(lhs, rhs),
                    BinaryOp::Mul => ins.imul(lhs, rhs),
                    BinaryOp::UMulHi => ins.umulhi(lhs, rhs),
                    BinaryOp::UDiv => ins.udiv(lhs, rhs),
                    BinaryOp::URem => ins.urem(lhs, rhs),
                };
                self.assign(dst, v)
            }
            Op::Not { dst } => {
                let v = self.value(dst)?;
                let v = if dst.width() == Width::Bit {
                    self.builder.ins().bxor_imm(v, 1)
                } else {
                    self.builder.ins().bnot(v)
                };
                self.assign(dst, v)
            }
            Op::Compare {
                cond,
                dst,
                lhs,
                rhs,
            } => {
                let l = self.value(lhs)?;
                let r = self.value(rhs)?;
                let cc = match cond {
                    Condition::Eq => IntCC::Equal,
                    Condition::Ne => IntCC::NotEqual,
                    Condition::Ult => IntCC::UnsignedLessThan,
                    Condition::Slt => IntCC::SignedLessThan,
                };
                let v = self.builder.ins().icmp(cc, l, r);
                self.assign(dst, v)
            }
            Op::Load { dst, base, offset } => {
                let addr = self.value(base)?;
                let ty = clif_type(dst.width());
                let v = self
                    .builder
                    .ins()
                    .load(ty, MemFlags::new(), addr, offset32(*offset)?);
                self.assign(dst, v)
            }
            Op::Store { base, offset, src } => {
                let addr = self.value(base)?;
                let v = self.value(src)?;
                self.builder
                    .ins()
                    .store(MemFlags::new(), v, addr, offset32(*offset)?);
                Ok(())
            }
            Op::Native(block) => match block.kind {
                EscapeKind::Entry | EscapeKind::Exit => Ok(()),
                EscapeKind::Inline => self.native_call(block),
            },
            Op::Ret => {
                let rsp = self.native_full(NativeReg::Rsp);
                self.builder.ins().return_(&[rsp]);
                self.terminated = true;
                Ok(())
            }
        }
    }
}
