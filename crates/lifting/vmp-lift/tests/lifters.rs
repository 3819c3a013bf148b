//! 逐个操作码族的语义测试
//!
//! 每个测试提升一段指令流，在参考解释器上执行，然后检查出口时虚拟栈、寄存器文件和标志。

mod common;

use common::*;
use vmp_core::{LiftError, Mnemonic, NativeReg, VmInstruction, Width};
use vmp_ir::Machine;
use vmp_lift::{LiftConfig, lift_symbolic};

fn add(width: Width, a: u64, b: u64) -> (u64, u64) {
    let m = match width {
        Width::Byte => Mnemonic::ADDB,
        Width::Word => Mnemonic::ADDW,
        Width::Dword => Mnemonic::ADDDW,
        _ => Mnemonic::ADDQ,
    };
    let machine = run(&wrap(vec![lconst(b, width), lconst(a, width), bare(m)]));
    let flags = stack_at(&machine, 0, Width::Qword);
    let result = stack_at(&machine, 8, width);
    (result, flags & MODELED)
}

#[test]
fn test_add_qword_carry_into_zero() {
    let (result, flags) = add(Width::Qword, u64::MAX, 1);
    assert_eq!(result, 0);
    assert_eq!(flags, ZF | CF);
}

#[test]
fn test_add_byte_signed_overflow() {
    let (result, flags) = add(Width::Byte, 0x7f, 1);
    assert_eq!(result, 0x80);
    assert_eq!(flags, SF | OF);
}

#[test]
fn test_add_word_carry_and_sign() {
    let (result, flags) = add(Width::Word, 0xffff, 0xffff);
    assert_eq!(result, 0xfffe);
    assert_eq!(flags, SF | CF);
}

#[test]
fn test_add_dword_all_of_carry_zero_overflow() {
    let (result, flags) = add(Width::Dword, 0x8000_0000, 0x8000_0000);
    assert_eq!(result, 0);
    assert_eq!(flags, CF | ZF | OF);
}

#[test]
fn test_add_plain() {
    let (result, flags) = add(Width::Dword, 2, 3);
    assert_eq!(result, 5);
    assert_eq!(flags, 0);
}

#[test]
fn test_load_constant_extension() {
    let machine = run(&wrap(vec![
        imm(Mnemonic::LCONSTBSXQ, 0x80, Width::Byte),
        imm(Mnemonic::LCONSTWSXDW, 0x8000, Width::Word),
        imm(Mnemonic::LCONSTBZXW, 0x80, Width::Byte),
        imm(Mnemonic::LCONSTBSXW, 0xff, Width::Byte),
        imm(Mnemonic::LCONSTDWSXQ, 0x7fff_ffff, Width::Dword),
    ]));
    assert_eq!(stack_at(&machine, 0, Width::Qword), 0x7fff_ffff);
    assert_eq!(stack_at(&machine, 8, Width::Word), 0xffff);
    assert_eq!(stack_at(&machine, 10, Width::Word), 0x0080);
    assert_eq!(stack_at(&machine, 12, Width::Dword), 0xffff_8000);
    assert_eq!(stack_at(&machine, 16, Width::Qword), 0xffff_ffff_ffff_ff80);
}

#[test]
fn test_load_constant_width_is_checked() {
    let stream = wrap(vec![imm(Mnemonic::LCONSTQ, 1, Width::Dword)]);
    let err = lift_symbolic(&stream, &LiftConfig::default()).unwrap_err();
    assert_eq!(
        err,
        LiftError::WidthMismatch {
            what: "immediate operand",
            expected: Width::Qword,
            found: Width::Dword,
        }
    );
}

#[test]
fn test_register_round_trip() {
    let machine = run(&wrap(vec![
        imm(Mnemonic::LCONSTQ, 0x1234, Width::Qword),
        imm(Mnemonic::SREGQ, 0, Width::Byte),
        imm(Mnemonic::LREGQ, 0, Width::Byte),
    ]));
    assert_eq!(machine.context_slot(0), Some(0x1234));
    assert_eq!(stack_at(&machine, 0, Width::Qword), 0x1234);
}

#[test]
fn test_sub_register_store() {
    let mut machine = Machine::new(24);
    machine.set_context_slot(2, 0x1111_1111_1111_1111);
    let machine = run_with(
        &wrap(vec![
            imm(Mnemonic::LCONSTW, 0xabcd, Width::Word),
            imm(Mnemonic::SREGW, 0x12, Width::Byte),
            imm(Mnemonic::LCONSTBZXW, 0xee, Width::Byte),
            imm(Mnemonic::SREGB, 0x17, Width::Byte),
            imm(Mnemonic::LREGDW, 0x10, Width::Byte),
        ]),
        machine,
    );
    assert_eq!(machine.context_slot(2), Some(0xee11_1111_abcd_1111));
    assert_eq!(stack_at(&machine, 0, Width::Dword), 0xabcd_1111);
}

#[test]
fn test_straddling_register_rejected() {
    let stream = wrap(vec![
        imm(Mnemonic::LCONSTQ, 1, Width::Qword),
        imm(Mnemonic::SREGQ, 0x0c, Width::Byte),
    ]);
    let err = lift_symbolic(&stream, &LiftConfig::default()).unwrap_err();
    assert_eq!(err, LiftError::RegisterOutOfBounds { offset: 0x0c, size: 8 });
}

#[test]
fn test_nand_and_nor() {
    let machine = run(&wrap(vec![
        lconst(0b1010, Width::Byte),
        lconst(0b1100, Width::Byte),
        bare(Mnemonic::NANDB),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Byte), 0xf7);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & MODELED, SF);

    let machine = run(&wrap(vec![
        lconst(u64::MAX, Width::Qword),
        lconst(0, Width::Qword),
        bare(Mnemonic::NORQ),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Qword), 0);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & MODELED, ZF);
}

#[test]
fn test_nand_clears_carry_and_overflow() {
    let machine = run(&wrap(vec![
        lconst(0x8000_0000, Width::Dword),
        lconst(0x8000_0000, Width::Dword),
        bare(Mnemonic::ADDDW),
        imm(Mnemonic::SREGQ, 0x08, Width::Byte),
        lconst(0, Width::Dword),
        bare(Mnemonic::NANDDW),
    ]));
    // 0 nand 0 = 0xffffffff
    assert_eq!(stack_at(&machine, 8, Width::Dword), 0xffff_ffff);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & (CF | OF), 0);
    assert_eq!(machine.context_slot(1).unwrap() & MODELED, CF | ZF | OF);
}

#[test]
fn test_shift_right_byte() {
    let machine = run(&wrap(vec![
        lconst(1, Width::Byte),
        lconst(0x81, Width::Byte),
        bare(Mnemonic::SHRB),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Byte), 0x40);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & MODELED, CF | OF);
}

#[test]
fn test_shift_left_qword() {
    let machine = run(&wrap(vec![
        lconst(1, Width::Byte),
        lconst(0x8000_0000_0000_0001, Width::Qword),
        bare(Mnemonic::SHLQ),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Qword), 2);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & MODELED, CF | OF);
}

#[test]
fn test_shift_count_is_masked() {
    // 0x21 & 0x1f = 1
    let machine = run(&wrap(vec![
        lconst(0x21, Width::Byte),
        lconst(0x4000, Width::Word),
        bare(Mnemonic::SHLW),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Word), 0x8000);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & MODELED, SF | OF);
}

#[test]
fn test_shift_by_zero_keeps_value() {
    let machine = run(&wrap(vec![
        lconst(0, Width::Byte),
        lconst(0xdead_beef, Width::Dword),
        bare(Mnemonic::SHRDW),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Dword), 0xdead_beef);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & MODELED, SF);
}

#[test]
fn test_double_precision_shifts() {
    let machine = run(&wrap(vec![
        lconst(8, Width::Byte),
        lconst(0x9abc_def0, Width::Dword),
        lconst(0x1234_5678, Width::Dword),
        bare(Mnemonic::SHLDDW),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Dword), 0x3456_789a);

    let machine = run(&wrap(vec![
        lconst(1, Width::Byte),
        lconst(3, Width::Qword),
        lconst(1, Width::Qword),
        bare(Mnemonic::SHRDQ),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Qword), 0x8000_0000_0000_0000);
    assert_eq!(stack_at(&machine, 0, Width::Qword) & (CF | SF), CF | SF);
}

#[test]
fn test_multiply_pushes_low_high_flags() {
    let machine = run(&wrap(vec![
        lconst(0x1_0000, Width::Dword),
        lconst(0x1_0001, Width::Dword),
        bare(Mnemonic::MULDW),
    ]));
    assert_eq!(stack_at(&machine, 0, Width::Qword) & (CF | OF), CF | OF);
    assert_eq!(stack_at(&machine, 8, Width::Dword), 1);
    assert_eq!(stack_at(&machine, 12, Width::Dword), 0x1_0000);

    let machine = run(&wrap(vec![
        lconst(3, Width::Qword),
        lconst(5, Width::Qword),
        bare(Mnemonic::MULQ),
    ]));
    assert_eq!(stack_at(&machine, 0, Width::Qword) & (CF | OF), 0);
    assert_eq!(stack_at(&machine, 8, Width::Qword), 0);
    assert_eq!(stack_at(&machine, 16, Width::Qword), 15);
}

#[test]
fn test_divide_double_width_dividend() {
    // 0x0001_0005 / 0x10
    let machine = run(&wrap(vec![
        lconst(0x10, Width::Word),
        lconst(0x0005, Width::Word),
        lconst(0x0001, Width::Word),
        bare(Mnemonic::DIVW),
    ]));
    assert_eq!(stack_at(&machine, 8, Width::Word), 5);
    assert_eq!(stack_at(&machine, 10, Width::Word), 0x1000);
}

#[test]
fn test_memory_write_then_read() {
    let address = 0x0000_5555_0000_1000;
    let machine = run(&wrap(vec![
        lconst(0xcafe_babe, Width::Dword),
        lconst(address, Width::Qword),
        bare(Mnemonic::WRITEDW),
        lconst(address + 2, Width::Qword),
        bare(Mnemonic::READW),
    ]));
    assert_eq!(machine.read_memory(address, Width::Dword), 0xcafe_babe);
    assert_eq!(stack_at(&machine, 0, Width::Word), 0xcafe);
}

#[test]
fn test_stack_pointer_passthrough() {
    let output = lift(
        &wrap(vec![
            lconst(0x77, Width::Qword),
            bare(Mnemonic::PUSHVSP),
            bare(Mnemonic::POPVSP),
        ]),
        false,
    );
    assert_eq!(output.summary.rebases, 1);
    let machine = execute(&output, Machine::new(24));
    assert_eq!(machine.exit_sp(), Some(vmp_ir::interp::DEFAULT_STACK_TOP - 8));
    assert_eq!(stack_at(&machine, 0, Width::Qword), 0x77);
}

#[test]
fn test_pop_into_stack_pointer_relocates_frame() {
    let frame = 0x0000_6000_0000_0000;
    let machine = run(&wrap(vec![
        lconst(frame, Width::Qword),
        bare(Mnemonic::POPVSP),
        lconst(0x42, Width::Word),
    ]));
    assert_eq!(machine.exit_sp(), Some(frame - 2));
    assert_eq!(machine.read_memory(frame - 2, Width::Word), 0x42);
}

#[test]
fn test_flag_producers_update_current_flags() {
    let machine = run(&wrap(vec![
        lconst(1, Width::Qword),
        lconst(u64::MAX, Width::Qword),
        bare(Mnemonic::ADDQ),
    ]));
    assert_eq!(machine.flags(), stack_at(&machine, 0, Width::Qword));
    assert_eq!(machine.flags() & MODELED, ZF | CF);

    // 最后一条产生标志的指令决定当前条件码
    let machine = run(&wrap(vec![
        lconst(1, Width::Qword),
        lconst(u64::MAX, Width::Qword),
        bare(Mnemonic::ADDQ),
        imm(Mnemonic::SREGQ, 0x00, Width::Byte),
        lconst(0x00ff, Width::Word),
        lconst(0x0f0f, Width::Word),
        bare(Mnemonic::NANDW),
    ]));
    assert_eq!(machine.flags(), stack_at(&machine, 0, Width::Qword));
    assert_eq!(machine.flags() & MODELED, SF);
    assert_eq!(machine.context_slot(0), Some(ZF | CF));
}

#[test]
fn test_load_flags() {
    let machine = run(&wrap(vec![
        lconst(0x8c5, Width::Qword),
        bare(Mnemonic::LFLAGS),
    ]));
    assert_eq!(machine.flags(), 0x8c5);
    assert_eq!(machine.exit_sp(), Some(vmp_ir::interp::DEFAULT_STACK_TOP));
}

#[test]
fn test_rdtsc_pushes_edx_then_eax() {
    let machine = run_with(
        &wrap(vec![bare(Mnemonic::RDTSC)]),
        Machine::new(24).with_tsc(0x1122_3344_5566_7788),
    );
    assert_eq!(stack_at(&machine, 0, Width::Dword), 0x5566_7788);
    assert_eq!(stack_at(&machine, 4, Width::Dword), 0x1122_3344);
}

#[test]
fn test_cpuid() {
    let machine = run_with(
        &wrap(vec![lconst(1, Width::Dword), bare(Mnemonic::CPUID)]),
        Machine::new(24).with_cpuid([0xa, 0xb, 0xc, 0xd]),
    );
    assert_eq!(stack_at(&machine, 0, Width::Dword), 0xd);
    assert_eq!(stack_at(&machine, 4, Width::Dword), 0xc);
    assert_eq!(stack_at(&machine, 8, Width::Dword), 0xb);
    assert_eq!(stack_at(&machine, 12, Width::Dword), 0xa);
    assert_eq!(machine.native(NativeReg::Rbx), 0xb);
}

#[test]
fn test_unknown_mnemonic_aborts() {
    let stream = wrap(vec![lconst(1, Width::Qword), VmInstruction::bare(Mnemonic::JMP)]);
    assert_eq!(
        lift_symbolic(&stream, &LiftConfig::default()).unwrap_err(),
        LiftError::UnknownMnemonic(Mnemonic::JMP)
    );
}

#[test]
fn test_stack_displacement_balance() {
    let output = lift(
        &wrap(vec![
            lconst(1, Width::Qword),
            imm(Mnemonic::SREGQ, 0, Width::Byte),
            lconst(2, Width::Byte),
            imm(Mnemonic::SREGB, 8, Width::Byte),
        ]),
        false,
    );
    assert_eq!(output.summary.displacement, 0);

    let output = lift(
        &wrap(vec![
            lconst(1, Width::Qword),
            lconst(2, Width::Word),
            lconst(3, Width::Byte),
            lconst(4, Width::Dword),
        ]),
        false,
    );
    assert_eq!(output.summary.displacement, -(8 + 2 + 2 + 4));
}
