use binsym::{
    config::ModesConfig, ArchitectureKind, Context, EngineConfig, Error, Instruction, MemoryAccess,
    Mode, RegisterId, Stage,
};
use num_bigint::BigUint;
use test_log::test;

fn context(arch: ArchitectureKind) -> Context {
    let mut ctx = Context::new();
    ctx.set_architecture(arch);
    ctx
}

fn value(ctx: &Context, id: RegisterId) -> u64 {
    ctx.concrete_register_value(id).unwrap()
}

fn flags(ctx: &Context) -> [u64; 6] {
    use RegisterId::*;
    [Cf, Pf, Af, Zf, Sf, Of].map(|id| value(ctx, id))
}

#[test]
fn add_sets_arithmetic_flags() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_register_value(RegisterId::Rax, 0xff).unwrap();
    ctx.set_concrete_register_value(RegisterId::Rbx, 1).unwrap();

    // add al, bl
    let inst = ctx.process(b"\x00\xd8").unwrap();
    assert_eq!(inst.disassembly(), "add al,bl");
    assert_eq!(value(&ctx, RegisterId::Rax), 0);
    // cf pf af zf sf of
    assert_eq!(flags(&ctx), [1, 1, 1, 1, 0, 0]);

    // add al, 0x7f; add al, 1
    ctx.process(b"\x04\x7f").unwrap();
    ctx.process(b"\x04\x01").unwrap();
    assert_eq!(value(&ctx, RegisterId::Al), 0x80);
    assert_eq!(flags(&ctx), [0, 0, 1, 0, 1, 1]);
}

#[test]
fn cmp_keeps_operands_and_drives_branches() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_register_value(RegisterId::Rax, 5).unwrap();
    ctx.set_concrete_register_value(RegisterId::Rbx, 5).unwrap();

    // cmp eax, ebx
    let cmp = ctx.process(b"\x39\xd8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 5);
    assert_eq!(value(&ctx, RegisterId::Zf), 1);
    assert!(cmp.symbolic_expressions()[0].origin().is_none());

    // je +0x10
    let je = ctx.process(b"\x74\x10").unwrap();
    assert_eq!(je.address(), 2);
    assert_eq!(je.next_address(), Some(0x14));
    assert_eq!(value(&ctx, RegisterId::Rip), 0x14);

    // jne +0x10
    let jne = ctx.process(b"\x75\x10").unwrap();
    assert_eq!(jne.next_address(), Some(0x16));
}

#[test]
fn logical_operations_clear_carry_and_overflow() {
    let mut ctx = context(ArchitectureKind::X86);
    ctx.set_concrete_register_value(RegisterId::Cf, 1).unwrap();
    ctx.set_concrete_register_value(RegisterId::Of, 1).unwrap();
    ctx.set_concrete_register_value(RegisterId::Eax, 0xf0f0).unwrap();

    // xor eax, eax
    let inst = ctx.process(b"\x31\xc0").unwrap();
    assert_eq!(value(&ctx, RegisterId::Eax), 0);
    assert_eq!(flags(&ctx)[..2], [0, 1]);
    assert_eq!(value(&ctx, RegisterId::Zf), 1);
    assert_eq!(value(&ctx, RegisterId::Of), 0);
    assert_eq!(
        inst.undefined_registers()
            .iter()
            .map(|r| r.id())
            .collect::<Vec<_>>(),
        [RegisterId::Af]
    );
}

#[test]
fn shifts_follow_the_last_bit_out() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_register_value(RegisterId::Al, 0x81).unwrap();

    // shl al, 1
    ctx.process(b"\xd0\xe0").unwrap();
    assert_eq!(value(&ctx, RegisterId::Al), 0x02);
    assert_eq!(value(&ctx, RegisterId::Cf), 1);
    assert_eq!(value(&ctx, RegisterId::Of), 1);

    // sar al, 2 with al = 0x82
    ctx.set_concrete_register_value(RegisterId::Al, 0x82).unwrap();
    let inst = ctx.process(b"\xc0\xf8\x02").unwrap();
    assert_eq!(value(&ctx, RegisterId::Al), 0xe0);
    assert_eq!(value(&ctx, RegisterId::Cf), 1);
    assert!(inst
        .undefined_registers()
        .iter()
        .any(|r| r.id() == RegisterId::Of));
}

#[test]
fn thirty_two_bit_writes_clear_the_upper_half() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_register_value(RegisterId::Rax, u64::MAX).unwrap();
    ctx.set_concrete_register_value(RegisterId::Rbx, 0x1234).unwrap();

    // mov ax, bx
    ctx.process(b"\x66\x89\xd8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 0xffff_ffff_ffff_1234);

    // mov eax, ebx
    let inst = ctx.process(b"\x89\xd8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 0x1234);
    let written = inst
        .written_registers()
        .iter()
        .map(|r| r.id())
        .collect::<Vec<_>>();
    assert_eq!(written, [RegisterId::Eax, RegisterId::Rax, RegisterId::Rip]);
}

#[test]
fn stack_round_trip() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_register_value(RegisterId::Rsp, 0x8000).unwrap();
    ctx.set_concrete_memory_area(0x7fe0, &[0; 0x20]).unwrap();
    ctx.set_concrete_register_value(RegisterId::Rax, 0xdead_beef)
        .unwrap();
    ctx.set_concrete_register_value(RegisterId::Rip, 0x1000).unwrap();

    // push rax; pop rbx
    let push = ctx.process(b"\x50").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rsp), 0x7ff8);
    assert_eq!(push.stores(), [MemoryAccess::new(0x7ff8, 8).unwrap()]);
    ctx.process(b"\x5b").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rbx), 0xdead_beef);
    assert_eq!(value(&ctx, RegisterId::Rsp), 0x8000);

    // call +0x100 at 0x1002, then ret
    let call = ctx.process(b"\xe8\x00\x01\x00\x00").unwrap();
    assert_eq!(call.next_address(), Some(0x1107));
    let saved = MemoryAccess::new(0x7ff8, 8).unwrap();
    assert_eq!(ctx.concrete_memory_value(&saved).unwrap(), 0x1007);
    assert_eq!(
        call.symbolic_expressions()
            .iter()
            .map(|e| e.comment())
            .collect::<Vec<_>>(),
        ["Stack alignment", "Saved Program Counter", "Program Counter"]
    );

    let ret = ctx.process(b"\xc3").unwrap();
    assert_eq!(ret.next_address(), Some(0x1007));
    assert_eq!(value(&ctx, RegisterId::Rsp), 0x8000);
}

#[test]
fn push_in_protected_mode_uses_four_byte_slots() {
    let mut ctx = context(ArchitectureKind::X86);
    ctx.set_concrete_register_value(RegisterId::Esp, 0x100).unwrap();
    ctx.set_concrete_memory_area(0xf0, &[0; 0x10]).unwrap();
    ctx.set_concrete_register_value(RegisterId::Eax, 0x0102_0304)
        .unwrap();

    // push eax
    ctx.process(b"\x50").unwrap();
    assert_eq!(value(&ctx, RegisterId::Esp), 0xfc);
    assert_eq!(
        ctx.concrete_memory_area(0xfc, 4).unwrap(),
        [0x04, 0x03, 0x02, 0x01]
    );
    assert!(ctx.register(RegisterId::Rax).is_err());
}

#[test]
fn failed_instructions_leave_no_trace() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.convert_register_to_symbolic_variable(RegisterId::Rax, Some("rax"))
        .unwrap();
    let before = ctx.symbolic_expressions().count();
    let rax = ctx.symbolic_register(RegisterId::Rax).unwrap();

    // mov rax, qword ptr [0x2000], unmapped
    let mut inst = Instruction::with_address(0x10, *b"\x48\x8b\x04\x25\x00\x20\x00\x00");
    let err = ctx.processing(&mut inst).unwrap_err();
    assert!(matches!(err, Error::UnmappedMemory { address: 0x2000 }));

    assert_eq!(inst.stage(), Stage::Decoded);
    assert!(inst.disassembly().starts_with("mov rax,"));
    assert!(inst.symbolic_expressions().is_empty());
    assert_eq!(ctx.symbolic_expressions().count(), before);
    assert_eq!(value(&ctx, RegisterId::Rip), 0);
    assert!(std::rc::Rc::ptr_eq(
        &ctx.symbolic_register(RegisterId::Rax).unwrap().unwrap(),
        &rax.unwrap()
    ));

    // cpuid has no semantics.
    let mut inst = Instruction::new(*b"\x0f\xa2");
    assert!(matches!(
        ctx.processing(&mut inst),
        Err(Error::UnsupportedInstruction { .. })
    ));
    assert_eq!(inst.stage(), Stage::Decoded);

    let mut inst = Instruction::new(*b"\x48");
    assert!(matches!(
        ctx.processing(&mut inst),
        Err(Error::Decode { .. })
    ));
    assert_eq!(inst.stage(), Stage::Pending);
}

#[test]
fn symbolic_results_follow_variable_values() {
    let mut ctx = context(ArchitectureKind::X86_64);
    let al = ctx
        .convert_register_to_symbolic_variable(RegisterId::Al, Some("input"))
        .unwrap();

    // add al, 1
    let inst = ctx.process(b"\x04\x01").unwrap();
    assert!(inst.is_symbolized());
    assert!(ctx.is_register_symbolized(RegisterId::Zf).unwrap());
    assert!(!ctx.is_register_symbolized(RegisterId::Rip).unwrap());

    let zf = ctx.register_ast(RegisterId::Zf).unwrap();
    let rax = ctx.register_ast(RegisterId::Al).unwrap();
    assert_eq!(zf.evaluate().unwrap().to_u64(), Some(0));

    ctx.set_concrete_variable_value(&al, 0xffu32).unwrap();
    assert_eq!(zf.evaluate().unwrap().to_u64(), Some(1));
    assert_eq!(rax.evaluate().unwrap().to_u64(), Some(0));
    assert!(ctx.set_concrete_variable_value(&al, 0x100u32).is_err());

    ctx.concretize_all_registers().unwrap();
    assert!(!ctx.is_register_symbolized(RegisterId::Zf).unwrap());
}

#[test]
fn symbolic_memory_is_sliced_per_store() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.convert_register_to_symbolic_variable(RegisterId::Rax, None)
        .unwrap();

    // mov qword ptr [0x3000], rax
    ctx.process(b"\x48\x89\x04\x25\x00\x30\x00\x00").unwrap();
    // mov byte ptr [0x3001], 0x41
    ctx.process(b"\xc6\x04\x25\x01\x30\x00\x00\x41").unwrap();
    // mov rbx, qword ptr [0x3000]
    ctx.process(b"\x48\x8b\x1c\x25\x00\x30\x00\x00").unwrap();

    let rbx = ctx.symbolic_register(RegisterId::Rbx).unwrap().unwrap();
    assert_eq!(
        rbx.ast().to_string(),
        "(concat ((_ extract 63 16) ref!1) ref!3 ((_ extract 7 0) ref!1))"
    );
    let word = MemoryAccess::new(0x3000, 2).unwrap();
    assert!(ctx.is_memory_symbolized(&word).unwrap());
    assert_eq!(ctx.concrete_memory_value(&word).unwrap(), 0x4100);

    ctx.concretize_memory(&word).unwrap();
    assert!(!ctx.is_memory_symbolized(&word).unwrap());
    assert!(ctx.symbolic_memory(0x3002).unwrap().is_some());
    ctx.concretize_all_memory().unwrap();
    assert!(ctx.symbolic_memory(0x3002).unwrap().is_none());
}

#[test]
fn aligned_memory_reads_stores_back() {
    let mut ctx = Context::from_config(EngineConfig {
        arch: Some(ArchitectureKind::X86_64),
        modes: ModesConfig {
            aligned_memory: true,
            ..Default::default()
        },
    });
    assert!(ctx.is_mode_enabled(Mode::AlignedMemory));
    ctx.convert_register_to_symbolic_variable(RegisterId::Rax, None)
        .unwrap();

    // mov qword ptr [0x3000], rax; mov rbx, qword ptr [0x3000]
    ctx.process(b"\x48\x89\x04\x25\x00\x30\x00\x00").unwrap();
    ctx.process(b"\x48\x8b\x1c\x25\x00\x30\x00\x00").unwrap();
    let rbx = ctx.symbolic_register(RegisterId::Rbx).unwrap().unwrap();
    assert_eq!(rbx.ast().to_string(), "ref!1");

    // mov ebx, dword ptr [0x3000]
    ctx.process(b"\x8b\x1c\x25\x00\x30\x00\x00").unwrap();
    let rbx = ctx.symbolic_register(RegisterId::Rbx).unwrap().unwrap();
    assert_eq!(
        rbx.ast().to_string(),
        "((_ zero_extend 32) ((_ extract 31 0) ref!1))"
    );
}

#[test]
fn converting_memory_maps_it() {
    let mut ctx = context(ArchitectureKind::X86);
    let access = MemoryAccess::new(0x40, 2).unwrap();
    ctx.set_concrete_memory_area(0x40, &[0x34]).unwrap();

    let var = ctx
        .convert_memory_to_symbolic_variable(&access, Some("word"))
        .unwrap();
    assert_eq!(var.width(), 16);
    assert_eq!(ctx.concrete_variable_value(&var), BigUint::from(0x34u32));
    assert!(ctx.is_memory_mapped(0x40, 2).unwrap());
    assert_eq!(ctx.memory_ast(&access).unwrap().to_string(), "ref!0");

    ctx.set_concrete_variable_value(&var, 0xbeefu32).unwrap();
    assert_eq!(ctx.concrete_memory_value(&access).unwrap(), 0xbeef);

    ctx.unmap_memory(0x40, 2).unwrap();
    assert!(!ctx.is_memory_mapped(0x40, 1).unwrap());
    assert!(!ctx.is_memory_symbolized(&access).unwrap());
}

#[test]
fn undefined_flags_can_be_concretized() {
    for enabled in [false, true] {
        let mut ctx = context(ArchitectureKind::X86_64);
        ctx.enable_mode(Mode::ConcretizeUndefinedRegisters, enabled);
        ctx.convert_register_to_symbolic_variable(RegisterId::Of, None)
            .unwrap();

        // rol al, 7
        let inst = ctx.process(b"\xc0\xc0\x07").unwrap();
        assert_eq!(inst.undefined_registers().len(), 1);
        assert_eq!(ctx.is_register_symbolized(RegisterId::Of).unwrap(), !enabled);
    }
}

#[test]
fn sub_register_arithmetic_sets_flags_at_operand_width() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_register_value(RegisterId::Rax, 0x1_ffff_ffff)
        .unwrap();
    ctx.set_concrete_register_value(RegisterId::Rbx, 1).unwrap();

    // add eax, ebx
    ctx.process(b"\x01\xd8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 0);
    // cf pf af zf sf of
    assert_eq!(flags(&ctx), [1, 1, 1, 1, 0, 0]);

    // inc al with al = 0x7f
    ctx.set_concrete_register_value(RegisterId::Rax, 0x1234_567f)
        .unwrap();
    ctx.process(b"\xfe\xc0").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 0x1234_5680);
    assert_eq!(flags(&ctx), [1, 0, 1, 0, 1, 1]);

    // neg ah with ah = 0x56
    ctx.process(b"\xf6\xdc").unwrap();
    assert_eq!(value(&ctx, RegisterId::Ah), 0xaa);
    assert_eq!(value(&ctx, RegisterId::Rax), 0x1234_aa80);
    assert_eq!(flags(&ctx)[0], 1);
    assert_eq!(flags(&ctx)[4], 1);
}

#[test]
fn sub_register_logic_sets_flags_at_operand_width() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_register_value(RegisterId::Rax, 0x1111_2222_3333_ff00)
        .unwrap();
    ctx.set_concrete_register_value(RegisterId::Rbx, 0x0f00).unwrap();

    // xor ax, bx
    ctx.process(b"\x66\x31\xd8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 0x1111_2222_3333_f000);
    // cf pf zf sf of
    let [cf, pf, _, zf, sf, of] = flags(&ctx);
    assert_eq!([cf, pf, zf, sf, of], [0, 1, 0, 1, 0]);

    // and ax, bx
    ctx.process(b"\x66\x21\xd8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Ax), 0);
    assert_eq!(value(&ctx, RegisterId::Zf), 1);
    assert_eq!(value(&ctx, RegisterId::Sf), 0);
}

#[test]
fn sub_register_shifts_and_rotates_use_operand_bits() {
    let mut ctx = context(ArchitectureKind::X86_64);

    // rol al, 1 with al = 0x40
    ctx.set_concrete_register_value(RegisterId::Rax, 0x40).unwrap();
    ctx.process(b"\xd0\xc0").unwrap();
    assert_eq!(value(&ctx, RegisterId::Al), 0x80);
    assert_eq!(value(&ctx, RegisterId::Cf), 0);
    assert_eq!(value(&ctx, RegisterId::Of), 1);

    // rol al, 7 with al = 0x03
    ctx.set_concrete_register_value(RegisterId::Al, 0x03).unwrap();
    ctx.process(b"\xc0\xc0\x07").unwrap();
    assert_eq!(value(&ctx, RegisterId::Al), 0x81);
    assert_eq!(value(&ctx, RegisterId::Cf), 1);

    // ror al, 1 with al = 0x01
    ctx.set_concrete_register_value(RegisterId::Al, 0x01).unwrap();
    ctx.process(b"\xd0\xc8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Al), 0x80);
    assert_eq!(value(&ctx, RegisterId::Cf), 1);
    assert_eq!(value(&ctx, RegisterId::Of), 1);

    // shl al, 1 with al = 0x80 and upper bits set
    ctx.set_concrete_register_value(RegisterId::Rax, 0xff00_0000_0000_0080)
        .unwrap();
    ctx.process(b"\xd0\xe0").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 0xff00_0000_0000_0000);
    // cf pf af zf sf of
    let [cf, pf, _, zf, sf, of] = flags(&ctx);
    assert_eq!([cf, pf, zf, sf, of], [1, 1, 1, 0, 1]);

    // shr ax, 1 with ax = 0x8001
    ctx.set_concrete_register_value(RegisterId::Ax, 0x8001).unwrap();
    ctx.process(b"\x66\xd1\xe8").unwrap();
    assert_eq!(value(&ctx, RegisterId::Rax), 0xff00_0000_0000_4000);
    assert_eq!(value(&ctx, RegisterId::Cf), 1);
    assert_eq!(value(&ctx, RegisterId::Of), 1);
    assert_eq!(value(&ctx, RegisterId::Sf), 0);
}

#[test]
fn memory_destinations_set_flags() {
    let mut ctx = context(ArchitectureKind::X86_64);
    ctx.set_concrete_memory_area(0x3000, &[0xff]).unwrap();

    // add byte ptr [0x3000], 1
    ctx.process(b"\x80\x04\x25\x00\x30\x00\x00\x01").unwrap();
    assert_eq!(ctx.concrete_memory_area(0x3000, 1).unwrap(), [0]);
    assert_eq!(flags(&ctx), [1, 1, 1, 1, 0, 0]);
}
