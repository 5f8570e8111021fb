use std::{cell::Cell, rc::Rc};

use binsym::{ArchitectureKind, Callback, CallbackKind, Context, MemoryAccess, RegisterId};
use test_log::test;

fn context() -> Context {
    let mut ctx = Context::new();
    ctx.set_architecture(ArchitectureKind::X86_64);
    ctx
}

// movabs rax, qword ptr [0x1000]
const LOAD_RAX: &[u8] = b"\x48\xa1\x00\x10\x00\x00\x00\x00\x00\x00";
// mov rax, rbx
const MOV_RAX_RBX: &[u8] = b"\x48\x89\xd8";

#[test]
fn memory_getter_maps_memory_lazily() {
    let mut ctx = context();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let callback = Callback::get_concrete_memory_value(move |state, access| {
        flag.set(true);
        if access.address() == 0x1000 && !state.is_access_mapped(access) {
            state.set_memory_area(0x1000, &0x1122_3344_5566_7788u64.to_le_bytes());
        }
    });
    assert!(ctx.add_callback(callback.clone()));
    assert_eq!(ctx.callback_count(CallbackKind::GetConcreteMemoryValue), 1);

    ctx.process(LOAD_RAX).unwrap();
    assert!(fired.get());
    assert_eq!(
        ctx.concrete_register_value(RegisterId::Rax).unwrap(),
        0x1122_3344_5566_7788
    );

    fired.set(false);
    assert!(ctx.remove_callback(&callback));
    ctx.set_concrete_register_value(RegisterId::Rip, 0).unwrap();
    ctx.process(LOAD_RAX).unwrap();
    assert!(!fired.get());
}

#[test]
fn register_getter_supplies_values() {
    let mut ctx = context();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let callback = Callback::get_concrete_register_value(move |state, reg| {
        flag.set(true);
        if reg.id() == RegisterId::Rbx {
            state.set_register_value(reg, 0x1234);
        }
    });
    ctx.add_callback(callback.clone());
    ctx.process(MOV_RAX_RBX).unwrap();
    assert!(fired.get());
    assert_eq!(ctx.concrete_register_value(RegisterId::Rax).unwrap(), 0x1234);

    fired.set(false);
    ctx.remove_callback(&callback);
    ctx.process(MOV_RAX_RBX).unwrap();
    assert!(!fired.get());
}

#[test]
fn register_getter_skips_symbolic_registers() {
    let mut ctx = context();
    let hits = Rc::new(Cell::new(0));

    let counter = hits.clone();
    ctx.add_callback(Callback::get_concrete_register_value(move |_, _| {
        counter.set(counter.get() + 1)
    }));
    ctx.convert_register_to_symbolic_variable(RegisterId::Rbx, None)
        .unwrap();
    ctx.process(MOV_RAX_RBX).unwrap();
    assert_eq!(hits.get(), 0);
}

#[test]
fn setters_see_committed_writes() {
    let mut ctx = context();
    let writes = Rc::new(std::cell::RefCell::new(Vec::new()));

    let log = writes.clone();
    ctx.add_callback(Callback::set_concrete_register_value(move |_, reg, value| {
        log.borrow_mut().push((reg.id(), value))
    }));
    ctx.set_concrete_register_value(RegisterId::Rbx, 7).unwrap();
    ctx.process(MOV_RAX_RBX).unwrap();

    assert_eq!(
        *writes.borrow(),
        [
            (RegisterId::Rbx, 7),
            (RegisterId::Rax, 7),
            (RegisterId::Rip, 3)
        ]
    );
}

#[test]
fn setters_are_not_called_on_failure() {
    let mut ctx = context();
    let hits = Rc::new(Cell::new(0));

    let counter = hits.clone();
    ctx.add_callback(Callback::set_concrete_memory_value(move |_, _, _| {
        counter.set(counter.get() + 1)
    }));
    let counter = hits.clone();
    ctx.add_callback(Callback::set_concrete_register_value(move |_, _, _| {
        counter.set(counter.get() + 1)
    }));

    // Reads the unmapped [0x1000].
    assert!(ctx.process(LOAD_RAX).is_err());
    assert_eq!(hits.get(), 0);

    let access = MemoryAccess::new(0x1000, 8).unwrap();
    ctx.set_concrete_memory_value(&access, 1).unwrap();
    assert_eq!(hits.get(), 1);

    ctx.clear_callbacks();
    assert_eq!(ctx.callback_count(CallbackKind::SetConcreteMemoryValue), 0);
}

#[test]
fn callbacks_are_registered_once() {
    let mut ctx = context();
    let callback = Callback::set_concrete_memory_value(|_, _, _| {});
    assert!(ctx.add_callback(callback.clone()));
    assert!(!ctx.add_callback(callback.clone()));
    assert_eq!(ctx.callback_count(CallbackKind::SetConcreteMemoryValue), 1);
    assert!(ctx.remove_callback(&callback));
    assert!(!ctx.remove_callback(&callback));

    ctx.add_callback(callback);
    ctx.reset();
    assert_eq!(ctx.callback_count(CallbackKind::SetConcreteMemoryValue), 1);
}
