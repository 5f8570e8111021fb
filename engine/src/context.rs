use std::rc::Rc;

use itertools::Itertools;
use num_bigint::BigUint;

use common::{log_debug, log_effect, log_info, log_warn, utils::low_mask};

use crate::{
    arch::{
        x86::{ConcreteWrite, IcedDecoder, Semantics},
        ArchitectureKind, MemoryAccess, Register, RegisterId,
    },
    ast::{context::AstContext, SharedAstNode},
    callbacks::{Callback, CallbackKind, Callbacks},
    config::{EngineConfig, Mode, ModesConfig},
    error::{Error, Result},
    expr::{SharedSymbolicExpression, SymbolicExpressions},
    instruction::{Instruction, InstructionDecoder, Stage},
    state::{ConcreteState, MachineState},
    utils::low_u64,
    vars::{SharedSymbolicVariable, SymbolicVariables, VariableOrigin},
};

/// An execution context: the machine state of one architecture together with
/// the symbolic variables, expressions and callbacks that act on it.
///
/// A context is confined to the thread that created it.
pub struct Context {
    decoder: Rc<dyn InstructionDecoder>,
    modes: ModesConfig,
    ast: Rc<AstContext>,
    variables: SymbolicVariables,
    expressions: SymbolicExpressions,
    machine: Option<MachineState>,
    callbacks: Callbacks,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            decoder: Rc::new(IcedDecoder),
            modes: ModesConfig::default(),
            ast: Rc::default(),
            variables: SymbolicVariables::default(),
            expressions: SymbolicExpressions::default(),
            machine: None,
            callbacks: Callbacks::default(),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: EngineConfig) -> Self {
        let mut context = Self {
            modes: config.modes,
            ..Default::default()
        };
        if let Some(arch) = config.arch {
            context.set_architecture(arch);
        }
        context
    }

    pub fn architecture(&self) -> Option<ArchitectureKind> {
        self.machine.as_ref().map(|m| m.concrete().arch())
    }

    /// Sets the architecture, resetting the state of the context.
    pub fn set_architecture(&mut self, arch: ArchitectureKind) {
        log_info!("Setting architecture to {}", arch);
        self.clear();
        self.machine = Some(MachineState::new(arch));
    }

    /// Replaces the decoder used by [`Context::processing`].
    pub fn set_decoder(&mut self, decoder: impl InstructionDecoder + 'static) {
        self.decoder = Rc::new(decoder);
    }

    pub fn enable_mode(&mut self, mode: Mode, enabled: bool) {
        log_debug!("Mode {} is now {}", mode, if enabled { "on" } else { "off" });
        self.modes.set(mode, enabled);
    }

    pub fn is_mode_enabled(&self, mode: Mode) -> bool {
        self.modes.is_enabled(mode)
    }

    /// Drops the machine state, the symbolic variables and the expressions.
    /// The architecture, the modes and the callbacks are kept.
    pub fn reset(&mut self) {
        let arch = self.architecture();
        self.clear();
        self.machine = arch.map(MachineState::new);
    }

    fn clear(&mut self) {
        self.ast = Rc::default();
        self.variables = SymbolicVariables::default();
        self.expressions = SymbolicExpressions::default();
        self.machine = None;
    }

    fn machine(&self) -> Result<&MachineState> {
        self.machine
            .as_ref()
            .ok_or_else(unset_architecture)
    }

    fn machine_mut(&mut self) -> Result<&mut MachineState> {
        self.machine
            .as_mut()
            .ok_or_else(unset_architecture)
    }

    /// The AST builder of the context. Nodes built with it can be mixed with
    /// the ASTs of the context's expressions.
    pub fn ast_context(&self) -> Rc<AstContext> {
        self.ast.clone()
    }

    /* Instruction processing */

    /// Decodes `inst` and applies its semantics.
    ///
    /// On failure the machine state and the expression table are left as they
    /// were, and `inst` keeps its decoding only. Concrete writes made by
    /// `GetConcrete*` callbacks are not undone.
    #[tracing::instrument(level = "debug", skip_all, fields(address = inst.address()))]
    pub fn processing(&mut self, inst: &mut Instruction) -> Result<()> {
        let machine = self.machine.as_mut().ok_or_else(unset_architecture)?;
        let arch = machine.concrete().arch();

        inst.reset();
        self.decoder.decode(arch, inst)?;

        let expressions_len = self.expressions.len();
        machine.begin();
        let result = Semantics::new(
            arch,
            self.modes,
            &self.ast,
            &mut self.expressions,
            machine,
            &self.callbacks,
            inst,
        )
        .apply();

        match result {
            Ok(writes) => {
                machine.commit();
                notify(&self.callbacks, machine.concrete_mut(), writes);
                inst.stage = Stage::Done;
                log_debug!(
                    "Processed `{}`, read: [{}], written: [{}]",
                    inst,
                    inst.read_registers().iter().map(Register::name).join(", "),
                    inst.written_registers().iter().map(Register::name).join(", ")
                );
                Ok(())
            }
            Err(err) => {
                machine.rollback();
                self.expressions.truncate(expressions_len);
                inst.discard_effects();
                log_debug!("Rolled back `{}`: {}", inst, err);
                Err(err)
            }
        }
    }

    /// Processes `opcode` at the current program counter.
    pub fn process(&mut self, opcode: impl Into<Vec<u8>>) -> Result<Instruction> {
        let concrete = self.machine()?.concrete();
        let pc = concrete.register(concrete.arch().program_counter())?;
        let mut inst = Instruction::with_address(concrete.register_value(&pc), opcode);
        self.processing(&mut inst)?;
        Ok(inst)
    }

    /* Concrete state */

    pub fn register(&self, id: RegisterId) -> Result<Register> {
        self.machine()?.concrete().register(id)
    }

    /// The concrete state. Writes should go through the context so that the
    /// symbolic state stays consistent.
    pub fn concrete_state(&self) -> Result<&ConcreteState> {
        self.machine().map(MachineState::concrete)
    }

    pub fn concrete_register_value(&self, id: RegisterId) -> Result<u64> {
        let concrete = self.machine()?.concrete();
        Ok(concrete.register_value(&concrete.register(id)?))
    }

    /// Sets the concrete value of a register. A symbolic parent register is
    /// concretized first.
    pub fn set_concrete_register_value(&mut self, id: RegisterId, value: u64) -> Result<()> {
        let reg = self.register(id)?;
        if value & !low_mask(reg.size()) != 0 {
            return Err(Error::range(format!(
                "value {value:#x} does not fit in {reg}"
            )));
        }

        let machine = self.machine.as_mut().ok_or_else(unset_architecture)?;
        if machine.symbolic().register(reg.parent()).is_some() {
            log_warn!("Concretizing {} to set the value of {}", reg.parent(), reg.name());
            machine.bind_register(reg.parent(), None);
        }
        machine.set_register_value(&reg, value);
        notify(
            &self.callbacks,
            machine.concrete_mut(),
            [ConcreteWrite::Register(reg, value)],
        );
        Ok(())
    }

    pub fn concrete_memory_value(&self, access: &MemoryAccess) -> Result<u64> {
        self.machine()?.concrete().memory_value(access)
    }

    /// Sets (and maps) the concrete value of a memory cell. Symbolic bytes in
    /// it are concretized.
    pub fn set_concrete_memory_value(&mut self, access: &MemoryAccess, value: u64) -> Result<()> {
        if value & !low_mask(access.bits()) != 0 {
            return Err(Error::range(format!(
                "value {value:#x} does not fit in {access}"
            )));
        }

        let machine = self.machine.as_mut().ok_or_else(unset_architecture)?;
        machine.bind_memory_access(access, None, false);
        machine.set_memory_value(access, value);
        notify(
            &self.callbacks,
            machine.concrete_mut(),
            [ConcreteWrite::Memory(*access, value)],
        );
        Ok(())
    }

    pub fn concrete_memory_area(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.machine()?.concrete().memory_area(address, size)
    }

    /// Sets (and maps) the bytes from `address`. Symbolic bytes are
    /// concretized.
    pub fn set_concrete_memory_area(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        let machine = self.machine.as_mut().ok_or_else(unset_architecture)?;
        let mut writes = Vec::with_capacity(bytes.len());
        for (i, byte) in bytes.iter().enumerate() {
            let access = MemoryAccess::new(address.wrapping_add(i as u64), 1)?;
            machine.bind_memory_access(&access, None, false);
            machine.set_memory_value(&access, u64::from(*byte));
            writes.push(ConcreteWrite::Memory(access, u64::from(*byte)));
        }
        notify(&self.callbacks, machine.concrete_mut(), writes);
        Ok(())
    }

    /// Whether every byte in `address..address + size` has a concrete value.
    pub fn is_memory_mapped(&self, address: u64, size: usize) -> Result<bool> {
        let concrete = self.machine()?.concrete();
        Ok((0..size as u64).all(|i| concrete.is_mapped(address.wrapping_add(i))))
    }

    /// Removes the concrete values of the bytes in `address..address + size`
    /// and their symbolic bindings.
    pub fn unmap_memory(&mut self, address: u64, size: usize) -> Result<()> {
        let machine = self.machine_mut()?;
        for i in 0..size as u64 {
            let access = MemoryAccess::new(address.wrapping_add(i), 1)?;
            machine.bind_memory_access(&access, None, false);
        }
        machine.concrete_mut().unmap_memory(address, size);
        Ok(())
    }

    /* Symbolic state */

    /// The expression bound to the parent of the register, if any.
    pub fn symbolic_register(&self, id: RegisterId) -> Result<Option<SharedSymbolicExpression>> {
        let reg = self.register(id)?;
        Ok(self.machine()?.symbolic().register(reg.parent()).cloned())
    }

    /// The expression the byte at `address` is bound to, if any.
    pub fn symbolic_memory(&self, address: u64) -> Result<Option<SharedSymbolicExpression>> {
        Ok(self
            .machine()?
            .symbolic()
            .memory(address)
            .map(|cell| cell.expr.clone()))
    }

    /// The current value of a register as an AST.
    pub fn register_ast(&self, id: RegisterId) -> Result<SharedAstNode> {
        let reg = self.register(id)?;
        self.machine()?.register_ast(&self.ast, &reg)
    }

    /// The current value of a memory cell as an AST.
    pub fn memory_ast(&self, access: &MemoryAccess) -> Result<SharedAstNode> {
        self.machine()?.memory_ast(&self.ast, access)
    }

    pub fn is_register_symbolized(&self, id: RegisterId) -> Result<bool> {
        self.register_ast(id).map(|node| node.is_symbolized())
    }

    pub fn is_memory_symbolized(&self, access: &MemoryAccess) -> Result<bool> {
        let symbolic = self.machine()?.symbolic();
        Ok(access
            .byte_addresses()
            .filter_map(|a| symbolic.memory(a))
            .any(|cell| cell.expr.is_symbolized()))
    }

    /// Drops the symbolic binding of the parent of the register, keeping its
    /// concrete value.
    pub fn concretize_register(&mut self, id: RegisterId) -> Result<()> {
        let reg = self.register(id)?;
        self.machine_mut()?.bind_register(reg.parent(), None);
        Ok(())
    }

    pub fn concretize_memory(&mut self, access: &MemoryAccess) -> Result<()> {
        self.machine_mut()?.bind_memory_access(access, None, false);
        Ok(())
    }

    pub fn concretize_all_registers(&mut self) -> Result<()> {
        let machine = self.machine_mut()?;
        let parents = machine
            .symbolic()
            .registers()
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for parent in parents {
            machine.bind_register(parent, None);
        }
        Ok(())
    }

    pub fn concretize_all_memory(&mut self) -> Result<()> {
        let machine = self.machine_mut()?;
        let addresses = machine
            .symbolic()
            .memory_cells()
            .map(|(address, _)| *address)
            .collect::<Vec<_>>();
        for address in addresses {
            let access = MemoryAccess::new(address, 1)?;
            machine.bind_memory_access(&access, None, false);
        }
        Ok(())
    }

    /* Symbolic variables and expressions */

    /// A new variable with a zero value. Unnamed variables are named after
    /// their id.
    pub fn new_symbolic_variable(
        &mut self,
        width: u32,
        name: Option<&str>,
    ) -> Result<SharedSymbolicVariable> {
        self.variables.add(width, name, None, BigUint::default())
    }

    /// Turns a register into a fresh symbolic variable holding its concrete
    /// value. The other bits of the parent register are kept.
    pub fn convert_register_to_symbolic_variable(
        &mut self,
        id: RegisterId,
        name: Option<&str>,
    ) -> Result<SharedSymbolicVariable> {
        let reg = self.register(id)?;
        let machine = self.machine.as_mut().ok_or_else(unset_architecture)?;

        let value = machine.concrete().register_value(&reg);
        let var = self.variables.add(
            reg.size(),
            name,
            Some(VariableOrigin::Register(reg)),
            value.into(),
        )?;
        let node = self.ast.variable(&var);
        let full = machine.assigned_register_ast(&self.ast, &reg, &node, false)?;
        let parent = machine.concrete().register(reg.parent())?;
        let expr = self.expressions.add(full, Some(parent.into()), "");
        log_effect!("{}", expr);
        machine.bind_register(parent.id(), Some(expr));
        Ok(var)
    }

    /// Turns a memory cell into a fresh symbolic variable holding its concrete
    /// value. Unmapped bytes are mapped to zero.
    pub fn convert_memory_to_symbolic_variable(
        &mut self,
        access: &MemoryAccess,
        name: Option<&str>,
    ) -> Result<SharedSymbolicVariable> {
        let machine = self.machine.as_mut().ok_or_else(unset_architecture)?;

        let value = access
            .byte_addresses()
            .enumerate()
            .map(|(i, a)| u64::from(machine.concrete().memory_byte(a).unwrap_or(0)) << (8 * i))
            .fold(0, |acc, byte| acc | byte);
        let var = self.variables.add(
            access.bits(),
            name,
            Some(VariableOrigin::Memory(*access)),
            value.into(),
        )?;
        let node = self.ast.variable(&var);
        let expr = self.expressions.add(node, Some((*access).into()), "");
        log_effect!("{}", expr);
        machine.set_memory_value(access, value);
        machine.bind_memory_access(access, Some(&expr), true);
        Ok(var)
    }

    /// Assigns a value to a variable. ASTs depending on it are re-evaluated
    /// on their next evaluation, and the cell the variable was created from
    /// takes the value.
    pub fn set_concrete_variable_value(
        &mut self,
        var: &SharedSymbolicVariable,
        value: impl Into<BigUint>,
    ) -> Result<()> {
        var.set_value(value.into())?;
        self.ast.refresh_variable(var.id());
        log_debug!("Variable {} is now {}", var, var.value());

        let value = low_u64(&var.value());
        if let Some(machine) = self.machine.as_mut() {
            match var.origin() {
                Some(VariableOrigin::Register(reg)) => {
                    machine.concrete_mut().set_register_value(&reg, value)
                }
                Some(VariableOrigin::Memory(access)) => {
                    machine.concrete_mut().set_memory_value(&access, value)
                }
                None => {}
            }
        }
        Ok(())
    }

    pub fn concrete_variable_value(&self, var: &SharedSymbolicVariable) -> BigUint {
        var.value()
    }

    pub fn symbolic_variable(&self, id: usize) -> Option<SharedSymbolicVariable> {
        self.variables.get(id).cloned()
    }

    pub fn symbolic_variable_by_name(&self, name: &str) -> Option<SharedSymbolicVariable> {
        self.variables.get_by_name(name).cloned()
    }

    pub fn symbolic_variables(&self) -> impl Iterator<Item = &SharedSymbolicVariable> {
        self.variables.iter()
    }

    pub fn symbolic_expression(&self, id: usize) -> Option<SharedSymbolicExpression> {
        self.expressions.get(id).cloned()
    }

    pub fn symbolic_expressions(&self) -> impl Iterator<Item = &SharedSymbolicExpression> {
        self.expressions.iter()
    }

    /* Callbacks */

    /// Returns false if the callback was already registered.
    pub fn add_callback(&mut self, callback: Callback) -> bool {
        log_debug!("Adding callback {:?}", callback);
        self.callbacks.add(callback)
    }

    /// Returns false if the callback was not registered.
    pub fn remove_callback(&mut self, callback: &Callback) -> bool {
        log_debug!("Removing callback {:?}", callback);
        self.callbacks.remove(callback)
    }

    pub fn clear_callbacks(&mut self) {
        self.callbacks = Callbacks::default();
    }

    pub fn callback_count(&self, kind: CallbackKind) -> usize {
        self.callbacks.count(kind)
    }
}

fn unset_architecture() -> Error {
    Error::configuration("the architecture is not set")
}

fn notify(
    callbacks: &Callbacks,
    concrete: &mut ConcreteState,
    writes: impl IntoIterator<Item = ConcreteWrite>,
) {
    for write in writes {
        match write {
            ConcreteWrite::Register(reg, value) => {
                for handler in callbacks.set_concrete_register_value() {
                    handler(concrete, &reg, value);
                }
            }
            ConcreteWrite::Memory(access, value) => {
                for handler in callbacks.set_concrete_memory_value() {
                    handler(concrete, &access, value);
                }
            }
        }
    }
}
