//! Semantics of the supported x86 instructions over the dual machine state.
//!
//! Every side effect becomes a symbolic expression whose AST is evaluated
//! right away to update the concrete view. Flags follow the Intel manual and
//! are modelled as 1-bit registers.

use common::{log_effect, utils::low_mask};

use crate::{
    arch::{ArchitectureKind, MemoryAccess, Register, RegisterId},
    ast::{context::AstContext, SharedAstNode},
    callbacks::Callbacks,
    config::ModesConfig,
    error::{Error, Result},
    expr::{SharedSymbolicExpression, SymbolicExpressions},
    instruction::{Condition, Instruction, MemoryOperand, Mnemonic, Operand, Stage},
    state::MachineState,
    utils::low_u64,
};

/// A concrete write to report to `SetConcrete*` callbacks once the
/// instruction commits.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ConcreteWrite {
    Register(Register, u64),
    Memory(MemoryAccess, u64),
}

/// A resolved operand. Memory operands have their address computed once.
#[derive(Debug, Clone, Copy)]
enum Place {
    Register(Register),
    Memory(MemoryAccess),
    Immediate { value: u64, size: u32 },
}

impl Place {
    fn size(&self) -> u32 {
        match self {
            Self::Register(reg) => reg.size(),
            Self::Memory(access) => access.bits(),
            Self::Immediate { size, .. } => *size,
        }
    }
}

#[derive(Clone, Copy)]
enum Shift {
    Left,
    Logical,
    Arithmetic,
}

pub(crate) struct Semantics<'a> {
    arch: ArchitectureKind,
    modes: ModesConfig,
    ast: &'a AstContext,
    expressions: &'a mut SymbolicExpressions,
    machine: &'a mut MachineState,
    callbacks: &'a Callbacks,
    inst: &'a mut Instruction,
    operands: Vec<Operand>,
    comment: String,
    /// The next program counter, if the instruction branches.
    target: Option<SharedAstNode>,
    writes: Vec<ConcreteWrite>,
}

impl<'a> Semantics<'a> {
    pub(crate) fn new(
        arch: ArchitectureKind,
        modes: ModesConfig,
        ast: &'a AstContext,
        expressions: &'a mut SymbolicExpressions,
        machine: &'a mut MachineState,
        callbacks: &'a Callbacks,
        inst: &'a mut Instruction,
    ) -> Self {
        let operands = inst.operands.clone();
        let comment = inst
            .mnemonic
            .as_ref()
            .map(|m| format!("{} operation", m.to_string().to_uppercase()))
            .unwrap_or_default();
        Self {
            arch,
            modes,
            ast,
            expressions,
            machine,
            callbacks,
            inst,
            operands,
            comment,
            target: None,
            writes: Vec::new(),
        }
    }

    /// Applies the semantics of the decoded instruction and classifies its
    /// registers. Returns the concrete writes made.
    pub(crate) fn apply(mut self) -> Result<Vec<ConcreteWrite>> {
        let mnemonic = self
            .inst
            .mnemonic
            .clone()
            .expect("Instructions are decoded before their semantics apply");

        use Mnemonic::*;
        match mnemonic {
            Mov => self.mov(),
            Movzx => self.extend(false),
            Movsx | Movsxd => self.extend(true),
            Lea => self.lea(),
            Xchg => self.xchg(),
            Add => self.add_sub(false, false, true),
            Adc => self.add_sub(false, true, true),
            Sub => self.add_sub(true, false, true),
            Sbb => self.add_sub(true, true, true),
            Cmp => self.add_sub(true, false, false),
            Inc => self.inc_dec(false),
            Dec => self.inc_dec(true),
            Neg => self.neg(),
            And => self.logical(AstContext::bvand, true),
            Or => self.logical(AstContext::bvor, true),
            Xor => self.logical(AstContext::bvxor, true),
            Test => self.logical(AstContext::bvand, false),
            Not => self.not(),
            Rol => self.rotate(true),
            Ror => self.rotate(false),
            Shl => self.shift(Shift::Left),
            Shr => self.shift(Shift::Logical),
            Sar => self.shift(Shift::Arithmetic),
            Push => self.push(),
            Pop => self.pop(),
            Call => self.call(),
            Ret => self.ret(),
            Jmp => self.jmp(),
            Jcc(condition) => self.jcc(condition),
            Nop => Ok(()),
            Clc => self.set_flag_value(RegisterId::Cf, false, "Clears carry flag"),
            Stc => self.set_flag_value(RegisterId::Cf, true, "Sets carry flag"),
            Cmc => self.cmc(),
            Cld => self.set_flag_value(RegisterId::Df, false, "Clears direction flag"),
            Std => self.set_flag_value(RegisterId::Df, true, "Sets direction flag"),
            Other(_) => Err(self.unsupported()),
        }?;
        self.update_program_counter()?;
        self.inst.stage = Stage::SemanticsApplied;

        if self.modes.concretize_undefined_registers {
            for reg in self.inst.undefined_registers.clone() {
                self.machine.bind_register(reg.parent(), None);
            }
        }
        self.inst.stage = Stage::Classified;
        Ok(self.writes)
    }

    fn unsupported(&self) -> Error {
        Error::UnsupportedInstruction {
            mnemonic: self.inst.disassembly.clone(),
        }
    }

    /* Operands */

    fn operand(&self, index: usize) -> Result<Operand> {
        self.operands
            .get(index)
            .copied()
            .ok_or_else(|| self.unsupported())
    }

    fn place(&mut self, index: usize) -> Result<Place> {
        match self.operand(index)? {
            Operand::Register(reg) => Ok(Place::Register(reg)),
            Operand::Immediate { value, size } => Ok(Place::Immediate { value, size }),
            Operand::Memory(mem) => {
                let address = self.effective_address(&mem)?;
                let address = low_u64(address.evaluate()?.value());
                MemoryAccess::new(address, mem.size).map(Place::Memory)
            }
        }
    }

    /// Immediates are truncated to `width`. Other places have their own.
    fn read(&mut self, place: &Place, width: u32) -> Result<SharedAstNode> {
        match place {
            Place::Register(reg) => self.read_register(reg),
            Place::Memory(access) => self.load(access),
            Place::Immediate { value, .. } => self.ast.bv(value & low_mask(width), width),
        }
    }

    fn write(
        &mut self,
        place: &Place,
        node: &SharedAstNode,
        comment: &str,
    ) -> Result<SharedSymbolicExpression> {
        match place {
            Place::Register(reg) => self.write_register(reg, node, comment),
            Place::Memory(access) => self.store(access, node, comment),
            Place::Immediate { .. } => Err(self.unsupported()),
        }
    }

    /// The value `expr` wrote into `place`, at the width of the place.
    /// Register expressions cover the whole parent register.
    fn written(&self, place: &Place, expr: &SharedSymbolicExpression) -> Result<SharedAstNode> {
        match place {
            Place::Register(reg) => self.machine.register_ast(self.ast, reg),
            _ => Ok(self.ast.reference(expr)),
        }
    }

    fn effective_address(&mut self, mem: &MemoryOperand) -> Result<SharedAstNode> {
        let bits = self.arch.bitness();
        let mut terms = Vec::new();
        if let Some(base) = mem.base {
            terms.push(self.address_register(&base)?);
        }
        if let Some(index) = mem.index {
            let index = self.address_register(&index)?;
            terms.push(match mem.scale {
                1 => index,
                scale => self
                    .ast
                    .bvmul(&index, &self.ast.bv(u64::from(scale), bits)?)?,
            });
        }
        let displacement = mem.displacement & low_mask(bits);
        if displacement != 0 || terms.is_empty() {
            terms.push(self.ast.bv(displacement, bits)?);
        }

        let mut terms = terms.into_iter();
        let first = terms.next().expect("An address has at least one term");
        terms.try_fold(first, |sum, term| self.ast.bvadd(&sum, &term))
    }

    fn address_register(&mut self, reg: &Register) -> Result<SharedAstNode> {
        let node = self.read_register(reg)?;
        self.resize(&node, self.arch.bitness())
    }

    /// Zero-extends or truncates `node` to `width`.
    fn resize(&self, node: &SharedAstNode, width: u32) -> Result<SharedAstNode> {
        match node.width() {
            w if w < width => self.ast.zx(width - w, node),
            w if w > width => self.ast.extract(width - 1, 0, node),
            _ => Ok(node.clone()),
        }
    }

    /* Registers */

    fn read_register(&mut self, reg: &Register) -> Result<SharedAstNode> {
        self.register_ast(reg, true)
    }

    /// The AST of `reg`. Recorded reads fire the `GetConcreteRegisterValue`
    /// callbacks when the concrete value is used.
    fn register_ast(&mut self, reg: &Register, record: bool) -> Result<SharedAstNode> {
        if record {
            self.inst.record_read(*reg);
            if self.machine.symbolic().register(reg.parent()).is_none() {
                for handler in self.callbacks.get_concrete_register_value() {
                    handler(self.machine.concrete_mut(), reg);
                }
            }
        }
        self.machine.register_ast(self.ast, reg)
    }

    fn write_register(
        &mut self,
        reg: &Register,
        node: &SharedAstNode,
        comment: &str,
    ) -> Result<SharedSymbolicExpression> {
        expect_width(node, reg.size(), reg)?;
        let parent = self.arch.register(reg.parent())?;
        self.inst.record_write(*reg);

        // 32-bit writes clear the upper half of the parent.
        let clear_upper =
            self.arch == ArchitectureKind::X86_64 && reg.size() == 32 && !reg.is_parent();
        if clear_upper {
            self.inst.record_write(parent);
        }
        let full = self
            .machine
            .assigned_register_ast(self.ast, reg, node, clear_upper)?;

        let expr = self.expressions.add(full, Some(parent.into()), comment);
        let value = low_u64(expr.ast().evaluate()?.value());
        self.machine.set_register_value(&parent, value);
        self.machine.bind_register(parent.id(), Some(expr.clone()));
        self.writes.push(ConcreteWrite::Register(
            *reg,
            self.machine.concrete().register_value(reg),
        ));
        log_effect!("{}", expr);
        self.inst.symbolic_expressions.push(expr.clone());
        Ok(expr)
    }

    /* Memory */

    /// Fires the `GetConcreteMemoryValue` callbacks if a byte of `access` has
    /// no symbolic binding.
    fn load(&mut self, access: &MemoryAccess) -> Result<SharedAstNode> {
        self.inst.loads.push(*access);
        if self.modes.aligned_memory {
            if let Some(expr) = self.machine.symbolic().aligned(access).cloned() {
                return Ok(self.ast.reference(&expr));
            }
        }

        let symbolic = self.machine.symbolic();
        if access.byte_addresses().any(|a| symbolic.memory(a).is_none()) {
            for handler in self.callbacks.get_concrete_memory_value() {
                handler(self.machine.concrete_mut(), access);
            }
        }

        self.machine.memory_ast(self.ast, access)
    }

    fn store(
        &mut self,
        access: &MemoryAccess,
        node: &SharedAstNode,
        comment: &str,
    ) -> Result<SharedSymbolicExpression> {
        expect_width(node, access.bits(), access)?;
        let expr = self
            .expressions
            .add(node.clone(), Some((*access).into()), comment);
        let value = low_u64(expr.ast().evaluate()?.value());
        self.machine.set_memory_value(access, value);
        self.machine.bind_memory_access(access, Some(&expr), true);
        self.inst.stores.push(*access);
        self.writes.push(ConcreteWrite::Memory(*access, value));
        log_effect!("{}", expr);
        self.inst.symbolic_expressions.push(expr.clone());
        Ok(expr)
    }

    /// An expression bound to no cell, e.g., the difference computed by `cmp`.
    fn volatile(&mut self, node: &SharedAstNode, comment: &str) -> SharedSymbolicExpression {
        let expr = self.expressions.add(node.clone(), None, comment);
        log_effect!("{}", expr);
        self.inst.symbolic_expressions.push(expr.clone());
        expr
    }

    /* Flags */

    fn flag(&self, id: RegisterId) -> Result<Register> {
        self.arch.register(id)
    }

    fn read_flag(&mut self, id: RegisterId) -> Result<SharedAstNode> {
        let reg = self.flag(id)?;
        self.read_register(&reg)
    }

    fn set_flag(&mut self, id: RegisterId, node: &SharedAstNode, comment: &str) -> Result<()> {
        let reg = self.flag(id)?;
        self.write_register(&reg, node, comment).map(drop)
    }

    fn set_flag_value(&mut self, id: RegisterId, value: bool, comment: &str) -> Result<()> {
        let node = self.ast.bv(u64::from(value), 1)?;
        self.set_flag(id, &node, comment)
    }

    fn undefined(&mut self, id: RegisterId) -> Result<()> {
        let reg = self.flag(id)?;
        self.inst.record_undefined(reg);
        Ok(())
    }

    /// 1 if `condition` holds, 0 otherwise.
    fn bit(&self, condition: &SharedAstNode) -> Result<SharedAstNode> {
        self.ast
            .ite(condition, &self.ast.bv(1, 1)?, &self.ast.bv(0, 1)?)
    }

    fn msb(&self, node: &SharedAstNode) -> Result<SharedAstNode> {
        let high = node.width() - 1;
        self.ast.extract(high, high, node)
    }

    fn af(&mut self, res: &SharedAstNode, op1: &SharedAstNode, op2: &SharedAstNode) -> Result<()> {
        let ast = self.ast;
        let node = ast.extract(4, 4, &ast.bvxor(&ast.bvxor(res, op1)?, op2)?)?;
        self.set_flag(RegisterId::Af, &node, "Adjust flag")
    }

    fn cf_add(&mut self, res: &SharedAstNode, a: &SharedAstNode, b: &SharedAstNode) -> Result<()> {
        let ast = self.ast;
        let node = ast.bvor(
            &ast.bvand(a, b)?,
            &ast.bvand(&ast.bvor(a, b)?, &ast.bvnot(res)?)?,
        )?;
        let node = self.msb(&node)?;
        self.set_flag(RegisterId::Cf, &node, "Carry flag")
    }

    fn cf_sub(&mut self, res: &SharedAstNode, a: &SharedAstNode, b: &SharedAstNode) -> Result<()> {
        let ast = self.ast;
        let not_a = ast.bvnot(a)?;
        let node = ast.bvor(
            &ast.bvand(&not_a, b)?,
            &ast.bvand(&ast.bvor(&not_a, b)?, res)?,
        )?;
        let node = self.msb(&node)?;
        self.set_flag(RegisterId::Cf, &node, "Carry flag")
    }

    fn of_add(&mut self, res: &SharedAstNode, a: &SharedAstNode, b: &SharedAstNode) -> Result<()> {
        let ast = self.ast;
        let node = ast.bvand(&ast.bvxor(a, &ast.bvnot(b)?)?, &ast.bvxor(a, res)?)?;
        let node = self.msb(&node)?;
        self.set_flag(RegisterId::Of, &node, "Overflow flag")
    }

    fn of_sub(&mut self, res: &SharedAstNode, a: &SharedAstNode, b: &SharedAstNode) -> Result<()> {
        let ast = self.ast;
        let node = ast.bvand(&ast.bvxor(a, b)?, &ast.bvxor(a, res)?)?;
        let node = self.msb(&node)?;
        self.set_flag(RegisterId::Of, &node, "Overflow flag")
    }

    /// Parity, sign and zero flags of `res`.
    fn result_flags(&mut self, res: &SharedAstNode) -> Result<()> {
        let ast = self.ast;

        let mut parity = ast.extract(7, 0, res)?;
        for shift in [4, 2, 1] {
            let shifted = ast.bvlshr(&parity, &ast.bv(shift, 8)?)?;
            parity = ast.bvxor(&parity, &shifted)?;
        }
        let pf = ast.bvnot(&ast.extract(0, 0, &parity)?)?;
        self.set_flag(RegisterId::Pf, &pf, "Parity flag")?;

        let sf = self.msb(res)?;
        self.set_flag(RegisterId::Sf, &sf, "Sign flag")?;

        let zf = self.bit(&ast.equal(res, &ast.bv(0, res.width())?)?)?;
        self.set_flag(RegisterId::Zf, &zf, "Zero flag")
    }

    /* Data transfer */

    fn mov(&mut self) -> Result<()> {
        let dst = self.place(0)?;
        let src = self.place(1)?;
        let node = self.read(&src, dst.size())?;
        let comment = self.comment.clone();
        self.write(&dst, &node, &comment).map(drop)
    }

    fn extend(&mut self, signed: bool) -> Result<()> {
        let dst = self.place(0)?;
        let src = self.place(1)?;
        let node = self.read(&src, src.size())?;
        let extra = dst.size() - node.width();
        let node = match (extra, signed) {
            (0, _) => node,
            (_, true) => self.ast.sx(extra, &node)?,
            (_, false) => self.ast.zx(extra, &node)?,
        };
        let comment = self.comment.clone();
        self.write(&dst, &node, &comment).map(drop)
    }

    fn lea(&mut self) -> Result<()> {
        let dst = self.place(0)?;
        let Operand::Memory(mem) = self.operand(1)? else {
            return Err(self.unsupported());
        };
        let address = self.effective_address(&mem)?;
        let node = self.resize(&address, dst.size())?;
        let comment = self.comment.clone();
        self.write(&dst, &node, &comment).map(drop)
    }

    fn xchg(&mut self) -> Result<()> {
        let first = self.place(0)?;
        let second = self.place(1)?;
        let a = self.read(&first, first.size())?;
        let b = self.read(&second, second.size())?;
        let comment = self.comment.clone();
        self.write(&first, &b, &comment)?;
        self.write(&second, &a, &comment).map(drop)
    }

    /* Arithmetic and logic */

    fn add_sub(&mut self, subtract: bool, carry: bool, keep: bool) -> Result<()> {
        let ast = self.ast;
        let dst = self.place(0)?;
        let src = self.place(1)?;
        let width = dst.size();
        let op1 = self.read(&dst, width)?;
        let op2 = self.read(&src, width)?;

        let combine = if subtract {
            AstContext::bvsub
        } else {
            AstContext::bvadd
        };
        let mut node = combine(ast, &op1, &op2)?;
        if carry {
            let cf = self.read_flag(RegisterId::Cf)?;
            node = combine(ast, &node, &ast.zx(width - 1, &cf)?)?;
        }

        let comment = self.comment.clone();
        let res = if keep {
            let expr = self.write(&dst, &node, &comment)?;
            self.written(&dst, &expr)?
        } else {
            ast.reference(&self.volatile(&node, &comment))
        };

        self.af(&res, &op1, &op2)?;
        if subtract {
            self.cf_sub(&res, &op1, &op2)?;
            self.of_sub(&res, &op1, &op2)?;
        } else {
            self.cf_add(&res, &op1, &op2)?;
            self.of_add(&res, &op1, &op2)?;
        }
        self.result_flags(&res)
    }

    /// Like `add`/`sub` with 1, leaving the carry flag untouched.
    fn inc_dec(&mut self, decrement: bool) -> Result<()> {
        let ast = self.ast;
        let dst = self.place(0)?;
        let width = dst.size();
        let op1 = self.read(&dst, width)?;
        let op2 = ast.bv(1, width)?;
        let node = if decrement {
            ast.bvsub(&op1, &op2)?
        } else {
            ast.bvadd(&op1, &op2)?
        };

        let comment = self.comment.clone();
        let expr = self.write(&dst, &node, &comment)?;
        let res = self.written(&dst, &expr)?;
        self.af(&res, &op1, &op2)?;
        if decrement {
            self.of_sub(&res, &op1, &op2)?;
        } else {
            self.of_add(&res, &op1, &op2)?;
        }
        self.result_flags(&res)
    }

    fn neg(&mut self) -> Result<()> {
        let ast = self.ast;
        let dst = self.place(0)?;
        let width = dst.size();
        let op1 = self.read(&dst, width)?;
        let comment = self.comment.clone();
        let expr = self.write(&dst, &ast.bvneg(&op1)?, &comment)?;
        let res = self.written(&dst, &expr)?;

        let zero = ast.bv(0, width)?;
        self.af(&res, &zero, &op1)?;
        let cf = self.bit(&ast.distinct(&op1, &zero)?)?;
        self.set_flag(RegisterId::Cf, &cf, "Carry flag")?;
        let min = ast.bv(1 << (width - 1), width)?;
        let of = self.bit(&ast.equal(&op1, &min)?)?;
        self.set_flag(RegisterId::Of, &of, "Overflow flag")?;
        self.result_flags(&res)
    }

    fn logical(
        &mut self,
        op: fn(&AstContext, &SharedAstNode, &SharedAstNode) -> Result<SharedAstNode>,
        keep: bool,
    ) -> Result<()> {
        let ast = self.ast;
        let dst = self.place(0)?;
        let src = self.place(1)?;
        let width = dst.size();
        let op1 = self.read(&dst, width)?;
        let op2 = self.read(&src, width)?;
        let node = op(ast, &op1, &op2)?;

        let comment = self.comment.clone();
        let res = if keep {
            let expr = self.write(&dst, &node, &comment)?;
            self.written(&dst, &expr)?
        } else {
            ast.reference(&self.volatile(&node, &comment))
        };

        self.undefined(RegisterId::Af)?;
        self.set_flag_value(RegisterId::Cf, false, "Clears carry flag")?;
        self.set_flag_value(RegisterId::Of, false, "Clears overflow flag")?;
        self.result_flags(&res)
    }

    fn not(&mut self) -> Result<()> {
        let dst = self.place(0)?;
        let op1 = self.read(&dst, dst.size())?;
        let node = self.ast.bvnot(&op1)?;
        let comment = self.comment.clone();
        self.write(&dst, &node, &comment).map(drop)
    }

    /* Shifts and rotates */

    /// The masked count of a shift or rotate. Symbolic counts are
    /// concretized.
    fn shift_count(&mut self, width: u32) -> Result<u32> {
        let src = self.place(1)?;
        let count = self.read(&src, 8)?;
        let mask = if width == 64 { 0x3f } else { 0x1f };
        Ok((low_u64(count.evaluate()?.value()) & mask) as u32)
    }

    fn rotate(&mut self, left: bool) -> Result<()> {
        let ast = self.ast;
        let dst = self.place(0)?;
        let width = dst.size();
        let op1 = self.read(&dst, width)?;
        let count = self.shift_count(width)?;

        let node = if left {
            ast.bvrol(&op1, count % width)?
        } else {
            ast.bvror(&op1, count % width)?
        };
        let comment = self.comment.clone();
        let expr = self.write(&dst, &node, &comment)?;
        let res = self.written(&dst, &expr)?;
        if count == 0 {
            return Ok(());
        }

        let cf = if left {
            ast.extract(0, 0, &res)?
        } else {
            self.msb(&res)?
        };
        self.set_flag(RegisterId::Cf, &cf, "Carry flag")?;

        let overflow = if left {
            let cf = self.read_flag(RegisterId::Cf)?;
            ast.bvxor(&self.msb(&res)?, &cf)?
        } else {
            ast.bvxor(&self.msb(&res)?, &ast.extract(width - 2, width - 2, &res)?)?
        };
        let of = self.flag(RegisterId::Of)?;
        let previous = self.register_ast(&of, false)?;
        let is_one = ast.equal(&ast.bv(u64::from(count), 8)?, &ast.bv(1, 8)?)?;
        let node = ast.ite(&is_one, &overflow, &previous)?;
        self.set_flag(RegisterId::Of, &node, "Overflow flag")?;
        if count > 1 {
            self.undefined(RegisterId::Of)?;
        }
        Ok(())
    }

    fn shift(&mut self, kind: Shift) -> Result<()> {
        let ast = self.ast;
        let dst = self.place(0)?;
        let width = dst.size();
        let op1 = self.read(&dst, width)?;
        let count = self.shift_count(width)?;

        let amount = ast.bv(u64::from(count), width)?;
        let node = match kind {
            Shift::Left => ast.bvshl(&op1, &amount)?,
            Shift::Logical => ast.bvlshr(&op1, &amount)?,
            Shift::Arithmetic => ast.bvashr(&op1, &amount)?,
        };
        let comment = self.comment.clone();
        let expr = self.write(&dst, &node, &comment)?;
        let res = self.written(&dst, &expr)?;
        if count == 0 {
            return Ok(());
        }

        // The last bit shifted out.
        let cf = match kind {
            Shift::Left if count < width => Some(ast.extract(width - count, width - count, &op1)?),
            Shift::Logical | Shift::Arithmetic if count < width => {
                Some(ast.extract(count - 1, count - 1, &op1)?)
            }
            Shift::Arithmetic => Some(self.msb(&op1)?),
            _ => None,
        };
        match cf {
            Some(cf) => self.set_flag(RegisterId::Cf, &cf, "Carry flag")?,
            None => self.undefined(RegisterId::Cf)?,
        }

        if count == 1 {
            let of = match kind {
                Shift::Left => ast.bvxor(&self.msb(&res)?, &self.msb(&op1)?)?,
                Shift::Logical => self.msb(&op1)?,
                Shift::Arithmetic => ast.bv(0, 1)?,
            };
            self.set_flag(RegisterId::Of, &of, "Overflow flag")?;
        } else {
            self.undefined(RegisterId::Of)?;
        }

        self.undefined(RegisterId::Af)?;
        self.result_flags(&res)
    }

    /* Stack and control flow */

    fn stack_pointer(&self) -> Result<Register> {
        self.arch.register(self.arch.stack_pointer())
    }

    fn stack_top(&mut self) -> Result<u64> {
        let sp = self.stack_pointer()?;
        let node = self.read_register(&sp)?;
        Ok(low_u64(node.evaluate()?.value()))
    }

    /// Moves the stack pointer by `delta` bytes and returns its new value.
    fn move_stack_pointer(&mut self, delta: i64) -> Result<u64> {
        let ast = self.ast;
        let sp = self.stack_pointer()?;
        let current = self.read_register(&sp)?;
        let amount = ast.bv(delta.unsigned_abs() & low_mask(sp.size()), sp.size())?;
        let node = if delta < 0 {
            ast.bvsub(&current, &amount)?
        } else {
            ast.bvadd(&current, &amount)?
        };
        let expr = self.write_register(&sp, &node, "Stack alignment")?;
        Ok(low_u64(expr.ast().evaluate()?.value()))
    }

    fn push(&mut self) -> Result<()> {
        let src = self.place(0)?;
        let size = src.size();
        let value = self.read(&src, size)?;
        let address = self.move_stack_pointer(-i64::from(size / 8))?;
        let comment = self.comment.clone();
        self.store(&MemoryAccess::new(address, size / 8)?, &value, &comment)
            .map(drop)
    }

    fn pop(&mut self) -> Result<()> {
        let size = self.operand(0)?.size();
        let top = self.stack_top()?;
        let value = self.load(&MemoryAccess::new(top, size / 8)?)?;
        self.move_stack_pointer(i64::from(size / 8))?;
        // The destination address uses the incremented stack pointer.
        let dst = self.place(0)?;
        let comment = self.comment.clone();
        self.write(&dst, &value, &comment).map(drop)
    }

    fn branch_target(&mut self) -> Result<SharedAstNode> {
        let bits = self.arch.bitness();
        let place = self.place(0)?;
        let node = self.read(&place, bits)?;
        self.resize(&node, bits)
    }

    fn fallthrough(&self) -> u64 {
        self.inst
            .address()
            .wrapping_add(self.inst.size as u64)
            & low_mask(self.arch.bitness())
    }

    fn call(&mut self) -> Result<()> {
        let target = self.branch_target()?;
        let size = self.arch.pointer_size();
        let address = self.move_stack_pointer(-i64::from(size))?;
        let saved = self.ast.bv(self.fallthrough(), self.arch.bitness())?;
        self.store(&MemoryAccess::new(address, size)?, &saved, "Saved Program Counter")?;
        self.target = Some(target);
        Ok(())
    }

    fn ret(&mut self) -> Result<()> {
        let size = self.arch.pointer_size();
        let top = self.stack_top()?;
        let target = self.load(&MemoryAccess::new(top, size)?)?;
        let release = match self.operands.first() {
            Some(Operand::Immediate { value, .. }) => *value as i64,
            _ => 0,
        };
        self.move_stack_pointer(i64::from(size) + release)?;
        self.target = Some(target);
        Ok(())
    }

    fn jmp(&mut self) -> Result<()> {
        self.target = Some(self.branch_target()?);
        Ok(())
    }

    fn jcc(&mut self, condition: Condition) -> Result<()> {
        let taken = self.condition(condition)?;
        let target = self.branch_target()?;
        let fallthrough = self.ast.bv(self.fallthrough(), self.arch.bitness())?;
        self.target = Some(self.ast.ite(&taken, &target, &fallthrough)?);
        Ok(())
    }

    fn condition(&mut self, condition: Condition) -> Result<SharedAstNode> {
        let ast = self.ast;
        let is_set = |s: &mut Self, id| -> Result<SharedAstNode> {
            let flag = s.read_flag(id)?;
            ast.equal(&flag, &ast.bv(1, 1)?)
        };
        let is_clear = |s: &mut Self, id| -> Result<SharedAstNode> { ast.lnot(&is_set(s, id)?) };
        let signs_match = |s: &mut Self| -> Result<SharedAstNode> {
            let sf = s.read_flag(RegisterId::Sf)?;
            let of = s.read_flag(RegisterId::Of)?;
            ast.equal(&sf, &of)
        };

        use Condition::*;
        use RegisterId::{Cf, Of, Pf, Sf, Zf};
        match condition {
            O => is_set(self, Of),
            No => is_clear(self, Of),
            B => is_set(self, Cf),
            Ae => is_clear(self, Cf),
            E => is_set(self, Zf),
            Ne => is_clear(self, Zf),
            Be => ast.lor(&is_set(self, Cf)?, &is_set(self, Zf)?),
            A => ast.land(&is_clear(self, Cf)?, &is_clear(self, Zf)?),
            S => is_set(self, Sf),
            Ns => is_clear(self, Sf),
            P => is_set(self, Pf),
            Np => is_clear(self, Pf),
            L => ast.lnot(&signs_match(self)?),
            Ge => signs_match(self),
            Le => ast.lor(&is_set(self, Zf)?, &ast.lnot(&signs_match(self)?)?),
            G => ast.land(&is_clear(self, Zf)?, &signs_match(self)?),
        }
    }

    fn cmc(&mut self) -> Result<()> {
        let cf = self.read_flag(RegisterId::Cf)?;
        let node = self.ast.bvnot(&cf)?;
        self.set_flag(RegisterId::Cf, &node, "Complement carry flag")
    }

    fn update_program_counter(&mut self) -> Result<()> {
        let pc = self.arch.register(self.arch.program_counter())?;
        let node = match self.target.take() {
            Some(target) => target,
            None => self.ast.bv(self.fallthrough(), pc.size())?,
        };
        let expr = self.write_register(&pc, &node, "Program Counter")?;
        self.inst.next_address = Some(low_u64(expr.ast().evaluate()?.value()));
        Ok(())
    }
}

fn expect_width(node: &SharedAstNode, width: u32, target: impl std::fmt::Display) -> Result<()> {
    if node.is_logical() || node.width() != width {
        Err(Error::range(format!(
            "cannot assign a {}-bit value to {target}",
            node.width()
        )))
    } else {
        Ok(())
    }
}
