//! Bit-vector expression graphs.
//!
//! Nodes own their children and observe their parents through weak
//! references. A node can be shared by many parents, so the graph is a DAG.
//! Evaluation results are memoized per node and invalidated upward whenever a
//! child slot is replaced or a referenced symbolic variable changes value.

pub mod context;
mod fmt;

use std::{
    cell::{Ref, RefCell},
    collections::HashSet,
    rc::{Rc, Weak},
};

use crate::{
    bv::BitVector,
    error::{Error, Result},
    expr::SharedSymbolicExpression,
    vars::SharedSymbolicVariable,
};

pub type SharedAstNode = Rc<AstNode>;
pub(crate) type WeakAstNode = Weak<AstNode>;

#[derive(Clone)]
pub enum AstKind {
    Bv(BitVector),
    Variable(SharedSymbolicVariable),
    /// The current AST of a symbolic expression, rendered as `ref!<id>`.
    Reference(SharedSymbolicExpression),

    BvNot,
    BvNeg,
    BvAdd,
    BvSub,
    BvMul,
    BvUdiv,
    BvSdiv,
    BvUrem,
    BvSrem,
    BvSmod,
    BvAnd,
    BvOr,
    BvXor,
    BvNand,
    BvNor,
    BvXnor,
    BvShl,
    BvLshr,
    BvAshr,
    BvRol(u32),
    BvRor(u32),
    Extract { high: u32, low: u32 },
    ZeroExtend(u32),
    SignExtend(u32),
    Concat,

    Ite,
    Equal,
    Distinct,
    BvUlt,
    BvUle,
    BvUgt,
    BvUge,
    BvSlt,
    BvSle,
    BvSgt,
    BvSge,
    LNot,
    LAnd,
    LOr,
}

impl AstKind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Bv(_) | Self::Variable(_) | Self::Reference(_))
    }
}

pub struct AstNode {
    kind: AstKind,
    width: u32,
    logical: bool,
    children: RefCell<Vec<SharedAstNode>>,
    parents: RefCell<Vec<WeakAstNode>>,
    value: RefCell<Option<BitVector>>,
}

impl std::fmt::Debug for AstNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AstNode({self})")
    }
}

impl Drop for AstNode {
    fn drop(&mut self) {
        // Unlinks uniquely owned descendants iteratively so that long chains
        // do not overflow the stack.
        let mut pending = std::mem::take(self.children.get_mut());
        while let Some(child) = pending.pop() {
            if let Ok(mut node) = Rc::try_unwrap(child) {
                pending.append(node.children.get_mut());
            }
        }
    }
}

impl AstNode {
    /// Links the new node to its children. Only `AstContext` creates nodes.
    fn make(
        kind: AstKind,
        width: u32,
        logical: bool,
        children: Vec<SharedAstNode>,
    ) -> SharedAstNode {
        let node = Rc::new(Self {
            kind,
            width,
            logical,
            children: RefCell::new(children),
            parents: RefCell::new(Vec::new()),
            value: RefCell::new(None),
        });
        for child in node.children.borrow().iter() {
            child.add_parent(&node);
        }
        node
    }

    pub fn kind(&self) -> &AstKind {
        &self.kind
    }

    /// Width in bits. Logical nodes have width 1.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Whether the node has the boolean sort rather than a bit-vector one.
    pub fn is_logical(&self) -> bool {
        self.logical
    }

    pub fn children(&self) -> Vec<SharedAstNode> {
        self.children.borrow().clone()
    }

    pub(crate) fn children_ref(&self) -> Ref<'_, Vec<SharedAstNode>> {
        self.children.borrow()
    }

    /// The distinct live nodes that have this node as a child (or reference
    /// it as the root of a symbolic expression).
    pub fn parents(&self) -> Vec<SharedAstNode> {
        self.parents
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn add_parent(&self, parent: &SharedAstNode) {
        let mut parents = self.parents.borrow_mut();
        parents.retain(|p| p.strong_count() > 0);
        let parent = Rc::downgrade(parent);
        if !parents.iter().any(|p| p.ptr_eq(&parent)) {
            parents.push(parent);
        }
    }

    pub(crate) fn remove_parent(&self, parent: &SharedAstNode) {
        let parent = Rc::downgrade(parent);
        self.parents
            .borrow_mut()
            .retain(|p| p.strong_count() > 0 && !p.ptr_eq(&parent));
    }

    /// Nodes this node's value is computed from.
    fn dependencies(&self) -> Vec<SharedAstNode> {
        match &self.kind {
            AstKind::Reference(expr) => vec![expr.ast()],
            _ => self.children(),
        }
    }

    /// Evaluates the node, reusing memoized values of unchanged subgraphs.
    pub fn evaluate(self: &Rc<Self>) -> Result<BitVector> {
        if let Some(value) = self.value.borrow().as_ref() {
            return Ok(value.clone());
        }

        let mut stack = vec![(self.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if node.value.borrow().is_some() {
                continue;
            }
            if expanded {
                let value = node.compute()?;
                *node.value.borrow_mut() = Some(value);
            } else {
                stack.push((node.clone(), true));
                stack.extend(
                    node.dependencies()
                        .into_iter()
                        .filter(|d| d.value.borrow().is_none())
                        .map(|d| (d, false)),
                );
            }
        }

        self.value
            .borrow()
            .clone()
            .ok_or_else(|| Error::range("evaluation left the node without a value"))
    }

    /// Applies the operator to the (already memoized) dependency values.
    fn compute(&self) -> Result<BitVector> {
        use AstKind::*;

        let values = self
            .dependencies()
            .iter()
            .map(|d| d.evaluate())
            .collect::<Result<Vec<_>>>()?;
        let operand = |index: usize| -> Result<&BitVector> {
            values.get(index).ok_or_else(|| {
                Error::range(format!(
                    "missing operand {index} for `{}`",
                    self.operator_name()
                ))
            })
        };
        macro_rules! binary {
            ($method:ident) => {
                operand(0)?.$method(operand(1)?)?
            };
        }
        let flag = BitVector::from_bool;

        Ok(match &self.kind {
            Bv(value) => value.clone(),
            Variable(var) => BitVector::masked(var.value(), var.width()),
            Reference(_) => operand(0)?.clone(),

            BvNot => operand(0)?.not(),
            BvNeg => operand(0)?.neg(),
            BvAdd => binary!(add),
            BvSub => binary!(sub),
            BvMul => binary!(mul),
            BvUdiv => binary!(udiv),
            BvSdiv => binary!(sdiv),
            BvUrem => binary!(urem),
            BvSrem => binary!(srem),
            BvSmod => binary!(smod),
            BvAnd => binary!(and),
            BvOr => binary!(or),
            BvXor => binary!(xor),
            BvNand => binary!(nand),
            BvNor => binary!(nor),
            BvXnor => binary!(xnor),
            BvShl => binary!(shl),
            BvLshr => binary!(lshr),
            BvAshr => binary!(ashr),
            BvRol(amount) => operand(0)?.rol(*amount),
            BvRor(amount) => operand(0)?.ror(*amount),
            Extract { high, low } => operand(0)?.extract(*high, *low)?,
            ZeroExtend(extra) => operand(0)?.zero_extend(*extra)?,
            SignExtend(extra) => operand(0)?.sign_extend(*extra)?,
            Concat => {
                let (first, rest) = values
                    .split_first()
                    .ok_or_else(|| Error::range("concat without operands"))?;
                rest.iter()
                    .try_fold(first.clone(), |acc, part| acc.concat(part))?
            }

            Ite => {
                if !operand(0)?.is_zero() {
                    operand(1)?.clone()
                } else {
                    operand(2)?.clone()
                }
            }
            Equal => flag(operand(0)? == operand(1)?),
            Distinct => flag(operand(0)? != operand(1)?),
            BvUlt => flag(binary!(ult)),
            BvUle => flag(binary!(ule)),
            BvUgt => flag(binary!(ugt)),
            BvUge => flag(binary!(uge)),
            BvSlt => flag(binary!(slt)),
            BvSle => flag(binary!(sle)),
            BvSgt => flag(binary!(sgt)),
            BvSge => flag(binary!(sge)),
            LNot => flag(operand(0)?.is_zero()),
            LAnd => flag(values.iter().all(|v| !v.is_zero())),
            LOr => flag(values.iter().any(|v| !v.is_zero())),
        })
    }

    /// Drops the memoized value of this node and of every node whose value
    /// depends on it.
    pub(crate) fn invalidate(&self) {
        let mut visited = HashSet::new();
        self.value.borrow_mut().take();
        let mut stack = self.parents();
        while let Some(node) = stack.pop() {
            if !visited.insert(Rc::as_ptr(&node)) {
                continue;
            }
            node.value.borrow_mut().take();
            stack.extend(node.parents());
        }
    }

    /// Replaces the child at `index`.
    ///
    /// The replaced child stops listing this node as a parent unless it still
    /// occupies another slot.
    pub fn set_child(self: &Rc<Self>, index: usize, child: SharedAstNode) -> Result<()> {
        let old = self.children.borrow().get(index).cloned().ok_or_else(|| {
            Error::range(format!(
                "child index {index} is out of bounds for `{}`",
                self.operator_name()
            ))
        })?;
        if Rc::ptr_eq(&old, &child) {
            return Ok(());
        }
        if old.width != child.width || old.logical != child.logical {
            return Err(Error::range(format!(
                "cannot replace a {}-bit child with a {}-bit node",
                old.width, child.width
            )));
        }
        if child.reaches(self) {
            return Err(Error::range("replacing the child would create a cycle"));
        }

        self.children.borrow_mut()[index] = child.clone();
        if !self.children.borrow().iter().any(|c| Rc::ptr_eq(c, &old)) {
            old.remove_parent(self);
        }
        child.add_parent(self);
        self.invalidate();
        Ok(())
    }

    /// Whether `target` is this node or one of its (transitive) dependencies.
    fn reaches(self: &Rc<Self>, target: &SharedAstNode) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if Rc::ptr_eq(&node, target) {
                return true;
            }
            if visited.insert(Rc::as_ptr(&node)) {
                stack.extend(node.dependencies());
            }
        }
        false
    }

    /// Whether a symbolic variable is reachable from this node, following
    /// symbolic expression references.
    pub fn is_symbolized(self: &Rc<Self>) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if matches!(node.kind, AstKind::Variable(_)) {
                return true;
            }
            if visited.insert(Rc::as_ptr(&node)) {
                stack.extend(node.dependencies());
            }
        }
        false
    }

    /// Identity comparison.
    pub fn ptr_eq(this: &SharedAstNode, other: &SharedAstNode) -> bool {
        Rc::ptr_eq(this, other)
    }
}

#[cfg(test)]
mod tests {
    use super::context::AstContext;
    use super::*;

    #[test]
    fn set_child_keeps_parent_while_another_slot_uses_it() {
        let ctx = AstContext::new();
        let x = ctx.bv(3, 8).unwrap();
        let sum = ctx.bvadd(&x, &x).unwrap();
        assert_eq!(x.parents().len(), 1);

        sum.set_child(0, ctx.bv(1, 8).unwrap()).unwrap();
        assert_eq!(x.parents().len(), 1);
        assert_eq!(sum.evaluate().unwrap().to_u64(), Some(4));

        sum.set_child(1, ctx.bv(1, 8).unwrap()).unwrap();
        assert!(x.parents().is_empty());
        assert_eq!(sum.evaluate().unwrap().to_u64(), Some(2));
    }

    #[test]
    fn set_child_checks_width_and_bounds() {
        let ctx = AstContext::new();
        let sum = ctx
            .bvadd(&ctx.bv(1, 8).unwrap(), &ctx.bv(2, 8).unwrap())
            .unwrap();
        assert!(sum.set_child(0, ctx.bv(1, 16).unwrap()).is_err());
        assert!(sum.set_child(2, ctx.bv(1, 8).unwrap()).is_err());
    }

    #[test]
    fn set_child_rejects_cycles() {
        let ctx = AstContext::new();
        let inner = ctx.bvnot(&ctx.bv(1, 8).unwrap()).unwrap();
        let outer = ctx.bvneg(&inner).unwrap();
        assert!(inner.set_child(0, outer).is_err());
    }

    #[test]
    fn invalidation_reaches_grandparents() {
        let ctx = AstContext::new();
        let leaf = ctx.bv(1, 8).unwrap();
        let mid = ctx.bvnot(&leaf).unwrap();
        let top = ctx.bvneg(&mid).unwrap();
        assert_eq!(top.evaluate().unwrap().to_u64(), Some(2));

        mid.set_child(0, ctx.bv(2, 8).unwrap()).unwrap();
        assert_eq!(top.evaluate().unwrap().to_u64(), Some(3));
    }

    #[test]
    fn deep_chains_evaluate_without_recursion() {
        let ctx = AstContext::new();
        let one = ctx.bv(1, 32).unwrap();
        let mut node = ctx.bv(0, 32).unwrap();
        for _ in 0..100_000 {
            node = ctx.bvadd(&node, &one).unwrap();
        }
        assert_eq!(node.evaluate().unwrap().to_u64(), Some(100_000));
    }
}
