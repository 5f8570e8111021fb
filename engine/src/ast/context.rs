use std::{cell::RefCell, collections::HashMap, rc::Rc};

use common::log_trace;

use super::{AstKind, AstNode, SharedAstNode, WeakAstNode};
use crate::{
    bv::{check_width, BitVector},
    error::{Error, Result},
    expr::SharedSymbolicExpression,
    vars::SharedSymbolicVariable,
};

/// Builds AST nodes and keeps track of the nodes bound to each symbolic
/// variable, so that changing a variable's value invalidates whatever was
/// computed from it.
#[derive(Default)]
pub struct AstContext {
    variable_nodes: RefCell<HashMap<usize, Vec<WeakAstNode>>>,
}

macro_rules! binary_builders {
    ($($(#[$meta:meta])* $name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $name(&self, a: &SharedAstNode, b: &SharedAstNode) -> Result<SharedAstNode> {
                self.binary(AstKind::$kind, a, b)
            }
        )*
    };
}

macro_rules! comparison_builders {
    ($($name:ident => $kind:ident),* $(,)?) => {
        $(
            pub fn $name(&self, a: &SharedAstNode, b: &SharedAstNode) -> Result<SharedAstNode> {
                self.comparison(AstKind::$kind, a, b)
            }
        )*
    };
}

fn expect_bv(node: &SharedAstNode, op: &str) -> Result<()> {
    if node.is_logical() {
        Err(Error::range(format!(
            "`{op}` expects a bit-vector operand, got a logical one"
        )))
    } else {
        Ok(())
    }
}

fn expect_logical(node: &SharedAstNode, op: &str) -> Result<()> {
    if node.is_logical() {
        Ok(())
    } else {
        Err(Error::range(format!(
            "`{op}` expects a logical operand, got a {}-bit vector",
            node.width()
        )))
    }
}

fn expect_same_sort(a: &SharedAstNode, b: &SharedAstNode, op: &str) -> Result<()> {
    if a.width() == b.width() && a.is_logical() == b.is_logical() {
        Ok(())
    } else {
        Err(Error::range(format!(
            "`{op}` expects operands of the same sort, got {} and {} bits",
            a.width(),
            b.width()
        )))
    }
}

impl AstContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A constant. Fails if `value` does not fit in `width` bits.
    pub fn bv(&self, value: u64, width: u32) -> Result<SharedAstNode> {
        BitVector::new(value, width).map(|v| self.constant(v))
    }

    pub fn constant(&self, value: BitVector) -> SharedAstNode {
        let width = value.width();
        AstNode::make(AstKind::Bv(value), width, false, Vec::new())
    }

    /// A node standing for `var`. Repeated calls return the same live node.
    pub fn variable(&self, var: &SharedSymbolicVariable) -> SharedAstNode {
        let existing = self
            .variable_nodes
            .borrow()
            .get(&var.id())
            .and_then(|nodes| nodes.iter().find_map(|n| n.upgrade()));
        existing.unwrap_or_else(|| self.fresh_variable(var))
    }

    fn fresh_variable(&self, var: &SharedSymbolicVariable) -> SharedAstNode {
        let node = AstNode::make(
            AstKind::Variable(var.clone()),
            var.width(),
            false,
            Vec::new(),
        );
        let mut nodes = self.variable_nodes.borrow_mut();
        let entry = nodes.entry(var.id()).or_default();
        entry.retain(|n| n.strong_count() > 0);
        entry.push(Rc::downgrade(&node));
        node
    }

    /// A node standing for the current AST of `expr`.
    ///
    /// The node registers itself as a parent of the expression's root, so it
    /// is invalidated together with it.
    pub fn reference(&self, expr: &SharedSymbolicExpression) -> SharedAstNode {
        let root = expr.ast();
        let node = AstNode::make(
            AstKind::Reference(expr.clone()),
            root.width(),
            root.is_logical(),
            Vec::new(),
        );
        root.add_parent(&node);
        node
    }

    fn unary(&self, kind: AstKind, a: &SharedAstNode) -> Result<SharedAstNode> {
        expect_bv(a, kind.operator_name())?;
        Ok(AstNode::make(kind, a.width(), false, vec![a.clone()]))
    }

    fn binary(&self, kind: AstKind, a: &SharedAstNode, b: &SharedAstNode) -> Result<SharedAstNode> {
        self.check_bv_pair(&kind, a, b)?;
        Ok(AstNode::make(kind, a.width(), false, vec![a.clone(), b.clone()]))
    }

    fn comparison(
        &self,
        kind: AstKind,
        a: &SharedAstNode,
        b: &SharedAstNode,
    ) -> Result<SharedAstNode> {
        self.check_bv_pair(&kind, a, b)?;
        Ok(AstNode::make(kind, 1, true, vec![a.clone(), b.clone()]))
    }

    fn check_bv_pair(&self, kind: &AstKind, a: &SharedAstNode, b: &SharedAstNode) -> Result<()> {
        let op = kind.operator_name();
        expect_bv(a, op)?;
        expect_bv(b, op)?;
        expect_same_sort(a, b, op)
    }

    pub fn bvnot(&self, a: &SharedAstNode) -> Result<SharedAstNode> {
        self.unary(AstKind::BvNot, a)
    }

    pub fn bvneg(&self, a: &SharedAstNode) -> Result<SharedAstNode> {
        self.unary(AstKind::BvNeg, a)
    }

    binary_builders! {
        bvadd => BvAdd,
        bvsub => BvSub,
        bvmul => BvMul,
        /// Fails on evaluation if the divisor is zero.
        bvudiv => BvUdiv,
        bvsdiv => BvSdiv,
        bvurem => BvUrem,
        bvsrem => BvSrem,
        bvsmod => BvSmod,
        bvand => BvAnd,
        bvor => BvOr,
        bvxor => BvXor,
        bvnand => BvNand,
        bvnor => BvNor,
        bvxnor => BvXnor,
        bvshl => BvShl,
        bvlshr => BvLshr,
        bvashr => BvAshr,
    }

    comparison_builders! {
        bvult => BvUlt,
        bvule => BvUle,
        bvugt => BvUgt,
        bvuge => BvUge,
        bvslt => BvSlt,
        bvsle => BvSle,
        bvsgt => BvSgt,
        bvsge => BvSge,
    }

    pub fn bvrol(&self, a: &SharedAstNode, amount: u32) -> Result<SharedAstNode> {
        self.unary(AstKind::BvRol(amount), a)
    }

    pub fn bvror(&self, a: &SharedAstNode, amount: u32) -> Result<SharedAstNode> {
        self.unary(AstKind::BvRor(amount), a)
    }

    /// Bits `high..=low` of `a`.
    pub fn extract(&self, high: u32, low: u32, a: &SharedAstNode) -> Result<SharedAstNode> {
        expect_bv(a, "extract")?;
        if high < low || high >= a.width() {
            return Err(Error::range(format!(
                "invalid extract [{high}:{low}] on a {}-bit node",
                a.width()
            )));
        }
        Ok(AstNode::make(
            AstKind::Extract { high, low },
            high - low + 1,
            false,
            vec![a.clone()],
        ))
    }

    pub fn zx(&self, extra: u32, a: &SharedAstNode) -> Result<SharedAstNode> {
        self.extend(AstKind::ZeroExtend(extra), extra, a)
    }

    pub fn sx(&self, extra: u32, a: &SharedAstNode) -> Result<SharedAstNode> {
        self.extend(AstKind::SignExtend(extra), extra, a)
    }

    fn extend(&self, kind: AstKind, extra: u32, a: &SharedAstNode) -> Result<SharedAstNode> {
        expect_bv(a, kind.operator_name())?;
        check_width(a.width() + extra)?;
        Ok(AstNode::make(kind, a.width() + extra, false, vec![a.clone()]))
    }

    /// Concatenation, the first part being the most significant.
    pub fn concat(&self, parts: &[SharedAstNode]) -> Result<SharedAstNode> {
        if parts.is_empty() {
            return Err(Error::range("concat expects at least one operand"));
        }
        for part in parts {
            expect_bv(part, "concat")?;
        }
        let width = parts.iter().map(|p| p.width()).sum();
        check_width(width)?;
        Ok(AstNode::make(AstKind::Concat, width, false, parts.to_vec()))
    }

    pub fn ite(
        &self,
        condition: &SharedAstNode,
        then: &SharedAstNode,
        otherwise: &SharedAstNode,
    ) -> Result<SharedAstNode> {
        expect_logical(condition, "ite")?;
        expect_same_sort(then, otherwise, "ite")?;
        Ok(AstNode::make(
            AstKind::Ite,
            then.width(),
            then.is_logical(),
            vec![condition.clone(), then.clone(), otherwise.clone()],
        ))
    }

    pub fn equal(&self, a: &SharedAstNode, b: &SharedAstNode) -> Result<SharedAstNode> {
        expect_same_sort(a, b, "=")?;
        Ok(AstNode::make(AstKind::Equal, 1, true, vec![a.clone(), b.clone()]))
    }

    pub fn distinct(&self, a: &SharedAstNode, b: &SharedAstNode) -> Result<SharedAstNode> {
        expect_same_sort(a, b, "distinct")?;
        Ok(AstNode::make(
            AstKind::Distinct,
            1,
            true,
            vec![a.clone(), b.clone()],
        ))
    }

    pub fn lnot(&self, a: &SharedAstNode) -> Result<SharedAstNode> {
        expect_logical(a, "not")?;
        Ok(AstNode::make(AstKind::LNot, 1, true, vec![a.clone()]))
    }

    pub fn land(&self, a: &SharedAstNode, b: &SharedAstNode) -> Result<SharedAstNode> {
        expect_logical(a, "and")?;
        expect_logical(b, "and")?;
        Ok(AstNode::make(AstKind::LAnd, 1, true, vec![a.clone(), b.clone()]))
    }

    pub fn lor(&self, a: &SharedAstNode, b: &SharedAstNode) -> Result<SharedAstNode> {
        expect_logical(a, "or")?;
        expect_logical(b, "or")?;
        Ok(AstNode::make(AstKind::LOr, 1, true, vec![a.clone(), b.clone()]))
    }

    /// Copies the operator nodes of the graph rooted at `node`.
    ///
    /// Variable and expression reference leaves are shared with the original,
    /// so the copy follows later changes to variable values, but replacing a
    /// child in either graph does not affect the other one.
    pub fn duplicate(&self, node: &SharedAstNode) -> SharedAstNode {
        self.copy_graph(node, false)
    }

    /// Copies the whole graph rooted at `node`, expanding expression
    /// references into copies of the referenced ASTs. No node of the result
    /// is shared with the original.
    pub fn unroll(&self, node: &SharedAstNode) -> SharedAstNode {
        self.copy_graph(node, true)
    }

    fn copy_graph(&self, root: &SharedAstNode, unroll: bool) -> SharedAstNode {
        let mut copies: HashMap<*const AstNode, SharedAstNode> = HashMap::new();
        let copy_of = |copies: &HashMap<*const AstNode, SharedAstNode>, node: &SharedAstNode| {
            copies
                .get(&Rc::as_ptr(node))
                .cloned()
                .expect("Dependencies are copied before their dependents")
        };

        let mut stack = vec![(root.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            let key = Rc::as_ptr(&node);
            if copies.contains_key(&key) {
                continue;
            }

            let copy = match (node.kind(), unroll) {
                (AstKind::Variable(_) | AstKind::Reference(_), false) => node.clone(),
                (AstKind::Variable(var), true) => self.fresh_variable(var),
                (AstKind::Reference(expr), true) => {
                    let target = expr.ast();
                    if !expanded {
                        stack.push((node.clone(), true));
                        stack.push((target, false));
                        continue;
                    }
                    copy_of(&copies, &target)
                }
                (kind, _) => {
                    if !expanded {
                        stack.push((node.clone(), true));
                        stack.extend(node.children().into_iter().map(|c| (c, false)));
                        continue;
                    }
                    let children = node
                        .children_ref()
                        .iter()
                        .map(|c| copy_of(&copies, c))
                        .collect();
                    AstNode::make(kind.clone(), node.width(), node.is_logical(), children)
                }
            };
            copies.insert(key, copy);
        }

        log_trace!(
            "Copied {} nodes ({})",
            copies.len(),
            if unroll { "unrolled" } else { "duplicated" }
        );
        copy_of(&copies, root)
    }

    /// Invalidates every node computed from the variable with `id`.
    pub(crate) fn refresh_variable(&self, id: usize) {
        let nodes = self
            .variable_nodes
            .borrow()
            .get(&id)
            .map(|nodes| nodes.iter().filter_map(|n| n.upgrade()).collect::<Vec<_>>())
            .unwrap_or_default();
        for node in nodes {
            node.invalidate();
        }
    }
}
