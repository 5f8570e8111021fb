use std::fmt::{Display, Formatter, Result};

use super::{AstKind, AstNode};

impl AstKind {
    /// SMT-LIB name of the operator.
    pub(crate) fn operator_name(&self) -> &'static str {
        use AstKind::*;
        match self {
            Bv(_) => "bv",
            Variable(_) => "variable",
            Reference(_) => "reference",
            BvNot => "bvnot",
            BvNeg => "bvneg",
            BvAdd => "bvadd",
            BvSub => "bvsub",
            BvMul => "bvmul",
            BvUdiv => "bvudiv",
            BvSdiv => "bvsdiv",
            BvUrem => "bvurem",
            BvSrem => "bvsrem",
            BvSmod => "bvsmod",
            BvAnd => "bvand",
            BvOr => "bvor",
            BvXor => "bvxor",
            BvNand => "bvnand",
            BvNor => "bvnor",
            BvXnor => "bvxnor",
            BvShl => "bvshl",
            BvLshr => "bvlshr",
            BvAshr => "bvashr",
            BvRol(_) => "rotate_left",
            BvRor(_) => "rotate_right",
            Extract { .. } => "extract",
            ZeroExtend(_) => "zero_extend",
            SignExtend(_) => "sign_extend",
            Concat => "concat",
            Ite => "ite",
            Equal => "=",
            Distinct => "distinct",
            BvUlt => "bvult",
            BvUle => "bvule",
            BvUgt => "bvugt",
            BvUge => "bvuge",
            BvSlt => "bvslt",
            BvSle => "bvsle",
            BvSgt => "bvsgt",
            BvSge => "bvsge",
            LNot => "not",
            LAnd => "and",
            LOr => "or",
        }
    }
}

impl AstNode {
    pub(crate) fn operator_name(&self) -> &'static str {
        self.kind.operator_name()
    }
}

impl Display for AstNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        use AstKind::*;

        match &self.kind {
            Bv(value) => return write!(f, "{value}"),
            Variable(var) => return write!(f, "{}", var.name()),
            Reference(expr) => return write!(f, "ref!{}", expr.id()),
            _ => {}
        }

        /* NOTE: Indexed operators are written as `((_ op index...) args)`. */
        match &self.kind {
            BvRol(amount) | BvRor(amount) | ZeroExtend(amount) | SignExtend(amount) => {
                write!(f, "((_ {} {amount})", self.operator_name())?
            }
            Extract { high, low } => write!(f, "((_ extract {high} {low})")?,
            _ => write!(f, "({}", self.operator_name())?,
        }
        for child in self.children.borrow().iter() {
            write!(f, " {child}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::context::AstContext;

    #[test]
    fn renders_indexed_operators() {
        let ctx = AstContext::new();
        let x = ctx.bv(0x1234, 32).unwrap();
        let node = ctx
            .zx(32, &ctx.extract(15, 0, &x).unwrap())
            .map(|n| ctx.bvrol(&n, 3).unwrap())
            .unwrap();
        assert_eq!(
            node.to_string(),
            "((_ rotate_left 3) ((_ zero_extend 32) ((_ extract 15 0) (_ bv4660 32))))"
        );
    }

    #[test]
    fn renders_logical_operators() {
        let ctx = AstContext::new();
        let a = ctx.bv(1, 8).unwrap();
        let b = ctx.bv(2, 8).unwrap();
        let cond = ctx.lnot(&ctx.equal(&a, &b).unwrap()).unwrap();
        let node = ctx.ite(&cond, &a, &b).unwrap();
        assert_eq!(
            node.to_string(),
            "(ite (not (= (_ bv1 8) (_ bv2 8))) (_ bv1 8) (_ bv2 8))"
        );
    }
}
