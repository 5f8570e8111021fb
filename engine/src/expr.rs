use std::{cell::RefCell, fmt, rc::Rc};

use derive_more as dm;

use crate::{
    arch::{MemoryAccess, Register},
    ast::{context::AstContext, AstKind, SharedAstNode},
    error::{Error, Result},
};

pub type SharedSymbolicExpression = Rc<SymbolicExpression>;

#[derive(Debug, dm::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    #[display("register")]
    Register,
    #[display("memory")]
    Memory,
    /// Not bound to any storage (e.g., intermediate values).
    #[display("volatile")]
    Volatile,
}

/// The cell a symbolic expression was assigned to.
#[derive(Debug, dm::Display, Clone, Copy, PartialEq, Eq, dm::From)]
pub enum ExpressionOrigin {
    #[display("{_0}")]
    Register(Register),
    #[display("{_0}")]
    Memory(MemoryAccess),
}

/// The value of a side effect, as an AST over earlier expressions and
/// symbolic variables.
pub struct SymbolicExpression {
    id: usize,
    kind: ExpressionKind,
    origin: Option<ExpressionOrigin>,
    ast: RefCell<SharedAstNode>,
    comment: RefCell<String>,
}

impl SymbolicExpression {
    pub(crate) fn new(
        id: usize,
        ast: SharedAstNode,
        origin: Option<ExpressionOrigin>,
        comment: impl Into<String>,
    ) -> Self {
        let kind = match origin {
            Some(ExpressionOrigin::Register(_)) => ExpressionKind::Register,
            Some(ExpressionOrigin::Memory(_)) => ExpressionKind::Memory,
            None => ExpressionKind::Volatile,
        };
        Self {
            id,
            kind,
            origin,
            ast: RefCell::new(ast),
            comment: RefCell::new(comment.into()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> ExpressionKind {
        self.kind
    }

    pub fn origin(&self) -> Option<ExpressionOrigin> {
        self.origin
    }

    pub fn ast(&self) -> SharedAstNode {
        self.ast.borrow().clone()
    }

    /// A duplicate of the AST that can be modified without affecting this
    /// expression.
    pub fn new_ast(&self, ctx: &AstContext) -> SharedAstNode {
        ctx.duplicate(&self.ast())
    }

    /// Replaces the AST, keeping the id. Nodes referencing this expression
    /// follow the new AST.
    pub fn set_ast(&self, ast: SharedAstNode) -> Result<()> {
        let old = self.ast();
        if Rc::ptr_eq(&old, &ast) {
            return Ok(());
        }
        if old.width() != ast.width() || old.is_logical() != ast.is_logical() {
            return Err(Error::range(format!(
                "cannot replace the {}-bit AST of ref!{} with a {}-bit one",
                old.width(),
                self.id,
                ast.width()
            )));
        }

        let references = old
            .parents()
            .into_iter()
            .filter(|p| matches!(p.kind(), AstKind::Reference(e) if e.id() == self.id))
            .collect::<Vec<_>>();
        *self.ast.borrow_mut() = ast.clone();
        for reference in references {
            old.remove_parent(&reference);
            ast.add_parent(&reference);
            reference.invalidate();
        }
        Ok(())
    }

    pub fn comment(&self) -> String {
        self.comment.borrow().clone()
    }

    pub fn set_comment(&self, comment: impl Into<String>) {
        *self.comment.borrow_mut() = comment.into();
    }

    pub fn is_register(&self) -> bool {
        self.kind == ExpressionKind::Register
    }

    pub fn is_memory(&self) -> bool {
        self.kind == ExpressionKind::Memory
    }

    /// Whether the value depends on a symbolic variable.
    pub fn is_symbolized(&self) -> bool {
        self.ast().is_symbolized()
    }
}

impl fmt::Debug for SymbolicExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolicExpression")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SymbolicExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ast = self.ast();
        if ast.is_logical() {
            write!(f, "(define-fun ref!{} () Bool {ast})", self.id)?;
        } else {
            write!(
                f,
                "(define-fun ref!{} () (_ BitVec {}) {ast})",
                self.id,
                ast.width()
            )?;
        }
        let comment = self.comment.borrow();
        if !comment.is_empty() {
            write!(f, " ; {comment}")?;
        }
        Ok(())
    }
}

/// The expressions of a context, in creation order. Ids are indices.
#[derive(Default)]
pub(crate) struct SymbolicExpressions {
    expressions: Vec<SharedSymbolicExpression>,
}

impl SymbolicExpressions {
    pub(crate) fn add(
        &mut self,
        ast: SharedAstNode,
        origin: Option<ExpressionOrigin>,
        comment: impl Into<String>,
    ) -> SharedSymbolicExpression {
        let expr = Rc::new(SymbolicExpression::new(
            self.expressions.len(),
            ast,
            origin,
            comment,
        ));
        self.expressions.push(expr.clone());
        expr
    }

    pub(crate) fn get(&self, id: usize) -> Option<&SharedSymbolicExpression> {
        self.expressions.get(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.expressions.len()
    }

    /// Drops the expressions created after the table had `len` entries.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.expressions.truncate(len);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &SharedSymbolicExpression> {
        self.expressions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_ast_moves_references() {
        let ctx = AstContext::new();
        let mut table = SymbolicExpressions::default();
        let expr = table.add(ctx.bv(1, 8).unwrap(), None, "");
        let user = ctx
            .bvadd(&ctx.reference(&expr), &ctx.bv(1, 8).unwrap())
            .unwrap();
        assert_eq!(user.evaluate().unwrap().to_u64(), Some(2));

        expr.set_ast(ctx.bv(5, 8).unwrap()).unwrap();
        assert_eq!(user.evaluate().unwrap().to_u64(), Some(6));
        assert_eq!(expr.id(), 0);
        assert!(expr.set_ast(ctx.bv(5, 16).unwrap()).is_err());
    }

    #[test]
    fn renders_without_empty_comment() {
        let ctx = AstContext::new();
        let mut table = SymbolicExpressions::default();
        let expr = table.add(ctx.bv(1, 8).unwrap(), None, "");
        assert_eq!(expr.to_string(), "(define-fun ref!0 () (_ BitVec 8) (_ bv1 8))");
        expr.set_comment("note");
        assert_eq!(
            expr.to_string(),
            "(define-fun ref!0 () (_ BitVec 8) (_ bv1 8)) ; note"
        );
        assert_eq!(expr.kind(), ExpressionKind::Volatile);
    }
}
