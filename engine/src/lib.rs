//! A symbolic execution engine for x86 and x86-64 machine code.
//!
//! The entry point is [`Context`]: pick an architecture, optionally turn some
//! registers or memory cells into symbolic variables, then feed instructions
//! to [`Context::processing`]. Every side effect of an instruction is recorded
//! as a [`SymbolicExpression`] whose AST describes the new value in terms of
//! earlier expressions and symbolic variables.

pub mod arch;
pub mod ast;
pub mod bv;
pub mod callbacks;
pub mod config;
mod context;
pub mod error;
pub mod expr;
pub mod instruction;
pub mod state;
pub(crate) mod utils;
pub mod vars;

pub use arch::{ArchitectureKind, MemoryAccess, Register, RegisterId};
pub use ast::{context::AstContext, AstKind, AstNode, SharedAstNode};
pub use bv::BitVector;
pub use callbacks::{Callback, CallbackKind};
pub use config::{EngineConfig, Mode};
pub use context::Context;
pub use error::{Error, Result};
pub use expr::{ExpressionKind, ExpressionOrigin, SharedSymbolicExpression, SymbolicExpression};
pub use instruction::{Instruction, InstructionDecoder, Mnemonic, Operand, Stage};
pub use state::ConcreteState;
pub use utils::logging::init_logging;
pub use vars::{SharedSymbolicVariable, SymbolicVariable, VariableOrigin};
