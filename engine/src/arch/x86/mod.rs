//! The x86 and x86-64 instruction set.

mod decoder;
mod semantics;

pub use decoder::IcedDecoder;
pub(crate) use semantics::{ConcreteWrite, Semantics};
