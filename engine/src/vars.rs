use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use delegate::delegate;
use num_bigint::BigUint;

use common::log_info;

use crate::{
    arch::{MemoryAccess, Register},
    bv::check_width,
    error::{Error, Result},
};

pub type SharedSymbolicVariable = Rc<SymbolicVariable>;

/// Where a symbolic variable was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableOrigin {
    Register(Register),
    Memory(MemoryAccess),
}

#[derive(Debug)]
pub struct SymbolicVariable {
    id: usize,
    width: u32,
    name: String,
    origin: Option<VariableOrigin>,
    comment: RefCell<String>,
    value: RefCell<BigUint>,
}

impl SymbolicVariable {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> Option<VariableOrigin> {
        self.origin
    }

    pub fn comment(&self) -> String {
        self.comment.borrow().clone()
    }

    pub fn set_comment(&self, comment: impl Into<String>) {
        *self.comment.borrow_mut() = comment.into();
    }

    /// The concrete value currently assigned to the variable.
    pub fn value(&self) -> BigUint {
        self.value.borrow().clone()
    }

    /// Only the context changes values, as it also invalidates dependent ASTs.
    pub(crate) fn set_value(&self, value: BigUint) -> Result<()> {
        if value.bits() > u64::from(self.width) {
            return Err(Error::range(format!(
                "value {value} does not fit in the {}-bit variable `{}`",
                self.width, self.name
            )));
        }
        *self.value.borrow_mut() = value;
        Ok(())
    }
}

impl fmt::Display for SymbolicVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.width)
    }
}

/// The variables of a context, indexed by id and name.
#[derive(Default)]
pub(crate) struct SymbolicVariables {
    variables: BTreeMap<usize, SharedSymbolicVariable>,
    names: BTreeMap<String, usize>,
}

impl SymbolicVariables {
    pub(crate) fn add(
        &mut self,
        width: u32,
        name: Option<&str>,
        origin: Option<VariableOrigin>,
        value: BigUint,
    ) -> Result<SharedSymbolicVariable> {
        check_width(width)?;
        let id = self.variables.len();
        let name = name.map_or_else(|| format!("SymVar_{id}"), str::to_owned);
        if self.names.contains_key(&name) {
            return Err(Error::NameConflict { name });
        }

        let var = Rc::new(SymbolicVariable {
            id,
            width,
            name: name.clone(),
            origin,
            comment: RefCell::new(String::new()),
            value: RefCell::new(BigUint::default()),
        });
        var.set_value(value)?;

        log_info!("Added a new symbolic variable: {}", var);
        self.names.insert(name, id);
        self.variables.insert(id, var.clone());
        Ok(var)
    }

    pub(crate) fn get(&self, id: usize) -> Option<&SharedSymbolicVariable> {
        self.variables.get(&id)
    }

    pub(crate) fn get_by_name(&self, name: &str) -> Option<&SharedSymbolicVariable> {
        self.names.get(name).and_then(|id| self.variables.get(id))
    }

    delegate! {
        to self.variables {
            #[call(values)]
            pub(crate) fn iter(&self) -> impl Iterator<Item = &SharedSymbolicVariable>;
            pub(crate) fn len(&self) -> usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_default_names_and_ids() {
        let mut vars = SymbolicVariables::default();
        let a = vars.add(8, None, None, BigUint::from(1u8)).unwrap();
        let b = vars.add(16, Some("input"), None, BigUint::default()).unwrap();
        assert_eq!((a.id(), a.name()), (0, "SymVar_0"));
        assert_eq!((b.id(), b.name()), (1, "input"));
        assert_eq!(vars.get_by_name("input").map(|v| v.id()), Some(1));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn rejects_bad_widths_names_and_values() {
        let mut vars = SymbolicVariables::default();
        assert!(vars.add(0, None, None, BigUint::default()).is_err());
        assert!(vars.add(8, None, None, BigUint::from(0x100u32)).is_err());
        vars.add(8, Some("x"), None, BigUint::default()).unwrap();
        assert!(matches!(
            vars.add(8, Some("x"), None, BigUint::default()),
            Err(Error::NameConflict { .. })
        ));
        let x = vars.get_by_name("x").unwrap();
        assert!(x.set_value(BigUint::from(0x1ffu32)).is_err());
        assert_eq!(x.value(), BigUint::default());
    }
}
