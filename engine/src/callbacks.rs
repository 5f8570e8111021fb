//! Hooks into concrete state accesses.
//!
//! `GetConcrete*` callbacks run right before the engine consumes a concrete
//! value, which lets them supply it (e.g., by mapping memory lazily).
//! `SetConcrete*` callbacks run after a concrete value has been committed.

use std::rc::Rc;

use derive_more as dm;
use paste::paste;

use crate::{
    arch::{MemoryAccess, Register},
    state::ConcreteState,
};

macro_rules! define_callbacks {
    ($($(#[$meta:meta])* $kind:ident($($arg:ty),*);)*) => {
        paste! {
            #[derive(Debug, dm::Display, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum CallbackKind {
                $($kind,)*
            }

            $(
                pub type [<$kind Handler>] = Rc<dyn Fn(&mut ConcreteState, $($arg),*)>;
            )*

            /// A handler tagged with the category it is registered in.
            /// Two callbacks are the same if they share the handler allocation.
            #[derive(Clone)]
            pub enum Callback {
                $(
                    $(#[$meta])*
                    $kind([<$kind Handler>]),
                )*
            }

            impl Callback {
                $(
                    pub fn [<$kind:snake>](
                        handler: impl Fn(&mut ConcreteState, $($arg),*) + 'static,
                    ) -> Self {
                        Self::$kind(Rc::new(handler))
                    }
                )*

                pub fn kind(&self) -> CallbackKind {
                    match self {
                        $(Self::$kind(_) => CallbackKind::$kind,)*
                    }
                }

                fn same_as(&self, other: &Self) -> bool {
                    match (self, other) {
                        $((Self::$kind(a), Self::$kind(b)) => Rc::ptr_eq(a, b),)*
                        #[allow(unreachable_patterns)]
                        _ => false,
                    }
                }
            }

            /// Registered callbacks, per category in registration order.
            #[derive(Default, Clone)]
            pub(crate) struct Callbacks {
                $([<$kind:snake>]: Vec<[<$kind Handler>]>,)*
            }

            impl Callbacks {
                /// Returns false if the callback was already registered.
                pub(crate) fn add(&mut self, callback: Callback) -> bool {
                    if self.contains(&callback) {
                        return false;
                    }
                    match callback {
                        $(Callback::$kind(handler) => self.[<$kind:snake>].push(handler),)*
                    }
                    true
                }

                /// Returns false if the callback was not registered.
                pub(crate) fn remove(&mut self, callback: &Callback) -> bool {
                    match callback {
                        $(
                            Callback::$kind(handler) => {
                                let before = self.[<$kind:snake>].len();
                                self.[<$kind:snake>].retain(|h| !Rc::ptr_eq(h, handler));
                                before != self.[<$kind:snake>].len()
                            }
                        )*
                    }
                }

                pub(crate) fn contains(&self, callback: &Callback) -> bool {
                    match callback {
                        $(
                            Callback::$kind(handler) => self
                                .[<$kind:snake>]
                                .iter()
                                .any(|h| Rc::ptr_eq(h, handler)),
                        )*
                    }
                }

                pub(crate) fn count(&self, kind: CallbackKind) -> usize {
                    match kind {
                        $(CallbackKind::$kind => self.[<$kind:snake>].len(),)*
                    }
                }

                $(
                    /// A snapshot of the handlers, so that invoking them does
                    /// not hold a borrow of the registry.
                    pub(crate) fn [<$kind:snake>](&self) -> Vec<[<$kind Handler>]> {
                        self.[<$kind:snake>].clone()
                    }
                )*
            }
        }
    };
}

define_callbacks! {
    /// Runs before a concrete memory value is read.
    GetConcreteMemoryValue(&MemoryAccess);
    /// Runs before a concrete register value is read.
    GetConcreteRegisterValue(&Register);
    /// Runs after a memory value is written, with the written value.
    SetConcreteMemoryValue(&MemoryAccess, u64);
    /// Runs after a register value is written, with the written value.
    SetConcreteRegisterValue(&Register, u64);
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback({})", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn add_and_remove_are_idempotent() {
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let callback = Callback::get_concrete_register_value(move |_, _| {
            counter.set(counter.get() + 1)
        });

        let mut callbacks = Callbacks::default();
        assert!(callbacks.add(callback.clone()));
        assert!(!callbacks.add(callback.clone()));
        assert_eq!(callbacks.count(CallbackKind::GetConcreteRegisterValue), 1);
        assert_eq!(callbacks.count(CallbackKind::GetConcreteMemoryValue), 0);

        assert!(callbacks.remove(&callback));
        assert!(!callbacks.remove(&callback));
        assert_eq!(callbacks.count(CallbackKind::GetConcreteRegisterValue), 0);
    }

    #[test]
    fn distinct_closures_are_distinct_callbacks() {
        let a = Callback::set_concrete_memory_value(|_, _, _| {});
        let b = Callback::set_concrete_memory_value(|_, _, _| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.kind(), CallbackKind::SetConcreteMemoryValue);
    }
}
