//! Dense, stable 32-bit ids for every arena-owned entity (spec.md §9 "Pointer graphs").
//!
//! No raw pointers persist anywhere in the container: every cross-entity reference is
//! one of these newtypes, resolved back to data through the owning arena.

use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: $name = $name(u32::MAX);

            #[inline]
            pub fn is_none(self) -> bool {
                self == Self::NONE
            }

            #[inline]
            pub fn is_some(self) -> bool {
                !self.is_none()
            }

            #[inline]
            pub fn index(self) -> usize {
                debug_assert!(self.is_some());
                self.0 as usize
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NONE
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, "<none>")
                } else {
                    write!(f, "{}", self.0)
                }
            }
        }
    };
}

define_id!(TypeId, "Index into a module's type table.");
define_id!(FunctionId, "Index of a function declaration within a module.");
define_id!(BlockId, "Index of a basic block within a function's code container.");
define_id!(InstrId, "Index of an instruction within a function's code container.");
define_id!(PhiId, "Index of a phi node within a function's code container.");
define_id!(CallId, "Index of a call node within a function's code container.");
define_id!(InlineAsmId, "Index of an inline-assembly node within a function's code container.");
