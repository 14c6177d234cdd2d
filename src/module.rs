//! A module: the type table and the function set (spec.md §3, §6).

use indexmap::IndexMap;

use crate::function::Function;
use crate::ids::{FunctionId, TypeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Bool,
    Int(crate::value::IntWidth),
    Float(crate::value::FloatWidth),
    Pointer,
    Struct { field_types: Vec<TypeId> },
    Union { field_types: Vec<TypeId> },
    Array { element: TypeId, length: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: Vec<TypeDescriptor>,
    pub functions: IndexMap<FunctionId, Function>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    pub fn add_type(&mut self, descriptor: TypeDescriptor) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(descriptor);
        id
    }

    pub fn type_of(&self, id: TypeId) -> &TypeDescriptor {
        &self.types[id.index()]
    }

    /// True for types passed by reference at call sites (spec.md §4.5: aggregate
    /// arguments don't count as escaping through the argument slot itself, since the
    /// callee only ever sees their address).
    pub fn is_by_reference(&self, id: TypeId) -> bool {
        matches!(
            self.type_of(id),
            TypeDescriptor::Struct { .. } | TypeDescriptor::Union { .. } | TypeDescriptor::Array { .. }
        )
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.insert(function.id, function);
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[&id]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        self.functions.get_mut(&id).expect("function id must exist")
    }
}
