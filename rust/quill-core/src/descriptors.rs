//! Class and function descriptors: the symbol-table entries the resolver
//! builds and the back end consumes.

use crate::names;
use crate::types::{ClassId, Type};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Descriptor of a callable: a user function or method, a builtin, or a
/// synthesised wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub return_type: Type,
    pub param_count: usize,
    pub mandatory_count: usize,
    pub param_names: Vec<String>,
    pub param_types: Vec<Type>,
    pub mandatory_params: HashSet<String>,
    pub is_static: bool,
    pub is_builtin: bool,
    pub is_async: bool,
    pub is_wrapper: bool,
    pub is_init_method: bool,
    /// Builtin needs the call-site source/offset passed through.
    pub needs_location: bool,
    pub implementing_class: Option<String>,
    pub implementing_method: Option<String>,
    /// Name of the varargs wrapper generated for this function.
    pub wrapper_method: Option<String>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        FunctionDescriptor {
            name: name.into(),
            return_type,
            param_count: 0,
            mandatory_count: 0,
            param_names: Vec::new(),
            param_types: Vec::new(),
            mandatory_params: HashSet::new(),
            is_static: false,
            is_builtin: false,
            is_async: false,
            is_wrapper: false,
            is_init_method: false,
            needs_location: false,
            implementing_class: None,
            implementing_method: None,
            wrapper_method: None,
        }
    }

    /// Builtin descriptor where all parameters are mandatory.
    pub fn builtin(
        name: impl Into<String>,
        param_names: &[&str],
        param_types: &[Type],
        return_type: Type,
    ) -> Self {
        let mut desc = FunctionDescriptor::new(name, return_type);
        desc.is_builtin = true;
        desc.param_count = param_names.len();
        desc.mandatory_count = param_names.len();
        desc.param_names = param_names.iter().map(|s| s.to_string()).collect();
        desc.param_types = param_types.to_vec();
        desc.mandatory_params = param_names.iter().map(|s| s.to_string()).collect();
        desc
    }

    pub fn wrapper_name(&self) -> String {
        format!("{}{}", self.name, names::WRAPPER_SUFFIX)
    }
}

/// Descriptor of a user-defined class. Field and method namespaces are
/// disjoint, and neither may clash with a builtin method on `def`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Simple name, e.g. `Inner`.
    pub name: String,
    pub package_name: String,
    /// Fully qualified name, e.g. `a.b.Outer.Inner`.
    pub qualified_name: String,
    pub base: Option<ClassId>,
    pub interfaces: Vec<String>,
    pub fields: IndexMap<String, Type>,
    /// Names of fields that have an initialiser (optional at construction).
    pub optional_fields: HashSet<String>,
    pub methods: IndexMap<String, FunctionDescriptor>,
    pub inner_classes: IndexMap<String, ClassId>,
    pub init_method: Option<FunctionDescriptor>,
}

impl ClassDescriptor {
    pub fn new(
        name: impl Into<String>,
        package_name: impl Into<String>,
        qualified_name: impl Into<String>,
    ) -> Self {
        ClassDescriptor {
            name: name.into(),
            package_name: package_name.into(),
            qualified_name: qualified_name.into(),
            base: None,
            interfaces: Vec::new(),
            fields: IndexMap::new(),
            optional_fields: HashSet::new(),
            methods: IndexMap::new(),
            inner_classes: IndexMap::new(),
            init_method: None,
        }
    }
}

/// Arena of class descriptors for one compilation. `Type::Instance` /
/// `Type::Class` index into this map, which gives forward type references a
/// place to point at before the class body has been processed.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClassMap {
    classes: Vec<ClassDescriptor>,
    by_name: HashMap<String, ClassId>,
}

impl ClassMap {
    pub fn new() -> Self {
        ClassMap::default()
    }

    pub fn alloc(&mut self, descriptor: ClassDescriptor) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.by_name.insert(descriptor.qualified_name.clone(), id);
        self.classes.push(descriptor);
        id
    }

    pub fn get(&self, id: ClassId) -> &ClassDescriptor {
        &self.classes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassDescriptor {
        &mut self.classes[id.0 as usize]
    }

    pub fn lookup(&self, qualified_name: &str) -> Option<ClassId> {
        self.by_name.get(qualified_name).copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// True when `sub` is `sup` or inherits from it.
    pub fn is_assignable(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut current = Some(sub);
        while let Some(id) = current {
            if id == sup {
                return true;
            }
            current = self.get(id).base;
        }
        false
    }

    /// Instance convertibility including the class hierarchy; falls back to
    /// [`Type::is_convertible_to`] for everything else.
    pub fn convertible(&self, from: &Type, to: &Type) -> bool {
        match (from.class_id(), to.class_id()) {
            (Some(a), Some(b)) => self.is_assignable(a, b) || self.is_assignable(b, a),
            _ => from.is_convertible_to(to),
        }
    }

    /// Find a method on the class or any ancestor.
    pub fn method(&self, id: ClassId, name: &str) -> Option<&FunctionDescriptor> {
        let mut current = Some(id);
        while let Some(cid) = current {
            let desc = self.get(cid);
            if let Some(m) = desc.methods.get(name) {
                return Some(m);
            }
            current = desc.base;
        }
        None
    }

    /// Find a field type on the class or any ancestor.
    pub fn field(&self, id: ClassId, name: &str) -> Option<Type> {
        let mut current = Some(id);
        while let Some(cid) = current {
            let desc = self.get(cid);
            if let Some(t) = desc.fields.get(name) {
                return Some(*t);
            }
            current = desc.base;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_lookup() {
        let mut map = ClassMap::new();
        let mut base = ClassDescriptor::new("Base", "", "Base");
        base.fields.insert("x".to_string(), Type::INT);
        base.methods
            .insert("f".to_string(), FunctionDescriptor::new("f", Type::ANY));
        let base_id = map.alloc(base);
        let mut child = ClassDescriptor::new("Child", "", "Child");
        child.base = Some(base_id);
        let child_id = map.alloc(child);

        assert!(map.is_assignable(child_id, base_id));
        assert!(!map.is_assignable(base_id, child_id));
        assert_eq!(map.field(child_id, "x"), Some(Type::INT));
        assert!(map.method(child_id, "f").is_some());
        assert!(map.method(child_id, "g").is_none());
        assert!(map.convertible(&Type::instance(child_id), &Type::instance(base_id)));
    }
}
