//! The seams through which a compilation reaches the outside world: the
//! builtin-function registry, the package registry, and the per-embedding
//! compile context.

use crate::descriptors::{ClassDescriptor, FunctionDescriptor};
use crate::types::{Type, TypeKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Read-only registry of builtin global functions and per-type methods,
/// supplied by the runtime library.
pub trait BuiltinRegistry {
    fn functions(&self) -> &[FunctionDescriptor];

    /// Look up a builtin method for values of the given type. A method
    /// registered against `def` applies to every type.
    fn lookup_method(&self, ty: &Type, name: &str) -> Option<&FunctionDescriptor>;

    fn lookup_function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions().iter().find(|f| f.name == name)
    }
}

pub trait Package {
    fn class(&self, name: &str) -> Option<ClassDescriptor>;
}

pub trait PackageRegistry {
    fn package(&self, name: &str) -> Option<&dyn Package>;
}

/// Registry backed by in-memory tables. Embedders populate one from the
/// runtime's descriptor list; tests use it directly.
#[derive(Debug, Default)]
pub struct StaticBuiltins {
    functions: Vec<FunctionDescriptor>,
    methods: HashMap<String, Vec<(Type, FunctionDescriptor)>>,
}

impl StaticBuiltins {
    pub fn new() -> Self {
        StaticBuiltins::default()
    }

    pub fn add_function(&mut self, descriptor: FunctionDescriptor) {
        self.functions.push(descriptor);
    }

    pub fn add_method(&mut self, ty: Type, descriptor: FunctionDescriptor) {
        self.methods
            .entry(descriptor.name.clone())
            .or_default()
            .push((ty, descriptor));
    }
}

impl BuiltinRegistry for StaticBuiltins {
    fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    fn lookup_method(&self, ty: &Type, name: &str) -> Option<&FunctionDescriptor> {
        let candidates = self.methods.get(name)?;
        candidates
            .iter()
            .find(|(t, _)| t.is_boxed_or_unboxed(ty))
            .or_else(|| candidates.iter().find(|(t, _)| t.kind == TypeKind::Any))
            .map(|(_, d)| d)
    }
}

/// Package registry with no packages; type paths then resolve against local
/// classes and imports only.
#[derive(Debug, Default)]
pub struct NoPackages;

impl PackageRegistry for NoPackages {
    fn package(&self, _name: &str) -> Option<&dyn Package> {
        None
    }
}

/// Per-embedding compilation settings. Shared between concurrent
/// compilations; the only mutable state is the class-name counter, which is
/// atomic, and the globals map, whose synchronisation is the caller's
/// responsibility.
#[derive(Debug)]
pub struct CompileContext {
    /// Namespace prefix used when composing internal class names.
    pub package_prefix: String,
    /// Scale used for decimal division during constant folding.
    pub max_scale: u32,
    /// Enable constant folding.
    pub evaluate_const_exprs: bool,
    /// When true, top-level declarations bind into the shared globals map
    /// rather than local scope.
    pub repl_mode: bool,
    /// Caller-supplied global bindings, seeded with the static type of each
    /// bound value. REPL-mode resolution adds new top-level names here.
    pub globals: HashMap<String, Type>,
    script_counter: AtomicU32,
}

impl Default for CompileContext {
    fn default() -> Self {
        CompileContext {
            package_prefix: "quill.pkg".to_string(),
            max_scale: 20,
            evaluate_const_exprs: true,
            repl_mode: false,
            globals: HashMap::new(),
            script_counter: AtomicU32::new(0),
        }
    }
}

impl CompileContext {
    pub fn new() -> Self {
        CompileContext::default()
    }

    /// Unique name for the next generated script class.
    pub fn next_script_name(&self) -> String {
        let n = self.script_counter.fetch_add(1, Ordering::Relaxed);
        format!("Script{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_names_are_unique() {
        let ctx = CompileContext::new();
        let a = ctx.next_script_name();
        let b = ctx.next_script_name();
        assert_ne!(a, b);
    }

    #[test]
    fn method_lookup_falls_back_to_any() {
        let mut reg = StaticBuiltins::new();
        reg.add_method(
            Type::STRING,
            FunctionDescriptor::builtin("size", &[], &[], Type::INT),
        );
        reg.add_method(
            Type::ANY,
            FunctionDescriptor::builtin("toString", &[], &[], Type::STRING),
        );
        assert!(reg.lookup_method(&Type::STRING, "size").is_some());
        assert!(reg.lookup_method(&Type::LIST, "size").is_none());
        assert!(reg.lookup_method(&Type::LIST, "toString").is_some());
        assert!(reg.lookup_method(&Type::STRING.boxed(), "size").is_some());
    }
}
