//! Quill Core
//!
//! Shared types, descriptors, and values used across the compiler and the
//! back end / runtime: the type lattice, the literal value domain, class and
//! function descriptors, and the embedding seams (registries and context).

pub mod context;
pub mod descriptors;
pub mod names;
pub mod types;
pub mod values;

pub use context::{
    BuiltinRegistry, CompileContext, NoPackages, Package, PackageRegistry, StaticBuiltins,
};
pub use descriptors::{ClassDescriptor, ClassMap, FunctionDescriptor};
pub use types::{ClassId, Type, TypeKind};
pub use values::Value;
