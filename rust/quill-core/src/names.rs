//! Reserved names and method-name suffixes that form part of the stable
//! contract between the compiler, the back end, and the runtime.

/// Synthetic entry function of a compiled script.
pub const SCRIPT_MAIN: &str = "_$j$main";

/// Per-class initialiser method.
pub const INIT_METHOD: &str = "_$j$init";

/// Parameter of the script main holding the caller-supplied globals map.
pub const GLOBALS_PARAM: &str = "_$j$globals";

/// Implicit parameter of a parameterless closure.
pub const IT_PARAM: &str = "it";

pub const THIS: &str = "this";
pub const SUPER: &str = "super";

/// The regex capture-array variable in scope of a match.
pub const CAPTURE_ARR: &str = "$@";

/// Varargs wrapper of a method.
pub const WRAPPER_SUFFIX: &str = "$$w";

/// Continuation wrapper of a method.
pub const CONTINUATION_SUFFIX: &str = "$$c";

/// Static and bound method-handle fields.
pub const STATIC_HANDLE_SUFFIX: &str = "$sh";
pub const HANDLE_SUFFIX: &str = "$h";

/// Continuation method handle.
pub const CONTINUATION_HANDLE_SUFFIX: &str = "$ch";

/// True for identifiers the compiler reserves for its own use. User code may
/// read some of them (`it`, `this`, `super`, capture variables) but may never
/// declare them.
pub fn is_reserved(name: &str) -> bool {
    matches!(name, SCRIPT_MAIN | INIT_METHOD | GLOBALS_PARAM | THIS | SUPER | CAPTURE_ARR)
        || name.starts_with("_$j$")
}
