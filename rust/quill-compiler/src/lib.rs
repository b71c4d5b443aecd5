//! Quill Compiler
//!
//! Source-to-typed-AST pipeline for the Quill scripting language: the
//! tokeniser, the recursive-descent parser, and the semantic resolver. The
//! output is a fully resolved script class plus the class and function
//! descriptors a back end needs to emit code.

pub mod compiler;
pub mod diagnostics;

use compiler::ast::ParsedUnit;
use compiler::error::CompileError;
use compiler::parser::Parser;
use compiler::resolve::Resolver;
use quill_core::{BuiltinRegistry, ClassMap, CompileContext, PackageRegistry};

/// A resolved compilation: the typed, desugared AST together with the
/// descriptors of every class it defines.
#[derive(Debug)]
pub struct CompiledScript {
    pub unit: ParsedUnit,
    pub classes: ClassMap,
}

/// Parse a script into an untyped AST. The script is modelled as a class
/// with a synthetic main function taking the globals map.
pub fn parse_script(source: &str, script_name: &str) -> Result<ParsedUnit, Vec<CompileError>> {
    Parser::new(source, script_name).parse_script()
}

/// Parse a single expression (trailing EOF required); used by eval-style
/// callers.
pub fn parse_expression(source: &str) -> Result<ParsedUnit, Vec<CompileError>> {
    Parser::new(source, "Expression").parse_expression()
}

/// Parse and resolve a script against the given context and registries.
pub fn compile_script(
    source: &str,
    ctx: &mut CompileContext,
    builtins: &dyn BuiltinRegistry,
    packages: &dyn PackageRegistry,
) -> Result<CompiledScript, Vec<CompileError>> {
    let name = ctx.next_script_name();
    compile_script_named(source, &name, ctx, builtins, packages)
}

/// Like [`compile_script`] but with a caller-chosen class name.
pub fn compile_script_named(
    source: &str,
    script_name: &str,
    ctx: &mut CompileContext,
    builtins: &dyn BuiltinRegistry,
    packages: &dyn PackageRegistry,
) -> Result<CompiledScript, Vec<CompileError>> {
    let mut unit = parse_script(source, script_name)?;
    let classes = Resolver::new(&mut unit, ctx, builtins, packages).resolve()?;
    Ok(CompiledScript { unit, classes })
}

/// Render compile errors against the source with ANSI colors.
pub fn format_errors(errors: &[CompileError], source: &str, filename: &str) -> String {
    diagnostics::format_errors(errors, source, filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{NoPackages, StaticBuiltins};

    fn compile(src: &str) -> Result<CompiledScript, Vec<CompileError>> {
        let mut ctx = CompileContext::new();
        compile_script_named(src, "Test", &mut ctx, &StaticBuiltins::new(), &NoPackages)
    }

    #[test]
    fn test_compile_simple() {
        let script = compile("int x = 1 + 2\nx * 3").unwrap();
        assert_eq!(script.unit.script_name, "Test");
        assert_eq!(script.unit.script_class.methods.len(), 1);
    }

    #[test]
    fn test_empty_source_compiles_to_return_null() {
        let script = compile("").unwrap();
        let main = script.unit.script_main();
        let body = script.unit.fun(main).body.as_ref().unwrap();
        let compiler::ast::StmtKind::Block(block) = &body.kind else {
            panic!("script body is a block")
        };
        assert!(matches!(
            block.stmts.last().map(|s| &s.kind),
            Some(compiler::ast::StmtKind::Return(_))
        ));
    }

    #[test]
    fn test_collects_multiple_parse_errors() {
        let src = "int x = \nint y = ,2\nint z = 3 3\n";
        let errors = compile(src).unwrap_err();
        assert!(errors.len() >= 2, "expected at least 2 errors, got {:?}", errors);
    }

    #[test]
    fn test_script_names_increment() {
        let mut ctx = CompileContext::new();
        let a = compile_script("1", &mut ctx, &StaticBuiltins::new(), &NoPackages).unwrap();
        let b = compile_script("2", &mut ctx, &StaticBuiltins::new(), &NoPackages).unwrap();
        assert_ne!(a.unit.script_name, b.unit.script_name);
    }
}
