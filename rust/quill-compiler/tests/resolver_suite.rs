//! Resolver semantics: typing, constant folding, implicit returns, regex
//! handling, globals, and the semantic error catalogue.

use quill_compiler::compiler::ast::*;
use quill_compiler::compiler::error::{CompileError, ErrorKind};
use quill_compiler::compiler::resolve::Resolver;
use quill_compiler::{compile_script_named, parse_script, CompiledScript};
use quill_core::{
    CompileContext, FunctionDescriptor, NoPackages, StaticBuiltins, Type, Value,
};
use std::str::FromStr;

fn compile(src: &str) -> Result<CompiledScript, Vec<CompileError>> {
    let mut ctx = CompileContext::new();
    compile_script_named(src, "Test", &mut ctx, &StaticBuiltins::new(), &NoPackages)
}

fn compile_with(
    src: &str,
    ctx: &mut CompileContext,
    builtins: &StaticBuiltins,
) -> Result<CompiledScript, Vec<CompileError>> {
    compile_script_named(src, "Test", ctx, builtins, &NoPackages)
}

fn expect_error(src: &str) -> Vec<CompileError> {
    compile(src).expect_err("expected compile error")
}

fn has_error(errors: &[CompileError], pred: impl Fn(&ErrorKind) -> bool) -> bool {
    errors.iter().any(|e| pred(&e.kind))
}

fn find_fun(unit: &ParsedUnit, name: &str) -> FunId {
    for (i, f) in unit.funs.iter().enumerate() {
        if f.given_name == name && !f.is_wrapper {
            return FunId(i as u32);
        }
    }
    panic!("no function named {}", name)
}

fn find_var<'a>(unit: &'a ParsedUnit, name: &str) -> &'a VarDecl {
    unit.vars
        .iter()
        .find(|v| v.name.text() == name && !v.is_param)
        .unwrap_or_else(|| panic!("no variable named {}", name))
}

fn main_stmts(unit: &ParsedUnit) -> &[Stmt] {
    let main = unit.script_main();
    let body = unit.fun(main).body.as_ref().unwrap();
    match &body.kind {
        StmtKind::Block(b) => &b.stmts,
        other => panic!("script body should be a block, got {:?}", other),
    }
}

#[test]
fn implicit_return_with_constant_folding() {
    let script = compile("int f() { 1 + 2 * 3 }").unwrap();
    let f = find_fun(&script.unit, "f");
    let body = script.unit.fun(f).body.as_ref().unwrap();
    let StmtKind::Block(block) = &body.kind else { panic!("body") };
    let StmtKind::Return(ret) = &block.stmts[0].kind else {
        panic!("expected synthesised return, got {:?}", block.stmts[0].kind)
    };
    let ExprKind::ReturnExpr { expr, .. } = &ret.kind else { panic!("return expr") };
    assert!(expr.is_const);
    assert_eq!(expr.const_value, Some(Value::Int(7)));
    assert!(matches!(&expr.kind, ExprKind::Literal(Value::Int(7))));
    assert_eq!(expr.ty, Some(Type::INT));
}

#[test]
fn var_infers_type_from_initialiser() {
    let script = compile("var x = 1\nvar s = \"a\"\nvar d = 1.5\n1").unwrap();
    assert_eq!(find_var(&script.unit, "x").ty, Some(Type::INT));
    assert_eq!(find_var(&script.unit, "s").ty, Some(Type::STRING));
    assert_eq!(find_var(&script.unit, "d").ty, Some(Type::DECIMAL));
}

#[test]
fn string_concatenation_folds() {
    let script = compile("var s = \"a\" + \"b\" + 1\n1").unwrap();
    let init = find_var(&script.unit, "s").initialiser.as_ref().unwrap();
    assert_eq!(init.const_value, Some(Value::Str("ab1".to_string())));
}

#[test]
fn long_arithmetic_wraps_at_64_bits() {
    let script = compile("var x = 9223372036854775807L + 1L\n1").unwrap();
    let init = find_var(&script.unit, "x").initialiser.as_ref().unwrap();
    assert_eq!(init.const_value, Some(Value::Long(i64::MIN)));
}

#[test]
fn decimal_division_uses_context_scale() {
    let mut ctx = CompileContext::new();
    ctx.max_scale = 5;
    let script = compile_with("var d = 1.0 / 3.0\n1", &mut ctx, &StaticBuiltins::new()).unwrap();
    let init = find_var(&script.unit, "d").initialiser.as_ref().unwrap();
    assert_eq!(
        init.const_value,
        Some(Value::Decimal(
            bigdecimal::BigDecimal::from_str("0.33333").unwrap()
        ))
    );
}

#[test]
fn folding_can_be_disabled() {
    let mut ctx = CompileContext::new();
    ctx.evaluate_const_exprs = false;
    let script = compile_with("var x = 1 + 2\n1", &mut ctx, &StaticBuiltins::new()).unwrap();
    let init = find_var(&script.unit, "x").initialiser.as_ref().unwrap();
    assert!(!init.is_const);
    assert!(matches!(init.kind, ExprKind::Binary { .. }));
    assert_eq!(init.ty, Some(Type::INT));
}

#[test]
fn divide_by_zero_is_a_compile_error() {
    let errors = expect_error("int x = 1 / 0");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::DivideByZero)));
}

#[test]
fn undeclared_variable() {
    let errors = expect_error("y + 1");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::UndeclaredVariable(n) if n == "y")
    }));
}

#[test]
fn initialiser_cannot_reference_itself() {
    let errors = expect_error("int x = x + 1");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::SelfReferenceInInitialiser)
    }));
}

#[test]
fn local_shadowing_in_same_function_rejected() {
    let errors = expect_error("int x = 1\nif (x) { int x = 2 }");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::AlreadyDeclared(n) if n == "x")
    }));
}

#[test]
fn const_cannot_be_reassigned() {
    let errors = expect_error("const MAX = 10\nMAX = 2");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::AssignToConst(n) if n == "MAX")
    }));
}

#[test]
fn incompatible_initialiser_type() {
    let errors = expect_error("int x = [1]");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::IncompatibleTypes { .. })));
}

#[test]
fn ternary_arms_must_be_compatible() {
    let errors = expect_error("var b = true\nvar x = b ? [1] : \"s\"");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::IncompatibleTypes { .. })));
    let script = compile("var b = true\nvar x = b ? 1 : 2.5\n1").unwrap();
    assert_eq!(find_var(&script.unit, "x").ty, Some(Type::DECIMAL));
}

#[test]
fn spaceship_types_int_and_does_not_fold() {
    let script = compile("var c = 1 <=> 2\n1").unwrap();
    let var = find_var(&script.unit, "c");
    assert_eq!(var.ty, Some(Type::INT));
    let init = var.initialiser.as_ref().unwrap();
    assert!(!init.is_const);
}

#[test]
fn as_cast_yields_target_type() {
    let script = compile("var x = \"123\" as int\n1").unwrap();
    assert_eq!(find_var(&script.unit, "x").ty, Some(Type::INT));
}

#[test]
fn instanceof_types_boolean() {
    let script = compile("var x = 1\nvar b = x instanceof int\nvar c = x !instanceof String\n1")
        .unwrap();
    assert_eq!(find_var(&script.unit, "b").ty, Some(Type::BOOLEAN));
    assert_eq!(find_var(&script.unit, "c").ty, Some(Type::BOOLEAN));
}

#[test]
fn membership_types_boolean() {
    let script = compile("var b = 1 in [1, 2]\n1").unwrap();
    assert_eq!(find_var(&script.unit, "b").ty, Some(Type::BOOLEAN));
}

#[test]
fn bare_regex_without_modifiers_unwraps_to_string() {
    let script = compile("var p = /foo/\n1").unwrap();
    let init = find_var(&script.unit, "p").initialiser.as_ref().unwrap();
    assert!(matches!(&init.kind, ExprKind::Literal(Value::Str(s)) if s == "foo"));
    assert_eq!(find_var(&script.unit, "p").ty, Some(Type::STRING));
}

#[test]
fn regex_with_modifiers_in_closure_matches_it_and_allocates_matcher() {
    let script = compile("def m = { /foo/g }\n1").unwrap();
    let closure = script
        .unit
        .funs
        .iter()
        .position(|f| f.is_closure && !f.demoted && !f.is_wrapper)
        .map(|i| FunId(i as u32))
        .expect("closure");
    let body = script.unit.fun(closure).body.as_ref().unwrap();
    let StmtKind::Block(block) = &body.kind else { panic!("body") };
    // The matcher slot is declared ahead of the match.
    let StmtKind::VarDecl(slot) = &block.stmts[0].kind else {
        panic!("expected matcher declaration, got {:?}", block.stmts[0].kind)
    };
    assert_eq!(script.unit.var(*slot).name.text(), "$@");
    assert_eq!(script.unit.var(*slot).ty, Some(Type::MATCHER));
    let StmtKind::Return(ret) = &block.stmts[1].kind else { panic!("return") };
    let ExprKind::ReturnExpr { expr, .. } = &ret.kind else { panic!("return expr") };
    let ExprKind::RegexMatch { implicit_it_match, capture_var, modifiers, .. } = &expr.kind
    else {
        panic!("expected regex match, got {:?}", expr.kind)
    };
    assert!(implicit_it_match);
    assert_eq!(modifiers, "g");
    assert_eq!(*capture_var, Some(*slot));
    assert_eq!(expr.ty, Some(Type::BOOLEAN));
}

#[test]
fn explicit_match_types_boolean_and_inserts_matcher_slot() {
    let script = compile("var s = \"abc\"\nvar b = s =~ /a(b)/\n1").unwrap();
    assert_eq!(find_var(&script.unit, "b").ty, Some(Type::BOOLEAN));
    let has_matcher = main_stmts(&script.unit).iter().any(|s| {
        matches!(&s.kind, StmtKind::VarDecl(id) if script.unit.var(*id).name.text() == "$@")
    });
    assert!(has_matcher, "expected an inserted $@ declaration");
}

#[test]
fn capture_group_reads_index_the_matcher() {
    let script =
        compile("var s = \"abc\"\nif (s =~ /a(b)/) { var g = $1 }\n1").unwrap();
    assert_eq!(find_var(&script.unit, "g").ty, Some(Type::STRING.boxed()));
}

#[test]
fn capture_read_outside_regex_scope_is_an_error() {
    let errors = expect_error("var g = $1");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::CaptureOutsideRegex)));
}

#[test]
fn substitution_with_negated_match_rejected() {
    let errors = expect_error("var s = \"x\"\nvar r = s !~ s/a/b/");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::SubstInAssertion)));
}

#[test]
fn unreachable_statement_after_return() {
    let errors = expect_error("return 1\n2");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::UnreachableStatement)));
}

#[test]
fn break_outside_loop_rejected() {
    let errors = expect_error("break\n1");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::BreakOutsideLoop)));
    assert!(compile("while (true) { break }\n1").is_ok());
}

#[test]
fn primitive_function_requires_return_on_all_paths() {
    let errors = expect_error("int f(int x) { if (x > 0) 1 }");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::MissingReturn(_))));
    let script = compile("int f(int x) { if (x > 0) 1 else 2 }").unwrap();
    let f = find_fun(&script.unit, "f");
    let body = script.unit.fun(f).body.as_ref().unwrap();
    let StmtKind::Block(block) = &body.kind else { panic!("body") };
    let StmtKind::If { then_stmt, else_stmt, .. } = &block.stmts[0].kind else {
        panic!("if")
    };
    assert!(matches!(then_stmt.kind, StmtKind::Return(_)));
    assert!(matches!(else_stmt.as_ref().unwrap().kind, StmtKind::Return(_)));
}

#[test]
fn any_function_with_missing_else_returns_null() {
    let script = compile("def f(x) { if (x) 1 }").unwrap();
    let f = find_fun(&script.unit, "f");
    let body = script.unit.fun(f).body.as_ref().unwrap();
    let StmtKind::Block(block) = &body.kind else { panic!("body") };
    let StmtKind::If { else_stmt, .. } = &block.stmts[0].kind else { panic!("if") };
    assert!(matches!(else_stmt.as_ref().unwrap().kind, StmtKind::Return(_)));
}

#[test]
fn named_argument_checks_at_direct_call_site() {
    let src = "int f(int x, int y = 2) { x + y }\n";
    assert!(compile(&format!("{}f(x:1)", src)).is_ok());
    let errors = expect_error(&format!("{}f(x:1, z:3)", src));
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::NoSuchParameter(n) if n == "z")
    }));
    let errors = expect_error(&format!("{}f(1, 2, 3)", src));
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::TooManyArguments { expected: 2, got: 3 })
    }));
    let errors = expect_error(&format!("{}f()", src));
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::MissingMandatoryArgument(n) if n == "x")
    }));
    // A sole list argument distributes at runtime; no static count check.
    assert!(compile(&format!("{}f([1])", src)).is_ok());
}

#[test]
fn repl_mode_binds_top_level_declarations_into_globals() {
    let mut ctx = CompileContext::new();
    ctx.repl_mode = true;
    let builtins = StaticBuiltins::new();
    compile_script_named("var x = 10", "S1", &mut ctx, &builtins, &NoPackages).unwrap();
    assert_eq!(ctx.globals.get("x"), Some(&Type::INT));
    // A later compilation against the same context sees the binding.
    compile_script_named("x + 1", "S2", &mut ctx, &builtins, &NoPackages).unwrap();
}

#[test]
fn caller_supplied_globals_seed_types() {
    let mut ctx = CompileContext::new();
    ctx.globals.insert("host".to_string(), Type::STRING);
    let script =
        compile_with("var u = host + \"!\"\n1", &mut ctx, &StaticBuiltins::new()).unwrap();
    assert_eq!(find_var(&script.unit, "u").ty, Some(Type::STRING));
}

#[test]
fn builtin_function_types_through_descriptor() {
    let mut builtins = StaticBuiltins::new();
    builtins.add_function(FunctionDescriptor::builtin(
        "sqrt",
        &["x"],
        &[Type::DOUBLE],
        Type::DOUBLE,
    ));
    let mut ctx = CompileContext::new();
    let script = compile_with("var r = sqrt(2)\n1", &mut ctx, &builtins).unwrap();
    assert_eq!(find_var(&script.unit, "r").ty, Some(Type::DOUBLE));

    // A local declaration shadows the builtin.
    let mut ctx = CompileContext::new();
    let errors = compile_with("var sqrt = 5\nvar r = sqrt(2)", &mut ctx, &builtins)
        .expect_err("expected error");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::NotCallable(_))));
}

#[test]
fn builtin_method_lookup_by_receiver_type() {
    let mut builtins = StaticBuiltins::new();
    builtins.add_method(
        Type::STRING,
        FunctionDescriptor::builtin("length", &[], &[], Type::INT),
    );
    let mut ctx = CompileContext::new();
    let script = compile_with("var n = \"abc\".length()\n1", &mut ctx, &builtins).unwrap();
    assert_eq!(find_var(&script.unit, "n").ty, Some(Type::INT));

    let mut ctx = CompileContext::new();
    let errors = compile_with("\"abc\".missing()", &mut ctx, &builtins).expect_err("error");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::NoSuchMethod { .. })));
}

#[test]
fn string_element_assignment_rejected() {
    let errors = expect_error("var s = \"abc\"\ns[0] = \"x\"");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::StringElementAssign)));
}

#[test]
fn every_resolved_expression_has_a_type() {
    let src = r#"
int f(int x, int y = 2) { x + y }
def g() { f(1) + f(x:1) }
var s = "a${g()}b"
var list = [1, 2, 3]
var m = [a:1]
m.a.b = 3
s =~ /x(y)/ ? $1 : "none"
"#;
    let script = compile(src).unwrap();
    let mut count = 0;
    for (i, f) in script.unit.funs.iter().enumerate() {
        if !f.resolved {
            continue;
        }
        if let Some(body) = &f.body {
            walk_stmt(&script.unit, body, &mut count);
        }
        let _ = i;
    }
    assert!(count > 30, "walked only {} expressions", count);
}

fn walk_stmt(unit: &ParsedUnit, stmt: &Stmt, count: &mut usize) {
    match &stmt.kind {
        StmtKind::Block(b) => b.stmts.iter().for_each(|s| walk_stmt(unit, s, count)),
        StmtKind::Stmts(list) => list.iter().for_each(|s| walk_stmt(unit, s, count)),
        StmtKind::VarDecl(id) => {
            if let Some(init) = &unit.var(*id).initialiser {
                walk_expr(unit, init, count);
            }
        }
        StmtKind::ExprStmt(e) | StmtKind::Return(e) | StmtKind::ThrowError(e) => {
            walk_expr(unit, e, count)
        }
        StmtKind::If { cond, then_stmt, else_stmt } => {
            walk_expr(unit, cond, count);
            walk_stmt(unit, then_stmt, count);
            if let Some(e) = else_stmt {
                walk_stmt(unit, e, count);
            }
        }
        StmtKind::While { cond, body, updates } => {
            walk_expr(unit, cond, count);
            walk_stmt(unit, body, count);
            if let Some(u) = updates {
                walk_stmt(unit, u, count);
            }
        }
        StmtKind::FunDecl(_) | StmtKind::Break | StmtKind::Continue | StmtKind::Import { .. } => {}
        StmtKind::ClassDecl(_) => {}
    }
}

fn walk_expr(unit: &ParsedUnit, expr: &Expr, count: &mut usize) {
    assert!(expr.ty.is_some(), "untyped expression: {:?}", expr.kind);
    if expr.is_const {
        assert!(expr.const_value.is_some(), "const without value: {:?}", expr.kind);
    }
    *count += 1;
    match &expr.kind {
        ExprKind::ListLiteral(es) => es.iter().for_each(|e| walk_expr(unit, e, count)),
        ExprKind::MapLiteral { entries, .. } => entries.iter().for_each(|(k, v)| {
            walk_expr(unit, k, count);
            walk_expr(unit, v, count);
        }),
        ExprKind::ExprString { parts } => parts.iter().for_each(|e| walk_expr(unit, e, count)),
        ExprKind::Binary { lhs, rhs, .. } => {
            walk_expr(unit, lhs, count);
            walk_expr(unit, rhs, count);
        }
        ExprKind::Ternary { cond, if_true, if_false } => {
            walk_expr(unit, cond, count);
            walk_expr(unit, if_true, count);
            walk_expr(unit, if_false, count);
        }
        ExprKind::PrefixUnary { expr: e, .. }
        | ExprKind::PostfixUnary { expr: e, .. }
        | ExprKind::Cast { expr: e, .. }
        | ExprKind::CastTo { expr: e, .. }
        | ExprKind::ConvertTo { expr: e, .. }
        | ExprKind::InstanceOf { expr: e, .. }
        | ExprKind::ArrayLength { array: e }
        | ExprKind::Print { expr: e, .. }
        | ExprKind::ReturnExpr { expr: e, .. } => walk_expr(unit, e, count),
        ExprKind::ArrayGet { array, index } => {
            walk_expr(unit, array, count);
            walk_expr(unit, index, count);
        }
        ExprKind::Call { callee, args } => {
            walk_expr(unit, callee, count);
            args.iter().for_each(|a| walk_expr(unit, a, count));
        }
        ExprKind::MethodCall { parent, args, .. } => {
            walk_expr(unit, parent, count);
            args.iter().for_each(|a| walk_expr(unit, a, count));
        }
        ExprKind::VarAssign { var, expr: e, .. }
        | ExprKind::VarOpAssign { var, expr: e, .. } => {
            walk_expr(unit, var, count);
            walk_expr(unit, e, count);
        }
        ExprKind::FieldAssign { parent, field, expr: e, .. }
        | ExprKind::FieldOpAssign { parent, field, expr: e, .. } => {
            walk_expr(unit, parent, count);
            walk_expr(unit, field, count);
            walk_expr(unit, e, count);
        }
        ExprKind::RegexMatch { lhs, pattern, .. } => {
            walk_expr(unit, lhs, count);
            walk_expr(unit, pattern, count);
        }
        ExprKind::RegexSubst { lhs, pattern, replacement, .. } => {
            walk_expr(unit, lhs, count);
            walk_expr(unit, pattern, count);
            walk_expr(unit, replacement, count);
        }
        ExprKind::InvokeNew { args, .. }
        | ExprKind::InvokeInit { args, .. }
        | ExprKind::InvokeFunction { args, .. }
        | ExprKind::InvokeUtility { args, .. } => {
            args.iter().for_each(|a| walk_expr(unit, a, count))
        }
        ExprKind::BlockExpr(s) => walk_stmt(unit, s, count),
        ExprKind::Literal(_)
        | ExprKind::TypeLiteral(_)
        | ExprKind::Identifier { .. }
        | ExprKind::FunDecl(_)
        | ExprKind::Closure(_)
        | ExprKind::Noop
        | ExprKind::BreakExpr
        | ExprKind::ContinueExpr
        | ExprKind::ClassPath { .. }
        | ExprKind::DefaultValue { .. }
        | ExprKind::LoadParamValue { .. } => {}
    }
}

#[test]
fn resolver_is_idempotent_for_capture_free_scripts() {
    let src = "int x = 1 + 2\nx * 3";
    let mut unit = parse_script(src, "Test").unwrap();
    let mut ctx = CompileContext::new();
    let builtins = StaticBuiltins::new();
    Resolver::new(&mut unit, &mut ctx, &builtins, &NoPackages)
        .resolve()
        .unwrap();
    let snapshot = serde_json::to_string(&unit).unwrap();
    Resolver::new(&mut unit, &mut ctx, &builtins, &NoPackages)
        .resolve()
        .unwrap();
    assert_eq!(snapshot, serde_json::to_string(&unit).unwrap());
}
