//! Class declarations: descriptor registration, construction, method and
//! field typing, inheritance, inner classes, and the name-clash rules.

use quill_compiler::compiler::ast::*;
use quill_compiler::compiler::error::{CompileError, ErrorKind};
use quill_compiler::{compile_script_named, CompiledScript};
use quill_core::{CompileContext, FunctionDescriptor, NoPackages, StaticBuiltins, Type};

fn compile(src: &str) -> Result<CompiledScript, Vec<CompileError>> {
    let mut ctx = CompileContext::new();
    compile_script_named(src, "Test", &mut ctx, &StaticBuiltins::new(), &NoPackages)
}

fn expect_error(src: &str) -> Vec<CompileError> {
    compile(src).expect_err("expected compile error")
}

fn has_error(errors: &[CompileError], pred: impl Fn(&ErrorKind) -> bool) -> bool {
    errors.iter().any(|e| pred(&e.kind))
}

fn find_var<'a>(unit: &'a ParsedUnit, name: &str) -> &'a VarDecl {
    unit.vars
        .iter()
        .find(|v| v.name.text() == name && !v.is_param && !v.is_field)
        .unwrap_or_else(|| panic!("no variable named {}", name))
}

const POINT: &str = r#"
class Point {
  int x = 0
  int y = 0
  int sum() { x + y }
}
"#;

#[test]
fn class_registers_descriptor_with_fields_and_methods() {
    let script = compile(&format!("{}\n1", POINT)).unwrap();
    let decl = &script.unit.script_class.inner_classes[0];
    let id = decl.class_id.expect("class id");
    let desc = script.classes.get(id);
    assert_eq!(desc.name, "Point");
    assert_eq!(desc.fields.get("x"), Some(&Type::INT));
    assert_eq!(desc.fields.get("y"), Some(&Type::INT));
    assert!(desc.methods.contains_key("sum"));
    let init = desc.init_method.as_ref().expect("init descriptor");
    assert_eq!(init.param_count, 2);
    assert_eq!(init.mandatory_count, 0);
    assert!(init.is_init_method);
}

#[test]
fn construction_resolves_to_invoke_init() {
    let script = compile(&format!("{}var p = new Point(1, 2)\n1", POINT)).unwrap();
    let p = find_var(&script.unit, "p");
    let init = p.initialiser.as_ref().unwrap();
    assert!(matches!(init.kind, ExprKind::InvokeInit { .. }));
    assert!(matches!(p.ty.unwrap().kind, quill_core::TypeKind::Instance(_)));
}

#[test]
fn method_and_field_access_are_typed_through_the_descriptor() {
    let script = compile(&format!(
        "{}var p = new Point(1, 2)\nvar s = p.sum()\nvar x = p.x\n1",
        POINT
    ))
    .unwrap();
    assert_eq!(find_var(&script.unit, "s").ty, Some(Type::INT));
    assert_eq!(find_var(&script.unit, "x").ty, Some(Type::INT));
}

#[test]
fn unknown_field_on_typed_instance() {
    let errors = expect_error(&format!("{}var p = new Point(1, 2)\np.z", POINT));
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::NoSuchField { name, .. } if name == "z")
    }));
}

#[test]
fn construction_argument_checks() {
    let errors = expect_error(&format!("{}var p = new Point(1, 2, 3)", POINT));
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::TooManyArguments { .. })));
    let errors = expect_error(&format!("{}var p = new Point(z: 1)", POINT));
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::NoSuchParameter(n) if n == "z")
    }));
    assert!(compile(&format!("{}var p = new Point(x: 1)\n1", POINT)).is_ok());
}

#[test]
fn init_method_goes_through_the_wrapper_machinery() {
    let script = compile(&format!("{}\n1", POINT)).unwrap();
    let unit = &script.unit;
    let init = unit
        .funs
        .iter()
        .position(|f| f.is_init_method && !f.is_wrapper)
        .map(|i| FunId(i as u32))
        .expect("init function");
    assert!(unit.fun(init).resolved);
    // One parameter per field, in field order.
    let params = unit.fun(init).params.clone();
    assert_eq!(params.len(), 2);
    assert_eq!(unit.var(params[0]).name.text(), "x");
    assert_eq!(unit.var(params[1]).name.text(), "y");

    let wid = unit.fun(init).wrapper.expect("init wrapper");
    let wrapper = unit.fun(wid);
    assert!(wrapper.is_wrapper);
    let desc = wrapper.descriptor.as_ref().expect("wrapper descriptor");
    assert_eq!(
        desc.param_types,
        vec![Type::STRING, Type::INT, Type::OBJECT_ARR]
    );
    assert_eq!(desc.return_type, Type::ANY);

    let body = wrapper.body.as_ref().expect("wrapper body");
    let StmtKind::Block(block) = &body.kind else { panic!("wrapper body") };
    let embeds = block
        .stmts
        .iter()
        .any(|s| matches!(s.kind, StmtKind::FunDecl(f) if f == init));
    assert!(embeds, "init wrapper must embed the init method");
    // A construction wrapper returns the instance, not an invocation.
    let StmtKind::Return(ret) = &block.stmts.last().unwrap().kind else {
        panic!("init wrapper must end in a return")
    };
    let ExprKind::ReturnExpr { expr, .. } = &ret.kind else { panic!("return expr") };
    assert!(
        matches!(&expr.kind, ExprKind::Identifier { name, .. } if name.text() == "this"),
        "init wrapper returns this, got {:?}",
        expr.kind
    );
}

#[test]
fn fields_without_defaults_stay_mandatory_in_the_init_method() {
    let script = compile("class P { int x\nint y = 2 }\n1").unwrap();
    let unit = &script.unit;
    let init = unit
        .funs
        .iter()
        .position(|f| f.is_init_method && !f.is_wrapper)
        .map(|i| FunId(i as u32))
        .expect("init function");
    let desc = unit.fun(init).descriptor.as_ref().expect("init descriptor");
    assert!(desc.is_init_method);
    assert_eq!(desc.mandatory_count, 1);
    assert!(desc.mandatory_params.contains("x"));
    // The explicit field default becomes the parameter default; the
    // mandatory field keeps none.
    let params = unit.fun(init).params.clone();
    assert!(unit.var(params[0]).initialiser.is_none());
    assert!(unit.var(params[1]).initialiser.is_some());
}

#[test]
fn unknown_class_in_new() {
    let errors = expect_error("var x = new Missing(1)");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::UnknownClass(_))));
}

#[test]
fn duplicate_method_name_rejected() {
    let errors = expect_error("class A { int f() { 1 }\nint f() { 2 } }\n1");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::DuplicateName(n) if n == "f")
    }));
}

#[test]
fn field_and_method_namespaces_are_disjoint() {
    let errors = expect_error("class A { int f = 1\nint f() { 2 } }\n1");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::DuplicateName(n) if n == "f")
    }));
}

#[test]
fn member_clash_with_builtin_any_method() {
    let mut ctx = CompileContext::new();
    let mut builtins = StaticBuiltins::new();
    builtins.add_method(
        Type::ANY,
        FunctionDescriptor::builtin("toString", &[], &[], Type::STRING),
    );
    let errors =
        compile_script_named("class A { int toString() { 1 } }\n1", "Test", &mut ctx, &builtins, &NoPackages)
            .expect_err("expected clash");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::ClashesWithBuiltin(n) if n == "toString")
    }));
}

#[test]
fn duplicate_class_name_rejected() {
    let errors = expect_error("class A { }\nclass A { }\n1");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::DuplicateName(n) if n == "A")
    }));
}

#[test]
fn static_methods_are_callable_through_the_class() {
    let script = compile("class A { static int f() { 1 } }\nvar r = A.f()\n1").unwrap();
    assert_eq!(find_var(&script.unit, "r").ty, Some(Type::INT));
}

#[test]
fn instance_method_through_class_is_rejected() {
    let errors = expect_error("class A { int f() { 1 } }\nA.f()");
    assert!(has_error(&errors, |k| {
        matches!(k, ErrorKind::StaticAccessToNonStatic(n) if n == "f")
    }));
}

#[test]
fn this_in_static_method_rejected() {
    let errors = expect_error("class A { int x = 1\nstatic int f() { this.x } }\n1");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::ThisInStaticFunction)));
}

#[test]
fn methods_see_fields_without_this() {
    assert!(compile(&format!("{}1", POINT)).is_ok());
}

#[test]
fn inherited_fields_and_methods_resolve_through_base() {
    let src = r#"
class A {
  int x = 1
  int getx() { x }
}
class B extends A {
  int y = 2
  int sum() { x + y }
}
var b = new B()
var s = b.sum()
var g = b.getx()
var x = b.x
1
"#;
    let script = compile(src).unwrap();
    assert_eq!(find_var(&script.unit, "s").ty, Some(Type::INT));
    assert_eq!(find_var(&script.unit, "g").ty, Some(Type::INT));
    assert_eq!(find_var(&script.unit, "x").ty, Some(Type::INT));
}

#[test]
fn instance_convertibility_follows_the_hierarchy() {
    let src = "class A { }\nclass B extends A { }\nvar b = new B()\nvar a = b instanceof A\n1";
    let script = compile(src).unwrap();
    assert_eq!(find_var(&script.unit, "a").ty, Some(Type::BOOLEAN));
}

#[test]
fn inner_classes_resolve_by_path() {
    let src = "class Out { class In { int v = 1 } }\nvar i = new Out.In()\nvar v = i.v\n1";
    let script = compile(src).unwrap();
    assert_eq!(find_var(&script.unit, "v").ty, Some(Type::INT));
}

#[test]
fn import_of_unknown_package_is_an_error() {
    let errors = expect_error("import a.b.C\n1");
    assert!(has_error(&errors, |k| matches!(k, ErrorKind::UnknownClass(_))));
}

#[test]
fn qualified_names_carry_the_package_prefix() {
    let script = compile("class A { }\n1").unwrap();
    let decl = &script.unit.script_class.inner_classes[0];
    let desc = script.classes.get(decl.class_id.unwrap());
    assert!(desc.qualified_name.ends_with(".A"));
    assert!(desc.qualified_name.starts_with("quill.pkg"));
}
