//! Closure-capture analysis and varargs-wrapper synthesis: heap-local
//! promotion, forwarder chains, forward-reference rejection, and the fixed
//! wrapper signature.

use quill_compiler::compiler::ast::*;
use quill_compiler::compiler::error::{CompileError, ErrorKind};
use quill_compiler::{compile_script_named, CompiledScript};
use quill_core::{CompileContext, NoPackages, StaticBuiltins, Type, TypeKind};

fn compile(src: &str) -> Result<CompiledScript, Vec<CompileError>> {
    let mut ctx = CompileContext::new();
    compile_script_named(src, "Test", &mut ctx, &StaticBuiltins::new(), &NoPackages)
}

fn find_fun(unit: &ParsedUnit, name: &str) -> FunId {
    for (i, f) in unit.funs.iter().enumerate() {
        if f.given_name == name && !f.is_wrapper {
            return FunId(i as u32);
        }
    }
    panic!("no function named {}", name)
}

fn local_var(unit: &ParsedUnit, owner: FunId, name: &str) -> VarId {
    for (i, v) in unit.vars.iter().enumerate() {
        if v.name.text() == name && v.owner == Some(owner) && !v.is_param {
            return VarId(i as u32);
        }
    }
    panic!("no local {} in function {:?}", name, owner)
}

#[test]
fn capture_chain_threads_forwarders_through_each_function() {
    let src = r#"
def outer() {
  var x = 1
  def mid() {
    def inner() { x + 1 }
    inner()
  }
  mid()
}
"#;
    let script = compile(src).unwrap();
    let unit = &script.unit;
    let outer = find_fun(unit, "outer");
    let mid = find_fun(unit, "mid");
    let inner = find_fun(unit, "inner");

    let x = local_var(unit, outer, "x");
    assert!(unit.var(x).is_heap_local, "captured local must be promoted");

    let mid_fwd = *unit
        .fun(mid)
        .heap_local_params
        .get("x")
        .expect("mid forwards x");
    assert_eq!(unit.var(mid_fwd).parent_var, Some(x));
    assert_eq!(unit.var(mid_fwd).original_var, Some(x));
    assert!(unit.var(mid_fwd).is_heap_local);
    assert!(unit.var(mid_fwd).is_param);

    let inner_fwd = *unit
        .fun(inner)
        .heap_local_params
        .get("x")
        .expect("inner forwards x");
    assert_eq!(unit.var(inner_fwd).parent_var, Some(mid_fwd));
    assert_eq!(unit.var(inner_fwd).original_var, Some(x));
    assert_ne!(inner_fwd, mid_fwd);
}

#[test]
fn capture_chain_terminates_at_the_original() {
    let src = r#"
def outer() {
  var x = 1
  def mid() {
    def inner() { x + 1 }
    inner()
  }
  mid()
}
"#;
    let script = compile(src).unwrap();
    let unit = &script.unit;
    for (i, var) in unit.vars.iter().enumerate() {
        if var.parent_var.is_none() {
            continue;
        }
        // Follow the chain; it must terminate at the original declaration
        // without revisiting a function.
        let original = var.original_var.expect("forwarder has an original");
        let mut seen_owners = vec![var.owner];
        let mut current = VarId(i as u32);
        loop {
            match unit.var(current).parent_var {
                Some(next) => {
                    assert!(
                        !seen_owners.contains(&unit.var(next).owner)
                            || unit.var(next).parent_var.is_none(),
                        "chain revisits a function"
                    );
                    seen_owners.push(unit.var(next).owner);
                    current = next;
                }
                None => break,
            }
        }
        assert_eq!(current, original, "chain must end at the original");
    }
}

#[test]
fn uncaptured_locals_stay_on_the_stack() {
    let script = compile("def f() { var a = 1\na + 2 }").unwrap();
    let unit = &script.unit;
    let f = find_fun(unit, "f");
    let a = local_var(unit, f, "a");
    assert!(!unit.var(a).is_heap_local);
    assert!(unit.fun(f).heap_local_params.is_empty());
}

#[test]
fn forward_reference_to_capturing_function_rejected() {
    let src = r#"
def f() { g() }
var v = 10
def g() { v }
f()
"#;
    let errors = compile(src).expect_err("expected forward-reference error");
    assert!(
        errors.iter().any(|e| matches!(
            &e.kind,
            ErrorKind::ForwardCaptureReference { function, variable }
                if function == "g" && variable == "v"
        )),
        "got {:?}",
        errors
    );
}

#[test]
fn forward_reference_without_capture_is_fine() {
    let src = "def f() { g() }\ndef g() { 1 }\nf()";
    assert!(compile(src).is_ok());
}

#[test]
fn capture_declared_before_reference_is_fine() {
    let src = "var v = 10\ndef g() { v }\ndef f() { g() }\nf()";
    assert!(compile(src).is_ok());
}

#[test]
fn sibling_parameter_capture_marks_passed_as_heap_local() {
    let script = compile("def f(x, g = { x }) { g() }").unwrap();
    let unit = &script.unit;
    let x = unit
        .vars
        .iter()
        .find(|v| v.name.text() == "x" && v.is_explicit_param)
        .expect("param x");
    assert!(x.is_heap_local);
    assert!(x.is_passed_as_heap_local);
}

#[test]
fn every_function_gets_a_varargs_wrapper() {
    let src = "def f() { 1 }\nint g(int x, int y = 2) { x + y }\nf()";
    let script = compile(src).unwrap();
    let unit = &script.unit;
    for fun in &unit.funs {
        if !fun.resolved || fun.is_wrapper || fun.demoted {
            continue;
        }
        let wid = fun
            .wrapper
            .unwrap_or_else(|| panic!("function {} has no wrapper", fun.given_name));
        let wrapper = unit.fun(wid);
        assert!(wrapper.is_wrapper);
        let desc = wrapper.descriptor.as_ref().expect("wrapper descriptor");
        assert_eq!(
            desc.param_types,
            vec![Type::STRING, Type::INT, Type::OBJECT_ARR],
            "wrapper signature of {}",
            fun.given_name
        );
        assert_eq!(desc.return_type, Type::ANY);
        assert!(desc.is_wrapper);
    }
}

#[test]
fn wrapper_embeds_and_invokes_the_real_function() {
    let script = compile("int f(int x, int y = 2) { x + y }").unwrap();
    let unit = &script.unit;
    let f = find_fun(unit, "f");
    let wid = unit.fun(f).wrapper.expect("wrapper");
    let body = unit.fun(wid).body.as_ref().expect("wrapper body");
    let StmtKind::Block(block) = &body.kind else { panic!("wrapper body") };

    let embeds = block
        .stmts
        .iter()
        .any(|s| matches!(s.kind, StmtKind::FunDecl(fid) if fid == f));
    assert!(embeds, "wrapper must embed the real function");

    let StmtKind::Return(ret) = &block.stmts.last().unwrap().kind else {
        panic!("wrapper must end in a return")
    };
    let ExprKind::ReturnExpr { expr, .. } = &ret.kind else { panic!("return expr") };
    let ExprKind::InvokeFunction { fun, args } = &expr.kind else {
        panic!("wrapper must invoke the real function, got {:?}", expr.kind)
    };
    assert_eq!(*fun, f);
    assert_eq!(args.len(), 2);
}

#[test]
fn wrapper_boxes_parameters_passed_as_heap_locals() {
    let script = compile("def f(x, g = { x }) { g() }").unwrap();
    let unit = &script.unit;
    let f = find_fun(unit, "f");
    let wid = unit.fun(f).wrapper.expect("wrapper");
    let body = unit.fun(wid).body.as_ref().unwrap();
    let StmtKind::Block(block) = &body.kind else { panic!("wrapper body") };
    let StmtKind::Return(ret) = &block.stmts.last().unwrap().kind else { panic!("return") };
    let ExprKind::ReturnExpr { expr, .. } = &ret.kind else { panic!("return expr") };
    let ExprKind::InvokeFunction { args, .. } = &expr.kind else { panic!("invoke") };
    assert!(
        matches!(
            &args[0].kind,
            ExprKind::ConvertTo { target, .. } if target.kind == TypeKind::HeapLocal
        ),
        "captured parameter must be boxed before the call, got {:?}",
        args[0].kind
    );
    assert!(matches!(&args[1].kind, ExprKind::LoadParamValue { .. }));
}

#[test]
fn wrapper_of_a_nested_function_forwards_its_heap_locals() {
    let src = r#"
def outer() {
  var x = 1
  def mid() { x }
  mid()
}
"#;
    let script = compile(src).unwrap();
    let unit = &script.unit;
    let mid = find_fun(unit, "mid");
    let wid = unit.fun(mid).wrapper.expect("wrapper");
    assert!(
        unit.fun(wid).heap_local_params.contains_key("x"),
        "the wrapper forwards the wrapped function's captures"
    );
}

#[test]
fn function_values_capture_like_variables() {
    let src = "def f() { 1 }\ndef g() { f() }\ng()";
    let script = compile(src).unwrap();
    let unit = &script.unit;
    let g = find_fun(unit, "g");
    assert!(
        unit.fun(g).heap_local_params.contains_key("f"),
        "a nested call to an outer function captures its handle"
    );
}
