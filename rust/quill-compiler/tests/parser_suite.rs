//! Parser shape tests: disambiguation rules, the l-value rewrite, operator
//! precedence, and statement desugaring.

use quill_compiler::compiler::ast::*;
use quill_compiler::compiler::tokens::TokenType;
use quill_compiler::{parse_expression, parse_script};

fn parse(src: &str) -> ParsedUnit {
    parse_script(src, "Test").unwrap_or_else(|e| panic!("parse failed: {:?}", e))
}

fn main_stmts(unit: &ParsedUnit) -> &[Stmt] {
    let main = unit.script_main();
    let body = unit.fun(main).body.as_ref().unwrap();
    match &body.kind {
        StmtKind::Block(b) => &b.stmts,
        other => panic!("script body should be a block, got {:?}", other),
    }
}

fn only_expr(unit: &ParsedUnit) -> &Expr {
    match &main_stmts(unit)[0].kind {
        StmtKind::ExprStmt(e) => e,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

#[test]
fn map_literal_statement() {
    let unit = parse("{ a:1, b:2 }");
    match &only_expr(&unit).kind {
        ExprKind::MapLiteral { entries, is_named_args } => {
            assert_eq!(entries.len(), 2);
            assert!(!is_named_args);
            assert!(is_key(&entries[0].0, "a"));
            assert!(is_key(&entries[1].0, "b"));
        }
        other => panic!("expected map literal, got {:?}", other),
    }
}

fn is_key(e: &Expr, want: &str) -> bool {
    matches!(&e.kind, ExprKind::Literal(quill_core::Value::Str(s)) if s == want)
}

#[test]
fn empty_map_statement() {
    let unit = parse("{:}");
    match &only_expr(&unit).kind {
        ExprKind::MapLiteral { entries, .. } => assert!(entries.is_empty()),
        other => panic!("expected map literal, got {:?}", other),
    }
}

#[test]
fn square_bracket_map_literal() {
    let unit = parse("var m = [a:1]\nvar e = [:]");
    // Shapes checked via the variable initialisers.
    let m = unit
        .vars
        .iter()
        .find(|v| v.name.text() == "m")
        .and_then(|v| v.initialiser.as_ref())
        .unwrap();
    assert!(matches!(&m.kind, ExprKind::MapLiteral { entries, .. } if entries.len() == 1));
    let e = unit
        .vars
        .iter()
        .find(|v| v.name.text() == "e")
        .and_then(|v| v.initialiser.as_ref())
        .unwrap();
    assert!(matches!(&e.kind, ExprKind::MapLiteral { entries, .. } if entries.is_empty()));
}

#[test]
fn bad_map_literal_is_an_error() {
    assert!(parse_script("{ :a? }", "Test").is_err());
}

#[test]
fn parameterless_closure_demotes_to_block() {
    let unit = parse("{ println 'hi' }");
    assert!(matches!(&main_stmts(&unit)[0].kind, StmtKind::Block(_)));
    assert!(unit.funs.iter().any(|f| f.demoted));
}

#[test]
fn invoked_closure_stays_a_call() {
    let unit = parse("{ x -> x * x }(3)");
    match &only_expr(&unit).kind {
        ExprKind::Call { callee, args } => {
            assert!(matches!(callee.kind, ExprKind::Closure(_)));
            assert_eq!(args.len(), 1);
        }
        other => panic!("expected call of closure, got {:?}", other),
    }
}

#[test]
fn explicit_param_closure_is_an_expression() {
    let unit = parse("{ x -> x * x }");
    assert!(matches!(only_expr(&unit).kind, ExprKind::Closure(_)));
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let unit = parse("1 + 2 * 3");
    match &only_expr(&unit).kind {
        ExprKind::Binary { op, rhs, .. } => {
            assert_eq!(op.kind, TokenType::Plus);
            assert!(
                matches!(&rhs.kind, ExprKind::Binary { op, .. } if op.kind == TokenType::Star)
            );
        }
        other => panic!("expected binary, got {:?}", other),
    }
}

#[test]
fn keyword_logicals_desugar() {
    let unit = parse("not a or b and c");
    match &only_expr(&unit).kind {
        ExprKind::Binary { op, lhs, rhs, .. } => {
            assert_eq!(op.kind, TokenType::PipePipe);
            assert!(matches!(
                &lhs.kind,
                ExprKind::PrefixUnary { op, .. } if op.kind == TokenType::Bang
            ));
            assert!(matches!(
                &rhs.kind,
                ExprKind::Binary { op, .. } if op.kind == TokenType::AmpersandAmpersand
            ));
        }
        other => panic!("expected binary, got {:?}", other),
    }
}

#[test]
fn assignment_is_right_associative() {
    let unit = parse("a = b = 1");
    match &only_expr(&unit).kind {
        ExprKind::VarAssign { expr, .. } => {
            assert!(matches!(expr.kind, ExprKind::VarAssign { .. }));
        }
        other => panic!("expected assignment, got {:?}", other),
    }
}

#[test]
fn op_assign_synthesises_noop_binary() {
    let unit = parse("x += 1");
    match &only_expr(&unit).kind {
        ExprKind::VarOpAssign { op, expr, is_pre_inc_or_dec, .. } => {
            assert_eq!(op.kind, TokenType::PlusEqual);
            assert!(!is_pre_inc_or_dec);
            match &expr.kind {
                ExprKind::Binary { lhs, op, original_operator, .. } => {
                    assert!(matches!(lhs.kind, ExprKind::Noop));
                    assert_eq!(op.kind, TokenType::Plus);
                    assert_eq!(
                        original_operator.as_ref().map(|t| t.kind),
                        Some(TokenType::PlusEqual)
                    );
                }
                other => panic!("expected noop binary, got {:?}", other),
            }
        }
        other => panic!("expected op-assign, got {:?}", other),
    }
}

#[test]
fn field_path_assignment_marks_create_if_missing() {
    let unit = parse("a.b.c = 5");
    match &only_expr(&unit).kind {
        ExprKind::FieldAssign { parent, field, .. } => {
            assert!(is_key(field, "c"));
            match &parent.kind {
                ExprKind::Binary { create_if_missing, op, .. } => {
                    assert!(*create_if_missing);
                    assert_eq!(op.kind, TokenType::Dot);
                }
                other => panic!("expected field-access binary, got {:?}", other),
            }
        }
        other => panic!("expected field assign, got {:?}", other),
    }
}

#[test]
fn postfix_inc_on_field_sets_pre_value_flag() {
    let unit = parse("a.b++");
    match &only_expr(&unit).kind {
        ExprKind::FieldOpAssign { is_pre_inc_or_dec, op, .. } => {
            assert!(*is_pre_inc_or_dec);
            assert_eq!(op.kind, TokenType::PlusEqual);
        }
        other => panic!("expected field op-assign, got {:?}", other),
    }
}

#[test]
fn prefix_inc_on_variable() {
    let unit = parse("++x");
    match &only_expr(&unit).kind {
        ExprKind::VarOpAssign { is_pre_inc_or_dec, .. } => assert!(!is_pre_inc_or_dec),
        other => panic!("expected var op-assign, got {:?}", other),
    }
}

#[test]
fn literal_is_not_an_lvalue() {
    let errors = parse_script("1 = 2", "Test").unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e.kind, quill_compiler::compiler::error::ErrorKind::InvalidLValue)));
}

#[test]
fn for_desugars_to_while_with_updates() {
    let unit = parse("for (int i = 0; i < 10; i++) { }");
    match &main_stmts(&unit)[0].kind {
        StmtKind::Block(b) => {
            assert!(matches!(b.stmts[0].kind, StmtKind::VarDecl(_)));
            match &b.stmts[1].kind {
                StmtKind::While { updates, .. } => assert!(updates.is_some()),
                other => panic!("expected while, got {:?}", other),
            }
        }
        other => panic!("expected desugared block, got {:?}", other),
    }
}

#[test]
fn trailing_if_and_unless_rewrite_to_if() {
    let unit = parse("x = 1 if y");
    match &main_stmts(&unit)[0].kind {
        StmtKind::If { then_stmt, else_stmt, cond } => {
            assert!(matches!(cond.kind, ExprKind::Identifier { .. }));
            assert!(matches!(then_stmt.kind, StmtKind::ExprStmt(_)));
            assert!(else_stmt.is_none());
        }
        other => panic!("expected if, got {:?}", other),
    }
    let unit = parse("x = 1 unless y");
    match &main_stmts(&unit)[0].kind {
        StmtKind::If { cond, .. } => {
            assert!(matches!(
                &cond.kind,
                ExprKind::PrefixUnary { op, .. } if op.kind == TokenType::Bang
            ));
        }
        other => panic!("expected if, got {:?}", other),
    }
}

#[test]
fn dotted_call_becomes_method_call() {
    let unit = parse("x.a.b(1)");
    match &only_expr(&unit).kind {
        ExprKind::MethodCall { parent, name, args, .. } => {
            assert_eq!(name, "b");
            assert_eq!(args.len(), 1);
            assert!(matches!(
                &parent.kind,
                ExprKind::Binary { op, .. } if op.kind == TokenType::Dot
            ));
        }
        other => panic!("expected method call, got {:?}", other),
    }
}

#[test]
fn identifier_after_dot_demotes_to_string() {
    let unit = parse("x.y");
    match &only_expr(&unit).kind {
        ExprKind::Binary { rhs, .. } => assert!(is_key(rhs, "y")),
        other => panic!("expected binary, got {:?}", other),
    }
}

#[test]
fn named_args_collapse_to_tagged_map() {
    let unit = parse("f(x:1, y:2)");
    match &only_expr(&unit).kind {
        ExprKind::Call { args, .. } => {
            assert_eq!(args.len(), 1);
            assert!(matches!(
                &args[0].kind,
                ExprKind::MapLiteral { is_named_args: true, entries } if entries.len() == 2
            ));
        }
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn trailing_closures_append_to_arguments() {
    let unit = parse("f(1) { it }");
    match &only_expr(&unit).kind {
        ExprKind::Call { args, .. } => {
            assert_eq!(args.len(), 2);
            assert!(matches!(args[1].kind, ExprKind::Closure(_)));
        }
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn standalone_regex_is_implicit_it_match() {
    let unit = parse("/foo/g");
    match &only_expr(&unit).kind {
        ExprKind::RegexMatch { implicit_it_match, modifiers, lhs, .. } => {
            assert!(*implicit_it_match);
            assert_eq!(modifiers, "g");
            assert!(matches!(
                &lhs.kind,
                ExprKind::Identifier { name, .. } if name.text() == "it"
            ));
        }
        other => panic!("expected regex match, got {:?}", other),
    }
}

#[test]
fn match_operator_rewires_implicit_it() {
    let unit = parse("s =~ /foo/");
    match &only_expr(&unit).kind {
        ExprKind::RegexMatch { implicit_it_match, lhs, .. } => {
            assert!(!implicit_it_match);
            assert!(matches!(
                &lhs.kind,
                ExprKind::Identifier { name, .. } if name.text() == "s"
            ));
        }
        other => panic!("expected regex match, got {:?}", other),
    }
}

#[test]
fn substitution_rewires_onto_lhs() {
    let unit = parse("s =~ s/a/b/g");
    match &only_expr(&unit).kind {
        ExprKind::RegexSubst { implicit_it_match, modifiers, .. } => {
            assert!(!implicit_it_match);
            assert_eq!(modifiers, "g");
        }
        other => panic!("expected substitution, got {:?}", other),
    }
}

#[test]
fn interpolated_string_parses_to_parts() {
    let unit = parse(r#""a${x}b""#);
    match &only_expr(&unit).kind {
        ExprKind::ExprString { parts } => {
            assert_eq!(parts.len(), 3);
            assert!(matches!(parts[1].kind, ExprKind::Identifier { .. }));
        }
        other => panic!("expected expr string, got {:?}", other),
    }
}

#[test]
fn all_literal_string_collapses() {
    let unit = parse(r#""ab""#);
    assert!(is_key(only_expr(&unit), "ab"));
}

#[test]
fn builtin_cast_prefix() {
    let unit = parse("(int)x");
    assert!(matches!(only_expr(&unit).kind, ExprKind::Cast { .. }));
}

#[test]
fn new_expression() {
    let unit = parse("new Foo(1, 2)");
    match &only_expr(&unit).kind {
        ExprKind::InvokeNew { args, .. } => assert_eq!(args.len(), 2),
        other => panic!("expected new, got {:?}", other),
    }
}

#[test]
fn import_with_alias() {
    let unit = parse("import a.b.C as D\n1");
    match &main_stmts(&unit)[0].kind {
        StmtKind::Import { path, alias } => {
            assert_eq!(path.len(), 3);
            assert_eq!(alias.as_ref().map(|t| t.text()), Some("D"));
        }
        other => panic!("expected import, got {:?}", other),
    }
}

#[test]
fn parse_expression_requires_trailing_eof() {
    assert!(parse_expression("1 + 2").is_ok());
    assert!(parse_expression("1 2").is_err());
}

#[test]
fn parser_is_deterministic() {
    let src = "def f(x, y = 2) { x + y * 3 }\nf(1)\n{ a:1 }\n";
    let a = parse(src);
    let b = parse(src);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn multi_variable_declaration() {
    let unit = parse("int x = 1, y = 2");
    match &main_stmts(&unit)[0].kind {
        StmtKind::Stmts(stmts) => {
            assert_eq!(stmts.len(), 2);
            assert!(stmts.iter().all(|s| matches!(s.kind, StmtKind::VarDecl(_))));
        }
        other => panic!("expected statement list, got {:?}", other),
    }
}

#[test]
fn var_requires_initialiser() {
    let errors = parse_script("var x", "Test").unwrap_err();
    assert!(errors.iter().any(|e| {
        matches!(
            e.kind,
            quill_compiler::compiler::error::ErrorKind::MissingInitialiser
        )
    }));
}
