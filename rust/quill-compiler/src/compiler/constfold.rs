//! Constant folding for binary and unary expressions whose operands are
//! compile-time constants. Arithmetic matches the runtime: integer results
//! wrap at 32/64 bits, decimal division is capped at the context scale.

use crate::compiler::ast::Expr;
use crate::compiler::error::{CompileError, ErrorKind};
use crate::compiler::tokens::{Span, Token, TokenType};
use quill_core::values::{self, ArithError};
use quill_core::Value;
use std::cmp::Ordering;

/// Operators excluded from folding; their semantics need the runtime.
pub fn is_foldable(op: TokenType) -> bool {
    !matches!(
        op,
        TokenType::QuestionColon
            | TokenType::MatchRegex
            | TokenType::BangMatchRegex
            | TokenType::Compare
            | TokenType::As
            | TokenType::In
            | TokenType::BangIn
            | TokenType::Dot
            | TokenType::QuestionDot
            | TokenType::LeftSquare
            | TokenType::QuestionSquare
    )
}

fn arith_err(e: ArithError, op: &Token) -> CompileError {
    let kind = match e {
        ArithError::DivideByZero => ErrorKind::DivideByZero,
        _ => ErrorKind::BadOperandType {
            op: op.chars.clone(),
            ty: "non-numeric".to_string(),
        },
    };
    CompileError::new(kind, op.span)
}

/// Fold `lhs op rhs` when possible. `lhs`/`rhs` must already be resolved;
/// callers check `is_const` on both (short-circuiting `&&`/`||` only needs
/// a constant left operand). Returns `Ok(None)` when the operand shapes do
/// not fold.
pub fn fold_binary(
    op: &Token,
    lhs: &Expr,
    rhs: &Expr,
    max_scale: u32,
) -> Result<Option<Value>, CompileError> {
    // Division and modulo by a constant zero are compile errors even when
    // the left operand is not constant.
    if matches!(op.kind, TokenType::Slash | TokenType::Percent) {
        if let Some(r) = &rhs.const_value {
            if r.is_numeric() && !r.is_truthy() {
                return Err(CompileError::new(ErrorKind::DivideByZero, op.span));
            }
        }
    }

    // Short-circuiting logical operators.
    if op.kind == TokenType::AmpersandAmpersand {
        if let Some(l) = &lhs.const_value {
            if !l.is_truthy() {
                return Ok(Some(Value::Bool(false)));
            }
            if let Some(r) = &rhs.const_value {
                return Ok(Some(Value::Bool(r.is_truthy())));
            }
        }
        return Ok(None);
    }
    if op.kind == TokenType::PipePipe {
        if let Some(l) = &lhs.const_value {
            if l.is_truthy() {
                return Ok(Some(Value::Bool(true)));
            }
            if let Some(r) = &rhs.const_value {
                return Ok(Some(Value::Bool(r.is_truthy())));
            }
        }
        return Ok(None);
    }

    let (Some(l), Some(r)) = (&lhs.const_value, &rhs.const_value) else {
        return Ok(None);
    };
    if !is_foldable(op.kind) {
        return Ok(None);
    }

    // A null left operand is only meaningful for the equality operators.
    if matches!(l, Value::Null) && !matches!(op.kind, TokenType::EqualEqual | TokenType::BangEqual)
    {
        return Err(CompileError::new(
            ErrorKind::NullOperand { op: op.chars.clone() },
            op.span,
        ));
    }

    let result = match op.kind {
        TokenType::Plus => match (l, r) {
            (Value::Str(a), b) => Ok(Value::Str(format!("{}{}", a, b))),
            (a, Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            _ => values::add(l, r),
        },
        TokenType::Minus => values::subtract(l, r),
        TokenType::Star => match (l, r) {
            // String repetition: `"ab" * 3`.
            (Value::Str(a), Value::Int(n)) => {
                if *n < 0 {
                    return Err(CompileError::new(
                        ErrorKind::BadOperandType {
                            op: op.chars.clone(),
                            ty: "negative repeat count".to_string(),
                        },
                        op.span,
                    ));
                }
                Ok(Value::Str(a.repeat(*n as usize)))
            }
            _ => values::multiply(l, r),
        },
        TokenType::Slash => values::divide(l, r, max_scale),
        TokenType::Percent => values::remainder(l, r),
        TokenType::DoubleLess => values::shift_left(l, r),
        TokenType::DoubleGreater => values::shift_right(l, r),
        TokenType::TripleGreater => values::shift_right_unsigned(l, r),
        TokenType::Ampersand => values::bit_and(l, r),
        TokenType::Pipe => values::bit_or(l, r),
        TokenType::Caret => values::bit_xor(l, r),
        TokenType::EqualEqual => return Ok(Some(Value::Bool(values::equals(l, r)))),
        TokenType::BangEqual => return Ok(Some(Value::Bool(!values::equals(l, r)))),
        TokenType::LessThan => return fold_compare(op, l, r, |o| o == Ordering::Less),
        TokenType::LessThanEqual => return fold_compare(op, l, r, |o| o != Ordering::Greater),
        TokenType::GreaterThan => return fold_compare(op, l, r, |o| o == Ordering::Greater),
        TokenType::GreaterThanEqual => return fold_compare(op, l, r, |o| o != Ordering::Less),
        _ => return Ok(None),
    };
    result.map(Some).map_err(|e| arith_err(e, op))
}

fn fold_compare(
    op: &Token,
    l: &Value,
    r: &Value,
    test: impl Fn(Ordering) -> bool,
) -> Result<Option<Value>, CompileError> {
    match values::compare(l, r) {
        Ok(ordering) => Ok(Some(Value::Bool(test(ordering)))),
        Err(e) => Err(arith_err(e, op)),
    }
}

/// Fold a prefix unary operator over a constant operand.
pub fn fold_unary(op: &Token, operand: &Expr) -> Result<Option<Value>, CompileError> {
    let Some(v) = &operand.const_value else {
        return Ok(None);
    };
    if matches!(v, Value::Null) && op.kind != TokenType::Bang {
        return Err(CompileError::new(
            ErrorKind::NullOperand { op: op.chars.clone() },
            op.span,
        ));
    }
    match op.kind {
        TokenType::Bang => Ok(Some(Value::Bool(!v.is_truthy()))),
        TokenType::Minus => values::negate(v).map(Some).map_err(|e| arith_err(e, op)),
        TokenType::Plus => Ok(Some(v.clone())),
        TokenType::Tilde => values::bit_not(v).map(Some).map_err(|e| arith_err(e, op)),
        _ => Ok(None),
    }
}

/// Apply a fold result to the node: the folded value replaces the
/// expression and is recorded as its constant value.
pub fn apply(expr: &mut Expr, value: Value, span: Span) {
    expr.kind = crate::compiler::ast::ExprKind::Literal(value.clone());
    expr.is_const = true;
    expr.const_value = Some(value);
    expr.span = span;
}
