//! The literal / constant value domain.
//!
//! Tokens carry these for literal lexemes, and the resolver's constant
//! folder evaluates on them. Integer arithmetic wraps at 32 or 64 bits to
//! match the runtime; decimal arithmetic is arbitrary precision with the
//! division scale capped by the context's `max_scale`.

use bigdecimal::rounding::RoundingMode;
use bigdecimal::{BigDecimal, FromPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Decimal(BigDecimal),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArithError {
    #[error("divide by zero")]
    DivideByZero,
    #[error("non-numeric operand for '{op}'")]
    NonNumeric { op: &'static str },
    #[error("operand for '{op}' must be int or long")]
    NonIntegral { op: &'static str },
    #[error("cannot compare operands")]
    NotComparable,
}

/// Numeric promotion ladder used by binary arithmetic.
enum Promoted {
    Int(i32, i32),
    Long(i64, i64),
    Double(f64, f64),
    Decimal(BigDecimal, BigDecimal),
}

fn to_decimal(v: &Value) -> Option<BigDecimal> {
    match v {
        Value::Int(i) => Some(BigDecimal::from(*i)),
        Value::Long(l) => Some(BigDecimal::from(*l)),
        Value::Double(d) => BigDecimal::from_f64(*d),
        Value::Decimal(d) => Some(d.clone()),
        _ => None,
    }
}

fn to_double(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(f64::from(*i)),
        Value::Long(l) => Some(*l as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

fn to_long(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(i64::from(*i)),
        Value::Long(l) => Some(*l),
        _ => None,
    }
}

fn promote(lhs: &Value, rhs: &Value, op: &'static str) -> Result<Promoted, ArithError> {
    use Value::*;
    Ok(match (lhs, rhs) {
        (Decimal(_), _) | (_, Decimal(_)) => {
            let l = to_decimal(lhs).ok_or(ArithError::NonNumeric { op })?;
            let r = to_decimal(rhs).ok_or(ArithError::NonNumeric { op })?;
            Promoted::Decimal(l, r)
        }
        (Double(_), _) | (_, Double(_)) => {
            let l = to_double(lhs).ok_or(ArithError::NonNumeric { op })?;
            let r = to_double(rhs).ok_or(ArithError::NonNumeric { op })?;
            Promoted::Double(l, r)
        }
        (Long(_), _) | (_, Long(_)) => {
            let l = to_long(lhs).ok_or(ArithError::NonNumeric { op })?;
            let r = to_long(rhs).ok_or(ArithError::NonNumeric { op })?;
            Promoted::Long(l, r)
        }
        (Int(a), Int(b)) => Promoted::Int(*a, *b),
        _ => return Err(ArithError::NonNumeric { op }),
    })
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    Ok(match promote(lhs, rhs, "+")? {
        Promoted::Int(a, b) => Value::Int(a.wrapping_add(b)),
        Promoted::Long(a, b) => Value::Long(a.wrapping_add(b)),
        Promoted::Double(a, b) => Value::Double(a + b),
        Promoted::Decimal(a, b) => Value::Decimal(a + b),
    })
}

pub fn subtract(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    Ok(match promote(lhs, rhs, "-")? {
        Promoted::Int(a, b) => Value::Int(a.wrapping_sub(b)),
        Promoted::Long(a, b) => Value::Long(a.wrapping_sub(b)),
        Promoted::Double(a, b) => Value::Double(a - b),
        Promoted::Decimal(a, b) => Value::Decimal(a - b),
    })
}

pub fn multiply(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    Ok(match promote(lhs, rhs, "*")? {
        Promoted::Int(a, b) => Value::Int(a.wrapping_mul(b)),
        Promoted::Long(a, b) => Value::Long(a.wrapping_mul(b)),
        Promoted::Double(a, b) => Value::Double(a * b),
        Promoted::Decimal(a, b) => Value::Decimal(a * b),
    })
}

/// Division. Decimal results are rounded half-even to at most `max_scale`
/// fractional digits.
pub fn divide(lhs: &Value, rhs: &Value, max_scale: u32) -> Result<Value, ArithError> {
    Ok(match promote(lhs, rhs, "/")? {
        Promoted::Int(a, b) => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            Value::Int(a.wrapping_div(b))
        }
        Promoted::Long(a, b) => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            Value::Long(a.wrapping_div(b))
        }
        Promoted::Double(a, b) => {
            if b == 0.0 {
                return Err(ArithError::DivideByZero);
            }
            Value::Double(a / b)
        }
        Promoted::Decimal(a, b) => {
            if b.is_zero() {
                return Err(ArithError::DivideByZero);
            }
            let result = &a / &b;
            Value::Decimal(cap_scale(result, max_scale))
        }
    })
}

pub fn remainder(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    Ok(match promote(lhs, rhs, "%")? {
        Promoted::Int(a, b) => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            Value::Int(a.wrapping_rem(b))
        }
        Promoted::Long(a, b) => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            Value::Long(a.wrapping_rem(b))
        }
        Promoted::Double(a, b) => {
            if b == 0.0 {
                return Err(ArithError::DivideByZero);
            }
            Value::Double(a % b)
        }
        Promoted::Decimal(a, b) => {
            if b.is_zero() {
                return Err(ArithError::DivideByZero);
            }
            Value::Decimal(&a % &b)
        }
    })
}

fn cap_scale(d: BigDecimal, max_scale: u32) -> BigDecimal {
    if d.fractional_digit_count() > i64::from(max_scale) {
        d.with_scale_round(i64::from(max_scale), RoundingMode::HalfEven)
    } else {
        d
    }
}

pub fn negate(v: &Value) -> Result<Value, ArithError> {
    Ok(match v {
        Value::Int(i) => Value::Int(i.wrapping_neg()),
        Value::Long(l) => Value::Long(l.wrapping_neg()),
        Value::Double(d) => Value::Double(-d),
        Value::Decimal(d) => Value::Decimal(-d.clone()),
        _ => return Err(ArithError::NonNumeric { op: "-" }),
    })
}

pub fn bit_not(v: &Value) -> Result<Value, ArithError> {
    Ok(match v {
        Value::Int(i) => Value::Int(!i),
        Value::Long(l) => Value::Long(!l),
        _ => return Err(ArithError::NonIntegral { op: "~" }),
    })
}

fn shift_amount(rhs: &Value, op: &'static str) -> Result<i64, ArithError> {
    to_long(rhs).ok_or(ArithError::NonIntegral { op })
}

pub fn shift_left(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    let n = shift_amount(rhs, "<<")?;
    Ok(match lhs {
        Value::Int(a) => Value::Int(a.wrapping_shl(n as u32)),
        Value::Long(a) => Value::Long(a.wrapping_shl(n as u32)),
        _ => return Err(ArithError::NonIntegral { op: "<<" }),
    })
}

pub fn shift_right(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    let n = shift_amount(rhs, ">>")?;
    Ok(match lhs {
        Value::Int(a) => Value::Int(a.wrapping_shr(n as u32)),
        Value::Long(a) => Value::Long(a.wrapping_shr(n as u32)),
        _ => return Err(ArithError::NonIntegral { op: ">>" }),
    })
}

pub fn shift_right_unsigned(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    let n = shift_amount(rhs, ">>>")?;
    Ok(match lhs {
        Value::Int(a) => Value::Int(((*a as u32) >> (n as u32 & 31)) as i32),
        Value::Long(a) => Value::Long(((*a as u64) >> (n as u32 & 63)) as i64),
        _ => return Err(ArithError::NonIntegral { op: ">>>" }),
    })
}

macro_rules! bitwise {
    ($name:ident, $op:tt, $sym:literal) => {
        pub fn $name(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
            Ok(match promote(lhs, rhs, $sym)? {
                Promoted::Int(a, b) => Value::Int(a $op b),
                Promoted::Long(a, b) => Value::Long(a $op b),
                _ => return Err(ArithError::NonIntegral { op: $sym }),
            })
        }
    };
}

bitwise!(bit_and, &, "&");
bitwise!(bit_or, |, "|");
bitwise!(bit_xor, ^, "^");

/// Three-way comparison with numeric promotion; strings and booleans compare
/// in their natural orders.
pub fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, ArithError> {
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    match promote(lhs, rhs, "<=>").map_err(|_| ArithError::NotComparable)? {
        Promoted::Int(a, b) => Ok(a.cmp(&b)),
        Promoted::Long(a, b) => Ok(a.cmp(&b)),
        Promoted::Double(a, b) => a.partial_cmp(&b).ok_or(ArithError::NotComparable),
        Promoted::Decimal(a, b) => Ok(a.cmp(&b)),
    }
}

/// Equality with numeric promotion: `1 == 1L` is true.
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_numeric() && rhs.is_numeric() {
        return compare(lhs, rhs) == Ok(Ordering::Equal);
    }
    lhs == rhs
}

impl Value {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Long(_) | Value::Double(_) | Value::Decimal(_)
        )
    }

    /// Language truthiness: null and zero and the empty string are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Long(l) => *l != 0,
            Value::Double(d) => *d != 0.0,
            Value::Decimal(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => {
                if d.is_finite() && *d == d.trunc() && d.abs() < 1e16 {
                    write!(f, "{:.1}", d)
                } else {
                    write!(f, "{}", d)
                }
            }
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}
