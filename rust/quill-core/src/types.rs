//! The closed type lattice of the language.
//!
//! `Instance` and `Class` carry an index into the per-compilation
//! [`ClassMap`](crate::descriptors::ClassMap) rather than a descriptor
//! reference; reads always go through the map, so a type created before its
//! class body has been resolved observes the descriptor's later state.

use crate::values::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a class descriptor in a [`ClassMap`](crate::descriptors::ClassMap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum TypeKind {
    #[strum(serialize = "boolean")]
    Boolean,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "long")]
    Long,
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "Decimal")]
    Decimal,
    #[strum(serialize = "String")]
    String,
    #[strum(serialize = "Map")]
    Map,
    #[strum(serialize = "List")]
    List,
    #[strum(serialize = "def")]
    Any,
    #[strum(serialize = "Object[]")]
    ObjectArr,
    #[strum(serialize = "long[]")]
    LongArr,
    #[strum(serialize = "String[]")]
    StringArr,
    #[strum(serialize = "Function")]
    Function,
    #[strum(serialize = "Number")]
    Number,
    #[strum(serialize = "Matcher")]
    Matcher,
    #[strum(serialize = "Iterator")]
    Iterator,
    #[strum(serialize = "HeapLocal")]
    HeapLocal,
    #[strum(serialize = "Continuation")]
    Continuation,
    #[strum(serialize = "Instance")]
    Instance(ClassId),
    #[strum(serialize = "Class")]
    Class(ClassId),
    /// Sentinel installed by the resolver between `declare` and `define` so
    /// that a variable initialiser referring to the variable itself is
    /// detectable.
    #[strum(serialize = "<undefined>")]
    Undefined,
}

/// A type value: a kind plus, for the four primitives, whether the value is
/// held boxed (nullable) or unboxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub is_boxed: bool,
}

impl Type {
    pub const BOOLEAN: Type = Type::unboxed_of(TypeKind::Boolean);
    pub const INT: Type = Type::unboxed_of(TypeKind::Int);
    pub const LONG: Type = Type::unboxed_of(TypeKind::Long);
    pub const DOUBLE: Type = Type::unboxed_of(TypeKind::Double);
    pub const DECIMAL: Type = Type::unboxed_of(TypeKind::Decimal);
    pub const STRING: Type = Type::unboxed_of(TypeKind::String);
    pub const MAP: Type = Type::unboxed_of(TypeKind::Map);
    pub const LIST: Type = Type::unboxed_of(TypeKind::List);
    pub const ANY: Type = Type::unboxed_of(TypeKind::Any);
    pub const OBJECT_ARR: Type = Type::unboxed_of(TypeKind::ObjectArr);
    pub const LONG_ARR: Type = Type::unboxed_of(TypeKind::LongArr);
    pub const STRING_ARR: Type = Type::unboxed_of(TypeKind::StringArr);
    pub const FUNCTION: Type = Type::unboxed_of(TypeKind::Function);
    pub const NUMBER: Type = Type::unboxed_of(TypeKind::Number);
    pub const MATCHER: Type = Type::unboxed_of(TypeKind::Matcher);
    pub const ITERATOR: Type = Type::unboxed_of(TypeKind::Iterator);
    pub const HEAPLOCAL: Type = Type::unboxed_of(TypeKind::HeapLocal);
    pub const CONTINUATION: Type = Type::unboxed_of(TypeKind::Continuation);
    pub const UNDEFINED: Type = Type::unboxed_of(TypeKind::Undefined);

    const fn unboxed_of(kind: TypeKind) -> Type {
        Type { kind, is_boxed: false }
    }

    pub fn instance(id: ClassId) -> Type {
        Type { kind: TypeKind::Instance(id), is_boxed: false }
    }

    pub fn class(id: ClassId) -> Type {
        Type { kind: TypeKind::Class(id), is_boxed: false }
    }

    /// Exact equality, including boxedness.
    pub fn is(&self, other: &Type) -> bool {
        self == other
    }

    /// Same kind, ignoring whether either side is boxed.
    pub fn is_boxed_or_unboxed(&self, other: &Type) -> bool {
        self.kind == other.kind
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Int | TypeKind::Long | TypeKind::Double | TypeKind::Decimal | TypeKind::Number
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.kind, TypeKind::Int | TypeKind::Long)
    }

    /// The four machine primitives when unboxed.
    pub fn is_primitive(&self) -> bool {
        !self.is_boxed
            && matches!(
                self.kind,
                TypeKind::Boolean | TypeKind::Int | TypeKind::Long | TypeKind::Double
            )
    }

    /// Reference (heap) types, including boxed primitives.
    pub fn is_ref(&self) -> bool {
        !self.is_primitive()
    }

    pub fn boxed(&self) -> Type {
        match self.kind {
            TypeKind::Boolean | TypeKind::Int | TypeKind::Long | TypeKind::Double => {
                Type { kind: self.kind, is_boxed: true }
            }
            _ => *self,
        }
    }

    pub fn unboxed(&self) -> Type {
        Type { kind: self.kind, is_boxed: false }
    }

    pub fn class_id(&self) -> Option<ClassId> {
        match self.kind {
            TypeKind::Instance(id) | TypeKind::Class(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_any(&self) -> bool {
        self.kind == TypeKind::Any
    }

    /// Whether a value of `self` can be converted to `other` without an
    /// explicit cast. Instance-to-instance convertibility depends on the
    /// class hierarchy and is answered by
    /// [`ClassMap::convertible`](crate::descriptors::ClassMap::convertible);
    /// here unrelated instances compare unequal.
    pub fn is_convertible_to(&self, other: &Type) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        if self.kind == other.kind {
            return true;
        }
        if other.kind == TypeKind::Boolean {
            // Everything has a truthiness.
            return true;
        }
        if self.is_numeric() && other.is_numeric() {
            return true;
        }
        if other.kind == TypeKind::Number && self.is_numeric() {
            return true;
        }
        false
    }

    /// Numeric join for arithmetic: int < long < double < Decimal.
    pub fn numeric_join(a: &Type, b: &Type) -> Option<Type> {
        if !a.is_numeric() || !b.is_numeric() {
            return None;
        }
        let rank = |t: &Type| match t.kind {
            TypeKind::Int => 0,
            TypeKind::Long => 1,
            TypeKind::Double => 2,
            TypeKind::Decimal | TypeKind::Number => 3,
            _ => unreachable!(),
        };
        Some(if rank(a) >= rank(b) { a.unboxed() } else { b.unboxed() })
    }

    /// The static type of a literal value; used to seed global bindings from
    /// the caller-supplied map.
    pub fn of_value(value: &Value) -> Type {
        match value {
            Value::Null => Type::ANY,
            Value::Bool(_) => Type::BOOLEAN,
            Value::Int(_) => Type::INT,
            Value::Long(_) => Type::LONG,
            Value::Double(_) => Type::DOUBLE,
            Value::Decimal(_) => Type::DECIMAL,
            Value::Str(_) => Type::STRING,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxing_round_trip() {
        assert!(Type::INT.is_primitive());
        assert!(!Type::INT.boxed().is_primitive());
        assert!(Type::INT.boxed().is_ref());
        assert_eq!(Type::INT.boxed().unboxed(), Type::INT);
        assert!(Type::INT.is_boxed_or_unboxed(&Type::INT.boxed()));
        assert!(!Type::INT.is(&Type::INT.boxed()));
        // Non-primitives are unaffected by boxing.
        assert_eq!(Type::STRING.boxed(), Type::STRING);
    }

    #[test]
    fn numeric_join_order() {
        assert_eq!(Type::numeric_join(&Type::INT, &Type::LONG), Some(Type::LONG));
        assert_eq!(Type::numeric_join(&Type::LONG, &Type::DOUBLE), Some(Type::DOUBLE));
        assert_eq!(Type::numeric_join(&Type::DOUBLE, &Type::DECIMAL), Some(Type::DECIMAL));
        assert_eq!(Type::numeric_join(&Type::INT, &Type::INT), Some(Type::INT));
        assert_eq!(Type::numeric_join(&Type::INT, &Type::STRING), None);
    }

    #[test]
    fn convertibility() {
        assert!(Type::INT.is_convertible_to(&Type::DECIMAL));
        assert!(Type::DECIMAL.is_convertible_to(&Type::INT));
        assert!(Type::ANY.is_convertible_to(&Type::STRING));
        assert!(Type::STRING.is_convertible_to(&Type::ANY));
        assert!(Type::MAP.is_convertible_to(&Type::BOOLEAN));
        assert!(!Type::STRING.is_convertible_to(&Type::MAP));
    }
}
