//! Structured compile diagnostics. Every error carries the span it was
//! raised at; the EOF-class errors are marked so the parser can surface at
//! most one of them per parse.

use crate::compiler::tokens::Span;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ErrorKind {
    // ── Lexical ──
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unterminated comment")]
    UnterminatedComment,
    #[error("new line not allowed within single-line string")]
    NewlineInString,
    #[error("number too large for {0}")]
    NumberTooLarge(String),
    #[error("suffix '{0}' not allowed on a decimal literal")]
    InvalidLiteralSuffix(char),
    #[error("unexpected regex modifier '{0}'")]
    BadRegexModifier(char),
    #[error("capture variable name too long")]
    BadCaptureVariable,
    #[error("keyword '{0}' cannot be interpolated")]
    KeywordInInterpolation(String),
    #[error("closing brace '}}' does not match any opening brace")]
    UnbalancedBrace,
    #[error("unexpected end of file: expected {expected}")]
    UnexpectedEof { expected: String },

    // ── Syntactic ──
    #[error("unexpected token '{found}': expected {expected}")]
    UnexpectedToken { found: String, expected: String },
    #[error("invalid lvalue")]
    InvalidLValue,
    #[error("initialiser expression required for 'var' declaration")]
    MissingInitialiser,
    #[error("regex match not allowed when calling start_regex")]
    BadRegexStart,

    // ── Semantic ──
    #[error("variable '{0}' is not declared")]
    UndeclaredVariable(String),
    #[error("variable initialisation cannot refer to itself")]
    SelfReferenceInInitialiser,
    #[error("forward reference to function '{function}' that closes over variable '{variable}' not yet declared at time of reference")]
    ForwardCaptureReference { function: String, variable: String },
    #[error("variable '{0}' already declared in this scope")]
    AlreadyDeclared(String),
    #[error("duplicate field or method name '{0}'")]
    DuplicateName(String),
    #[error("'{0}' clashes with builtin method of the same name")]
    ClashesWithBuiltin(String),
    #[error("unknown class '{0}'")]
    UnknownClass(String),
    #[error("cannot convert from {from} to {to}")]
    IncompatibleTypes { from: String, to: String },
    #[error("operator '{op}' cannot be applied to operand of type {ty}")]
    BadOperandType { op: String, ty: String },
    #[error("left-hand side of '{op}' cannot be null")]
    NullOperand { op: String },
    #[error("divide by zero")]
    DivideByZero,
    #[error("missing return: function of type {0} cannot implicitly return null")]
    MissingReturn(String),
    #[error("reference to 'this' in static function")]
    ThisInStaticFunction,
    #[error("reference to capture variable outside regex match scope")]
    CaptureOutsideRegex,
    #[error("missing value for mandatory parameter '{0}'")]
    MissingMandatoryArgument(String),
    #[error("too many arguments: expected at most {expected} but got {got}")]
    TooManyArguments { expected: usize, got: usize },
    #[error("no such parameter: {0}")]
    NoSuchParameter(String),
    #[error("cannot access field of value of type {0}")]
    InvalidFieldAccess(String),
    #[error("cannot assign to element of a String")]
    StringElementAssign,
    #[error("static access to non-static method '{0}'")]
    StaticAccessToNonStatic(String),
    #[error("substitution cannot be used with '!~'")]
    SubstInAssertion,
    #[error("break or continue must be within a loop")]
    BreakOutsideLoop,
    #[error("unreachable statement")]
    UnreachableStatement,
    #[error("cannot declare reserved name '{0}'")]
    ReservedName(String),
    #[error("cannot call value of type {0}")]
    NotCallable(String),
    #[error("cannot modify 'const' variable '{0}'")]
    AssignToConst(String),
    #[error("no such field '{name}' on class '{class}'")]
    NoSuchField { name: String, class: String },
    #[error("no such method '{name}' on value of type {ty}")]
    NoSuchMethod { name: String, ty: String },
}

impl ErrorKind {
    /// EOF-class errors short-circuit parser recovery and are surfaced at
    /// most once per parse.
    pub fn is_eof(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnterminatedString
                | ErrorKind::UnterminatedComment
                | ErrorKind::UnexpectedEof { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind} at line {}, column {}", span.line, span.col)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: Span) -> Self {
        CompileError { kind, span }
    }

    pub fn is_eof(&self) -> bool {
        self.kind.is_eof()
    }
}
