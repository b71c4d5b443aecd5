//! The abstract syntax tree.
//!
//! Statements and expressions are plain tagged sums; every expression node
//! carries the mutable typing state the resolver fills in. Variable
//! declarations and functions live in per-compilation arenas (`VarId` /
//! `FunId` indices) because they participate in shared graphs: the capture
//! chains link forwarding declarations across functions, and wrappers embed
//! the function they wrap.

use crate::compiler::tokens::{Span, Token};
use indexmap::IndexMap;
use quill_core::{ClassId, FunctionDescriptor, Type, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunId(pub u32);

/// A parse-time type reference, resolved to a [`Type`] during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRef {
    pub kind: TypeRefKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRefKind {
    Builtin(Type),
    /// Dotted class path, e.g. `a.b.Outer.Inner`.
    Path(Vec<Token>),
}

impl TypeRef {
    pub fn builtin(ty: Type, span: Span) -> Self {
        TypeRef { kind: TypeRefKind::Builtin(ty), span }
    }
}

/// Any binding: local, parameter, field, global, or capture forwarder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: Token,
    /// Declared type; `None` for `var` declarations until inferred.
    pub declared_type: Option<TypeRef>,
    /// Resolved type.
    pub ty: Option<Type>,
    pub initialiser: Option<Expr>,
    pub owner: Option<FunId>,
    pub is_global: bool,
    pub is_field: bool,
    pub is_param: bool,
    pub is_explicit_param: bool,
    pub is_heap_local: bool,
    pub is_passed_as_heap_local: bool,
    pub is_final: bool,
    pub is_result_used: bool,
    /// False between `declare` and `define`: the variable exists in scope
    /// but referencing it from its own initialiser is an error.
    pub is_defined: bool,
    /// Function nesting level at which the variable was declared.
    pub nesting_level: usize,
    /// Next link up the capture chain for a forwarding declaration.
    pub parent_var: Option<VarId>,
    /// Root declaration of the capture chain.
    pub original_var: Option<VarId>,
    pub span: Span,
}

impl VarDecl {
    pub fn new(name: Token) -> Self {
        let span = name.span;
        VarDecl {
            name,
            declared_type: None,
            ty: None,
            initialiser: None,
            owner: None,
            is_global: false,
            is_field: false,
            is_param: false,
            is_explicit_param: false,
            is_heap_local: false,
            is_passed_as_heap_local: false,
            is_final: false,
            is_result_used: false,
            is_defined: false,
            nesting_level: 0,
            parent_var: None,
            original_var: None,
            span,
        }
    }
}

/// A user function, method, closure, or synthesised wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: Option<Token>,
    /// Resolved or synthetic name (`f`, `_$j$main`, `f$$w`, `_$j$closure3`).
    pub given_name: String,
    pub return_type: TypeRef,
    pub params: Vec<VarId>,
    /// The body block. Taken out and put back during resolution.
    pub body: Option<Stmt>,
    pub is_static: bool,
    pub is_init_method: bool,
    pub is_closure: bool,
    pub is_wrapper: bool,
    pub is_script_main: bool,
    /// Parameterless closure pending block demotion.
    pub no_params_defined: bool,
    /// Closure demoted back to a plain block; the arena entry is dead.
    pub demoted: bool,
    /// Forwarding declarations for variables captured through this
    /// function, keyed by name, in creation order.
    pub heap_local_params: IndexMap<String, VarId>,
    pub wrapper: Option<FunId>,
    /// First call site that referenced this function before its declaration
    /// was reached; used to reject forward references that capture
    /// not-yet-declared variables.
    pub earliest_forward_ref: Option<Span>,
    pub descriptor: Option<FunctionDescriptor>,
    pub resolved: bool,
    pub span: Span,
}

impl Function {
    pub fn new(given_name: impl Into<String>, return_type: TypeRef, span: Span) -> Self {
        Function {
            name: None,
            given_name: given_name.into(),
            return_type,
            params: Vec::new(),
            body: None,
            is_static: false,
            is_init_method: false,
            is_closure: false,
            is_wrapper: false,
            is_script_main: false,
            no_params_defined: false,
            demoted: false,
            heap_local_params: IndexMap::new(),
            wrapper: None,
            earliest_forward_ref: None,
            descriptor: None,
            resolved: false,
            span,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: Token,
    pub package_name: String,
    pub base: Option<TypeRef>,
    pub fields: Vec<VarId>,
    pub methods: Vec<FunId>,
    pub inner_classes: Vec<ClassDecl>,
    pub is_script_class: bool,
    pub class_id: Option<ClassId>,
    pub span: Span,
}

/// A lexical block: statements plus the variables and nested functions
/// declared directly within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub variables: IndexMap<String, VarId>,
    pub function_decls: Vec<FunId>,
    /// True while the resolver is working through parameter initialisers of
    /// the owning function.
    pub is_resolving_params: bool,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Block {
            stmts,
            variables: IndexMap::new(),
            function_decls: Vec::new(),
            is_resolving_params: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt { kind, span }
    }

    pub fn block(stmts: Vec<Stmt>, span: Span) -> Self {
        Stmt::new(StmtKind::Block(Box::new(Block::new(stmts))), span)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    ClassDecl(Box<ClassDecl>),
    FunDecl(FunId),
    VarDecl(VarId),
    Block(Box<Block>),
    /// Flat statement sequence that introduces no scope; used when a
    /// rewrite needs to replace one statement with several.
    Stmts(Vec<Stmt>),
    ExprStmt(Box<Expr>),
    If {
        cond: Box<Expr>,
        then_stmt: Box<Stmt>,
        else_stmt: Option<Box<Stmt>>,
    },
    /// Loops. `for` desugars to a block holding the initialiser and a
    /// `While` carrying the update statement.
    While {
        cond: Box<Expr>,
        body: Box<Stmt>,
        updates: Option<Box<Stmt>>,
    },
    Return(Box<Expr>),
    Break,
    Continue,
    ThrowError(Box<Expr>),
    Import {
        path: Vec<Token>,
        alias: Option<Token>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Filled in by the resolver; never null afterwards.
    pub ty: Option<Type>,
    pub is_const: bool,
    pub const_value: Option<Value>,
    /// Whether the enclosing context consumes the value.
    pub is_result_used: bool,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            kind,
            span,
            ty: None,
            is_const: false,
            const_value: None,
            is_result_used: true,
        }
    }

    pub fn literal(value: Value, span: Span) -> Self {
        Expr::new(ExprKind::Literal(value), span)
    }

    pub fn result_type(&self) -> Type {
        self.ty.unwrap_or(Type::ANY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Value),
    /// A type used as a value, e.g. the right operand of `instanceof`.
    TypeLiteral(TypeRef),
    Identifier {
        name: Token,
        var: Option<VarId>,
    },
    ListLiteral(Vec<Expr>),
    MapLiteral {
        entries: Vec<(Expr, Expr)>,
        is_named_args: bool,
    },
    /// Ordered literal fragments and interpolated sub-expressions.
    ExprString {
        parts: Vec<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: Token,
        rhs: Box<Expr>,
        /// The compound-assignment token this binary was synthesised from.
        original_operator: Option<Token>,
        /// Auto-create missing maps/lists along an lvalue field path.
        create_if_missing: bool,
    },
    Ternary {
        cond: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    PrefixUnary {
        op: Token,
        expr: Box<Expr>,
    },
    PostfixUnary {
        expr: Box<Expr>,
        op: Token,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        parent: Box<Expr>,
        access_op: Token,
        name: String,
        name_span: Span,
        args: Vec<Expr>,
        descriptor: Option<FunctionDescriptor>,
    },
    VarAssign {
        var: Box<Expr>,
        op: Token,
        expr: Box<Expr>,
    },
    VarOpAssign {
        var: Box<Expr>,
        op: Token,
        expr: Box<Expr>,
        is_pre_inc_or_dec: bool,
    },
    FieldAssign {
        parent: Box<Expr>,
        access_op: Token,
        field: Box<Expr>,
        op: Token,
        expr: Box<Expr>,
    },
    FieldOpAssign {
        parent: Box<Expr>,
        access_op: Token,
        field: Box<Expr>,
        op: Token,
        expr: Box<Expr>,
        is_pre_inc_or_dec: bool,
    },
    RegexMatch {
        lhs: Box<Expr>,
        op: Token,
        pattern: Box<Expr>,
        modifiers: String,
        implicit_it_match: bool,
        capture_var: Option<VarId>,
    },
    RegexSubst {
        lhs: Box<Expr>,
        op: Token,
        pattern: Box<Expr>,
        replacement: Box<Expr>,
        modifiers: String,
        implicit_it_match: bool,
        capture_var: Option<VarId>,
    },
    /// Function declaration in expression position: a reference to a named
    /// function as a value (method handle).
    FunDecl(FunId),
    Closure(FunId),
    /// Placeholder left operand of the binary synthesised inside an
    /// op-assign node.
    Noop,
    ReturnExpr {
        expr: Box<Expr>,
        return_type: Option<Type>,
    },
    BreakExpr,
    ContinueExpr,
    /// Synthetic type test (wrapper argument dispatch).
    InstanceOf {
        expr: Box<Expr>,
        target: Type,
        negated: bool,
    },
    /// C-style prefix cast `(int)x`.
    Cast {
        target: TypeRef,
        expr: Box<Expr>,
    },
    InvokeNew {
        class: TypeRef,
        args: Vec<Expr>,
    },
    /// Resolved form of `InvokeNew`: construct and run the init method.
    InvokeInit {
        class_id: ClassId,
        args: Vec<Expr>,
    },
    /// Direct invocation of a known function, bypassing dispatch.
    InvokeFunction {
        fun: FunId,
        args: Vec<Expr>,
    },
    /// Call into the runtime library by name.
    InvokeUtility {
        method: String,
        args: Vec<Expr>,
    },
    ClassPath {
        path: Vec<Token>,
        class_id: Option<ClassId>,
    },
    DefaultValue {
        of: Type,
    },
    ArrayLength {
        array: Box<Expr>,
    },
    ArrayGet {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    /// Read a bound parameter local inside a wrapper, unboxing it when the
    /// parameter is passed as a heap local.
    LoadParamValue {
        var: VarId,
    },
    /// Conversion through a named runtime coercion helper.
    ConvertTo {
        expr: Box<Expr>,
        target: Type,
        coercion: String,
    },
    /// Checked cast.
    CastTo {
        expr: Box<Expr>,
        target: Type,
    },
    /// A statement block in expression position.
    BlockExpr(Box<Stmt>),
    Print {
        expr: Box<Expr>,
        newline: bool,
    },
}

impl ExprKind {
    /// Variants that manage the value stack themselves; a generic driver
    /// must not pop their result.
    pub fn manages_result(&self) -> bool {
        matches!(
            self,
            ExprKind::ReturnExpr { .. }
                | ExprKind::BreakExpr
                | ExprKind::ContinueExpr
                | ExprKind::BlockExpr(_)
        )
    }
}

/// Output of the parser: the script class plus the arenas its AST indexes
/// into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedUnit {
    pub source: String,
    pub script_name: String,
    pub script_class: ClassDecl,
    pub vars: Vec<VarDecl>,
    pub funs: Vec<Function>,
}

impl ParsedUnit {
    pub fn var(&self, id: VarId) -> &VarDecl {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut VarDecl {
        &mut self.vars[id.0 as usize]
    }

    pub fn fun(&self, id: FunId) -> &Function {
        &self.funs[id.0 as usize]
    }

    pub fn fun_mut(&mut self, id: FunId) -> &mut Function {
        &mut self.funs[id.0 as usize]
    }

    /// The synthetic `_$j$main` function of the script class.
    pub fn script_main(&self) -> FunId {
        *self
            .script_class
            .methods
            .first()
            .expect("script class always has a main method")
    }
}
