//! Recursive descent parser with precedence climbing for expressions.
//!
//! Errors accumulate: after a statement-level error the parser skips to the
//! next statement boundary and resumes, so one bad statement does not hide
//! the rest. EOF-class errors short-circuit recovery and are reported once.

use crate::compiler::ast::*;
use crate::compiler::error::{CompileError, ErrorKind};
use crate::compiler::lexer::Tokeniser;
use crate::compiler::tokens::{Span, Token, TokenType};
use quill_core::{names, Type, Value};

/// Operator precedence, lowest binding first. Each level lists the tokens
/// that bind at that level; `true` marks left-associative levels. The
/// keyword levels (`or`/`and`/`not`) and the assignment and ternary levels
/// are handled structurally rather than through this table.
const BINARY_LEVELS: &[(bool, &[TokenType])] = &[
    (true, &[TokenType::PipePipe]),
    (true, &[TokenType::AmpersandAmpersand]),
    (true, &[TokenType::Pipe]),
    (true, &[TokenType::Caret]),
    (true, &[TokenType::Ampersand]),
    (
        true,
        &[
            TokenType::EqualEqual,
            TokenType::BangEqual,
            TokenType::Compare,
            TokenType::MatchRegex,
            TokenType::BangMatchRegex,
        ],
    ),
    (
        true,
        &[
            TokenType::LessThan,
            TokenType::LessThanEqual,
            TokenType::GreaterThan,
            TokenType::GreaterThanEqual,
            TokenType::Instanceof,
            TokenType::BangInstanceof,
            TokenType::In,
            TokenType::BangIn,
            TokenType::As,
        ],
    ),
    (
        true,
        &[TokenType::DoubleLess, TokenType::DoubleGreater, TokenType::TripleGreater],
    ),
    (true, &[TokenType::Plus, TokenType::Minus]),
    (true, &[TokenType::Star, TokenType::Slash, TokenType::Percent]),
];

pub struct Parser {
    tokeniser: Tokeniser,
    source: String,
    script_name: String,
    vars: Vec<VarDecl>,
    funs: Vec<Function>,
    errors: Vec<CompileError>,
    lookahead_depth: usize,
    eof_reported: bool,
    closure_count: u32,
}

impl Parser {
    pub fn new(source: &str, script_name: &str) -> Self {
        Parser {
            tokeniser: Tokeniser::new(source),
            source: source.to_string(),
            script_name: script_name.to_string(),
            vars: Vec::new(),
            funs: Vec::new(),
            errors: Vec::new(),
            lookahead_depth: 0,
            eof_reported: false,
            closure_count: 0,
        }
    }

    /// Parse a whole script. The script is modelled as a class with a
    /// synthetic main function whose single parameter is the globals map.
    pub fn parse_script(mut self) -> Result<ParsedUnit, Vec<CompileError>> {
        let mut stmts = Vec::new();
        let mut classes = Vec::new();
        self.skip_separators();
        loop {
            match self.peek_token() {
                Ok(t) if t.kind == TokenType::Eof => break,
                Ok(t) if t.kind == TokenType::Class => match self.class_decl() {
                    Ok(decl) => classes.push(decl),
                    Err(e) => {
                        if self.record_and_recover(e) {
                            break;
                        }
                    }
                },
                Ok(_) => match self.declaration() {
                    Ok(stmt) => {
                        stmts.push(stmt);
                        if let Err(e) = self.expect_statement_end() {
                            if self.record_and_recover(e) {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        if self.record_and_recover(e) {
                            break;
                        }
                    }
                },
                Err(e) => {
                    if self.record_and_recover(e) {
                        break;
                    }
                }
            }
            self.skip_separators();
        }
        self.finish(stmts, classes)
    }

    /// Parse a single expression followed by EOF; used by eval-style
    /// callers. The expression becomes the body of the script main.
    pub fn parse_expression(mut self) -> Result<ParsedUnit, Vec<CompileError>> {
        self.skip_separators();
        let result = self.parse_expr().and_then(|expr| {
            self.skip_separators();
            self.expect(TokenType::Eof, "end of input")?;
            Ok(expr)
        });
        match result {
            Ok(expr) => {
                let span = expr.span;
                let stmt = Stmt::new(StmtKind::ExprStmt(Box::new(expr)), span);
                self.finish(vec![stmt], Vec::new())
            }
            Err(e) => {
                self.record(e);
                Err(self.errors)
            }
        }
    }

    fn finish(
        mut self,
        stmts: Vec<Stmt>,
        classes: Vec<ClassDecl>,
    ) -> Result<ParsedUnit, Vec<CompileError>> {
        let span = stmts
            .first()
            .map(|s| s.span)
            .unwrap_or_else(Span::dummy);
        let body = self.make_block(stmts, span);

        let globals_tok = synth(TokenType::Identifier, names::GLOBALS_PARAM, Span::dummy());
        let mut globals = VarDecl::new(globals_tok);
        globals.declared_type = Some(TypeRef::builtin(Type::MAP, Span::dummy()));
        globals.is_param = true;
        let globals_id = self.alloc_var(globals);

        let mut main = Function::new(
            names::SCRIPT_MAIN,
            TypeRef::builtin(Type::ANY, Span::dummy()),
            span,
        );
        main.is_script_main = true;
        main.params = vec![globals_id];
        main.body = Some(body);
        let main_id = self.alloc_fun(main);

        let script_class = ClassDecl {
            name: synth(TokenType::Identifier, &self.script_name.clone(), Span::dummy()),
            package_name: String::new(),
            base: None,
            fields: Vec::new(),
            methods: vec![main_id],
            inner_classes: classes,
            is_script_class: true,
            class_id: None,
            span: Span::dummy(),
        };

        if self.errors.is_empty() {
            Ok(ParsedUnit {
                source: self.source,
                script_name: self.script_name,
                script_class,
                vars: self.vars,
                funs: self.funs,
            })
        } else {
            Err(self.errors)
        }
    }

    // ── Token plumbing ─────────────────────────────────────────────────

    fn peek_token(&mut self) -> Result<Token, CompileError> {
        self.tokeniser.peek()
    }

    fn advance_token(&mut self) -> Result<Token, CompileError> {
        self.tokeniser.next()
    }

    fn check(&mut self, kind: TokenType) -> bool {
        matches!(self.peek_token(), Ok(t) if t.kind == kind)
    }

    fn match_kind(&mut self, kind: TokenType) -> Option<Token> {
        if self.check(kind) {
            self.advance_token().ok()
        } else {
            None
        }
    }

    fn match_any(&mut self, kinds: &[TokenType]) -> Option<Token> {
        match self.peek_token() {
            Ok(t) if kinds.contains(&t.kind) => self.advance_token().ok(),
            _ => None,
        }
    }

    fn expect(&mut self, kind: TokenType, what: &str) -> Result<Token, CompileError> {
        let tok = self.peek_token()?;
        if tok.kind == kind {
            return self.advance_token();
        }
        if tok.kind == TokenType::Eof {
            return Err(CompileError::new(
                ErrorKind::UnexpectedEof { expected: what.to_string() },
                tok.span,
            ));
        }
        Err(CompileError::new(
            ErrorKind::UnexpectedToken {
                found: tok.to_string(),
                expected: what.to_string(),
            },
            tok.span,
        ))
    }

    fn skip_newlines(&mut self) {
        while self.match_kind(TokenType::Eol).is_some() {}
    }

    fn skip_separators(&mut self) {
        while self
            .match_any(&[TokenType::Eol, TokenType::Semicolon])
            .is_some()
        {}
    }

    fn record(&mut self, e: CompileError) {
        if self.lookahead_depth > 0 {
            return;
        }
        if e.is_eof() {
            if self.eof_reported {
                return;
            }
            self.eof_reported = true;
        }
        self.errors.push(e);
    }

    /// Record an error and skip to the next statement boundary. Returns
    /// true when the parse should stop (EOF-class error).
    fn record_and_recover(&mut self, e: CompileError) -> bool {
        let eof = e.is_eof();
        self.record(e);
        if eof {
            return true;
        }
        self.synchronize();
        false
    }

    fn synchronize(&mut self) {
        loop {
            match self.peek_token() {
                Err(e) => {
                    if e.is_eof() {
                        return;
                    }
                    // The lexer consumed the offending character already.
                }
                Ok(t) => match t.kind {
                    TokenType::Eof | TokenType::RightBrace => return,
                    TokenType::Eol | TokenType::Semicolon => {
                        self.skip_separators();
                        return;
                    }
                    _ => {
                        let _ = self.advance_token();
                    }
                },
            }
        }
    }

    /// Pure lookahead: run a candidate parse, then restore the token
    /// stream, the error list, and the arenas regardless of outcome.
    fn lookahead<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut Self) -> Result<bool, CompileError>,
    {
        let mark = self.tokeniser.mark();
        let n_errors = self.errors.len();
        let n_vars = self.vars.len();
        let n_funs = self.funs.len();
        self.lookahead_depth += 1;
        let ok = matches!(f(self), Ok(true));
        self.lookahead_depth -= 1;
        self.tokeniser.reset_to(mark);
        self.errors.truncate(n_errors);
        self.vars.truncate(n_vars);
        self.funs.truncate(n_funs);
        ok
    }

    // ── Arenas ─────────────────────────────────────────────────────────

    fn alloc_var(&mut self, var: VarDecl) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(var);
        id
    }

    fn alloc_fun(&mut self, fun: Function) -> FunId {
        let id = FunId(self.funs.len() as u32);
        self.funs.push(fun);
        id
    }

    fn make_block(&mut self, stmts: Vec<Stmt>, span: Span) -> Stmt {
        let mut block = Block::new(stmts);
        block.function_decls = block
            .stmts
            .iter()
            .filter_map(|s| match s.kind {
                StmtKind::FunDecl(fid) => Some(fid),
                _ => None,
            })
            .collect();
        Stmt::new(StmtKind::Block(Box::new(block)), span)
    }

    // ── Declarations and statements ────────────────────────────────────

    fn declaration(&mut self) -> Result<Stmt, CompileError> {
        if self.looks_like_fun_decl() {
            return self.fun_decl();
        }
        let tok = self.peek_token()?;
        match tok.kind {
            TokenType::Const => self.var_decl(true),
            TokenType::Var => self.var_decl(false),
            k if k.is_type() => self.var_decl(false),
            TokenType::Import => self.import_decl(),
            _ => self.statement(),
        }
    }

    /// Three-token lookahead: `[static] <type> <identifier> (`.
    fn looks_like_fun_decl(&mut self) -> bool {
        self.lookahead(|p| {
            p.match_kind(TokenType::Static);
            let t = p.peek_token()?;
            if !t.kind.is_type() {
                return Ok(false);
            }
            p.advance_token()?;
            if p.peek_token()?.kind != TokenType::Identifier {
                return Ok(false);
            }
            p.advance_token()?;
            Ok(p.peek_token()?.kind == TokenType::LeftParen)
        })
    }

    fn fun_decl(&mut self) -> Result<Stmt, CompileError> {
        let is_static = self.match_kind(TokenType::Static).is_some();
        let ret_tok = self.advance_token()?;
        let return_type = TypeRef::builtin(type_of_token(ret_tok.kind), ret_tok.span);
        let name = self.expect(TokenType::Identifier, "function name")?;
        if names::is_reserved(name.text()) {
            return Err(CompileError::new(
                ErrorKind::ReservedName(name.text().to_string()),
                name.span,
            ));
        }
        let mut fun = Function::new(name.text(), return_type, name.span);
        fun.name = Some(name.clone());
        fun.is_static = is_static;
        fun.params = self.parameter_list()?;
        self.skip_newlines();
        self.expect(TokenType::LeftBrace, "'{'")?;
        let body = self.block_body(name.span)?;
        fun.body = Some(body);
        let fid = self.alloc_fun(fun);
        Ok(Stmt::new(StmtKind::FunDecl(fid), name.span))
    }

    fn parameter_list(&mut self) -> Result<Vec<VarId>, CompileError> {
        self.expect(TokenType::LeftParen, "'('")?;
        self.skip_newlines();
        let mut params = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                self.skip_newlines();
                let declared = if self.peek_token()?.kind.is_type() {
                    let t = self.advance_token()?;
                    Some(TypeRef::builtin(type_of_token(t.kind), t.span))
                } else {
                    None
                };
                let name = self.expect(TokenType::Identifier, "parameter name")?;
                let mut var = VarDecl::new(name);
                var.declared_type =
                    declared.or_else(|| Some(TypeRef::builtin(Type::ANY, var.span)));
                var.is_param = true;
                var.is_explicit_param = true;
                if self.match_kind(TokenType::Equal).is_some() {
                    self.skip_newlines();
                    var.initialiser = Some(self.parse_expr()?);
                }
                params.push(self.alloc_var(var));
                self.skip_newlines();
                if self.match_kind(TokenType::Comma).is_none() {
                    break;
                }
            }
        }
        self.skip_newlines();
        self.expect(TokenType::RightParen, "')'")?;
        Ok(params)
    }

    fn var_decl(&mut self, is_const: bool) -> Result<Stmt, CompileError> {
        let type_tok = self.advance_token()?;
        // `const` may be followed by an explicit type.
        let declared = if is_const {
            if self.peek_token()?.kind.is_type() {
                let t = self.advance_token()?;
                Some(TypeRef::builtin(type_of_token(t.kind), t.span))
            } else {
                None
            }
        } else if type_tok.kind == TokenType::Var {
            None
        } else {
            Some(TypeRef::builtin(type_of_token(type_tok.kind), type_tok.span))
        };
        let needs_init = is_const || type_tok.kind == TokenType::Var;

        let mut decls = Vec::new();
        loop {
            let name = self.expect(TokenType::Identifier, "variable name")?;
            if names::is_reserved(name.text()) || name.text().starts_with('$') {
                return Err(CompileError::new(
                    ErrorKind::ReservedName(name.text().to_string()),
                    name.span,
                ));
            }
            let mut var = VarDecl::new(name.clone());
            var.declared_type = declared.clone();
            var.is_final = is_const;
            if self.match_kind(TokenType::Equal).is_some() {
                self.skip_newlines();
                var.initialiser = Some(self.parse_expr()?);
            } else if needs_init {
                return Err(CompileError::new(ErrorKind::MissingInitialiser, name.span));
            }
            let id = self.alloc_var(var);
            decls.push(Stmt::new(StmtKind::VarDecl(id), name.span));
            if self.match_kind(TokenType::Comma).is_none() {
                break;
            }
            self.skip_newlines();
        }
        let stmt = if decls.len() == 1 {
            decls.pop().unwrap()
        } else {
            let span = decls[0].span;
            Stmt::new(StmtKind::Stmts(decls), span)
        };
        self.trailing_condition(stmt)
    }

    fn import_decl(&mut self) -> Result<Stmt, CompileError> {
        let kw = self.expect(TokenType::Import, "'import'")?;
        let mut path = vec![self.expect(TokenType::Identifier, "class or package name")?];
        while self.match_kind(TokenType::Dot).is_some() {
            path.push(self.expect(TokenType::Identifier, "class or package name")?);
        }
        let alias = if self.match_kind(TokenType::As).is_some() {
            Some(self.expect(TokenType::Identifier, "import alias")?)
        } else {
            None
        };
        Ok(Stmt::new(StmtKind::Import { path, alias }, kw.span))
    }

    fn class_decl(&mut self) -> Result<ClassDecl, CompileError> {
        self.expect(TokenType::Class, "'class'")?;
        let name = self.expect(TokenType::Identifier, "class name")?;
        let base = if self.match_kind(TokenType::Extends).is_some() {
            Some(self.parse_type_ref()?)
        } else {
            None
        };
        self.skip_newlines();
        self.expect(TokenType::LeftBrace, "'{'")?;
        let mut decl = ClassDecl {
            name: name.clone(),
            package_name: String::new(),
            base,
            fields: Vec::new(),
            methods: Vec::new(),
            inner_classes: Vec::new(),
            is_script_class: false,
            class_id: None,
            span: name.span,
        };
        loop {
            self.skip_separators();
            let tok = self.peek_token()?;
            match tok.kind {
                TokenType::RightBrace => {
                    self.advance_token()?;
                    break;
                }
                TokenType::Eof => {
                    return Err(CompileError::new(
                        ErrorKind::UnexpectedEof { expected: "'}'".to_string() },
                        tok.span,
                    ))
                }
                TokenType::Class => {
                    let inner = self.class_decl()?;
                    decl.inner_classes.push(inner);
                }
                _ => {
                    if self.looks_like_fun_decl() {
                        let stmt = self.fun_decl()?;
                        if let StmtKind::FunDecl(fid) = stmt.kind {
                            decl.methods.push(fid);
                        }
                    } else {
                        let stmt = self.var_decl(false)?;
                        collect_var_ids(&stmt, &mut decl.fields);
                        for id in &decl.fields {
                            self.vars[id.0 as usize].is_field = true;
                        }
                        self.expect_statement_end()?;
                    }
                }
            }
        }
        Ok(decl)
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        let tok = self.peek_token()?;
        match tok.kind {
            TokenType::LeftBrace => self.brace_statement(),
            TokenType::If => self.if_statement(false),
            TokenType::Unless => self.if_statement(true),
            TokenType::While => self.while_statement(),
            TokenType::For => self.for_statement(),
            TokenType::Break => {
                self.advance_token()?;
                self.trailing_condition(Stmt::new(StmtKind::Break, tok.span))
            }
            TokenType::Continue => {
                self.advance_token()?;
                self.trailing_condition(Stmt::new(StmtKind::Continue, tok.span))
            }
            TokenType::Return => {
                self.advance_token()?;
                let expr = if self.at_statement_end() {
                    Expr::literal(Value::Null, tok.span)
                } else {
                    self.parse_expr()?
                };
                let span = expr.span;
                let ret = Expr::new(
                    ExprKind::ReturnExpr { expr: Box::new(expr), return_type: None },
                    span,
                );
                self.trailing_condition(Stmt::new(StmtKind::Return(Box::new(ret)), tok.span))
            }
            TokenType::Print | TokenType::Println => {
                self.advance_token()?;
                let newline = tok.kind == TokenType::Println;
                let expr = if self.at_statement_end() {
                    Expr::literal(Value::Str(String::new()), tok.span)
                } else {
                    self.parse_expr()?
                };
                let mut print = Expr::new(
                    ExprKind::Print { expr: Box::new(expr), newline },
                    tok.span,
                );
                print.is_result_used = false;
                self.trailing_condition(Stmt::new(StmtKind::ExprStmt(Box::new(print)), tok.span))
            }
            TokenType::Die => {
                self.advance_token()?;
                let expr = if self.at_statement_end() {
                    Expr::literal(Value::Null, tok.span)
                } else {
                    self.parse_expr()?
                };
                self.trailing_condition(Stmt::new(
                    StmtKind::ThrowError(Box::new(expr)),
                    tok.span,
                ))
            }
            TokenType::Class => Err(CompileError::new(
                ErrorKind::UnexpectedToken {
                    found: "class".to_string(),
                    expected: "statement (classes may only be declared at the top level)"
                        .to_string(),
                },
                tok.span,
            )),
            _ => self.expression_statement(),
        }
    }

    fn at_statement_end(&mut self) -> bool {
        matches!(
            self.peek_token().map(|t| t.kind),
            Ok(TokenType::Eol)
                | Ok(TokenType::Semicolon)
                | Ok(TokenType::RightBrace)
                | Ok(TokenType::Eof)
                | Ok(TokenType::If)
                | Ok(TokenType::Unless)
        )
    }

    fn expect_statement_end(&mut self) -> Result<(), CompileError> {
        let tok = self.peek_token()?;
        match tok.kind {
            TokenType::Eol | TokenType::Semicolon => {
                self.skip_separators();
                Ok(())
            }
            TokenType::RightBrace | TokenType::Eof => Ok(()),
            _ => Err(CompileError::new(
                ErrorKind::UnexpectedToken {
                    found: tok.to_string(),
                    expected: "end of statement".to_string(),
                },
                tok.span,
            )),
        }
    }

    /// Apply a trailing `if`/`unless` statement modifier.
    fn trailing_condition(&mut self, stmt: Stmt) -> Result<Stmt, CompileError> {
        let Some(tok) = self.match_any(&[TokenType::If, TokenType::Unless]) else {
            return Ok(stmt);
        };
        let mut cond = self.parse_expr()?;
        if tok.kind == TokenType::Unless {
            let span = cond.span;
            cond = Expr::new(
                ExprKind::PrefixUnary {
                    op: synth(TokenType::Bang, "!", tok.span),
                    expr: Box::new(cond),
                },
                span,
            );
        }
        let span = stmt.span;
        Ok(Stmt::new(
            StmtKind::If {
                cond: Box::new(cond),
                then_stmt: Box::new(stmt),
                else_stmt: None,
            },
            span,
        ))
    }

    fn if_statement(&mut self, negated: bool) -> Result<Stmt, CompileError> {
        let kw = self.advance_token()?;
        self.expect(TokenType::LeftParen, "'('")?;
        self.skip_newlines();
        let mut cond = self.parse_expr()?;
        self.skip_newlines();
        self.expect(TokenType::RightParen, "')'")?;
        if negated {
            let span = cond.span;
            cond = Expr::new(
                ExprKind::PrefixUnary {
                    op: synth(TokenType::Bang, "!", kw.span),
                    expr: Box::new(cond),
                },
                span,
            );
        }
        self.skip_newlines();
        let then_stmt = self.statement_or_declaration()?;
        // `else` may sit on its own line; only commit to consuming the
        // newlines when it actually follows.
        let has_else = self.lookahead(|p| {
            p.skip_newlines();
            Ok(p.check(TokenType::Else))
        });
        let else_stmt = if has_else {
            self.skip_newlines();
            self.advance_token()?; // else
            self.skip_newlines();
            if self.check(TokenType::If) {
                Some(Box::new(self.if_statement(false)?))
            } else {
                Some(Box::new(self.statement_or_declaration()?))
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                cond: Box::new(cond),
                then_stmt: Box::new(then_stmt),
                else_stmt,
            },
            kw.span,
        ))
    }

    fn while_statement(&mut self) -> Result<Stmt, CompileError> {
        let kw = self.advance_token()?;
        self.expect(TokenType::LeftParen, "'('")?;
        self.skip_newlines();
        let cond = self.parse_expr()?;
        self.skip_newlines();
        self.expect(TokenType::RightParen, "')'")?;
        self.skip_newlines();
        let body = self.statement_or_declaration()?;
        Ok(Stmt::new(
            StmtKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
                updates: None,
            },
            kw.span,
        ))
    }

    /// `for (init; cond; update) body` desugars to a block holding the
    /// initialiser and a `while` whose updates are attached.
    fn for_statement(&mut self) -> Result<Stmt, CompileError> {
        let kw = self.advance_token()?;
        self.expect(TokenType::LeftParen, "'('")?;
        self.skip_newlines();
        let init = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.declaration()?)
        };
        self.expect(TokenType::Semicolon, "';'")?;
        self.skip_newlines();
        let cond = if self.check(TokenType::Semicolon) {
            Expr::literal(Value::Bool(true), kw.span)
        } else {
            self.parse_expr()?
        };
        self.expect(TokenType::Semicolon, "';'")?;
        self.skip_newlines();
        let updates = if self.check(TokenType::RightParen) {
            None
        } else {
            let mut update_stmts = Vec::new();
            loop {
                let mut e = self.parse_expr()?;
                e.is_result_used = false;
                let span = e.span;
                update_stmts.push(Stmt::new(StmtKind::ExprStmt(Box::new(e)), span));
                if self.match_kind(TokenType::Comma).is_none() {
                    break;
                }
                self.skip_newlines();
            }
            let span = update_stmts[0].span;
            Some(Box::new(Stmt::new(StmtKind::Stmts(update_stmts), span)))
        };
        self.expect(TokenType::RightParen, "')'")?;
        self.skip_newlines();
        let body = self.statement_or_declaration()?;
        let while_stmt = Stmt::new(
            StmtKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
                updates,
            },
            kw.span,
        );
        let mut stmts = Vec::new();
        if let Some(init) = init {
            stmts.push(init);
        }
        stmts.push(while_stmt);
        Ok(self.make_block(stmts, kw.span))
    }

    /// Loop/conditional bodies allow declarations (scoped to the body).
    fn statement_or_declaration(&mut self) -> Result<Stmt, CompileError> {
        self.declaration()
    }

    /// `{` at statement position: a map literal, an invoked closure, or a
    /// plain code block.
    fn brace_statement(&mut self) -> Result<Stmt, CompileError> {
        if self.is_map_literal(TokenType::LeftBrace) {
            return self.expression_statement();
        }
        let closure = self.parse_closure()?;
        let ExprKind::Closure(fid) = closure.kind else {
            unreachable!("parse_closure returns a closure")
        };
        if self.funs[fid.0 as usize].no_params_defined && !self.check(TokenType::LeftParen) {
            // Not invoked and no explicit parameters: demote to a block,
            // dropping the synthetic `it` parameter.
            let body = self.funs[fid.0 as usize].body.take().unwrap();
            self.funs[fid.0 as usize].demoted = true;
            return Ok(body);
        }
        let expr = self.parse_suffixes(closure)?;
        let expr = self.finish_expression(expr)?;
        let mut expr = expr;
        expr.is_result_used = false;
        let span = expr.span;
        self.trailing_condition(Stmt::new(StmtKind::ExprStmt(Box::new(expr)), span))
    }

    fn expression_statement(&mut self) -> Result<Stmt, CompileError> {
        let mut expr = self.parse_expr()?;
        expr.is_result_used = false;
        let span = expr.span;
        self.trailing_condition(Stmt::new(StmtKind::ExprStmt(Box::new(expr)), span))
    }

    /// Parse the statements of a `{ ... }` body, with per-statement error
    /// recovery; the opening brace has been consumed.
    fn block_body(&mut self, span: Span) -> Result<Stmt, CompileError> {
        let mut stmts = Vec::new();
        self.skip_separators();
        loop {
            let tok = self.peek_token()?;
            match tok.kind {
                TokenType::RightBrace => {
                    self.advance_token()?;
                    break;
                }
                TokenType::Eof => {
                    return Err(CompileError::new(
                        ErrorKind::UnexpectedEof { expected: "'}'".to_string() },
                        tok.span,
                    ));
                }
                _ => match self.declaration().and_then(|stmt| {
                    self.expect_statement_end()?;
                    Ok(stmt)
                }) {
                    Ok(stmt) => stmts.push(stmt),
                    Err(e) => {
                        if e.is_eof() {
                            return Err(e);
                        }
                        self.record(e);
                        self.synchronize();
                    }
                },
            }
            self.skip_separators();
        }
        Ok(self.make_block(stmts, span))
    }

    // ── Expressions ────────────────────────────────────────────────────

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_and()?;
        while let Some(tok) = self.match_kind(TokenType::Or) {
            self.skip_newlines();
            let rhs = self.parse_and()?;
            lhs = binary(lhs, synth(TokenType::PipePipe, &tok.chars, tok.span), rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_not()?;
        while let Some(tok) = self.match_kind(TokenType::And) {
            self.skip_newlines();
            let rhs = self.parse_not()?;
            lhs = binary(lhs, synth(TokenType::AmpersandAmpersand, &tok.chars, tok.span), rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, CompileError> {
        if let Some(tok) = self.match_kind(TokenType::Not) {
            let expr = self.parse_not()?;
            let span = tok.span.merge(expr.span);
            return Ok(Expr::new(
                ExprKind::PrefixUnary {
                    op: synth(TokenType::Bang, &tok.chars, tok.span),
                    expr: Box::new(expr),
                },
                span,
            ));
        }
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.parse_ternary()?;
        let is_assign = matches!(self.peek_token(), Ok(t) if t.kind.is_assignment());
        if is_assign {
            let op = self.advance_token()?;
            self.skip_newlines();
            // Right-associative: `a = b = c`.
            let rhs = self.parse_assignment()?;
            return self.convert_to_lvalue(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_ternary(&mut self) -> Result<Expr, CompileError> {
        let cond = self.parse_binary(0)?;
        if self.match_kind(TokenType::Question).is_some() {
            self.skip_newlines();
            let if_true = self.parse_ternary()?;
            self.skip_newlines();
            self.expect(TokenType::Colon, "':'")?;
            self.skip_newlines();
            let if_false = self.parse_ternary()?;
            let span = cond.span.merge(if_false.span);
            return Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    if_true: Box::new(if_true),
                    if_false: Box::new(if_false),
                },
                span,
            ));
        }
        if let Some(op) = self.match_kind(TokenType::QuestionColon) {
            self.skip_newlines();
            let rhs = self.parse_ternary()?;
            return Ok(binary(cond, op, rhs));
        }
        Ok(cond)
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr, CompileError> {
        if level >= BINARY_LEVELS.len() {
            return self.parse_unary();
        }
        let (left_assoc, ops) = BINARY_LEVELS[level];
        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let Some(op) = self.match_any(ops) else {
                return Ok(lhs);
            };
            self.skip_newlines();
            match op.kind {
                TokenType::Instanceof | TokenType::BangInstanceof | TokenType::As => {
                    let type_ref = self.parse_type_ref()?;
                    let span = type_ref.span;
                    let rhs = Expr::new(ExprKind::TypeLiteral(type_ref), span);
                    lhs = binary(lhs, op, rhs);
                }
                TokenType::MatchRegex | TokenType::BangMatchRegex => {
                    let rhs =
                        self.parse_binary(level + if left_assoc { 1 } else { 0 })?;
                    lhs = rewire_regex(lhs, op, rhs);
                }
                _ => {
                    let rhs =
                        self.parse_binary(level + if left_assoc { 1 } else { 0 })?;
                    lhs = binary(lhs, op, rhs);
                }
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let tok = self.peek_token()?;
        match tok.kind {
            TokenType::Bang | TokenType::Minus | TokenType::Plus | TokenType::Tilde => {
                let op = self.advance_token()?;
                let expr = self.parse_unary()?;
                let span = op.span.merge(expr.span);
                Ok(Expr::new(
                    ExprKind::PrefixUnary { op, expr: Box::new(expr) },
                    span,
                ))
            }
            TokenType::PlusPlus | TokenType::MinusMinus => {
                let op = self.advance_token()?;
                let expr = self.parse_unary()?;
                self.convert_inc_dec(expr, op, true)
            }
            TokenType::LeftParen if self.is_builtin_cast() => {
                self.advance_token()?; // (
                let t = self.advance_token()?;
                let target = TypeRef::builtin(type_of_token(t.kind), t.span);
                self.expect(TokenType::RightParen, "')'")?;
                let expr = self.parse_unary()?;
                let span = tok.span.merge(expr.span);
                Ok(Expr::new(
                    ExprKind::Cast { target, expr: Box::new(expr) },
                    span,
                ))
            }
            _ => {
                let primary = self.parse_primary()?;
                let expr = self.parse_suffixes(primary)?;
                if let Some(op) = self.match_any(&[TokenType::PlusPlus, TokenType::MinusMinus]) {
                    return self.convert_inc_dec(expr, op, false);
                }
                Ok(expr)
            }
        }
    }

    fn is_builtin_cast(&mut self) -> bool {
        self.lookahead(|p| {
            p.expect(TokenType::LeftParen, "'('")?;
            if !p.peek_token()?.kind.is_type() {
                return Ok(false);
            }
            p.advance_token()?;
            Ok(p.peek_token()?.kind == TokenType::RightParen)
        })
    }

    fn parse_suffixes(&mut self, mut expr: Expr) -> Result<Expr, CompileError> {
        loop {
            let tok = match self.peek_token() {
                Ok(t) => t,
                Err(_) => return Ok(expr),
            };
            match tok.kind {
                TokenType::Dot | TokenType::QuestionDot => {
                    let op = self.advance_token()?;
                    self.skip_newlines();
                    let field = self.field_name()?;
                    expr = binary(expr, op, field);
                }
                TokenType::LeftSquare | TokenType::QuestionSquare => {
                    let op = self.advance_token()?;
                    self.skip_newlines();
                    let index = self.parse_expr()?;
                    self.skip_newlines();
                    self.expect(TokenType::RightSquare, "']'")?;
                    expr = binary(expr, op, index);
                }
                TokenType::LeftParen => {
                    let args = self.argument_list()?;
                    expr = self.make_call(expr, args, tok.span)?;
                }
                TokenType::LeftBrace => {
                    // Trailing closure as the sole argument.
                    if self.is_map_literal(TokenType::LeftBrace) {
                        return Ok(expr);
                    }
                    let closure = self.parse_closure()?;
                    expr = self.make_call(expr, vec![closure], tok.span)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Identifiers after `.`/`?.` demote to string literals so `x.y` and
    /// `x."y"` are equivalent.
    fn field_name(&mut self) -> Result<Expr, CompileError> {
        let tok = self.peek_token()?;
        match tok.kind {
            TokenType::Identifier => {
                let t = self.advance_token()?;
                Ok(Expr::literal(Value::Str(t.chars.clone()), t.span))
            }
            TokenType::StringConst => {
                let t = self.advance_token()?;
                Ok(Expr::literal(t.value.clone().unwrap(), t.span))
            }
            TokenType::ExprStringStart => {
                self.advance_token()?;
                self.parse_expr_string()
            }
            TokenType::IntegerConst => {
                let t = self.advance_token()?;
                Ok(Expr::literal(t.value.clone().unwrap(), t.span))
            }
            // Keywords are valid field names after a dot.
            k if !k.is_type()
                && !tok.chars.is_empty()
                && tok.chars.chars().all(|c| c.is_alphanumeric()) =>
            {
                let t = self.advance_token()?;
                Ok(Expr::literal(Value::Str(t.chars.clone()), t.span))
            }
            _ => Err(CompileError::new(
                ErrorKind::UnexpectedToken {
                    found: tok.to_string(),
                    expected: "field name".to_string(),
                },
                tok.span,
            )),
        }
    }

    fn make_call(
        &mut self,
        callee: Expr,
        args: Vec<Expr>,
        span: Span,
    ) -> Result<Expr, CompileError> {
        let full = callee.span.merge(span);
        // `x.a.b(args)` becomes a method call of `b` rooted at `x.a`.
        if let ExprKind::Binary { lhs, op, rhs, .. } = &callee.kind {
            if op.kind == TokenType::Dot || op.kind == TokenType::QuestionDot {
                if let ExprKind::Literal(Value::Str(name)) = &rhs.kind {
                    let name = name.clone();
                    let name_span = rhs.span;
                    let ExprKind::Binary { lhs, op, .. } = callee.kind else {
                        unreachable!()
                    };
                    return Ok(Expr::new(
                        ExprKind::MethodCall {
                            parent: lhs,
                            access_op: op,
                            name,
                            name_span,
                            args,
                            descriptor: None,
                        },
                        full,
                    ));
                }
            }
        }
        Ok(Expr::new(
            ExprKind::Call { callee: Box::new(callee), args },
            full,
        ))
    }

    fn argument_list(&mut self) -> Result<Vec<Expr>, CompileError> {
        let open = self.expect(TokenType::LeftParen, "'('")?;
        self.skip_newlines();
        let mut args = Vec::new();
        if self.is_named_args() {
            let entries = self.map_entries(TokenType::RightParen)?;
            let mut map = Expr::new(
                ExprKind::MapLiteral { entries, is_named_args: true },
                open.span,
            );
            map.is_result_used = true;
            args.push(map);
        } else if !self.check(TokenType::RightParen) {
            loop {
                args.push(self.parse_expr()?);
                self.skip_newlines();
                if self.match_kind(TokenType::Comma).is_none() {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.skip_newlines();
        self.expect(TokenType::RightParen, "')'")?;
        // One or more trailing closures append as additional arguments.
        while self.check(TokenType::LeftBrace) && !self.is_map_literal(TokenType::LeftBrace) {
            args.push(self.parse_closure()?);
        }
        Ok(args)
    }

    fn is_named_args(&mut self) -> bool {
        self.lookahead(|p| {
            if p.peek_token()?.kind == TokenType::RightParen {
                return Ok(false);
            }
            p.map_key()?;
            Ok(p.peek_token()?.kind == TokenType::Colon)
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let tok = self.peek_token()?;
        match tok.kind {
            TokenType::IntegerConst
            | TokenType::LongConst
            | TokenType::DoubleConst
            | TokenType::DecimalConst
            | TokenType::StringConst
            | TokenType::True
            | TokenType::False
            | TokenType::Null => {
                let t = self.advance_token()?;
                Ok(Expr::literal(t.value.clone().unwrap(), t.span))
            }
            TokenType::Identifier => {
                let t = self.advance_token()?;
                Ok(ident_expr(t))
            }
            TokenType::LeftParen => {
                self.advance_token()?;
                self.skip_newlines();
                let e = self.parse_expr()?;
                self.skip_newlines();
                self.expect(TokenType::RightParen, "')'")?;
                Ok(e)
            }
            TokenType::LeftSquare => {
                if self.is_map_literal(TokenType::LeftSquare) {
                    self.map_literal(TokenType::LeftSquare)
                } else {
                    self.list_literal()
                }
            }
            TokenType::LeftBrace => {
                if self.is_map_literal(TokenType::LeftBrace) {
                    self.map_literal(TokenType::LeftBrace)
                } else {
                    self.parse_closure()
                }
            }
            TokenType::ExprStringStart => {
                self.advance_token()?;
                self.parse_expr_string()
            }
            TokenType::Slash | TokenType::SlashEqual => self.regex_literal(),
            TokenType::RegexSubstStart => self.regex_substitute(),
            TokenType::New => self.invoke_new(),
            TokenType::Break => {
                let t = self.advance_token()?;
                Ok(Expr::new(ExprKind::BreakExpr, t.span))
            }
            TokenType::Continue => {
                let t = self.advance_token()?;
                Ok(Expr::new(ExprKind::ContinueExpr, t.span))
            }
            _ => Err(CompileError::new(
                ErrorKind::UnexpectedToken {
                    found: tok.to_string(),
                    expected: "expression".to_string(),
                },
                tok.span,
            )),
        }
    }

    // ── Literals ───────────────────────────────────────────────────────

    fn list_literal(&mut self) -> Result<Expr, CompileError> {
        let open = self.expect(TokenType::LeftSquare, "'['")?;
        self.skip_newlines();
        let mut elements = Vec::new();
        if !self.check(TokenType::RightSquare) {
            loop {
                elements.push(self.parse_expr()?);
                self.skip_newlines();
                if self.match_kind(TokenType::Comma).is_none() {
                    break;
                }
                self.skip_newlines();
            }
        }
        let close = self.expect(TokenType::RightSquare, "']'")?;
        Ok(Expr::new(
            ExprKind::ListLiteral(elements),
            open.span.merge(close.span),
        ))
    }

    /// Lookahead test for a map literal: `{:}` / `[:]`, or an opening
    /// delimiter followed by a valid map key and `:`.
    fn is_map_literal(&mut self, open: TokenType) -> bool {
        self.lookahead(|p| {
            p.expect(open, "'{'")?;
            p.skip_newlines();
            if p.peek_token()?.kind == TokenType::Colon {
                return Ok(true);
            }
            p.map_key()?;
            Ok(p.peek_token()?.kind == TokenType::Colon)
        })
    }

    fn map_literal(&mut self, open: TokenType) -> Result<Expr, CompileError> {
        let close_kind = if open == TokenType::LeftSquare {
            TokenType::RightSquare
        } else {
            TokenType::RightBrace
        };
        let open_tok = self.advance_token()?;
        self.skip_newlines();
        // Empty map: `{:}` / `[:]`.
        if self.match_kind(TokenType::Colon).is_some() {
            self.skip_newlines();
            let close = self.expect(close_kind, "closing map delimiter")?;
            return Ok(Expr::new(
                ExprKind::MapLiteral { entries: Vec::new(), is_named_args: false },
                open_tok.span.merge(close.span),
            ));
        }
        let entries = self.map_entries(close_kind)?;
        let span = open_tok.span;
        Ok(Expr::new(
            ExprKind::MapLiteral { entries, is_named_args: false },
            span,
        ))
    }

    /// Parse `key: value` pairs up to (and including) the closing token.
    fn map_entries(
        &mut self,
        close_kind: TokenType,
    ) -> Result<Vec<(Expr, Expr)>, CompileError> {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(close_kind) {
                break;
            }
            let key = self.map_key()?;
            self.expect(TokenType::Colon, "':'")?;
            self.skip_newlines();
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_newlines();
            if self.match_kind(TokenType::Comma).is_none() {
                break;
            }
        }
        self.skip_newlines();
        self.expect(close_kind, "closing map delimiter")?;
        Ok(entries)
    }

    fn map_key(&mut self) -> Result<Expr, CompileError> {
        let tok = self.peek_token()?;
        match tok.kind {
            TokenType::Identifier => {
                let t = self.advance_token()?;
                Ok(Expr::literal(Value::Str(t.chars.clone()), t.span))
            }
            TokenType::StringConst => {
                let t = self.advance_token()?;
                Ok(Expr::literal(t.value.clone().unwrap(), t.span))
            }
            TokenType::ExprStringStart => {
                self.advance_token()?;
                self.parse_expr_string()
            }
            TokenType::LeftParen => {
                self.advance_token()?;
                let e = self.parse_expr()?;
                self.expect(TokenType::RightParen, "')'")?;
                Ok(e)
            }
            _ => Err(CompileError::new(
                ErrorKind::UnexpectedToken {
                    found: tok.to_string(),
                    expected: "map key".to_string(),
                },
                tok.span,
            )),
        }
    }

    /// Parse the token stream of an expression string after its start
    /// marker; collapses back to a plain literal when nothing interpolates.
    fn parse_expr_string(&mut self) -> Result<Expr, CompileError> {
        let (parts, end) = self.string_parts(TokenType::ExprStringEnd)?;
        Ok(collapse_string_parts(parts, end.span))
    }

    fn string_parts(
        &mut self,
        end_kind: TokenType,
    ) -> Result<(Vec<Expr>, Token), CompileError> {
        let mut parts = Vec::new();
        loop {
            let tok = self.advance_token()?;
            match tok.kind {
                TokenType::StringConst => {
                    parts.push(Expr::literal(tok.value.clone().unwrap(), tok.span))
                }
                TokenType::Identifier => parts.push(ident_expr(tok)),
                TokenType::LeftBrace => {
                    self.skip_newlines();
                    let e = self.parse_expr()?;
                    self.skip_newlines();
                    self.expect(TokenType::RightBrace, "'}'")?;
                    parts.push(e);
                }
                k if k == end_kind => return Ok((parts, tok)),
                TokenType::Eof => {
                    return Err(CompileError::new(
                        ErrorKind::UnexpectedEof { expected: "end of string".to_string() },
                        tok.span,
                    ))
                }
                _ => {
                    return Err(CompileError::new(
                        ErrorKind::UnexpectedToken {
                            found: tok.to_string(),
                            expected: "string content".to_string(),
                        },
                        tok.span,
                    ))
                }
            }
        }
    }

    /// A standalone `/regex/` literal: an implicit match against `it`.
    fn regex_literal(&mut self) -> Result<Expr, CompileError> {
        let slash = self.advance_token()?;
        if slash.kind == TokenType::SlashEqual {
            // `/=...` at expression start cannot be a division assignment.
            return Err(CompileError::new(
                ErrorKind::UnexpectedToken {
                    found: slash.to_string(),
                    expected: "expression".to_string(),
                },
                slash.span,
            ));
        }
        self.tokeniser.start_regex()?;
        let (parts, end) = self.string_parts(TokenType::ExprStringEnd)?;
        let pattern = collapse_string_parts(parts, end.span);
        let modifiers = end.modifiers.clone().unwrap_or_default();
        let span = slash.span.merge(end.span);
        Ok(Expr::new(
            ExprKind::RegexMatch {
                lhs: Box::new(ident_expr(synth(
                    TokenType::Identifier,
                    names::IT_PARAM,
                    slash.span,
                ))),
                op: synth(TokenType::MatchRegex, "=~", slash.span),
                pattern: Box::new(pattern),
                modifiers,
                implicit_it_match: true,
                capture_var: None,
            },
            span,
        ))
    }

    /// `s/pattern/replacement/mods`, an implicit substitution on `it` until
    /// rewired by `=~`.
    fn regex_substitute(&mut self) -> Result<Expr, CompileError> {
        let start = self.advance_token()?;
        let (pattern_parts, _) = self.string_parts(TokenType::RegexReplace)?;
        let (replace_parts, end) = self.string_parts(TokenType::ExprStringEnd)?;
        let pattern = collapse_string_parts(pattern_parts, start.span);
        let replacement = collapse_string_parts(replace_parts, end.span);
        let modifiers = end.modifiers.clone().unwrap_or_default();
        let span = start.span.merge(end.span);
        Ok(Expr::new(
            ExprKind::RegexSubst {
                lhs: Box::new(ident_expr(synth(
                    TokenType::Identifier,
                    names::IT_PARAM,
                    start.span,
                ))),
                op: synth(TokenType::MatchRegex, "=~", start.span),
                pattern: Box::new(pattern),
                replacement: Box::new(replacement),
                modifiers,
                implicit_it_match: true,
                capture_var: None,
            },
            span,
        ))
    }

    fn invoke_new(&mut self) -> Result<Expr, CompileError> {
        let kw = self.advance_token()?;
        let class = self.parse_type_ref()?;
        let args = self.argument_list()?;
        let span = kw.span.merge(class.span);
        Ok(Expr::new(ExprKind::InvokeNew { class, args }, span))
    }

    fn parse_type_ref(&mut self) -> Result<TypeRef, CompileError> {
        let tok = self.peek_token()?;
        if tok.kind.is_type() {
            let t = self.advance_token()?;
            return Ok(TypeRef::builtin(type_of_token(t.kind), t.span));
        }
        if tok.kind == TokenType::Identifier {
            let first = self.advance_token()?;
            let mut span = first.span;
            let mut path = vec![first];
            while self.check(TokenType::Dot) {
                let keep_dot = self.lookahead(|p| {
                    p.advance_token()?;
                    Ok(p.peek_token()?.kind == TokenType::Identifier)
                });
                if !keep_dot {
                    break;
                }
                self.advance_token()?;
                let seg = self.expect(TokenType::Identifier, "class name")?;
                span = span.merge(seg.span);
                path.push(seg);
            }
            return Ok(TypeRef { kind: TypeRefKind::Path(path), span });
        }
        Err(CompileError::new(
            ErrorKind::UnexpectedToken {
                found: tok.to_string(),
                expected: "type".to_string(),
            },
            tok.span,
        ))
    }

    // ── Closures ───────────────────────────────────────────────────────

    fn parse_closure(&mut self) -> Result<Expr, CompileError> {
        let open = self.expect(TokenType::LeftBrace, "'{'")?;
        self.closure_count += 1;
        let mut fun = Function::new(
            format!("_$j$closure{}", self.closure_count),
            TypeRef::builtin(Type::ANY, open.span),
            open.span,
        );
        fun.is_closure = true;

        if self.closure_has_params() {
            self.skip_newlines();
            loop {
                self.skip_newlines();
                let declared = if self.peek_token()?.kind.is_type() {
                    let t = self.advance_token()?;
                    Some(TypeRef::builtin(type_of_token(t.kind), t.span))
                } else {
                    None
                };
                let name = self.expect(TokenType::Identifier, "parameter name")?;
                let mut var = VarDecl::new(name);
                var.declared_type =
                    declared.or_else(|| Some(TypeRef::builtin(Type::ANY, var.span)));
                var.is_param = true;
                var.is_explicit_param = true;
                if self.match_kind(TokenType::Equal).is_some() {
                    self.skip_newlines();
                    var.initialiser = Some(self.parse_expr()?);
                }
                fun.params.push(self.alloc_var(var));
                self.skip_newlines();
                if self.match_kind(TokenType::Comma).is_none() {
                    break;
                }
            }
            self.expect(TokenType::Arrow, "'->'")?;
        } else {
            // Parameterless closure: insert the implicit `it` parameter.
            fun.no_params_defined = true;
            let it_tok = synth(TokenType::Identifier, names::IT_PARAM, open.span);
            let mut it = VarDecl::new(it_tok);
            it.declared_type = Some(TypeRef::builtin(Type::ANY, open.span));
            it.is_param = true;
            it.initialiser = Some(Expr::literal(Value::Null, open.span));
            fun.params.push(self.alloc_var(it));
        }

        let body = self.block_body(open.span)?;
        fun.body = Some(body);
        let fid = self.alloc_fun(fun);
        Ok(Expr::new(ExprKind::Closure(fid), open.span))
    }

    /// Trial-parse a parameter list followed by `->`; the opening brace has
    /// been consumed.
    fn closure_has_params(&mut self) -> bool {
        self.lookahead(|p| {
            loop {
                p.skip_newlines();
                if p.peek_token()?.kind.is_type() {
                    p.advance_token()?;
                }
                if p.peek_token()?.kind != TokenType::Identifier {
                    return Ok(false);
                }
                p.advance_token()?;
                if p.match_kind(TokenType::Equal).is_some() {
                    p.parse_expr()?;
                }
                p.skip_newlines();
                match p.peek_token()?.kind {
                    TokenType::Comma => {
                        p.advance_token()?;
                    }
                    TokenType::Arrow => return Ok(true),
                    _ => return Ok(false),
                }
            }
        })
    }

    // ── L-value rewriting ──────────────────────────────────────────────

    /// Rewrite `lhs <assign-op> rhs` into the assignment node family.
    fn convert_to_lvalue(
        &mut self,
        lhs: Expr,
        op: Token,
        rhs: Expr,
    ) -> Result<Expr, CompileError> {
        let span = lhs.span.merge(rhs.span);
        match lhs.kind {
            ExprKind::Identifier { .. } => {
                if matches!(op.kind, TokenType::Equal | TokenType::QuestionEqual) {
                    Ok(Expr::new(
                        ExprKind::VarAssign {
                            var: Box::new(lhs),
                            op,
                            expr: Box::new(rhs),
                        },
                        span,
                    ))
                } else {
                    let expr = op_assign_binary(&op, rhs)?;
                    Ok(Expr::new(
                        ExprKind::VarOpAssign {
                            var: Box::new(lhs),
                            op,
                            expr: Box::new(expr),
                            is_pre_inc_or_dec: false,
                        },
                        span,
                    ))
                }
            }
            ExprKind::Binary {
                lhs: parent,
                op: access_op,
                rhs: field,
                ..
            } if access_op.kind.is_field_access() => {
                let mut parent = parent;
                mark_create_if_missing(&mut parent);
                if matches!(op.kind, TokenType::Equal | TokenType::QuestionEqual) {
                    Ok(Expr::new(
                        ExprKind::FieldAssign {
                            parent,
                            access_op,
                            field,
                            op,
                            expr: Box::new(rhs),
                        },
                        span,
                    ))
                } else {
                    let expr = op_assign_binary(&op, rhs)?;
                    Ok(Expr::new(
                        ExprKind::FieldOpAssign {
                            parent,
                            access_op,
                            field,
                            op,
                            expr: Box::new(expr),
                            is_pre_inc_or_dec: false,
                        },
                        span,
                    ))
                }
            }
            _ => Err(CompileError::new(ErrorKind::InvalidLValue, op.span)),
        }
    }

    /// `++x` / `x--` rewrite to `+= 1` / `-= 1`; postfix marks the node so
    /// the back end returns the pre-value.
    fn convert_inc_dec(
        &mut self,
        expr: Expr,
        op: Token,
        prefix: bool,
    ) -> Result<Expr, CompileError> {
        let one = Expr::literal(Value::Int(1), op.span);
        let assign_kind = if op.kind == TokenType::PlusPlus {
            TokenType::PlusEqual
        } else {
            TokenType::MinusEqual
        };
        let assign_op = synth(assign_kind, &op.chars, op.span);
        let mut result = self.convert_to_lvalue(expr, assign_op, one)?;
        if !prefix {
            match &mut result.kind {
                ExprKind::VarOpAssign { is_pre_inc_or_dec, .. }
                | ExprKind::FieldOpAssign { is_pre_inc_or_dec, .. } => {
                    *is_pre_inc_or_dec = true;
                }
                _ => {}
            }
        }
        Ok(result)
    }

    /// Used after parsing a closure in statement position to allow an
    /// immediate invocation plus further suffixes.
    fn finish_expression(&mut self, expr: Expr) -> Result<Expr, CompileError> {
        if let Some(op) = self.match_any(&[TokenType::PlusPlus, TokenType::MinusMinus]) {
            return self.convert_inc_dec(expr, op, false);
        }
        Ok(expr)
    }
}

// ── Free helpers ───────────────────────────────────────────────────────

pub(crate) fn synth(kind: TokenType, chars: &str, span: Span) -> Token {
    Token::new(kind, chars, span)
}

pub(crate) fn ident_expr(tok: Token) -> Expr {
    let span = tok.span;
    Expr::new(ExprKind::Identifier { name: tok, var: None }, span)
}

fn binary(lhs: Expr, op: Token, rhs: Expr) -> Expr {
    let span = lhs.span.merge(rhs.span);
    Expr::new(
        ExprKind::Binary {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
            original_operator: None,
            create_if_missing: false,
        },
        span,
    )
}

/// The synthesised `Noop <arith-op> rhs` binary inside an op-assign node.
fn op_assign_binary(op: &Token, rhs: Expr) -> Result<Expr, CompileError> {
    let arith = op.kind.arithmetic_of().ok_or_else(|| {
        CompileError::new(ErrorKind::InvalidLValue, op.span)
    })?;
    let span = rhs.span;
    Ok(Expr::new(
        ExprKind::Binary {
            lhs: Box::new(Expr::new(ExprKind::Noop, op.span)),
            op: synth(arith, &op.chars, op.span),
            rhs: Box::new(rhs),
            original_operator: Some(op.clone()),
            create_if_missing: false,
        },
        span,
    ))
}

fn mark_create_if_missing(expr: &mut Expr) {
    if let ExprKind::Binary {
        op,
        lhs,
        create_if_missing,
        ..
    } = &mut expr.kind
    {
        if op.kind.is_field_access() {
            *create_if_missing = true;
            mark_create_if_missing(lhs);
        }
    }
}

/// An already-parsed implicit-`it` regex on the right of `=~`/`!~` is
/// rewired onto the actual left operand; any other right operand becomes
/// the match pattern.
fn rewire_regex(lhs: Expr, op: Token, rhs: Expr) -> Expr {
    let span = lhs.span.merge(rhs.span);
    match rhs.kind {
        ExprKind::RegexMatch {
            pattern,
            modifiers,
            implicit_it_match: true,
            capture_var,
            ..
        } => Expr::new(
            ExprKind::RegexMatch {
                lhs: Box::new(lhs),
                op,
                pattern,
                modifiers,
                implicit_it_match: false,
                capture_var,
            },
            span,
        ),
        ExprKind::RegexSubst {
            pattern,
            replacement,
            modifiers,
            implicit_it_match: true,
            capture_var,
            ..
        } => Expr::new(
            ExprKind::RegexSubst {
                lhs: Box::new(lhs),
                op,
                pattern,
                replacement,
                modifiers,
                implicit_it_match: false,
                capture_var,
            },
            span,
        ),
        _ => Expr::new(
            ExprKind::RegexMatch {
                lhs: Box::new(lhs),
                op,
                pattern: Box::new(rhs),
                modifiers: String::new(),
                implicit_it_match: false,
                capture_var: None,
            },
            span,
        ),
    }
}

/// Collapse the parts of an expression string: all-literal parts fold into
/// one string literal; anything interpolated stays an `ExprString`.
fn collapse_string_parts(parts: Vec<Expr>, span: Span) -> Expr {
    if parts.is_empty() {
        return Expr::literal(Value::Str(String::new()), span);
    }
    if parts
        .iter()
        .all(|p| matches!(p.kind, ExprKind::Literal(Value::Str(_))))
    {
        let mut s = String::new();
        for p in &parts {
            if let ExprKind::Literal(Value::Str(frag)) = &p.kind {
                s.push_str(frag);
            }
        }
        return Expr::literal(Value::Str(s), span);
    }
    Expr::new(ExprKind::ExprString { parts }, span)
}

fn type_of_token(kind: TokenType) -> Type {
    match kind {
        TokenType::BooleanType => Type::BOOLEAN,
        TokenType::IntType => Type::INT,
        TokenType::LongType => Type::LONG,
        TokenType::DoubleType => Type::DOUBLE,
        TokenType::DecimalType => Type::DECIMAL,
        TokenType::StringType => Type::STRING,
        TokenType::MapType => Type::MAP,
        TokenType::ListType => Type::LIST,
        TokenType::Def | TokenType::ObjectType => Type::ANY,
        _ => Type::ANY,
    }
}

fn collect_var_ids(stmt: &Stmt, out: &mut Vec<VarId>) {
    match &stmt.kind {
        StmtKind::VarDecl(id) => out.push(*id),
        StmtKind::Stmts(stmts) => {
            for s in stmts {
                collect_var_ids(s, out);
            }
        }
        _ => {}
    }
}
