//! The tokeniser: a lazily-built, rewindable token stream with full support
//! for nested interpolated strings and regex literals.
//!
//! Tokens are cached in a monotonically growing list; `rewind` just moves
//! the cursor, so replay never re-lexes. The raw character state only
//! advances when a fresh token is parsed. The parser steers the lexer in
//! exactly one place: `start_regex`, called when a previously returned `/`
//! turns out to introduce a regex literal.

use crate::compiler::error::{CompileError, ErrorKind};
use crate::compiler::tokens::{Span, Token, TokenType};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use quill_core::Value;
use std::str::FromStr;

/// Letters accepted as regex modifiers after the closing `/`.
const REGEX_MODIFIERS: &str = "fgims";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrMode {
    /// An interpolated string or a regex match pattern.
    Plain,
    /// The pattern side of an `s/.../.../` substitution.
    SubstPattern,
    /// The replacement side of an `s/.../.../` substitution.
    SubstReplace,
}

#[derive(Debug, Clone)]
struct StringState {
    terminator: &'static str,
    allow_newlines: bool,
    escapes: bool,
    is_regex: bool,
    mode: StrMode,
    /// Brace-nesting level at which the surrounding interpolation resumes.
    brace_level: usize,
    /// Where the string started, for unterminated-string diagnostics.
    start: Span,
}

/// Raw lexer state captured before each token, so that `start_regex` can
/// discard cached lookahead and re-seed.
#[derive(Debug, Clone)]
struct LexMark {
    pos: usize,
    byte_offset: usize,
    line: usize,
    col: usize,
    in_string: bool,
    nested_braces: usize,
    states: Vec<StringState>,
}

pub struct Tokeniser {
    source: Vec<char>,
    pos: usize,
    byte_offset: usize,
    line: usize,
    col: usize,
    tokens: Vec<Token>,
    marks: Vec<LexMark>,
    cursor: usize,
    string_states: Vec<StringState>,
    in_string: bool,
    nested_braces: usize,
}

impl Tokeniser {
    pub fn new(source: &str) -> Self {
        // Trailing line terminators are stripped so that EOF diagnostics
        // point inside the last meaningful line.
        let trimmed = source.trim_end_matches(['\n', '\r']);
        Self {
            source: trimmed.chars().collect(),
            pos: 0,
            byte_offset: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            marks: Vec::new(),
            cursor: 0,
            string_states: Vec::new(),
            in_string: false,
            nested_braces: 0,
        }
    }

    // ── Stream interface ───────────────────────────────────────────────

    /// Return the current token without consuming it.
    pub fn peek(&mut self) -> Result<Token, CompileError> {
        self.ensure_current()?;
        Ok(self.tokens[self.cursor].clone())
    }

    /// Return the current token and advance.
    pub fn next(&mut self) -> Result<Token, CompileError> {
        self.ensure_current()?;
        let tok = self.tokens[self.cursor].clone();
        if tok.kind != TokenType::Eof {
            self.cursor += 1;
        }
        Ok(tok)
    }

    /// The most recently returned token.
    pub fn previous(&self) -> Option<Token> {
        if self.cursor == 0 {
            None
        } else {
            Some(self.tokens[self.cursor - 1].clone())
        }
    }

    /// Snapshot of the stream position for `rewind`.
    pub fn mark(&self) -> usize {
        self.cursor
    }

    /// Rewind to a previously saved position. O(1): tokens already lexed
    /// are replayed from the cache.
    pub fn rewind(&mut self, mark: usize) {
        debug_assert!(mark <= self.tokens.len());
        self.cursor = mark;
    }

    /// Rewind and discard everything lexed at or past `mark`, restoring the
    /// raw lexer state. Used by the parser's lookahead: a trial parse may
    /// have steered the lexer (`start_regex`), so the cached tail cannot be
    /// trusted for replay on another parse path.
    pub fn reset_to(&mut self, mark: usize) {
        self.cursor = mark;
        if self.tokens.len() > mark {
            let m = self.marks[mark].clone();
            self.restore_mark(m);
            self.tokens.truncate(mark);
            self.marks.truncate(mark);
        }
    }

    /// Enter regex mode. Only legal immediately after a `/` token has been
    /// returned; any cached lookahead past the slash is discarded and the
    /// raw lexer re-seeded from just after it.
    pub fn start_regex(&mut self) -> Result<(), CompileError> {
        let prev = match self.previous() {
            Some(t) if t.kind == TokenType::Slash => t,
            other => {
                let span = other.map(|t| t.span).unwrap_or_else(Span::dummy);
                return Err(CompileError::new(ErrorKind::BadRegexStart, span));
            }
        };
        if self.tokens.len() > self.cursor {
            let mark = self.marks[self.cursor].clone();
            self.restore_mark(mark);
            self.tokens.truncate(self.cursor);
            self.marks.truncate(self.cursor);
        }
        self.string_states.push(StringState {
            terminator: "/",
            allow_newlines: false,
            escapes: false,
            is_regex: true,
            mode: StrMode::Plain,
            brace_level: 0,
            start: prev.span,
        });
        self.in_string = true;
        Ok(())
    }

    /// Brace-nesting depth, exposed for tests of interpolation balance.
    pub fn nested_braces(&self) -> usize {
        self.nested_braces
    }

    fn ensure_current(&mut self) -> Result<(), CompileError> {
        while self.tokens.len() <= self.cursor {
            let mark = self.capture_mark();
            let tok = self.next_token()?;
            self.marks.push(mark);
            self.tokens.push(tok);
        }
        Ok(())
    }

    fn capture_mark(&self) -> LexMark {
        LexMark {
            pos: self.pos,
            byte_offset: self.byte_offset,
            line: self.line,
            col: self.col,
            in_string: self.in_string,
            nested_braces: self.nested_braces,
            states: self.string_states.clone(),
        }
    }

    fn restore_mark(&mut self, mark: LexMark) {
        self.pos = mark.pos;
        self.byte_offset = mark.byte_offset;
        self.line = mark.line;
        self.col = mark.col;
        self.in_string = mark.in_string;
        self.nested_braces = mark.nested_braces;
        self.string_states = mark.states;
    }

    // ── Character primitives ───────────────────────────────────────────

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek_char2(&self) -> Option<char> {
        self.source.get(self.pos + 2).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.byte_offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn matches_str(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.source.get(self.pos + i) == Some(&c))
    }

    fn span_here(&self) -> Span {
        Span::new(self.byte_offset, self.byte_offset, self.line, self.col)
    }

    fn span_from(&self, start: (usize, usize, usize)) -> Span {
        Span::new(start.0, self.byte_offset, start.1, start.2)
    }

    fn start_pos(&self) -> (usize, usize, usize) {
        (self.byte_offset, self.line, self.col)
    }

    fn lexeme_since(&self, pos: usize) -> String {
        self.source[pos..self.pos].iter().collect()
    }

    fn err(&self, kind: ErrorKind) -> CompileError {
        CompileError::new(kind, self.span_here())
    }

    /// Kind of the most recently lexed token, regardless of the cursor.
    fn last_lexed(&self) -> Option<TokenType> {
        self.tokens.last().map(|t| t.kind)
    }

    // ── Token parsing ──────────────────────────────────────────────────

    fn next_token(&mut self) -> Result<Token, CompileError> {
        if self.in_string {
            self.string_token()
        } else {
            self.code_token()
        }
    }

    fn code_token(&mut self) -> Result<Token, CompileError> {
        if let Some(eol) = self.skip_whitespace_and_comments()? {
            return Ok(eol);
        }
        let start = self.start_pos();
        let start_char = self.pos;
        let c = match self.current() {
            None => return Ok(Token::new(TokenType::Eof, "", self.span_here())),
            Some(c) => c,
        };
        if c.is_ascii_digit() {
            return self.number();
        }
        if c == '$' {
            return self.capture_identifier();
        }
        if c == '_' || c.is_alphabetic() {
            return self.identifier_or_keyword();
        }
        if c == '\'' {
            return self.plain_string();
        }
        if c == '"' {
            let triple = self.peek_char() == Some('"') && self.peek_char2() == Some('"');
            let n = if triple { 3 } else { 1 };
            for _ in 0..n {
                self.advance();
            }
            let span = self.span_from(start);
            self.string_states.push(StringState {
                terminator: if triple { "\"\"\"" } else { "\"" },
                allow_newlines: triple,
                escapes: true,
                is_regex: false,
                mode: StrMode::Plain,
                brace_level: 0,
                start: span,
            });
            self.in_string = true;
            return Ok(Token::new(TokenType::ExprStringStart, self.lexeme_since(start_char), span));
        }
        if c == '{' {
            self.advance();
            self.nested_braces += 1;
            return Ok(Token::new(TokenType::LeftBrace, "{", self.span_from(start)));
        }
        if c == '}' {
            if self.nested_braces == 0 {
                let e = self.err(ErrorKind::UnbalancedBrace);
                self.advance();
                return Err(e);
            }
            self.advance();
            self.nested_braces -= 1;
            if let Some(top) = self.string_states.last() {
                if top.brace_level == self.nested_braces {
                    self.in_string = true;
                }
            }
            return Ok(Token::new(TokenType::RightBrace, "}", self.span_from(start)));
        }
        for &(lexeme, kind) in symbol_candidates(c) {
            if self.matches_str(lexeme) {
                // A symbol ending in an identifier character (e.g. `!in`)
                // only matches when the next character cannot continue an
                // identifier.
                let last = lexeme.chars().last().unwrap();
                if last.is_alphanumeric() || last == '_' {
                    if let Some(next) = self.source.get(self.pos + lexeme.chars().count()) {
                        if next.is_alphanumeric() || *next == '_' {
                            continue;
                        }
                    }
                }
                for _ in 0..lexeme.chars().count() {
                    self.advance();
                }
                return Ok(Token::new(kind, lexeme, self.span_from(start)));
            }
        }
        let e = self.err(ErrorKind::UnexpectedCharacter(c));
        self.advance();
        Err(e)
    }

    /// Skip whitespace and comments; if any newline was crossed, return a
    /// single coalesced EOL token.
    fn skip_whitespace_and_comments(&mut self) -> Result<Option<Token>, CompileError> {
        let mut eol_span: Option<Span> = None;
        loop {
            match self.current() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('\n') => {
                    if eol_span.is_none() {
                        eol_span = Some(self.span_here());
                    }
                    self.advance();
                }
                Some('/') if self.peek_char() == Some('/') => {
                    while let Some(c) = self.current() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_char() == Some('*') => {
                    let start = self.span_here();
                    self.advance();
                    self.advance();
                    loop {
                        match self.current() {
                            None => {
                                return Err(CompileError::new(ErrorKind::UnterminatedComment, start))
                            }
                            Some('*') if self.peek_char() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(eol_span.map(|span| Token::new(TokenType::Eol, "\n", span)))
    }

    fn identifier_or_keyword(&mut self) -> Result<Token, CompileError> {
        let start = self.start_pos();
        let ident = self.read_ident_chars();
        // `s` immediately followed by `/` introduces a substitution, except
        // directly after a field-access operator.
        if ident == "s"
            && self.current() == Some('/')
            && !matches!(self.last_lexed(), Some(TokenType::Dot) | Some(TokenType::QuestionDot))
        {
            self.advance();
            let span = self.span_from(start);
            self.string_states.push(StringState {
                terminator: "/",
                allow_newlines: false,
                escapes: false,
                is_regex: true,
                mode: StrMode::SubstPattern,
                brace_level: 0,
                start: span,
            });
            self.in_string = true;
            return Ok(Token::new(TokenType::RegexSubstStart, "s/", span));
        }
        let span = self.span_from(start);
        Ok(match keyword(&ident) {
            Some(TokenType::True) => {
                Token::new(TokenType::True, ident, span).with_value(Value::Bool(true))
            }
            Some(TokenType::False) => {
                Token::new(TokenType::False, ident, span).with_value(Value::Bool(false))
            }
            Some(TokenType::Null) => Token::new(TokenType::Null, ident, span).with_value(Value::Null),
            Some(kind) => Token::new(kind, ident, span),
            None => Token::new(TokenType::Identifier, ident, span),
        })
    }

    fn read_ident_chars(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    /// `$<1-5 digits>`: a regex capture variable, lexed atomically.
    fn capture_identifier(&mut self) -> Result<Token, CompileError> {
        let start = self.start_pos();
        self.advance(); // '$'
        let mut digits = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(CompileError::new(
                ErrorKind::UnexpectedCharacter('$'),
                self.span_from(start),
            ));
        }
        if digits.len() > 5 {
            return Err(CompileError::new(
                ErrorKind::BadCaptureVariable,
                self.span_from(start),
            ));
        }
        Ok(Token::new(
            TokenType::Identifier,
            format!("${}", digits),
            self.span_from(start),
        ))
    }

    fn number(&mut self) -> Result<Token, CompileError> {
        let start = self.start_pos();
        let start_char = self.pos;
        let prev_is_dot = self.last_lexed() == Some(TokenType::Dot);

        if self.current() == Some('0')
            && matches!(self.peek_char(), Some('x') | Some('X') | Some('b') | Some('B'))
        {
            let radix = if matches!(self.peek_char(), Some('x') | Some('X')) {
                16
            } else {
                2
            };
            self.advance();
            self.advance();
            let mut digits = String::new();
            while let Some(c) = self.current() {
                if c.is_digit(radix) {
                    digits.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(self.err(ErrorKind::UnexpectedCharacter(self.current().unwrap_or(' '))));
            }
            let is_long = matches!(self.current(), Some('L'));
            if is_long {
                self.advance();
            }
            let span = self.span_from(start);
            let magnitude = BigInt::parse_bytes(digits.as_bytes(), radix).unwrap();
            let value = if is_long {
                match magnitude.to_u64() {
                    Some(v) => Value::Long(v as i64),
                    None => return Err(CompileError::new(ErrorKind::NumberTooLarge("long".to_string()), span)),
                }
            } else {
                match magnitude.to_u32() {
                    Some(v) => Value::Int(v as i32),
                    None => return Err(CompileError::new(ErrorKind::NumberTooLarge("int".to_string()), span)),
                }
            };
            let kind = if is_long {
                TokenType::LongConst
            } else {
                TokenType::IntegerConst
            };
            return Ok(Token::new(kind, self.lexeme_since(start_char), span).with_value(value));
        }

        let mut digits = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        // A trailing `.digit` continues the literal only when the previous
        // token is not `.` (numeric map keys in dotted paths).
        let mut fraction = String::new();
        if !prev_is_dot
            && self.current() == Some('.')
            && self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            self.advance();
            while let Some(c) = self.current() {
                if c.is_ascii_digit() {
                    fraction.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let suffix = match self.current() {
            Some('L') => {
                self.advance();
                Some('L')
            }
            Some('D') => {
                self.advance();
                Some('D')
            }
            _ => None,
        };
        let span = self.span_from(start);
        let lexeme = self.lexeme_since(start_char);

        if fraction.is_empty() {
            match suffix {
                Some('L') => {
                    let magnitude = BigInt::from_str(&digits).unwrap();
                    let v = magnitude
                        .to_i64()
                        .ok_or_else(|| CompileError::new(ErrorKind::NumberTooLarge("long".to_string()), span))?;
                    Ok(Token::new(TokenType::LongConst, lexeme, span).with_value(Value::Long(v)))
                }
                Some('D') => {
                    let v = f64::from_str(&digits).unwrap();
                    Ok(Token::new(TokenType::DoubleConst, lexeme, span).with_value(Value::Double(v)))
                }
                _ => {
                    let magnitude = BigInt::from_str(&digits).unwrap();
                    let v = magnitude
                        .to_i32()
                        .ok_or_else(|| CompileError::new(ErrorKind::NumberTooLarge("int".to_string()), span))?;
                    Ok(Token::new(TokenType::IntegerConst, lexeme, span).with_value(Value::Int(v)))
                }
            }
        } else {
            let text = format!("{}.{}", digits, fraction);
            match suffix {
                Some('L') => Err(CompileError::new(ErrorKind::InvalidLiteralSuffix('L'), span)),
                Some('D') => {
                    let v = f64::from_str(&text).unwrap();
                    Ok(Token::new(TokenType::DoubleConst, lexeme, span).with_value(Value::Double(v)))
                }
                _ => {
                    let v = bigdecimal::BigDecimal::from_str(&text).unwrap();
                    Ok(Token::new(TokenType::DecimalConst, lexeme, span)
                        .with_value(Value::Decimal(v)))
                }
            }
        }
    }

    /// Single-quoted strings: no interpolation, emitted as one token.
    fn plain_string(&mut self) -> Result<Token, CompileError> {
        let start = self.start_pos();
        let start_char = self.pos;
        let start_span = self.span_here();
        let triple = self.peek_char() == Some('\'') && self.peek_char2() == Some('\'');
        let n = if triple { 3 } else { 1 };
        for _ in 0..n {
            self.advance();
        }
        let terminator = if triple { "'''" } else { "'" };
        let mut buf = String::new();
        loop {
            if self.matches_str(terminator) {
                for _ in 0..n {
                    self.advance();
                }
                break;
            }
            match self.current() {
                None => return Err(CompileError::new(ErrorKind::UnterminatedString, start_span)),
                Some('\n') if !triple => {
                    return Err(self.err(ErrorKind::NewlineInString));
                }
                Some('\\') => {
                    self.advance();
                    self.process_escape(&mut buf, start_span)?;
                }
                Some(c) => {
                    buf.push(c);
                    self.advance();
                }
            }
        }
        Ok(
            Token::new(TokenType::StringConst, self.lexeme_since(start_char), self.span_from(start))
                .with_value(Value::Str(buf)),
        )
    }

    fn process_escape(&mut self, buf: &mut String, start_span: Span) -> Result<(), CompileError> {
        match self.current() {
            None => return Err(CompileError::new(ErrorKind::UnterminatedString, start_span)),
            Some('n') => buf.push('\n'),
            Some('t') => buf.push('\t'),
            Some('r') => buf.push('\r'),
            Some('b') => buf.push('\u{8}'),
            Some('f') => buf.push('\u{c}'),
            Some('\\') => buf.push('\\'),
            Some('\'') => buf.push('\''),
            Some('"') => buf.push('"'),
            Some('$') => buf.push('$'),
            Some('/') => buf.push('/'),
            Some(other) => {
                buf.push('\\');
                buf.push(other);
            }
        }
        self.advance();
        Ok(())
    }

    /// Next token while inside a string state: literal fragments,
    /// interpolation markers, or the string end.
    fn string_token(&mut self) -> Result<Token, CompileError> {
        let (terminator, allow_newlines, escapes, is_regex, mode, start_span) = {
            let s = self.string_states.last().expect("in_string without state");
            (s.terminator, s.allow_newlines, s.escapes, s.is_regex, s.mode, s.start)
        };
        let start = self.start_pos();
        let start_char = self.pos;
        let mut buf = String::new();

        macro_rules! flush {
            () => {
                if !buf.is_empty() {
                    return Ok(Token::new(
                        TokenType::StringConst,
                        self.lexeme_since(start_char),
                        self.span_from(start),
                    )
                    .with_value(Value::Str(buf)));
                }
            };
        }

        loop {
            if self.matches_str(terminator) {
                flush!();
                for _ in 0..terminator.chars().count() {
                    self.advance();
                }
                if mode == StrMode::SubstPattern {
                    self.string_states.last_mut().unwrap().mode = StrMode::SubstReplace;
                    return Ok(Token::new(TokenType::RegexReplace, "/", self.span_from(start)));
                }
                // Leave string mode before reading modifiers so that a bad
                // modifier leaves the lexer in a recoverable state.
                self.string_states.pop();
                self.in_string = false;
                let modifiers = if is_regex {
                    Some(self.read_regex_modifiers()?)
                } else {
                    None
                };
                let mut tok = Token::new(
                    TokenType::ExprStringEnd,
                    self.lexeme_since(start_char),
                    self.span_from(start),
                );
                if let Some(mods) = modifiers {
                    tok = tok.with_modifiers(mods);
                }
                return Ok(tok);
            }
            match self.current() {
                None => return Err(CompileError::new(ErrorKind::UnterminatedString, start_span)),
                Some('$') => match self.peek_char() {
                    Some('{') => {
                        flush!();
                        self.advance();
                        self.advance();
                        let level = self.nested_braces;
                        self.string_states.last_mut().unwrap().brace_level = level;
                        self.nested_braces += 1;
                        self.in_string = false;
                        return Ok(Token::new(TokenType::LeftBrace, "${", self.span_from(start)));
                    }
                    Some(d) if d.is_ascii_digit() => {
                        flush!();
                        return self.capture_identifier();
                    }
                    Some(ch) if ch.is_alphabetic() || ch == '_' => {
                        flush!();
                        let ident_start = self.start_pos();
                        self.advance(); // '$'
                        let ident = self.read_ident_chars();
                        if keyword(&ident).is_some() {
                            return Err(CompileError::new(
                                ErrorKind::KeywordInInterpolation(ident),
                                self.span_from(ident_start),
                            ));
                        }
                        return Ok(Token::new(
                            TokenType::Identifier,
                            ident,
                            self.span_from(ident_start),
                        ));
                    }
                    _ => {
                        buf.push('$');
                        self.advance();
                    }
                },
                Some('\\') => {
                    self.advance();
                    if escapes {
                        self.process_escape(&mut buf, start_span)?;
                    } else if is_regex {
                        // Inside a regex only `/` and `$` can be escaped;
                        // other escapes pass through to the regex engine.
                        match self.current() {
                            None => {
                                return Err(CompileError::new(
                                    ErrorKind::UnterminatedString,
                                    start_span,
                                ))
                            }
                            Some('/') => {
                                buf.push('/');
                                self.advance();
                            }
                            Some('$') => {
                                buf.push('\\');
                                buf.push('$');
                                self.advance();
                            }
                            Some(other) => {
                                buf.push('\\');
                                buf.push(other);
                                self.advance();
                            }
                        }
                    } else {
                        buf.push('\\');
                    }
                }
                Some('\n') if !allow_newlines => {
                    // Abandon the string state so recovery can continue in
                    // code mode from the newline.
                    self.string_states.pop();
                    self.in_string = false;
                    return Err(self.err(ErrorKind::NewlineInString));
                }
                Some(c) => {
                    buf.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_regex_modifiers(&mut self) -> Result<String, CompileError> {
        let mut mods = String::new();
        while let Some(c) = self.current() {
            if !c.is_alphabetic() {
                break;
            }
            if !REGEX_MODIFIERS.contains(c) {
                return Err(self.err(ErrorKind::BadRegexModifier(c)));
            }
            mods.push(c);
            self.advance();
        }
        Ok(mods)
    }
}

/// Multi-character symbols per first character, longest first.
fn symbol_candidates(c: char) -> &'static [(&'static str, TokenType)] {
    use TokenType::*;
    match c {
        '(' => &[("(", LeftParen)],
        ')' => &[(")", RightParen)],
        '[' => &[("[", LeftSquare)],
        ']' => &[("]", RightSquare)],
        '!' => &[
            ("!instanceof", BangInstanceof),
            ("!in", BangIn),
            ("!=", BangEqual),
            ("!~", BangMatchRegex),
            ("!", Bang),
        ],
        '=' => &[("=~", MatchRegex), ("==", EqualEqual), ("=", Equal)],
        '<' => &[
            ("<=>", Compare),
            ("<<=", DoubleLessEqual),
            ("<<", DoubleLess),
            ("<=", LessThanEqual),
            ("<", LessThan),
        ],
        '>' => &[
            (">>>=", TripleGreaterEqual),
            (">>>", TripleGreater),
            (">>=", DoubleGreaterEqual),
            (">>", DoubleGreater),
            (">=", GreaterThanEqual),
            (">", GreaterThan),
        ],
        '?' => &[
            ("?=", QuestionEqual),
            ("?:", QuestionColon),
            ("?.", QuestionDot),
            ("?[", QuestionSquare),
            ("?", Question),
        ],
        '&' => &[("&&", AmpersandAmpersand), ("&=", AmpersandEqual), ("&", Ampersand)],
        '|' => &[("||", PipePipe), ("|=", PipeEqual), ("|", Pipe)],
        '+' => &[("++", PlusPlus), ("+=", PlusEqual), ("+", Plus)],
        '-' => &[("--", MinusMinus), ("-=", MinusEqual), ("->", Arrow), ("-", Minus)],
        '*' => &[("*=", StarEqual), ("*", Star)],
        '/' => &[("/=", SlashEqual), ("/", Slash)],
        '%' => &[("%=", PercentEqual), ("%", Percent)],
        '^' => &[("^=", CaretEqual), ("^", Caret)],
        '~' => &[("~", Tilde)],
        '.' => &[(".", Dot)],
        ',' => &[(",", Comma)],
        ';' => &[(";", Semicolon)],
        ':' => &[(":", Colon)],
        _ => &[],
    }
}

fn keyword(ident: &str) -> Option<TokenType> {
    use TokenType::*;
    Some(match ident {
        "def" => Def,
        "var" => Var,
        "boolean" => BooleanType,
        "int" => IntType,
        "long" => LongType,
        "double" => DoubleType,
        "Decimal" => DecimalType,
        "String" => StringType,
        "Map" => MapType,
        "List" => ListType,
        "Object" => ObjectType,
        "if" => If,
        "else" => Else,
        "unless" => Unless,
        "while" => While,
        "for" => For,
        "break" => Break,
        "continue" => Continue,
        "return" => Return,
        "class" => Class,
        "extends" => Extends,
        "import" => Import,
        "as" => As,
        "instanceof" => Instanceof,
        "in" => In,
        "new" => New,
        "and" => And,
        "or" => Or,
        "not" => Not,
        "print" => Print,
        "println" => Println,
        "die" => Die,
        "const" => Const,
        "static" => Static,
        "true" => True,
        "false" => False,
        "null" => Null,
        _ => return None,
    })
}
