//! Recursive-descent parser producing the [`crate::ast`] tree.
//!
//! The grammar is the curated ECMAScript slice described in the crate
//! docs. Semicolons are inserted at line breaks, closing braces, and end
//! of input, so agent-generated code without explicit terminators parses.
//! Constructs outside the slice fail here with a `ParseError`; the engine
//! folds those into validation failures.

use crate::ast::*;
use crate::lexer::{LexError, Lexer};
use crate::span::Span;
use crate::token::{Keyword, Punct, TemplatePart, Token, TokenKind};

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} at byte {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            offset: e.offset,
        }
    }
}

/// Parse a complete program. The body is treated as an async entry point:
/// top-level `return` and `await` are legal.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.parse_stmt()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self, ahead: usize) -> &Token {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        matches!(self.cur().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.cur().span.start,
        }
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.cur().is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct) -> Result<Span, ParseError> {
        if self.cur().is_punct(p) {
            Ok(self.advance().span)
        } else {
            Err(self.err(format!("expected {:?}, found {:?}", p, self.cur().kind)))
        }
    }

    fn eat_keyword(&mut self, k: Keyword) -> bool {
        if self.cur().is_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match &self.cur().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let span = self.advance().span;
                Ok((name, span))
            }
            other => Err(self.err(format!("expected identifier, found {:?}", other))),
        }
    }

    /// Semicolon insertion: an explicit `;`, a closing brace, end of input,
    /// or a preceding line break all terminate a statement.
    fn expect_semi(&mut self) -> Result<(), ParseError> {
        if self.eat_punct(Punct::Semi) {
            return Ok(());
        }
        if self.cur().is_punct(Punct::RBrace) || self.at_eof() || self.cur().newline_before {
            return Ok(());
        }
        Err(self.err(format!("expected ';', found {:?}", self.cur().kind)))
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.cur().clone();
        match &tok.kind {
            TokenKind::Punct(Punct::Semi) => {
                let span = self.advance().span;
                Ok(Stmt::Empty { span })
            }
            TokenKind::Punct(Punct::LBrace) => self.parse_block_stmt(),
            TokenKind::Keyword(Keyword::Let)
            | TokenKind::Keyword(Keyword::Const)
            | TokenKind::Keyword(Keyword::Var) => {
                let stmt = self.parse_var_decl()?;
                self.expect_semi()?;
                Ok(stmt)
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function_decl(false),
            TokenKind::Keyword(Keyword::Async)
                if self.peek(1).is_keyword(Keyword::Function) && !self.peek(1).newline_before =>
            {
                self.advance();
                self.parse_function_decl(true)
            }
            TokenKind::Keyword(Keyword::Return) => {
                let start = self.advance().span;
                let arg = if self.cur().is_punct(Punct::Semi)
                    || self.cur().is_punct(Punct::RBrace)
                    || self.at_eof()
                    || self.cur().newline_before
                {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                let span = arg.as_ref().map(|e| start.to(e.span())).unwrap_or(start);
                self.expect_semi()?;
                Ok(Stmt::Return { arg, span })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Break) => {
                let span = self.advance().span;
                self.expect_semi()?;
                Ok(Stmt::Break { span })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                let span = self.advance().span;
                self.expect_semi()?;
                Ok(Stmt::Continue { span })
            }
            TokenKind::Keyword(Keyword::Throw) => {
                let start = self.advance().span;
                if self.cur().newline_before {
                    return Err(self.err("line break after 'throw'"));
                }
                let arg = self.parse_expr()?;
                let span = start.to(arg.span());
                self.expect_semi()?;
                Ok(Stmt::Throw { arg, span })
            }
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Ident(name) if name == "class" || name == "switch" || name == "with" => {
                Err(self.err(format!("'{}' is not supported in sandboxed code", name)))
            }
            _ => {
                let expr = self.parse_expr()?;
                let span = expr.span();
                self.expect_semi()?;
                Ok(Stmt::Expr { expr, span })
            }
        }
    }

    fn parse_block_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.cur().is_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.err("unterminated block"));
            }
            body.push(self.parse_stmt()?);
        }
        let end = self.expect_punct(Punct::RBrace)?;
        Ok(Stmt::Block {
            body,
            span: start.to(end),
        })
    }

    fn parse_block_body(&mut self) -> Result<(Vec<Stmt>, Span), ParseError> {
        match self.parse_block_stmt()? {
            Stmt::Block { body, span } => Ok((body, span)),
            _ => unreachable!(),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, ParseError> {
        let (kind, start) = match self.advance() {
            t if t.is_keyword(Keyword::Let) => (DeclKind::Let, t.span),
            t if t.is_keyword(Keyword::Const) => (DeclKind::Const, t.span),
            t => (DeclKind::Var, t.span),
        };
        let mut decls = Vec::new();
        loop {
            let pattern = self.parse_pattern()?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.parse_assign_expr()?)
            } else {
                None
            };
            let span = init
                .as_ref()
                .map(|e| pattern.span().to(e.span()))
                .unwrap_or(pattern.span());
            decls.push(Declarator {
                pattern,
                init,
                span,
            });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        let span = decls
            .last()
            .map(|d| start.to(d.span))
            .unwrap_or(start);
        Ok(Stmt::VarDecl { kind, decls, span })
    }

    fn parse_function_decl(&mut self, is_async: bool) -> Result<Stmt, ParseError> {
        let start = self.advance().span; // 'function'
        let is_generator = self.eat_punct(Punct::Star);
        let (name, _) = self.expect_ident()?;
        let params = self.parse_params()?;
        let (body, body_span) = self.parse_block_body()?;
        let span = start.to(body_span);
        Ok(Stmt::FunctionDecl {
            func: Box::new(Function {
                name: Some(name),
                params,
                body,
                expression_body: false,
                is_arrow: false,
                is_async,
                is_generator,
                span,
            }),
            span,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance().span; // 'if'
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        let consequent = Box::new(self.parse_stmt()?);
        let mut span = start.to(consequent.span());
        let alternate = if self.eat_keyword(Keyword::Else) {
            let alt = Box::new(self.parse_stmt()?);
            span = span.to(alt.span());
            Some(alt)
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance().span;
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        let span = start.to(body.span());
        Ok(Stmt::While { test, body, span })
    }

    fn parse_do_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance().span; // 'do'
        let body = Box::new(self.parse_stmt()?);
        if !self.eat_keyword(Keyword::While) {
            return Err(self.err("expected 'while' after do-body"));
        }
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expr()?;
        let end = self.expect_punct(Punct::RParen)?;
        self.expect_semi()?;
        Ok(Stmt::DoWhile {
            body,
            test,
            span: start.to(end),
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance().span; // 'for'
        self.expect_punct(Punct::LParen)?;

        // Empty init: `for (;;)`
        if self.eat_punct(Punct::Semi) {
            return self.parse_for_tail(start, None);
        }

        let decl_kind = match &self.cur().kind {
            TokenKind::Keyword(Keyword::Let) => Some(DeclKind::Let),
            TokenKind::Keyword(Keyword::Const) => Some(DeclKind::Const),
            TokenKind::Keyword(Keyword::Var) => Some(DeclKind::Var),
            _ => None,
        };

        if let Some(kind) = decl_kind {
            self.advance();
            let pattern = self.parse_pattern()?;
            if self.eat_keyword(Keyword::Of) {
                let iterable = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                let span = start.to(body.span());
                return Ok(Stmt::ForOf {
                    decl_kind: Some(kind),
                    pattern,
                    iterable,
                    body,
                    span,
                });
            }
            if self.eat_keyword(Keyword::In) {
                let object = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                let span = start.to(body.span());
                return Ok(Stmt::ForIn {
                    decl_kind: Some(kind),
                    pattern,
                    object,
                    body,
                    span,
                });
            }
            // Classic for with declaration init.
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.parse_assign_expr()?)
            } else {
                None
            };
            let first_span = init
                .as_ref()
                .map(|e| pattern.span().to(e.span()))
                .unwrap_or(pattern.span());
            let mut decls = vec![Declarator {
                pattern,
                init,
                span: first_span,
            }];
            while self.eat_punct(Punct::Comma) {
                let pattern = self.parse_pattern()?;
                let init = if self.eat_punct(Punct::Assign) {
                    Some(self.parse_assign_expr()?)
                } else {
                    None
                };
                let span = init
                    .as_ref()
                    .map(|e| pattern.span().to(e.span()))
                    .unwrap_or(pattern.span());
                decls.push(Declarator {
                    pattern,
                    init,
                    span,
                });
            }
            self.expect_punct(Punct::Semi)?;
            return self.parse_for_tail(start, Some(ForInit::VarDecl { kind, decls }));
        }

        // Expression init, or `expr of/in` (assignment-target form).
        let init_expr = self.parse_expr()?;
        if self.eat_keyword(Keyword::Of) {
            let pattern = self.expr_to_pattern(init_expr)?;
            let iterable = self.parse_expr()?;
            self.expect_punct(Punct::RParen)?;
            let body = Box::new(self.parse_stmt()?);
            let span = start.to(body.span());
            return Ok(Stmt::ForOf {
                decl_kind: None,
                pattern,
                iterable,
                body,
                span,
            });
        }
        if self.eat_keyword(Keyword::In) {
            let pattern = self.expr_to_pattern(init_expr)?;
            let object = self.parse_expr()?;
            self.expect_punct(Punct::RParen)?;
            let body = Box::new(self.parse_stmt()?);
            let span = start.to(body.span());
            return Ok(Stmt::ForIn {
                decl_kind: None,
                pattern,
                object,
                body,
                span,
            });
        }
        self.expect_punct(Punct::Semi)?;
        self.parse_for_tail(start, Some(ForInit::Expr(init_expr)))
    }

    fn parse_for_tail(&mut self, start: Span, init: Option<ForInit>) -> Result<Stmt, ParseError> {
        let test = if self.cur().is_punct(Punct::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(Punct::Semi)?;
        let update = if self.cur().is_punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        let span = start.to(body.span());
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
            span,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance().span; // 'try'
        let (block, mut end) = self.parse_block_body()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword(Keyword::Catch) {
            if self.eat_punct(Punct::LParen) {
                param = Some(self.parse_pattern()?);
                self.expect_punct(Punct::RParen)?;
            }
            let (body, span) = self.parse_block_body()?;
            handler = Some(body);
            end = span;
        }
        let finalizer = if self.eat_keyword(Keyword::Finally) {
            let (body, span) = self.parse_block_body()?;
            end = span;
            Some(body)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.err("try requires catch or finally"));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
            span: start.to(end),
        })
    }

    // ─── Patterns ────────────────────────────────────────────────────────

    fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        match &self.cur().kind {
            TokenKind::Ident(_) => {
                let (name, span) = self.expect_ident()?;
                Ok(Pattern::Ident { name, span })
            }
            TokenKind::Punct(Punct::LBracket) => {
                let start = self.advance().span;
                let mut elements = Vec::new();
                loop {
                    if self.cur().is_punct(Punct::RBracket) {
                        break;
                    }
                    if self.eat_punct(Punct::Comma) {
                        elements.push(None); // hole
                        continue;
                    }
                    if self.cur().is_punct(Punct::Ellipsis) {
                        return Err(self.err("rest elements are not supported"));
                    }
                    let pattern = self.parse_pattern()?;
                    let default = if self.eat_punct(Punct::Assign) {
                        Some(self.parse_assign_expr()?)
                    } else {
                        None
                    };
                    elements.push(Some(PatternElem { pattern, default }));
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                let end = self.expect_punct(Punct::RBracket)?;
                Ok(Pattern::Array {
                    elements,
                    span: start.to(end),
                })
            }
            TokenKind::Punct(Punct::LBrace) => {
                let start = self.advance().span;
                let mut props = Vec::new();
                while !self.cur().is_punct(Punct::RBrace) {
                    if self.cur().is_punct(Punct::Ellipsis) {
                        return Err(self.err("rest elements are not supported"));
                    }
                    let key_start = self.cur().span;
                    let key = self.parse_prop_key()?;
                    let binding = if self.eat_punct(Punct::Colon) {
                        self.parse_pattern()?
                    } else {
                        match &key {
                            PropKey::Ident(name) => Pattern::Ident {
                                name: name.clone(),
                                span: key_start,
                            },
                            _ => return Err(self.err("shorthand pattern requires identifier key")),
                        }
                    };
                    let default = if self.eat_punct(Punct::Assign) {
                        Some(self.parse_assign_expr()?)
                    } else {
                        None
                    };
                    let span = key_start.to(binding.span());
                    props.push(ObjectPatternProp {
                        key,
                        binding,
                        default,
                        span,
                    });
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                let end = self.expect_punct(Punct::RBrace)?;
                Ok(Pattern::Object {
                    props,
                    span: start.to(end),
                })
            }
            other => Err(self.err(format!("expected binding pattern, found {:?}", other))),
        }
    }

    fn parse_prop_key(&mut self) -> Result<PropKey, ParseError> {
        match &self.cur().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(PropKey::Ident(name))
            }
            TokenKind::Keyword(k) => {
                let name = keyword_text(*k).to_string();
                self.advance();
                Ok(PropKey::Ident(name))
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(PropKey::Str(s))
            }
            TokenKind::Number(n) => {
                let n = *n;
                self.advance();
                Ok(PropKey::Num(n))
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let expr = self.parse_assign_expr()?;
                self.expect_punct(Punct::RBracket)?;
                Ok(PropKey::Computed(Box::new(expr)))
            }
            other => Err(self.err(format!("invalid property key {:?}", other))),
        }
    }

    /// Reinterpret an already-parsed expression as an assignment pattern
    /// (destructuring assignment / for-of targets).
    fn expr_to_pattern(&self, expr: Expr) -> Result<Pattern, ParseError> {
        match expr {
            Expr::Ident { name, span } => Ok(Pattern::Ident { name, span }),
            Expr::Array { elements, span } => {
                let mut out = Vec::new();
                for elem in elements {
                    match elem {
                        ArrayElem::Hole => out.push(None),
                        ArrayElem::Expr(e) => out.push(Some(PatternElem {
                            pattern: self.expr_to_pattern(e)?,
                            default: None,
                        })),
                        ArrayElem::Spread(_) => {
                            return Err(self.err("rest elements are not supported"))
                        }
                    }
                }
                Ok(Pattern::Array {
                    elements: out,
                    span,
                })
            }
            Expr::Object { props, span } => {
                let mut out = Vec::new();
                for prop in props {
                    match prop {
                        ObjectProp::KeyValue { key, value, span } => out.push(ObjectPatternProp {
                            key,
                            binding: self.expr_to_pattern(value)?,
                            default: None,
                            span,
                        }),
                        ObjectProp::Shorthand { name, span } => out.push(ObjectPatternProp {
                            key: PropKey::Ident(name.clone()),
                            binding: Pattern::Ident { name, span },
                            default: None,
                            span,
                        }),
                        ObjectProp::Spread { .. } => {
                            return Err(self.err("rest elements are not supported"))
                        }
                    }
                }
                Ok(Pattern::Object { props: out, span })
            }
            other => Err(ParseError {
                message: "invalid assignment target".to_string(),
                offset: other.span().start,
            }),
        }
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assign_expr()
    }

    fn parse_assign_expr(&mut self) -> Result<Expr, ParseError> {
        if let Some(expr) = self.try_parse_arrow()? {
            return Ok(expr);
        }
        let left = self.parse_conditional()?;

        let op = match &self.cur().kind {
            TokenKind::Punct(Punct::Assign) => Some(AssignOp::Assign),
            TokenKind::Punct(Punct::PlusAssign) => Some(AssignOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => Some(AssignOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => Some(AssignOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => Some(AssignOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => Some(AssignOp::Rem),
            TokenKind::Punct(Punct::StarStarAssign) => Some(AssignOp::Exp),
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        self.advance();

        let target = match left {
            Expr::Ident { name, span } => AssignTarget::Ident { name, span },
            Expr::Member {
                object,
                property,
                optional,
                span,
            } => {
                if optional {
                    return Err(self.err("optional chain is not a valid assignment target"));
                }
                AssignTarget::Member {
                    object,
                    property,
                    span,
                }
            }
            other @ (Expr::Array { .. } | Expr::Object { .. }) => {
                if op != AssignOp::Assign {
                    return Err(self.err("compound assignment to a pattern"));
                }
                AssignTarget::Pattern(self.expr_to_pattern(other)?)
            }
            other => {
                return Err(ParseError {
                    message: "invalid assignment target".to_string(),
                    offset: other.span().start,
                })
            }
        };
        let value = self.parse_assign_expr()?;
        let span = target_span(&target).to(value.span());
        Ok(Expr::Assign {
            op,
            target,
            value: Box::new(value),
            span,
        })
    }

    /// Arrow functions need lookahead: `(params) => …`, `x => …`,
    /// `async (params) => …`, `async x => …`.
    fn try_parse_arrow(&mut self) -> Result<Option<Expr>, ParseError> {
        let (is_async, offset) = if self.cur().is_keyword(Keyword::Async)
            && !self.peek(1).newline_before
            && (matches!(self.peek(1).kind, TokenKind::Ident(_))
                || self.peek(1).is_punct(Punct::LParen))
        {
            (true, 1)
        } else {
            (false, 0)
        };

        let starts_arrow = match &self.peek(offset).kind {
            TokenKind::Ident(_) => self.peek(offset + 1).is_punct(Punct::Arrow),
            TokenKind::Punct(Punct::LParen) => self.arrow_ahead(offset),
            _ => false,
        };
        if !starts_arrow {
            return Ok(None);
        }

        let start = self.cur().span;
        if is_async {
            self.advance();
        }

        let params = if matches!(self.cur().kind, TokenKind::Ident(_)) {
            let (name, span) = self.expect_ident()?;
            vec![PatternElem {
                pattern: Pattern::Ident { name, span },
                default: None,
            }]
        } else {
            self.parse_params()?
        };
        self.expect_punct(Punct::Arrow)?;

        let (body, expression_body, end) = if self.cur().is_punct(Punct::LBrace) {
            let (body, span) = self.parse_block_body()?;
            (body, false, span)
        } else {
            let expr = self.parse_assign_expr()?;
            let span = expr.span();
            (
                vec![Stmt::Return {
                    arg: Some(expr),
                    span,
                }],
                true,
                span,
            )
        };
        let span = start.to(end);
        Ok(Some(Expr::Function {
            func: Box::new(Function {
                name: None,
                params,
                body,
                expression_body,
                is_arrow: true,
                is_async,
                is_generator: false,
                span,
            }),
            span,
        }))
    }

    /// From a `(` at `self.pos + offset`, scan to the matching `)` and
    /// report whether `=>` follows.
    fn arrow_ahead(&self, offset: usize) -> bool {
        let mut depth = 0usize;
        let mut i = offset;
        loop {
            let tok = self.peek(i);
            match &tok.kind {
                TokenKind::Punct(Punct::LParen)
                | TokenKind::Punct(Punct::LBracket)
                | TokenKind::Punct(Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RParen)
                | TokenKind::Punct(Punct::RBracket)
                | TokenKind::Punct(Punct::RBrace) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 && tok.is_punct(Punct::RParen) {
                        return self.peek(i + 1).is_punct(Punct::Arrow);
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
    }

    fn parse_params(&mut self) -> Result<Vec<PatternElem>, ParseError> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        while !self.cur().is_punct(Punct::RParen) {
            if self.cur().is_punct(Punct::Ellipsis) {
                return Err(self.err("rest parameters are not supported"));
            }
            let pattern = self.parse_pattern()?;
            let default = if self.eat_punct(Punct::Assign) {
                Some(self.parse_assign_expr()?)
            } else {
                None
            };
            params.push(PatternElem { pattern, default });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(params)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_binary(0)?;
        if !self.eat_punct(Punct::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assign_expr()?;
        self.expect_punct(Punct::Colon)?;
        let alternate = self.parse_assign_expr()?;
        let span = test.span().to(alternate.span());
        Ok(Expr::Cond {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            span,
        })
    }

    /// Precedence-climbing over binary and logical operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let Some((prec, right_assoc, op)) = self.peek_binary_op() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let right = self.parse_binary(next_min)?;
            let span = left.span().to(right.span());
            left = match op {
                BinOrLogical::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                },
                BinOrLogical::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                },
            };
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(u8, bool, BinOrLogical)> {
        use BinOrLogical::*;
        let op = match &self.cur().kind {
            TokenKind::Punct(p) => match p {
                Punct::QuestionQuestion => (1, false, Logical(LogicalOp::Nullish)),
                Punct::OrOr => (2, false, Logical(LogicalOp::Or)),
                Punct::AndAnd => (3, false, Logical(LogicalOp::And)),
                Punct::BitOr => (4, false, Binary(BinaryOp::BitOr)),
                Punct::BitXor => (5, false, Binary(BinaryOp::BitXor)),
                Punct::BitAnd => (6, false, Binary(BinaryOp::BitAnd)),
                Punct::EqEq => (7, false, Binary(BinaryOp::EqLoose)),
                Punct::NotEq => (7, false, Binary(BinaryOp::NeLoose)),
                Punct::EqEqEq => (7, false, Binary(BinaryOp::EqStrict)),
                Punct::NotEqEq => (7, false, Binary(BinaryOp::NeStrict)),
                Punct::Lt => (8, false, Binary(BinaryOp::Lt)),
                Punct::Gt => (8, false, Binary(BinaryOp::Gt)),
                Punct::LtEq => (8, false, Binary(BinaryOp::LtEq)),
                Punct::GtEq => (8, false, Binary(BinaryOp::GtEq)),
                Punct::Shl => (9, false, Binary(BinaryOp::Shl)),
                Punct::Shr => (9, false, Binary(BinaryOp::Shr)),
                Punct::UShr => (9, false, Binary(BinaryOp::UShr)),
                Punct::Plus => (10, false, Binary(BinaryOp::Add)),
                Punct::Minus => (10, false, Binary(BinaryOp::Sub)),
                Punct::Star => (11, false, Binary(BinaryOp::Mul)),
                Punct::Slash => (11, false, Binary(BinaryOp::Div)),
                Punct::Percent => (11, false, Binary(BinaryOp::Rem)),
                Punct::StarStar => (12, true, Binary(BinaryOp::Exp)),
                _ => return None,
            },
            TokenKind::Keyword(Keyword::In) => (8, false, Binary(BinaryOp::In)),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.cur().clone();
        let op = match &tok.kind {
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Minus),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Punct(Punct::Not) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::BitNot) => Some(UnaryOp::BitNot),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.advance().span;
            let arg = self.parse_unary()?;
            let span = start.to(arg.span());
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
                span,
            });
        }
        if tok.is_keyword(Keyword::Await) {
            let start = self.advance().span;
            let arg = self.parse_unary()?;
            let span = start.to(arg.span());
            return Ok(Expr::Await {
                arg: Box::new(arg),
                span,
            });
        }
        if tok.is_keyword(Keyword::Yield) {
            let start = self.advance().span;
            let arg = if self.cur().is_punct(Punct::Semi)
                || self.cur().is_punct(Punct::RParen)
                || self.cur().is_punct(Punct::RBrace)
                || self.cur().newline_before
                || self.at_eof()
            {
                None
            } else {
                Some(Box::new(self.parse_assign_expr()?))
            };
            let span = arg.as_ref().map(|e| start.to(e.span())).unwrap_or(start);
            return Ok(Expr::Yield { arg, span });
        }
        if tok.is_punct(Punct::PlusPlus) || tok.is_punct(Punct::MinusMinus) {
            let op = if tok.is_punct(Punct::PlusPlus) {
                UpdateOp::Incr
            } else {
                UpdateOp::Decr
            };
            let start = self.advance().span;
            let arg = self.parse_unary()?;
            let target = self.expr_to_update_target(arg)?;
            let span = start.to(target_span(&target));
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
                span,
            });
        }
        self.parse_postfix()
    }

    fn expr_to_update_target(&self, expr: Expr) -> Result<AssignTarget, ParseError> {
        match expr {
            Expr::Ident { name, span } => Ok(AssignTarget::Ident { name, span }),
            Expr::Member {
                object,
                property,
                optional: false,
                span,
            } => Ok(AssignTarget::Member {
                object,
                property,
                span,
            }),
            other => Err(ParseError {
                message: "invalid update target".to_string(),
                offset: other.span().start,
            }),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_call_chain()?;
        if (self.cur().is_punct(Punct::PlusPlus) || self.cur().is_punct(Punct::MinusMinus))
            && !self.cur().newline_before
        {
            let op = if self.cur().is_punct(Punct::PlusPlus) {
                UpdateOp::Incr
            } else {
                UpdateOp::Decr
            };
            let end = self.advance().span;
            let target = self.expr_to_update_target(expr)?;
            let span = target_span(&target).to(end);
            return Ok(Expr::Update {
                op,
                prefix: false,
                target: Box::new(target),
                span,
            });
        }
        Ok(expr)
    }

    fn parse_call_chain(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.cur().is_keyword(Keyword::New) {
            let start = self.advance().span;
            // `new` binds the member chain of its callee, not calls.
            let callee = self.parse_member_chain_no_call()?;
            let args = if self.cur().is_punct(Punct::LParen) {
                self.parse_args()?
            } else {
                Vec::new()
            };
            let span = start.to(self.tokens[self.pos.saturating_sub(1)].span);
            Expr::New {
                callee: Box::new(callee),
                args,
                span,
            }
        } else {
            self.parse_primary()?
        };

        loop {
            if self.cur().is_punct(Punct::Dot) {
                self.advance();
                let name = self.parse_member_name()?;
                let span = expr.span().to(self.tokens[self.pos.saturating_sub(1)].span);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Ident(name),
                    optional: false,
                    span,
                };
            } else if self.cur().is_punct(Punct::QuestionDot) {
                self.advance();
                if self.cur().is_punct(Punct::LParen) {
                    let args = self.parse_args()?;
                    let span = expr.span().to(self.tokens[self.pos.saturating_sub(1)].span);
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                        span,
                    };
                } else if self.cur().is_punct(Punct::LBracket) {
                    self.advance();
                    let prop = self.parse_expr()?;
                    let end = self.expect_punct(Punct::RBracket)?;
                    let span = expr.span().to(end);
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(prop)),
                        optional: true,
                        span,
                    };
                } else {
                    let name = self.parse_member_name()?;
                    let span = expr.span().to(self.tokens[self.pos.saturating_sub(1)].span);
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Ident(name),
                        optional: true,
                        span,
                    };
                }
            } else if self.cur().is_punct(Punct::LBracket) {
                self.advance();
                let prop = self.parse_expr()?;
                let end = self.expect_punct(Punct::RBracket)?;
                let span = expr.span().to(end);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Computed(Box::new(prop)),
                    optional: false,
                    span,
                };
            } else if self.cur().is_punct(Punct::LParen) {
                let args = self.parse_args()?;
                let span = expr.span().to(self.tokens[self.pos.saturating_sub(1)].span);
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                    span,
                };
            } else if let TokenKind::Template(_) = &self.cur().kind {
                let (quasis, exprs, tpl_span) = self.parse_template_token()?;
                let span = expr.span().to(tpl_span);
                expr = Expr::TaggedTemplate {
                    tag: Box::new(expr),
                    quasis,
                    exprs,
                    span,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_member_chain_no_call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.cur().is_punct(Punct::Dot) {
                self.advance();
                let name = self.parse_member_name()?;
                let span = expr.span().to(self.tokens[self.pos.saturating_sub(1)].span);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Ident(name),
                    optional: false,
                    span,
                };
            } else if self.cur().is_punct(Punct::LBracket) {
                self.advance();
                let prop = self.parse_expr()?;
                let end = self.expect_punct(Punct::RBracket)?;
                let span = expr.span().to(end);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Computed(Box::new(prop)),
                    optional: false,
                    span,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Property names after `.` may be identifiers or reserved words.
    fn parse_member_name(&mut self) -> Result<String, ParseError> {
        match &self.cur().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(k) => {
                let name = keyword_text(*k).to_string();
                self.advance();
                Ok(name)
            }
            other => Err(self.err(format!("expected property name, found {:?}", other))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        while !self.cur().is_punct(Punct::RParen) {
            if self.eat_punct(Punct::Ellipsis) {
                args.push(Arg::Spread(self.parse_assign_expr()?));
            } else {
                args.push(Arg::Expr(self.parse_assign_expr()?));
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(args)
    }

    fn parse_template_token(&mut self) -> Result<(Vec<String>, Vec<Expr>, Span), ParseError> {
        let tok = self.advance();
        let TokenKind::Template(parts) = tok.kind else {
            return Err(self.err("expected template literal"));
        };
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        for part in parts {
            match part {
                TemplatePart::Chunk(chunk) => quasis.push(chunk),
                TemplatePart::Subst { src, offset } => {
                    let tokens = Lexer::with_base(&src, offset).tokenize()?;
                    let mut sub = Parser::new(tokens);
                    let expr = sub.parse_expr()?;
                    if !sub.at_eof() {
                        return Err(ParseError {
                            message: "unexpected token in template substitution".to_string(),
                            offset: sub.cur().span.start,
                        });
                    }
                    exprs.push(expr);
                }
            }
        }
        Ok((quasis, exprs, tok.span))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.cur().clone();
        match &tok.kind {
            TokenKind::Number(n) => {
                let span = self.advance().span;
                Ok(Expr::Number { value: *n, span })
            }
            TokenKind::BigInt(v) => {
                let span = self.advance().span;
                Ok(Expr::BigInt { value: *v, span })
            }
            TokenKind::Str(s) => {
                let value = s.clone();
                let span = self.advance().span;
                Ok(Expr::Str { value, span })
            }
            TokenKind::Regex { pattern, flags } => {
                let pattern = pattern.clone();
                let flags = flags.clone();
                let span = self.advance().span;
                Ok(Expr::Regex {
                    pattern,
                    flags,
                    span,
                })
            }
            TokenKind::Template(_) => {
                let (quasis, exprs, span) = self.parse_template_token()?;
                Ok(Expr::Template {
                    quasis,
                    exprs,
                    span,
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                let span = self.advance().span;
                Ok(Expr::Bool { value: true, span })
            }
            TokenKind::Keyword(Keyword::False) => {
                let span = self.advance().span;
                Ok(Expr::Bool { value: false, span })
            }
            TokenKind::Keyword(Keyword::Null) => {
                let span = self.advance().span;
                Ok(Expr::Null { span })
            }
            TokenKind::Keyword(Keyword::Undefined) => {
                let span = self.advance().span;
                Ok(Expr::Undefined { span })
            }
            TokenKind::Keyword(Keyword::Function) => {
                let start = self.advance().span;
                let is_generator = self.eat_punct(Punct::Star);
                let name = if matches!(self.cur().kind, TokenKind::Ident(_)) {
                    Some(self.expect_ident()?.0)
                } else {
                    None
                };
                let params = self.parse_params()?;
                let (body, body_span) = self.parse_block_body()?;
                let span = start.to(body_span);
                Ok(Expr::Function {
                    func: Box::new(Function {
                        name,
                        params,
                        body,
                        expression_body: false,
                        is_arrow: false,
                        is_async: false,
                        is_generator,
                        span,
                    }),
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Async) if self.peek(1).is_keyword(Keyword::Function) => {
                let start = self.advance().span; // async
                self.advance(); // function
                let is_generator = self.eat_punct(Punct::Star);
                let name = if matches!(self.cur().kind, TokenKind::Ident(_)) {
                    Some(self.expect_ident()?.0)
                } else {
                    None
                };
                let params = self.parse_params()?;
                let (body, body_span) = self.parse_block_body()?;
                let span = start.to(body_span);
                Ok(Expr::Function {
                    func: Box::new(Function {
                        name,
                        params,
                        body,
                        expression_body: false,
                        is_arrow: false,
                        is_async: true,
                        is_generator,
                        span,
                    }),
                    span,
                })
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                let span = self.advance().span;
                Ok(Expr::Ident { name, span })
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => {
                let start = self.advance().span;
                let mut elements = Vec::new();
                loop {
                    if self.cur().is_punct(Punct::RBracket) {
                        break;
                    }
                    if self.eat_punct(Punct::Comma) {
                        elements.push(ArrayElem::Hole);
                        continue;
                    }
                    if self.eat_punct(Punct::Ellipsis) {
                        elements.push(ArrayElem::Spread(self.parse_assign_expr()?));
                    } else {
                        elements.push(ArrayElem::Expr(self.parse_assign_expr()?));
                    }
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                let end = self.expect_punct(Punct::RBracket)?;
                Ok(Expr::Array {
                    elements,
                    span: start.to(end),
                })
            }
            TokenKind::Punct(Punct::LBrace) => {
                let start = self.advance().span;
                let mut props = Vec::new();
                while !self.cur().is_punct(Punct::RBrace) {
                    let prop_start = self.cur().span;
                    if self.eat_punct(Punct::Ellipsis) {
                        let arg = self.parse_assign_expr()?;
                        let span = prop_start.to(arg.span());
                        props.push(ObjectProp::Spread { arg, span });
                    } else {
                        let key = self.parse_prop_key()?;
                        if self.eat_punct(Punct::Colon) {
                            let value = self.parse_assign_expr()?;
                            let span = prop_start.to(value.span());
                            props.push(ObjectProp::KeyValue { key, value, span });
                        } else if self.cur().is_punct(Punct::LParen) {
                            return Err(self.err("method shorthand is not supported"));
                        } else {
                            match key {
                                PropKey::Ident(name) => props.push(ObjectProp::Shorthand {
                                    name,
                                    span: prop_start,
                                }),
                                _ => return Err(self.err("expected ':' after property key")),
                            }
                        }
                    }
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                let end = self.expect_punct(Punct::RBrace)?;
                Ok(Expr::Object {
                    props,
                    span: start.to(end),
                })
            }
            other => Err(self.err(format!("unexpected token {:?}", other))),
        }
    }
}

enum BinOrLogical {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn target_span(target: &AssignTarget) -> Span {
    match target {
        AssignTarget::Ident { span, .. } => *span,
        AssignTarget::Member { span, .. } => *span,
        AssignTarget::Pattern(p) => p.span(),
    }
}

fn keyword_text(k: Keyword) -> &'static str {
    match k {
        Keyword::Let => "let",
        Keyword::Const => "const",
        Keyword::Var => "var",
        Keyword::Function => "function",
        Keyword::Return => "return",
        Keyword::If => "if",
        Keyword::Else => "else",
        Keyword::For => "for",
        Keyword::While => "while",
        Keyword::Do => "do",
        Keyword::Break => "break",
        Keyword::Continue => "continue",
        Keyword::New => "new",
        Keyword::Typeof => "typeof",
        Keyword::In => "in",
        Keyword::Of => "of",
        Keyword::Try => "try",
        Keyword::Catch => "catch",
        Keyword::Finally => "finally",
        Keyword::Throw => "throw",
        Keyword::Async => "async",
        Keyword::Await => "await",
        Keyword::Yield => "yield",
        Keyword::True => "true",
        Keyword::False => "false",
        Keyword::Null => "null",
        Keyword::Undefined => "undefined",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src).unwrap()
    }

    #[test]
    fn test_top_level_return() {
        let prog = parse("return 1 + 2;");
        assert_eq!(prog.body.len(), 1);
        match &prog.body[0] {
            Stmt::Return { arg: Some(_), .. } => {}
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_for_loop() {
        let prog = parse("let s=0; for (let i=0;i<1000;i++) s+=i; return s;");
        assert_eq!(prog.body.len(), 3);
        assert!(matches!(prog.body[1], Stmt::For { .. }));
    }

    #[test]
    fn test_for_of_with_pattern() {
        let prog = parse("for (const [a, b] of pairs) { use(a, b); }");
        match &prog.body[0] {
            Stmt::ForOf { pattern, .. } => assert!(matches!(pattern, Pattern::Array { .. })),
            other => panic!("expected for-of, got {:?}", other),
        }
    }

    #[test]
    fn test_arrow_functions() {
        let prog = parse("const f = (a, b) => a + b; const g = x => x * 2;");
        assert_eq!(prog.body.len(), 2);
        let prog = parse("const h = async () => { return await callTool('t', {}); };");
        match &prog.body[0] {
            Stmt::VarDecl { decls, .. } => match &decls[0].init {
                Some(Expr::Function { func, .. }) => {
                    assert!(func.is_arrow);
                    assert!(func.is_async);
                }
                other => panic!("expected arrow, got {:?}", other),
            },
            other => panic!("expected decl, got {:?}", other),
        }
    }

    #[test]
    fn test_destructuring_declaration() {
        let prog = parse("const {a, b: [c]} = obj;");
        match &prog.body[0] {
            Stmt::VarDecl { decls, .. } => {
                assert!(matches!(decls[0].pattern, Pattern::Object { .. }))
            }
            other => panic!("expected decl, got {:?}", other),
        }
    }

    #[test]
    fn test_computed_destructuring_key_parses() {
        let prog = parse("const {[k]: v} = obj;");
        match &prog.body[0] {
            Stmt::VarDecl { decls, .. } => match &decls[0].pattern {
                Pattern::Object { props, .. } => {
                    assert!(matches!(props[0].key, PropKey::Computed(_)))
                }
                other => panic!("expected object pattern, got {:?}", other),
            },
            other => panic!("expected decl, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_chaining() {
        let prog = parse("return a?.b?.[c];");
        match &prog.body[0] {
            Stmt::Return { arg: Some(expr), .. } => {
                assert!(matches!(expr, Expr::Member { optional: true, .. }))
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_template_literal() {
        let prog = parse("return `sum: ${1 + 2}`;");
        match &prog.body[0] {
            Stmt::Return {
                arg: Some(Expr::Template { quasis, exprs, .. }),
                ..
            } => {
                assert_eq!(quasis.len(), 2);
                assert_eq!(exprs.len(), 1);
            }
            other => panic!("expected template return, got {:?}", other),
        }
    }

    #[test]
    fn test_tagged_template_parses() {
        let prog = parse("tag`code`;");
        match &prog.body[0] {
            Stmt::Expr {
                expr: Expr::TaggedTemplate { .. },
                ..
            } => {}
            other => panic!("expected tagged template, got {:?}", other),
        }
    }

    #[test]
    fn test_try_catch() {
        let prog = parse("try { risky(); } catch (e) { return e; } finally { done(); }");
        match &prog.body[0] {
            Stmt::Try {
                param: Some(_),
                handler: Some(_),
                finalizer: Some(_),
                ..
            } => {}
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn test_new_expression() {
        let prog = parse("return new Array(10);");
        match &prog.body[0] {
            Stmt::Return {
                arg: Some(Expr::New { args, .. }),
                ..
            } => assert_eq!(args.len(), 1),
            other => panic!("expected new, got {:?}", other),
        }
    }

    #[test]
    fn test_exponent_right_assoc() {
        let prog = parse("return 2 ** 3 ** 2;");
        match &prog.body[0] {
            Stmt::Return {
                arg: Some(Expr::Binary { op: BinaryOp::Exp, right, .. }),
                ..
            } => assert!(matches!(**right, Expr::Binary { op: BinaryOp::Exp, .. })),
            other => panic!("expected exp chain, got {:?}", other),
        }
    }

    #[test]
    fn test_semicolon_insertion_at_newline() {
        let prog = parse("let a = 1\nlet b = 2\nreturn a + b");
        assert_eq!(prog.body.len(), 3);
    }

    #[test]
    fn test_generator_parses_for_validator() {
        let prog = parse("function* gen() { yield 1; }");
        match &prog.body[0] {
            Stmt::FunctionDecl { func, .. } => assert!(func.is_generator),
            other => panic!("expected function decl, got {:?}", other),
        }
    }

    #[test]
    fn test_rest_params_rejected() {
        assert!(parse_program("const f = (...xs) => xs;").is_err());
    }

    #[test]
    fn test_keyword_member_names() {
        let prog = parse("return obj.catch;");
        match &prog.body[0] {
            Stmt::Return {
                arg: Some(Expr::Member { property, .. }),
                ..
            } => assert_eq!(property, &MemberProp::Ident("catch".to_string())),
            other => panic!("expected member, got {:?}", other),
        }
    }

    #[test]
    fn test_destructuring_assignment_statement() {
        let prog = parse("([a, b] = [b, a]);");
        match &prog.body[0] {
            Stmt::Expr {
                expr: Expr::Assign { target: AssignTarget::Pattern(_), .. },
                ..
            } => {}
            other => panic!("expected pattern assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_spread_in_array_and_call() {
        let prog = parse("f(...xs); return [1, ...ys];");
        assert_eq!(prog.body.len(), 2);
    }
}
