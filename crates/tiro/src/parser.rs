//! Recursive-descent parser with Pratt expression parsing.
//!
//! Statements and declarations are parsed by dedicated methods; expressions
//! use a precedence-climbing loop over the operator table in
//! [`infix_precedence`]. The parser never aborts: unexpected input produces a
//! diagnostic plus a poisoned node (error bit set), and parsing continues at
//! the next synchronization point. Interpolated strings re-enter the parser
//! on the recorded hole spans, so nested expressions get ordinary nodes with
//! correct source positions.

use crate::{
    ast::{
        AstId, Binding, BindingNode, BinaryOp, Decl, DeclNode, Expr, ExprNode, File, FuncDecl, ImportDecl, Literal,
        Node, ParamDecl, Stmt, StmtNode, StringPart, UnaryOp, VarDecl,
    },
    diagnostics::Diagnostics,
    intern::{InternedString, StringTable},
    lexer::{StringSegment, Token, TokenKind, tokenize},
    span::Span,
};

/// Parses a whole source file.
pub fn parse_file(
    source: &str,
    strings: &mut StringTable,
    diagnostics: &mut Diagnostics,
) -> File {
    let tokens = tokenize(source, diagnostics);
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        next_id: 0,
        strings,
        diagnostics,
    };
    parser.file()
}

const ASSIGN_PRECEDENCE: i8 = 0;
const UNARY_PRECEDENCE: i8 = 13;
const POSTFIX_PRECEDENCE: i8 = 14;

/// Infix binding power; `None` for tokens that never start an infix position.
fn infix_precedence(kind: TokenKind) -> Option<i8> {
    let precedence = match kind {
        TokenKind::Assign => ASSIGN_PRECEDENCE,
        TokenKind::PipePipe => 1,
        TokenKind::AmpAmp => 2,
        TokenKind::Pipe => 4,
        TokenKind::Caret => 5,
        TokenKind::Amp => 6,
        TokenKind::EqEq | TokenKind::BangEq => 7,
        TokenKind::Less | TokenKind::LessEq | TokenKind::Greater | TokenKind::GreaterEq => 8,
        TokenKind::ShiftLeft | TokenKind::ShiftRight => 9,
        TokenKind::Plus | TokenKind::Minus => 10,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 11,
        TokenKind::StarStar => 12,
        TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot => POSTFIX_PRECEDENCE,
        _ => return None,
    };
    Some(precedence)
}

fn binary_op(kind: TokenKind) -> BinaryOp {
    match kind {
        TokenKind::Assign => BinaryOp::Assign,
        TokenKind::PipePipe => BinaryOp::LogicalOr,
        TokenKind::AmpAmp => BinaryOp::LogicalAnd,
        TokenKind::Pipe => BinaryOp::BitOr,
        TokenKind::Caret => BinaryOp::BitXor,
        TokenKind::Amp => BinaryOp::BitAnd,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::BangEq => BinaryOp::NotEq,
        TokenKind::Less => BinaryOp::Less,
        TokenKind::LessEq => BinaryOp::LessEq,
        TokenKind::Greater => BinaryOp::Greater,
        TokenKind::GreaterEq => BinaryOp::GreaterEq,
        TokenKind::ShiftLeft => BinaryOp::ShiftLeft,
        TokenKind::ShiftRight => BinaryOp::ShiftRight,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::StarStar => BinaryOp::Pow,
        _ => unreachable!("token {kind:?} is not a binary operator"),
    }
}

fn is_right_associative(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Assign | BinaryOp::Pow)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    next_id: u32,
    strings: &'a mut StringTable,
    diagnostics: &'a mut Diagnostics,
}

impl Parser<'_> {
    fn file(&mut self) -> File {
        let mut items = Vec::new();
        while self.peek() != TokenKind::Eof {
            let before = self.pos;
            if let Some(item) = self.item() {
                items.push(item);
            }
            if self.pos == before {
                // No progress: skip the offending token so the loop terminates.
                self.error_here("expected a declaration or import at file scope");
                self.advance();
            }
        }
        File {
            items,
            node_count: self.next_id,
        }
    }

    // --- token plumbing ---

    fn peek(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> bool {
        if self.accept(kind) {
            true
        } else {
            self.error_here(format!("expected {what}"));
            false
        }
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let span = self.current_span();
        self.diagnostics.error(span, message);
    }

    fn fresh_id(&mut self) -> AstId {
        let id = AstId(self.next_id);
        self.next_id += 1;
        id
    }

    fn node<T>(&mut self, span: Span, kind: T) -> Node<T> {
        Node {
            id: self.fresh_id(),
            span,
            has_error: false,
            kind,
        }
    }

    fn error_expr(&mut self, span: Span) -> ExprNode {
        let mut node = self.node(span, Expr::Literal(Literal::Null));
        node.has_error = true;
        node
    }

    fn intern_token(&mut self, token: &Token) -> InternedString {
        let text = token.span.text(self.source);
        self.strings.insert(text)
    }

    // --- items and declarations ---

    fn item(&mut self) -> Option<DeclNode> {
        let exported = self.accept(TokenKind::KwExport);
        match self.peek() {
            TokenKind::KwFunc => Some(self.func_decl(exported)),
            TokenKind::KwVar | TokenKind::KwConst => {
                let decl = self.var_decl(exported);
                self.expect(TokenKind::Semicolon, "';' after declaration");
                Some(decl)
            }
            TokenKind::KwImport => {
                let decl = self.import_decl(exported);
                self.expect(TokenKind::Semicolon, "';' after import");
                Some(decl)
            }
            TokenKind::Semicolon => {
                self.advance();
                None
            }
            _ => None,
        }
    }

    fn import_decl(&mut self, exported: bool) -> DeclNode {
        let start = self.current_span();
        self.advance(); // import
        let module = if self.peek() == TokenKind::Identifier {
            let token = self.advance();
            self.intern_token(&token)
        } else {
            self.error_here("expected a module name after 'import'");
            InternedString::default()
        };
        let span = start.merge(self.tokens[self.pos.saturating_sub(1)].span);
        let mut node = self.node(span, Decl::Import(ImportDecl { module, exported }));
        node.has_error = !module.is_valid();
        node
    }

    fn func_decl(&mut self, exported: bool) -> DeclNode {
        let start = self.current_span();
        self.advance(); // func
        let name = if self.peek() == TokenKind::Identifier {
            let token = self.advance();
            self.intern_token(&token)
        } else {
            self.error_here("expected a function name");
            InternedString::default()
        };
        let func = self.func_rest(name, exported);
        let span = start.merge(func.body.span);
        let mut node = self.node(span, Decl::Func(func));
        node.has_error = !name.is_valid();
        node
    }

    /// Parameters and body, shared by declarations and literals.
    fn func_rest(&mut self, name: InternedString, exported: bool) -> FuncDecl {
        let mut params = Vec::new();
        self.expect(TokenKind::LeftParen, "'(' before parameter list");
        while self.peek() != TokenKind::RightParen && self.peek() != TokenKind::Eof {
            if self.peek() == TokenKind::Identifier {
                let token = self.advance();
                let name = self.intern_token(&token);
                params.push(ParamDecl {
                    id: self.fresh_id(),
                    span: token.span,
                    name,
                });
            } else {
                self.error_here("expected a parameter name");
                self.advance();
            }
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')' after parameter list");

        let body = if self.accept(TokenKind::Assign) {
            // `func f() = expr;` sugar: the expression is the body.
            let expr = self.expression();
            self.expect(TokenKind::Semicolon, "';' after function expression body");
            expr
        } else if self.peek() == TokenKind::LeftBrace {
            self.block_expr()
        } else {
            self.error_here("expected '=' or '{' to begin the function body");
            let span = self.current_span();
            self.error_expr(span)
        };

        FuncDecl {
            name,
            params,
            body: Box::new(body),
            exported,
        }
    }

    fn var_decl(&mut self, exported: bool) -> DeclNode {
        let start = self.current_span();
        let is_const = self.peek() == TokenKind::KwConst;
        self.advance(); // var | const

        let mut bindings = Vec::new();
        loop {
            bindings.push(self.binding(is_const));
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        let end = bindings.last().map_or(start, |b| b.span);
        let span = start.merge(end);
        self.node(span, Decl::Var(VarDecl { bindings, exported }))
    }

    fn binding(&mut self, is_const: bool) -> BindingNode {
        let start = self.current_span();
        if self.accept(TokenKind::LeftParen) {
            // Tuple binding: var (a, b) = expr
            let mut names = Vec::new();
            while self.peek() == TokenKind::Identifier {
                let token = self.advance();
                let name = self.intern_token(&token);
                names.push((name, token.span));
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RightParen, "')' after tuple binding names");
            let init = self.binding_init();
            let end = init.as_ref().map_or(start, |e| e.span);
            let span = start.merge(end);
            let mut node = self.node(span, Binding::Tuple { names, is_const, init });
            if let Binding::Tuple { names, .. } = &node.kind
                && names.is_empty()
            {
                node.has_error = true;
            }
            node
        } else if self.peek() == TokenKind::Identifier {
            let token = self.advance();
            let name = self.intern_token(&token);
            let init = self.binding_init();
            let end = init.as_ref().map_or(token.span, |e| e.span);
            let span = start.merge(end);
            self.node(
                span,
                Binding::Var {
                    name,
                    name_span: token.span,
                    is_const,
                    init,
                },
            )
        } else {
            self.error_here("expected a binding name");
            let span = self.current_span();
            let mut node = self.node(
                span,
                Binding::Var {
                    name: InternedString::default(),
                    name_span: span,
                    is_const,
                    init: None,
                },
            );
            node.has_error = true;
            node
        }
    }

    fn binding_init(&mut self) -> Option<Box<ExprNode>> {
        if self.accept(TokenKind::Assign) {
            Some(Box::new(self.expression()))
        } else {
            None
        }
    }

    // --- statements ---

    fn statement(&mut self) -> StmtNode {
        let start = self.current_span();
        match self.peek() {
            TokenKind::Semicolon => {
                self.advance();
                self.node(start, Stmt::Empty)
            }
            TokenKind::KwAssert => self.assert_stmt(),
            TokenKind::KwVar | TokenKind::KwConst => {
                let decl = self.var_decl(false);
                self.expect(TokenKind::Semicolon, "';' after declaration");
                let span = decl.span;
                self.node(span, Stmt::Decl(decl))
            }
            TokenKind::KwFunc if self.peek_at(1) == TokenKind::Identifier => {
                // Named local function: sugar for a const binding.
                let decl = self.func_decl(false);
                let span = decl.span;
                self.node(span, Stmt::Decl(decl))
            }
            TokenKind::KwWhile => self.while_stmt(),
            TokenKind::KwFor => self.for_stmt(),
            _ => {
                let expr = self.expression();
                let span = expr.span;
                // Block-like expressions terminate themselves.
                let needs_semicolon = !matches!(expr.kind, Expr::Block { .. } | Expr::If { .. });
                if needs_semicolon {
                    self.expect(TokenKind::Semicolon, "';' after expression");
                }
                self.node(span, Stmt::Expr(Box::new(expr)))
            }
        }
    }

    fn assert_stmt(&mut self) -> StmtNode {
        let start = self.current_span();
        self.advance(); // assert
        self.expect(TokenKind::LeftParen, "'(' after 'assert'");
        let condition = Box::new(self.expression());
        let message = if self.accept(TokenKind::Comma) {
            Some(Box::new(self.expression()))
        } else {
            None
        };
        self.expect(TokenKind::RightParen, "')' after assert arguments");
        self.expect(TokenKind::Semicolon, "';' after assert");
        let span = start.merge(condition.span);
        self.node(span, Stmt::Assert { condition, message })
    }

    fn while_stmt(&mut self) -> StmtNode {
        let start = self.current_span();
        self.advance(); // while
        self.expect(TokenKind::LeftParen, "'(' after 'while'");
        let condition = Box::new(self.expression());
        self.expect(TokenKind::RightParen, "')' after loop condition");
        let body = Box::new(self.block_expr());
        let span = start.merge(body.span);
        self.node(span, Stmt::While { condition, body })
    }

    fn for_stmt(&mut self) -> StmtNode {
        let start = self.current_span();
        self.advance(); // for
        self.expect(TokenKind::LeftParen, "'(' after 'for'");

        let decl = if self.peek() == TokenKind::Semicolon {
            self.advance();
            None
        } else {
            let decl = self.var_decl(false);
            self.expect(TokenKind::Semicolon, "';' after loop declaration");
            let span = decl.span;
            Some(Box::new(self.node(span, Stmt::Decl(decl))))
        };

        let condition = if self.peek() == TokenKind::Semicolon {
            None
        } else {
            Some(Box::new(self.expression()))
        };
        self.expect(TokenKind::Semicolon, "';' after loop condition");

        let step = if self.peek() == TokenKind::RightParen {
            None
        } else {
            Some(Box::new(self.expression()))
        };
        self.expect(TokenKind::RightParen, "')' after loop step");

        let body = Box::new(self.block_expr());
        let span = start.merge(body.span);
        self.node(
            span,
            Stmt::For {
                decl,
                condition,
                step,
                body,
            },
        )
    }

    // --- expressions ---

    fn expression(&mut self) -> ExprNode {
        self.expression_with_precedence(-1)
    }

    fn expression_with_precedence(&mut self, min_precedence: i8) -> ExprNode {
        let mut left = self.prefix_expr();

        loop {
            let Some(precedence) = infix_precedence(self.peek()) else {
                break;
            };
            if precedence <= min_precedence {
                break;
            }

            match self.peek() {
                TokenKind::LeftParen => {
                    left = self.call_expr(left);
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.expression();
                    self.expect(TokenKind::RightBracket, "']' after index");
                    let span = left.span.merge(index.span);
                    left = self.node(
                        span,
                        Expr::Index {
                            object: Box::new(left),
                            index: Box::new(index),
                        },
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    left = self.member_expr(left);
                }
                kind => {
                    let op = binary_op(kind);
                    self.advance();
                    // Right-associative operators re-enter at one level lower.
                    let next_min = if is_right_associative(op) {
                        precedence - 1
                    } else {
                        precedence
                    };
                    let right = self.expression_with_precedence(next_min);
                    let span = left.span.merge(right.span);
                    left = self.node(
                        span,
                        Expr::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                    );
                }
            }
        }

        left
    }

    fn call_expr(&mut self, callee: ExprNode) -> ExprNode {
        self.advance(); // (
        let mut args = Vec::new();
        while self.peek() != TokenKind::RightParen && self.peek() != TokenKind::Eof {
            args.push(self.expression());
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        let end = self.current_span();
        self.expect(TokenKind::RightParen, "')' after call arguments");
        let span = callee.span.merge(end);
        self.node(
            span,
            Expr::Call {
                callee: Box::new(callee),
                args,
            },
        )
    }

    fn member_expr(&mut self, object: ExprNode) -> ExprNode {
        match self.peek() {
            TokenKind::Identifier => {
                let token = self.advance();
                let name = self.intern_token(&token);
                let span = object.span.merge(token.span);
                self.node(
                    span,
                    Expr::Member {
                        object: Box::new(object),
                        name,
                    },
                )
            }
            TokenKind::IntLiteral => {
                let token = self.advance();
                let span = object.span.merge(token.span);
                let index = u32::try_from(token.int_value).unwrap_or_else(|_| {
                    self.diagnostics.error(token.span, "tuple member index out of range");
                    0
                });
                self.node(
                    span,
                    Expr::TupleMember {
                        object: Box::new(object),
                        index,
                    },
                )
            }
            _ => {
                self.error_here("expected a member name or tuple index after '.'");
                let span = object.span;
                let mut node = self.node(
                    span,
                    Expr::Member {
                        object: Box::new(object),
                        name: InternedString::default(),
                    },
                );
                node.has_error = true;
                node
            }
        }
    }

    fn prefix_expr(&mut self) -> ExprNode {
        let start = self.current_span();
        match self.peek() {
            TokenKind::KwNull => {
                self.advance();
                self.node(start, Expr::Literal(Literal::Null))
            }
            TokenKind::KwTrue => {
                self.advance();
                self.node(start, Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::KwFalse => {
                self.advance();
                self.node(start, Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::IntLiteral => {
                let token = self.advance();
                self.node(start, Expr::Literal(Literal::Int(token.int_value)))
            }
            TokenKind::FloatLiteral => {
                let token = self.advance();
                self.node(start, Expr::Literal(Literal::Float(token.float_value)))
            }
            TokenKind::SymbolLiteral => {
                let token = self.advance();
                let text = &token.span.text(self.source)[1..]; // strip '#'
                let name = self.strings.insert(text);
                self.node(start, Expr::Literal(Literal::Symbol(name)))
            }
            TokenKind::StringLiteral => self.string_expr(),
            TokenKind::Identifier => {
                let token = self.advance();
                let name = self.intern_token(&token);
                self.node(start, Expr::Var(name))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.expression_with_precedence(UNARY_PRECEDENCE - 1);
                let span = start.merge(operand.span);
                self.node(
                    span,
                    Expr::Unary {
                        op: UnaryOp::Minus,
                        operand: Box::new(operand),
                    },
                )
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.expression_with_precedence(UNARY_PRECEDENCE - 1);
                let span = start.merge(operand.span);
                self.node(
                    span,
                    Expr::Unary {
                        op: UnaryOp::Plus,
                        operand: Box::new(operand),
                    },
                )
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.expression_with_precedence(UNARY_PRECEDENCE - 1);
                let span = start.merge(operand.span);
                self.node(
                    span,
                    Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                )
            }
            TokenKind::Tilde => {
                self.advance();
                let operand = self.expression_with_precedence(UNARY_PRECEDENCE - 1);
                let span = start.merge(operand.span);
                self.node(
                    span,
                    Expr::Unary {
                        op: UnaryOp::BitNot,
                        operand: Box::new(operand),
                    },
                )
            }
            TokenKind::LeftParen => self.paren_expr(),
            TokenKind::LeftBracket => self.array_expr(),
            TokenKind::LeftBrace => self.block_expr(),
            TokenKind::KwMap => self.map_expr(),
            TokenKind::KwSet => self.set_expr(),
            TokenKind::KwIf => self.if_expr(),
            TokenKind::KwReturn => {
                self.advance();
                let value = if matches!(
                    self.peek(),
                    TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::RightParen | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(Box::new(self.expression()))
                };
                let span = value.as_ref().map_or(start, |v| start.merge(v.span));
                self.node(span, Expr::Return(value))
            }
            TokenKind::KwBreak => {
                self.advance();
                self.node(start, Expr::Break)
            }
            TokenKind::KwContinue => {
                self.advance();
                self.node(start, Expr::Continue)
            }
            TokenKind::KwFunc => {
                self.advance();
                let name = if self.peek() == TokenKind::Identifier {
                    let token = self.advance();
                    self.intern_token(&token)
                } else {
                    InternedString::default()
                };
                let func = self.func_literal_rest(name);
                let span = start.merge(func.body.span);
                self.node(span, Expr::Func(func))
            }
            _ => {
                self.error_here("expected an expression");
                let span = self.current_span();
                self.advance();
                self.error_expr(span)
            }
        }
    }

    /// Like [`Self::func_rest`] but without the trailing `;` requirement,
    /// since a literal is terminated by its surrounding expression.
    fn func_literal_rest(&mut self, name: InternedString) -> FuncDecl {
        let mut params = Vec::new();
        self.expect(TokenKind::LeftParen, "'(' before parameter list");
        while self.peek() != TokenKind::RightParen && self.peek() != TokenKind::Eof {
            if self.peek() == TokenKind::Identifier {
                let token = self.advance();
                let name = self.intern_token(&token);
                params.push(ParamDecl {
                    id: self.fresh_id(),
                    span: token.span,
                    name,
                });
            } else {
                self.error_here("expected a parameter name");
                self.advance();
            }
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')' after parameter list");

        let body = if self.accept(TokenKind::Assign) {
            self.expression_with_precedence(ASSIGN_PRECEDENCE)
        } else if self.peek() == TokenKind::LeftBrace {
            self.block_expr()
        } else {
            self.error_here("expected '=' or '{' to begin the function body");
            let span = self.current_span();
            self.error_expr(span)
        };

        FuncDecl {
            name,
            params,
            body: Box::new(body),
            exported: false,
        }
    }

    fn string_expr(&mut self) -> ExprNode {
        let token = self.advance();
        let span = token.span;
        // Plain literal fast path.
        if token.segments.len() == 1
            && let StringSegment::Text(text) = &token.segments[0]
        {
            let text = text.clone();
            return self.node(span, Expr::StringLiteral(text));
        }

        let mut parts = Vec::new();
        for segment in &token.segments {
            match segment {
                StringSegment::Text(text) => parts.push(StringPart::Text(text.clone())),
                StringSegment::Interpolation(hole) => {
                    let expr = self.sub_expression(*hole);
                    parts.push(StringPart::Interpolation(Box::new(expr)));
                }
            }
        }
        self.node(span, Expr::StringInterpolation(parts))
    }

    /// Parses the expression inside a `${...}` hole. The hole's text is
    /// re-lexed and parsed with a nested parser whose spans are shifted back
    /// into the enclosing source.
    fn sub_expression(&mut self, hole: Span) -> ExprNode {
        let text = hole.text(self.source);
        let mut tokens = tokenize(text, self.diagnostics);
        for token in &mut tokens {
            token.span = Span::new(token.span.start + hole.start, token.span.end + hole.start);
            for segment in &mut token.segments {
                if let StringSegment::Interpolation(span) = segment {
                    *span = Span::new(span.start + hole.start, span.end + hole.start);
                }
            }
        }
        let mut nested = Parser {
            source: self.source,
            tokens,
            pos: 0,
            next_id: self.next_id,
            strings: self.strings,
            diagnostics: self.diagnostics,
        };
        let expr = nested.expression();
        if nested.peek() != TokenKind::Eof {
            nested.error_here("unexpected trailing input in interpolation");
        }
        self.next_id = nested.next_id;
        expr
    }

    /// `(`: grouping, tuple literal or record literal.
    fn paren_expr(&mut self) -> ExprNode {
        let start = self.current_span();
        self.advance(); // (

        // Empty tuple.
        if self.peek() == TokenKind::RightParen {
            let end = self.advance().span;
            return self.node(start.merge(end), Expr::Tuple(Vec::new()));
        }

        // Record literal: identifier ':' expr, ...
        if self.peek() == TokenKind::Identifier && self.peek_at(1) == TokenKind::Colon {
            let mut fields = Vec::new();
            loop {
                if self.peek() != TokenKind::Identifier {
                    self.error_here("expected a field name");
                    break;
                }
                let token = self.advance();
                let name = self.intern_token(&token);
                self.expect(TokenKind::Colon, "':' after field name");
                let value = self.expression();
                fields.push((name, value));
                if !self.accept(TokenKind::Comma) {
                    break;
                }
                if self.peek() == TokenKind::RightParen {
                    break;
                }
            }
            let end = self.current_span();
            self.expect(TokenKind::RightParen, "')' after record fields");
            return self.node(start.merge(end), Expr::Record(fields));
        }

        let first = self.expression();
        if self.accept(TokenKind::Comma) {
            let mut items = vec![first];
            while self.peek() != TokenKind::RightParen && self.peek() != TokenKind::Eof {
                items.push(self.expression());
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            let end = self.current_span();
            self.expect(TokenKind::RightParen, "')' after tuple items");
            self.node(start.merge(end), Expr::Tuple(items))
        } else {
            let end = self.current_span();
            self.expect(TokenKind::RightParen, "')' after expression");
            // Plain grouping: keep the inner node, widen the span.
            let mut inner = first;
            inner.span = start.merge(end);
            inner
        }
    }

    fn array_expr(&mut self) -> ExprNode {
        let start = self.current_span();
        self.advance(); // [
        let mut items = Vec::new();
        while self.peek() != TokenKind::RightBracket && self.peek() != TokenKind::Eof {
            items.push(self.expression());
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        let end = self.current_span();
        self.expect(TokenKind::RightBracket, "']' after array items");
        self.node(start.merge(end), Expr::Array(items))
    }

    fn map_expr(&mut self) -> ExprNode {
        let start = self.current_span();
        self.advance(); // map
        self.expect(TokenKind::LeftBrace, "'{' after 'map'");
        let mut pairs = Vec::new();
        while self.peek() != TokenKind::RightBrace && self.peek() != TokenKind::Eof {
            let key = self.expression();
            self.expect(TokenKind::Colon, "':' between map key and value");
            let value = self.expression();
            pairs.push((key, value));
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        let end = self.current_span();
        self.expect(TokenKind::RightBrace, "'}' after map entries");
        self.node(start.merge(end), Expr::Map(pairs))
    }

    fn set_expr(&mut self) -> ExprNode {
        let start = self.current_span();
        self.advance(); // set
        self.expect(TokenKind::LeftBrace, "'{' after 'set'");
        let mut items = Vec::new();
        while self.peek() != TokenKind::RightBrace && self.peek() != TokenKind::Eof {
            items.push(self.expression());
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        let end = self.current_span();
        self.expect(TokenKind::RightBrace, "'}' after set items");
        self.node(start.merge(end), Expr::Set(items))
    }

    fn if_expr(&mut self) -> ExprNode {
        let start = self.current_span();
        self.advance(); // if
        self.expect(TokenKind::LeftParen, "'(' after 'if'");
        let condition = Box::new(self.expression());
        self.expect(TokenKind::RightParen, "')' after condition");
        let then_branch = Box::new(self.block_expr());
        let else_branch = if self.accept(TokenKind::KwElse) {
            if self.peek() == TokenKind::KwIf {
                Some(Box::new(self.if_expr()))
            } else {
                Some(Box::new(self.block_expr()))
            }
        } else {
            None
        };
        let end = else_branch.as_ref().map_or(then_branch.span, |e| e.span);
        let span = start.merge(end);
        self.node(
            span,
            Expr::If {
                condition,
                then_branch,
                else_branch,
            },
        )
    }

    fn block_expr(&mut self) -> ExprNode {
        let start = self.current_span();
        if !self.expect(TokenKind::LeftBrace, "'{' to begin a block") {
            return self.error_expr(start);
        }

        let mut stmts = Vec::new();
        let mut tail = None;
        while self.peek() != TokenKind::RightBrace && self.peek() != TokenKind::Eof {
            let before = self.pos;
            match self.peek() {
                TokenKind::Semicolon
                | TokenKind::KwAssert
                | TokenKind::KwVar
                | TokenKind::KwConst
                | TokenKind::KwWhile
                | TokenKind::KwFor => stmts.push(self.statement()),
                TokenKind::KwFunc if self.peek_at(1) == TokenKind::Identifier => {
                    stmts.push(self.statement());
                }
                _ => {
                    let expr = self.expression();
                    let span = expr.span;
                    if self.peek() == TokenKind::RightBrace {
                        // Expression right before '}' without ';' is the
                        // block's value.
                        tail = Some(Box::new(expr));
                        break;
                    }
                    let needs_semicolon = !matches!(expr.kind, Expr::Block { .. } | Expr::If { .. });
                    if needs_semicolon {
                        self.expect(TokenKind::Semicolon, "';' after expression");
                    }
                    let stmt = self.node(span, Stmt::Expr(Box::new(expr)));
                    stmts.push(stmt);
                }
            }
            if self.pos == before {
                self.advance();
            }
        }
        let end = self.current_span();
        self.expect(TokenKind::RightBrace, "'}' to close the block");
        self.node(start.merge(end), Expr::Block { stmts, tail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> (File, Diagnostics, StringTable) {
        let mut strings = StringTable::new();
        let mut diagnostics = Diagnostics::new();
        let file = parse_file(source, &mut strings, &mut diagnostics);
        (file, diagnostics, strings)
    }

    #[test]
    fn function_with_expression_body() {
        let (file, diagnostics, strings) = parse("export func f() = 1 + 2 * 3;");
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");
        assert_eq!(file.items.len(), 1);
        let Decl::Func(func) = &file.items[0].kind else {
            panic!("expected a function");
        };
        assert!(func.exported);
        assert_eq!(strings.get(func.name), "f");
        // Precedence: 1 + (2 * 3)
        let Expr::Binary { op: BinaryOp::Add, right, .. } = &func.body.kind else {
            panic!("expected addition at the top");
        };
        assert!(matches!(right.kind, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn assignment_is_right_associative() {
        let (file, diagnostics, _) = parse("func f() { a = b = 1; }");
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");
        let Decl::Func(func) = &file.items[0].kind else {
            panic!("expected a function");
        };
        let Expr::Block { stmts, .. } = &func.body.kind else {
            panic!("expected a block body");
        };
        let Stmt::Expr(expr) = &stmts[0].kind else {
            panic!("expected an expression statement");
        };
        let Expr::Binary { op: BinaryOp::Assign, right, .. } = &expr.kind else {
            panic!("expected an assignment");
        };
        assert!(matches!(right.kind, Expr::Binary { op: BinaryOp::Assign, .. }));
    }

    #[test]
    fn for_loop_with_all_parts() {
        let (file, diagnostics, _) = parse("func f() { for (var i = 0; i < 3; i = i + 1) { } }");
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");
        let Decl::Func(func) = &file.items[0].kind else {
            panic!("expected a function");
        };
        let Expr::Block { stmts, .. } = &func.body.kind else {
            panic!("expected a block body");
        };
        let Stmt::For { decl, condition, step, .. } = &stmts[0].kind else {
            panic!("expected a for loop");
        };
        assert!(decl.is_some());
        assert!(condition.is_some());
        assert!(step.is_some());
    }

    #[test]
    fn record_vs_tuple_vs_grouping() {
        let (file, diagnostics, _) = parse("func f() { var r = (a: 1, b: 2); var t = (1, 2); var g = (1); }");
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");
        let Decl::Func(func) = &file.items[0].kind else {
            panic!("expected a function");
        };
        let Expr::Block { stmts, .. } = &func.body.kind else {
            panic!("expected a block body");
        };
        let inits: Vec<&ExprNode> = stmts
            .iter()
            .map(|s| {
                let Stmt::Decl(decl) = &s.kind else { panic!() };
                let Decl::Var(var) = &decl.kind else { panic!() };
                let Binding::Var { init, .. } = &var.bindings[0].kind else {
                    panic!()
                };
                init.as_deref().unwrap()
            })
            .collect();
        assert!(matches!(inits[0].kind, Expr::Record(_)));
        assert!(matches!(inits[1].kind, Expr::Tuple(_)));
        assert!(matches!(inits[2].kind, Expr::Literal(Literal::Int(1))));
    }

    #[test]
    fn block_tail_expression() {
        let (file, diagnostics, _) = parse("func f() { var x = 1; x + 1 }");
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");
        let Decl::Func(func) = &file.items[0].kind else {
            panic!("expected a function");
        };
        let Expr::Block { stmts, tail } = &func.body.kind else {
            panic!("expected a block body");
        };
        assert_eq!(stmts.len(), 1);
        assert!(tail.is_some());
    }

    #[test]
    fn closure_literal_inside_call() {
        let (file, diagnostics, _) = parse("func outer() { return (func() = a + b)(); }");
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");
        assert_eq!(file.items.len(), 1);
    }

    #[test]
    fn errors_are_recovered() {
        let (file, diagnostics, _) = parse("func f() { var = 1; } func g() = 2;");
        assert!(diagnostics.has_errors());
        // The second function still parses.
        assert_eq!(file.items.len(), 2);
    }
}
