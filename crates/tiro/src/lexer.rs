//! Hand-written lexer for the surface syntax.
//!
//! The lexer is byte-oriented and produces a flat token stream with spans.
//! String literals are scanned into segments so `"${expr}"` interpolation can
//! be parsed later without re-lexing the whole literal: each `${...}` hole is
//! recorded as the span of its inner expression text and handed back to the
//! parser, which runs a nested parse over just that range.
//!
//! Malformed input never aborts the lexer; it emits an `Error` token and a
//! diagnostic and keeps going, so the parser always sees a terminated stream.

use strum::{Display, IntoStaticStr};

use crate::{
    diagnostics::Diagnostics,
    span::Span,
};

/// Token kinds, including keywords and all operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum TokenKind {
    Eof,
    Error,

    Identifier,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    SymbolLiteral,

    // Keywords
    KwFunc,
    KwVar,
    KwConst,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwIn,
    KwReturn,
    KwBreak,
    KwContinue,
    KwImport,
    KwExport,
    KwAssert,
    KwTrue,
    KwFalse,
    KwNull,
    KwMap,
    KwSet,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Colon,
    Dot,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Bang,
    Tilde,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    EqEq,
    BangEq,
    AmpAmp,
    PipePipe,
    Amp,
    Pipe,
    Caret,
    ShiftLeft,
    ShiftRight,
}

/// One piece of a scanned string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringSegment {
    /// Literal text with escapes already resolved.
    Text(String),
    /// The span of the expression source inside a `${...}` hole.
    Interpolation(Span),
}

/// A single token. Literal payloads are stored out of line on the token to
/// keep the common path (kind + span) cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub int_value: i64,
    pub float_value: f64,
    pub segments: Vec<StringSegment>,
}

impl Token {
    fn new(kind: TokenKind, span: Span) -> Self {
        Self {
            kind,
            span,
            int_value: 0,
            float_value: 0.0,
            segments: Vec::new(),
        }
    }

    /// Identifier or symbol text, resolved against the source buffer.
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        self.span.text(source)
    }
}

fn keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "func" => TokenKind::KwFunc,
        "var" => TokenKind::KwVar,
        "const" => TokenKind::KwConst,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        "in" => TokenKind::KwIn,
        "return" => TokenKind::KwReturn,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "import" => TokenKind::KwImport,
        "export" => TokenKind::KwExport,
        "assert" => TokenKind::KwAssert,
        "true" => TokenKind::KwTrue,
        "false" => TokenKind::KwFalse,
        "null" => TokenKind::KwNull,
        "map" => TokenKind::KwMap,
        "set" => TokenKind::KwSet,
        _ => return None,
    };
    Some(kind)
}

/// Lexes `source` to completion. The returned stream always ends with an
/// `Eof` token.
pub fn tokenize(source: &str, diagnostics: &mut Diagnostics) -> Vec<Token> {
    let mut lexer = Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
        tokens: Vec::new(),
    };
    lexer.run(diagnostics);
    lexer.tokens
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn run(&mut self, diagnostics: &mut Diagnostics) {
        loop {
            self.skip_trivia(diagnostics);
            let start = self.pos as u32;
            let Some(byte) = self.peek() else {
                self.tokens.push(Token::new(TokenKind::Eof, Span::at(start)));
                return;
            };

            match byte {
                b'0'..=b'9' => self.number(diagnostics),
                b'"' => self.string(diagnostics),
                b'#' => self.symbol(diagnostics),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.identifier(),
                _ => self.operator(diagnostics),
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn accept(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn span_from(&self, start: u32) -> Span {
        Span::new(start, self.pos as u32)
    }

    fn push(&mut self, kind: TokenKind, start: u32) {
        let span = self.span_from(start);
        self.tokens.push(Token::new(kind, span));
    }

    fn skip_trivia(&mut self, diagnostics: &mut Diagnostics) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.pos += 1;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos as u32;
                    self.pos += 2;
                    let mut closed = false;
                    while let Some(byte) = self.bump() {
                        if byte == b'*' && self.accept(b'/') {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        diagnostics.error(self.span_from(start), "unterminated block comment");
                    }
                }
                _ => return,
            }
        }
    }

    fn identifier(&mut self) {
        let start = self.pos as u32;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = self.span_from(start).text(self.source);
        let kind = keyword(text).unwrap_or(TokenKind::Identifier);
        self.push(kind, start);
    }

    fn symbol(&mut self, diagnostics: &mut Diagnostics) {
        let start = self.pos as u32;
        self.pos += 1; // '#'
        let name_start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == name_start {
            diagnostics.error(self.span_from(start), "expected a name after '#'");
            self.push(TokenKind::Error, start);
            return;
        }
        self.push(TokenKind::SymbolLiteral, start);
    }

    fn number(&mut self, diagnostics: &mut Diagnostics) {
        let start = self.pos as u32;

        // Prefixed integer literals
        if self.peek() == Some(b'0') {
            let radix = match self.peek_at(1) {
                Some(b'x' | b'X') => Some(16),
                Some(b'o' | b'O') => Some(8),
                Some(b'b' | b'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while let Some(byte) = self.peek() {
                    if (byte as char).is_digit(radix) || byte == b'_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let digits: String = self.source[digits_start..self.pos].chars().filter(|&c| c != '_').collect();
                let span = self.span_from(start);
                match i64::from_str_radix(&digits, radix) {
                    Ok(value) if !digits.is_empty() => {
                        let mut token = Token::new(TokenKind::IntLiteral, span);
                        token.int_value = value;
                        self.tokens.push(token);
                    }
                    _ => {
                        diagnostics.error(span, "invalid integer literal");
                        self.tokens.push(Token::new(TokenKind::Error, span));
                    }
                }
                return;
            }
        }

        let mut is_float = false;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() || byte == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        // A dot begins a fraction only when followed by a digit, so that
        // `1.foo()` still lexes as member access on an integer.
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while let Some(byte) = self.peek() {
                if byte.is_ascii_digit() || byte == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.pos += lookahead;
                while let Some(byte) = self.peek() {
                    if byte.is_ascii_digit() {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
        }

        let span = self.span_from(start);
        let digits: String = span.text(self.source).chars().filter(|&c| c != '_').collect();
        if is_float {
            match digits.parse::<f64>() {
                Ok(value) => {
                    let mut token = Token::new(TokenKind::FloatLiteral, span);
                    token.float_value = value;
                    self.tokens.push(token);
                }
                Err(_) => {
                    diagnostics.error(span, "invalid float literal");
                    self.tokens.push(Token::new(TokenKind::Error, span));
                }
            }
        } else {
            match digits.parse::<i64>() {
                Ok(value) => {
                    let mut token = Token::new(TokenKind::IntLiteral, span);
                    token.int_value = value;
                    self.tokens.push(token);
                }
                Err(_) => {
                    diagnostics.error(span, "integer literal out of range");
                    self.tokens.push(Token::new(TokenKind::Error, span));
                }
            }
        }
    }

    fn string(&mut self, diagnostics: &mut Diagnostics) {
        let start = self.pos as u32;
        self.pos += 1; // opening quote

        let mut segments = Vec::new();
        let mut text = String::new();
        let mut closed = false;

        while let Some(byte) = self.peek() {
            match byte {
                b'"' => {
                    self.pos += 1;
                    closed = true;
                    break;
                }
                b'\\' => {
                    self.pos += 1;
                    match self.bump() {
                        Some(b'n') => text.push('\n'),
                        Some(b't') => text.push('\t'),
                        Some(b'r') => text.push('\r'),
                        Some(b'\\') => text.push('\\'),
                        Some(b'"') => text.push('"'),
                        Some(b'$') => text.push('$'),
                        Some(b'0') => text.push('\0'),
                        other => {
                            let span = self.span_from(start);
                            diagnostics.error(
                                span,
                                format!(
                                    "invalid escape sequence '\\{}'",
                                    other.map(|b| b as char).unwrap_or(' ')
                                ),
                            );
                        }
                    }
                }
                b'$' if self.peek_at(1) == Some(b'{') => {
                    if !text.is_empty() {
                        segments.push(StringSegment::Text(std::mem::take(&mut text)));
                    }
                    self.pos += 2;
                    let expr_start = self.pos as u32;
                    let mut depth = 1usize;
                    while let Some(inner) = self.peek() {
                        match inner {
                            b'{' => depth += 1,
                            b'}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        self.pos += 1;
                    }
                    if self.peek() == Some(b'}') {
                        segments.push(StringSegment::Interpolation(Span::new(expr_start, self.pos as u32)));
                        self.pos += 1;
                    } else {
                        diagnostics.error(self.span_from(start), "unterminated '${' interpolation");
                    }
                }
                b'$' if self.peek_at(1).is_some_and(|b| b.is_ascii_alphabetic() || b == b'_') => {
                    // Shorthand `$name` interpolation of a single identifier.
                    if !text.is_empty() {
                        segments.push(StringSegment::Text(std::mem::take(&mut text)));
                    }
                    self.pos += 1;
                    let name_start = self.pos as u32;
                    while let Some(inner) = self.peek() {
                        if inner.is_ascii_alphanumeric() || inner == b'_' {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                    segments.push(StringSegment::Interpolation(Span::new(name_start, self.pos as u32)));
                }
                _ => {
                    // Multi-byte UTF-8 sequences pass through unchanged.
                    let ch_start = self.pos;
                    let ch = self.source[ch_start..].chars().next().expect("valid utf-8");
                    text.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }

        let span = self.span_from(start);
        if !closed {
            diagnostics.error(span, "unterminated string literal");
        }
        if !text.is_empty() || segments.is_empty() {
            segments.push(StringSegment::Text(text));
        }
        let mut token = Token::new(TokenKind::StringLiteral, span);
        token.segments = segments;
        self.tokens.push(token);
    }

    fn operator(&mut self, diagnostics: &mut Diagnostics) {
        let start = self.pos as u32;
        let byte = self.bump().expect("operator byte");
        let kind = match byte {
            b'(' => TokenKind::LeftParen,
            b')' => TokenKind::RightParen,
            b'[' => TokenKind::LeftBracket,
            b']' => TokenKind::RightBracket,
            b'{' => TokenKind::LeftBrace,
            b'}' => TokenKind::RightBrace,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => {
                if self.accept(b'*') {
                    TokenKind::StarStar
                } else {
                    TokenKind::Star
                }
            }
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'~' => TokenKind::Tilde,
            b'^' => TokenKind::Caret,
            b'!' => {
                if self.accept(b'=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            b'=' => {
                if self.accept(b'=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            b'<' => {
                if self.accept(b'=') {
                    TokenKind::LessEq
                } else if self.accept(b'<') {
                    TokenKind::ShiftLeft
                } else {
                    TokenKind::Less
                }
            }
            b'>' => {
                if self.accept(b'=') {
                    TokenKind::GreaterEq
                } else if self.accept(b'>') {
                    TokenKind::ShiftRight
                } else {
                    TokenKind::Greater
                }
            }
            b'&' => {
                if self.accept(b'&') {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.accept(b'|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            _ => {
                diagnostics.error(self.span_from(start), format!("unexpected character '{}'", byte as char));
                TokenKind::Error
            }
        };
        self.push(kind, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize(source, &mut diagnostics);
        assert!(!diagnostics.has_errors(), "unexpected lex errors: {diagnostics:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            lex("func foo var"),
            vec![TokenKind::KwFunc, TokenKind::Identifier, TokenKind::KwVar, TokenKind::Eof]
        );
    }

    #[test]
    fn numbers() {
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize("42 0xff 3.5 1e3 1_000", &mut diagnostics);
        assert!(!diagnostics.has_errors());
        assert_eq!(tokens[0].int_value, 42);
        assert_eq!(tokens[1].int_value, 255);
        assert_eq!(tokens[2].float_value, 3.5);
        assert_eq!(tokens[3].float_value, 1000.0);
        assert_eq!(tokens[4].int_value, 1000);
    }

    #[test]
    fn member_access_on_int_is_not_a_float() {
        assert_eq!(
            lex("1.foo"),
            vec![TokenKind::IntLiteral, TokenKind::Dot, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            lex("<= >= == != && || << >> **"),
            vec![
                TokenKind::LessEq,
                TokenKind::GreaterEq,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::ShiftLeft,
                TokenKind::ShiftRight,
                TokenKind::StarStar,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_interpolation_segments() {
        let mut diagnostics = Diagnostics::new();
        let source = r#""a${1 + 2}b$x""#;
        let tokens = tokenize(source, &mut diagnostics);
        assert!(!diagnostics.has_errors());
        let token = &tokens[0];
        assert_eq!(token.kind, TokenKind::StringLiteral);
        assert_eq!(token.segments.len(), 4);
        assert_eq!(token.segments[0], StringSegment::Text("a".to_owned()));
        let StringSegment::Interpolation(span) = token.segments[1] else {
            panic!("expected interpolation");
        };
        assert_eq!(span.text(source), "1 + 2");
        assert_eq!(token.segments[2], StringSegment::Text("b".to_owned()));
        let StringSegment::Interpolation(span) = token.segments[3] else {
            panic!("expected interpolation");
        };
        assert_eq!(span.text(source), "x");
    }

    #[test]
    fn comments_are_trivia() {
        assert_eq!(
            lex("1 // line\n/* block */ 2"),
            vec![TokenKind::IntLiteral, TokenKind::IntLiteral, TokenKind::Eof]
        );
    }

    #[test]
    fn symbols() {
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize("#ok", &mut diagnostics);
        assert_eq!(tokens[0].kind, TokenKind::SymbolLiteral);
        assert_eq!(tokens[0].span.text("#ok"), "#ok");
    }
}
