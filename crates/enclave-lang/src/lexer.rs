//! Hand-rolled scanner for the sandboxed language subset.
//!
//! Escape sequences in string literals (and template chunks) are decoded
//! here, so `"\x63onstructor"` and `"constructor"` produce identical token
//! values.

use crate::span::Span;
use crate::token::{Keyword, Punct, TemplatePart, Token, TokenKind};

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} at byte {offset}")]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Offset added to every span (used when re-lexing template substitutions)
    base: usize,
    newline_pending: bool,
    prev_significant: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self::with_base(src, 0)
    }

    pub fn with_base(src: &'a str, base: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            base,
            newline_pending: false,
            prev_significant: None,
        }
    }

    /// Lex the whole input, appending a final Eof token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let eof = matches!(tok.kind, TokenKind::Eof);
            out.push(tok);
            if eof {
                return Ok(out);
            }
        }
    }

    fn err(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            offset: self.base + self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(b'\n') => {
                    self.newline_pending = true;
                    self.pos += 1;
                }
                Some(b) if (b as char).is_whitespace() => {
                    self.pos += 1;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            None => {
                                self.pos = start;
                                return Err(self.err("unterminated block comment"));
                            }
                            Some(b'\n') => {
                                self.newline_pending = true;
                                self.pos += 1;
                            }
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        let newline_before = std::mem::take(&mut self.newline_pending);
        let start = self.pos;

        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(b) => match b {
                b'0'..=b'9' => self.lex_number()?,
                b'.' if matches!(self.peek_at(1), Some(b'0'..=b'9')) => self.lex_number()?,
                b'"' | b'\'' => self.lex_string()?,
                b'`' => self.lex_template()?,
                b'/' if self.regex_allowed() => self.lex_regex()?,
                b if is_ident_start(b) || b >= 0x80 => self.lex_ident(),
                _ => self.lex_punct()?,
            },
        };

        let span = Span::new(self.base + start, self.base + self.pos);
        if !matches!(kind, TokenKind::Eof) {
            self.prev_significant = Some(kind.clone());
        }
        Ok(Token {
            kind,
            span,
            newline_before,
        })
    }

    /// A `/` begins a regex unless the previous token could end an
    /// expression (identifier, literal, `)`, `]`, `++`, `--`).
    fn regex_allowed(&self) -> bool {
        match &self.prev_significant {
            None => true,
            Some(TokenKind::Number(_))
            | Some(TokenKind::BigInt(_))
            | Some(TokenKind::Str(_))
            | Some(TokenKind::Template(_))
            | Some(TokenKind::Regex { .. })
            | Some(TokenKind::Ident(_)) => false,
            Some(TokenKind::Keyword(k)) => !matches!(
                k,
                Keyword::True | Keyword::False | Keyword::Null | Keyword::Undefined
            ),
            Some(TokenKind::Punct(p)) => !matches!(
                p,
                Punct::RParen | Punct::RBracket | Punct::PlusPlus | Punct::MinusMinus
            ),
            _ => true,
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_ident_continue(b) || b >= 0x80 {
                // multi-byte chars: advance over the full char
                if b >= 0x80 {
                    let ch_len = self.src[self.pos..]
                        .chars()
                        .next()
                        .map(|c| c.len_utf8())
                        .unwrap_or(1);
                    self.pos += ch_len;
                } else {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        let word = &self.src[start..self.pos];
        match Keyword::from_ident(word) {
            Some(k) => TokenKind::Keyword(k),
            None => TokenKind::Ident(word.to_string()),
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, LexError> {
        let start = self.pos;
        let radix = if self.peek() == Some(b'0') {
            match self.peek_at(1) {
                Some(b'x') | Some(b'X') => 16,
                Some(b'o') | Some(b'O') => 8,
                Some(b'b') | Some(b'B') => 2,
                _ => 10,
            }
        } else {
            10
        };

        if radix != 10 {
            self.pos += 2;
            let digits_start = self.pos;
            while let Some(b) = self.peek() {
                if (b as char).is_digit(radix) || b == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let digits: String = self.src[digits_start..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            if digits.is_empty() {
                return Err(self.err("missing digits in numeric literal"));
            }
            if self.eat(b'n') {
                let value = i128::from_str_radix(&digits, radix)
                    .map_err(|_| self.err("bigint literal out of range"))?;
                return Ok(TokenKind::BigInt(value));
            }
            let value = u64::from_str_radix(&digits, radix)
                .map_err(|_| self.err("numeric literal out of range"))?;
            return Ok(TokenKind::Number(value as f64));
        }

        while matches!(self.peek(), Some(b'0'..=b'9') | Some(b'_')) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(b'0'..=b'9') | Some(b'_')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some(b'+') | Some(b'-')) {
                ahead = 2;
            }
            if matches!(self.peek_at(ahead), Some(b'0'..=b'9')) {
                is_float = true;
                self.pos += ahead;
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
        }
        let text: String = self.src[start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if !is_float && self.eat(b'n') {
            let value = text
                .parse::<i128>()
                .map_err(|_| self.err("bigint literal out of range"))?;
            return Ok(TokenKind::BigInt(value));
        }
        let value = text
            .parse::<f64>()
            .map_err(|_| self.err("malformed numeric literal"))?;
        Ok(TokenKind::Number(value))
    }

    fn lex_string(&mut self) -> Result<TokenKind, LexError> {
        let quote = self.bump().unwrap_or(b'"');
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string literal")),
                Some(b) if b == quote => break,
                Some(b'\n') => return Err(self.err("newline in string literal")),
                Some(b'\\') => value.push_str(&self.lex_escape()?),
                Some(b) if b < 0x80 => value.push(b as char),
                Some(_) => {
                    // re-read the full multi-byte char
                    self.pos -= 1;
                    let ch = self.src[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| self.err("invalid utf-8 in string"))?;
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        Ok(TokenKind::Str(value))
    }

    fn lex_escape(&mut self) -> Result<String, LexError> {
        let b = self
            .bump()
            .ok_or_else(|| self.err("unterminated escape sequence"))?;
        Ok(match b {
            b'n' => "\n".to_string(),
            b't' => "\t".to_string(),
            b'r' => "\r".to_string(),
            b'b' => "\u{8}".to_string(),
            b'f' => "\u{c}".to_string(),
            b'v' => "\u{b}".to_string(),
            b'0' => "\0".to_string(),
            b'\n' => String::new(),
            b'x' => {
                let hex = self.take_hex(2)?;
                char::from_u32(hex)
                    .ok_or_else(|| self.err("invalid \\x escape"))?
                    .to_string()
            }
            b'u' => {
                if self.eat(b'{') {
                    let start = self.pos;
                    while matches!(self.peek(), Some(b) if (b as char).is_ascii_hexdigit()) {
                        self.pos += 1;
                    }
                    let digits = &self.src[start..self.pos];
                    if !self.eat(b'}') || digits.is_empty() {
                        return Err(self.err("invalid \\u{} escape"));
                    }
                    let code = u32::from_str_radix(digits, 16)
                        .map_err(|_| self.err("invalid \\u{} escape"))?;
                    char::from_u32(code)
                        .ok_or_else(|| self.err("invalid \\u{} escape"))?
                        .to_string()
                } else {
                    let hex = self.take_hex(4)?;
                    char::from_u32(hex)
                        .ok_or_else(|| self.err("invalid \\u escape"))?
                        .to_string()
                }
            }
            b if b < 0x80 => (b as char).to_string(),
            _ => {
                self.pos -= 1;
                let ch = self.src[self.pos..]
                    .chars()
                    .next()
                    .ok_or_else(|| self.err("invalid escape"))?;
                self.pos += ch.len_utf8();
                ch.to_string()
            }
        })
    }

    fn take_hex(&mut self, n: usize) -> Result<u32, LexError> {
        let start = self.pos;
        for _ in 0..n {
            match self.peek() {
                Some(b) if (b as char).is_ascii_hexdigit() => self.pos += 1,
                _ => return Err(self.err("invalid hex escape")),
            }
        }
        u32::from_str_radix(&self.src[start..self.pos], 16)
            .map_err(|_| self.err("invalid hex escape"))
    }

    fn lex_template(&mut self) -> Result<TokenKind, LexError> {
        self.pos += 1; // backtick
        let mut parts = Vec::new();
        let mut chunk = String::new();
        loop {
            match self.peek() {
                None => return Err(self.err("unterminated template literal")),
                Some(b'`') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    chunk.push_str(&self.lex_escape()?);
                }
                Some(b'$') if self.peek_at(1) == Some(b'{') => {
                    parts.push(TemplatePart::Chunk(std::mem::take(&mut chunk)));
                    self.pos += 2;
                    let subst_start = self.pos;
                    self.skip_balanced_substitution()?;
                    let src = self.src[subst_start..self.pos].to_string();
                    parts.push(TemplatePart::Subst {
                        src,
                        offset: self.base + subst_start,
                    });
                    self.pos += 1; // closing brace
                }
                Some(b'\n') => {
                    self.newline_pending = true;
                    chunk.push('\n');
                    self.pos += 1;
                }
                Some(b) if b < 0x80 => {
                    chunk.push(b as char);
                    self.pos += 1;
                }
                Some(_) => {
                    let ch = self.src[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| self.err("invalid utf-8 in template"))?;
                    chunk.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        parts.push(TemplatePart::Chunk(chunk));
        Ok(TokenKind::Template(parts))
    }

    /// Position after `${`; stops with `pos` at the matching `}`. Strings,
    /// templates, and nested braces inside the substitution are respected.
    fn skip_balanced_substitution(&mut self) -> Result<(), LexError> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(self.err("unterminated template substitution")),
                Some(b'}') if depth == 0 => return Ok(()),
                Some(b'}') => {
                    depth -= 1;
                    self.pos += 1;
                }
                Some(b'{') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(b'"') | Some(b'\'') => {
                    self.lex_string()?;
                }
                Some(b'`') => {
                    self.lex_template()?;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn lex_regex(&mut self) -> Result<TokenKind, LexError> {
        self.pos += 1; // '/'
        let start = self.pos;
        let mut in_class = false;
        loop {
            match self.peek() {
                None => return Err(self.err("unterminated regex literal")),
                Some(b'\n') => return Err(self.err("unterminated regex literal")),
                Some(b'\\') => {
                    self.pos += 2;
                }
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some(b'/') if !in_class => break,
                Some(_) => self.pos += 1,
            }
        }
        let pattern = self.src[start..self.pos].to_string();
        self.pos += 1; // closing '/'
        let flags_start = self.pos;
        while matches!(self.peek(), Some(b) if (b as char).is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let flags = self.src[flags_start..self.pos].to_string();
        Ok(TokenKind::Regex { pattern, flags })
    }

    fn lex_punct(&mut self) -> Result<TokenKind, LexError> {
        use Punct::*;
        let b = self.bump().ok_or_else(|| self.err("unexpected end of input"))?;
        let p = match b {
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b';' => Semi,
            b',' => Comma,
            b':' => Colon,
            b'~' => BitNot,
            b'.' => {
                if self.peek() == Some(b'.') && self.peek_at(1) == Some(b'.') {
                    self.pos += 2;
                    Ellipsis
                } else {
                    Dot
                }
            }
            b'?' => {
                if self.eat(b'.') {
                    QuestionDot
                } else if self.eat(b'?') {
                    QuestionQuestion
                } else {
                    Question
                }
            }
            b'+' => {
                if self.eat(b'+') {
                    PlusPlus
                } else if self.eat(b'=') {
                    PlusAssign
                } else {
                    Plus
                }
            }
            b'-' => {
                if self.eat(b'-') {
                    MinusMinus
                } else if self.eat(b'=') {
                    MinusAssign
                } else {
                    Minus
                }
            }
            b'*' => {
                if self.eat(b'*') {
                    if self.eat(b'=') {
                        StarStarAssign
                    } else {
                        StarStar
                    }
                } else if self.eat(b'=') {
                    StarAssign
                } else {
                    Star
                }
            }
            b'/' => {
                if self.eat(b'=') {
                    SlashAssign
                } else {
                    Slash
                }
            }
            b'%' => {
                if self.eat(b'=') {
                    PercentAssign
                } else {
                    Percent
                }
            }
            b'=' => {
                if self.peek() == Some(b'=') && self.peek_at(1) == Some(b'=') {
                    self.pos += 2;
                    EqEqEq
                } else if self.eat(b'=') {
                    EqEq
                } else if self.eat(b'>') {
                    Arrow
                } else {
                    Assign
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') && self.peek_at(1) == Some(b'=') {
                    self.pos += 2;
                    NotEqEq
                } else if self.eat(b'=') {
                    NotEq
                } else {
                    Not
                }
            }
            b'<' => {
                if self.eat(b'<') {
                    Shl
                } else if self.eat(b'=') {
                    LtEq
                } else {
                    Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'>') && self.peek_at(1) == Some(b'>') {
                    self.pos += 2;
                    UShr
                } else if self.eat(b'>') {
                    Shr
                } else if self.eat(b'=') {
                    GtEq
                } else {
                    Gt
                }
            }
            b'&' => {
                if self.eat(b'&') {
                    AndAnd
                } else {
                    BitAnd
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    OrOr
                } else {
                    BitOr
                }
            }
            b'^' => BitXor,
            _ => {
                self.pos -= 1;
                return Err(self.err(format!("unexpected character '{}'", b as char)));
            }
        };
        Ok(TokenKind::Punct(p))
    }
}

fn is_ident_start(b: u8) -> bool {
    (b as char).is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    (b as char).is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_basic_statement() {
        let ks = kinds("let x = 1;");
        assert_eq!(ks[0], TokenKind::Keyword(Keyword::Let));
        assert_eq!(ks[1], TokenKind::Ident("x".to_string()));
        assert_eq!(ks[2], TokenKind::Punct(Punct::Assign));
        assert_eq!(ks[3], TokenKind::Number(1.0));
    }

    #[test]
    fn test_escapes_are_decoded() {
        let ks = kinds(r#"'\x63onstructor'"#);
        assert_eq!(ks[0], TokenKind::Str("constructor".to_string()));
        let ks = kinds(r#"'__proto__'"#);
        assert_eq!(ks[0], TokenKind::Str("__proto__".to_string()));
    }

    #[test]
    fn test_bigint_and_radix_literals() {
        assert_eq!(kinds("10n")[0], TokenKind::BigInt(10));
        assert_eq!(kinds("0xffn")[0], TokenKind::BigInt(255));
        assert_eq!(kinds("0b101")[0], TokenKind::Number(5.0));
        assert_eq!(kinds("1_000")[0], TokenKind::Number(1000.0));
    }

    #[test]
    fn test_regex_vs_division() {
        let ks = kinds("a / b");
        assert_eq!(ks[1], TokenKind::Punct(Punct::Slash));
        let ks = kinds("x = /ab+c/gi");
        assert_eq!(
            ks[2],
            TokenKind::Regex {
                pattern: "ab+c".to_string(),
                flags: "gi".to_string()
            }
        );
        // After `return` a regex is legal; after a literal keyword it is
        // division.
        let ks = kinds("return /a/");
        assert!(matches!(ks[1], TokenKind::Regex { .. }));
        let ks = kinds("true / 2");
        assert_eq!(ks[1], TokenKind::Punct(Punct::Slash));
    }

    #[test]
    fn test_template_with_substitution() {
        let ks = kinds("`a${x + 1}b`");
        match &ks[0] {
            TokenKind::Template(parts) => {
                assert_eq!(parts[0], TemplatePart::Chunk("a".to_string()));
                match &parts[1] {
                    TemplatePart::Subst { src, .. } => assert_eq!(src, "x + 1"),
                    other => panic!("expected substitution, got {:?}", other),
                }
                assert_eq!(parts[2], TemplatePart::Chunk("b".to_string()));
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_template_substitution() {
        let ks = kinds("`a${`b${c}`}d`");
        match &ks[0] {
            TokenKind::Template(parts) => match &parts[1] {
                TemplatePart::Subst { src, .. } => assert_eq!(src, "`b${c}`"),
                other => panic!("expected substitution, got {:?}", other),
            },
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        let ks = kinds("a?.b ?? c");
        assert_eq!(ks[1], TokenKind::Punct(Punct::QuestionDot));
        assert_eq!(ks[3], TokenKind::Punct(Punct::QuestionQuestion));
    }

    #[test]
    fn test_newline_tracking() {
        let toks = Lexer::new("a\nb").tokenize().unwrap();
        assert!(!toks[0].newline_before);
        assert!(toks[1].newline_before);
    }

    #[test]
    fn test_comments_are_trivia() {
        let ks = kinds("a // line\n/* block */ b");
        assert_eq!(ks[0], TokenKind::Ident("a".to_string()));
        assert_eq!(ks[1], TokenKind::Ident("b".to_string()));
    }
}
