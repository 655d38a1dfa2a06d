//! Lexer, parser, and AST for the sandboxed language subset.
//!
//! The language is a curated slice of ECMAScript expression and statement
//! syntax: declarations, arrow and function forms, loops, conditionals,
//! try/catch, template literals, destructuring, `await`, and the literal
//! grammar. Constructs outside the slice (classes, modules, labels,
//! `switch`, rest parameters) are parse errors — the validator never has to
//! reason about nodes the parser cannot produce.
//!
//! Escapes in string literals are decoded at lex time, so a downstream
//! consumer comparing literal *values* (not spellings) sees through
//! `\x63onstructor`-style obfuscation for free.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;

pub use ast::*;
pub use parser::{parse_program, ParseError};
pub use span::Span;
