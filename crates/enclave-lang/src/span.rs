//! Byte spans and line/column resolution.

use serde::{Deserialize, Serialize};

/// Half-open byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// The spanned slice of `source`, clamped to char boundaries.
    pub fn snippet<'a>(&self, source: &'a str) -> &'a str {
        let start = self.start.min(source.len());
        let mut end = self.end.min(source.len());
        while end > start && !source.is_char_boundary(end) {
            end -= 1;
        }
        let mut start = start;
        while start < end && !source.is_char_boundary(start) {
            start += 1;
        }
        &source[start..end]
    }
}

/// 1-based (line, column) of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut col = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col_counts_newlines() {
        let src = "ab\ncd\nef";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 3), (2, 1));
        assert_eq!(line_col(src, 7), (3, 2));
    }

    #[test]
    fn test_snippet_clamps_to_source() {
        let src = "let x = 1;";
        assert_eq!(Span::new(4, 5).snippet(src), "x");
        assert_eq!(Span::new(4, 999).snippet(src), "x = 1;");
    }
}
