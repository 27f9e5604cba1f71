use crate::program::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Names, keywords and `#RRGGBB[AA]` color literals.
    Ident(String),
    Number(i64),
    Str(String),

    /// `|>`
    Pipe,
    Comma,
    LParen,
    RParen,
    Eq,
    /// The `x` between the two numbers of a `WxH` size.
    X,

    End,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '#'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '#')
}

pub(crate) fn lex(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut out = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // Line comment.
        if c == '/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        let start = i;

        if c == '|' && i + 1 < bytes.len() && bytes[i + 1] == b'>' {
            i += 2;
            out.push(Token {
                kind: TokenKind::Pipe,
                span: Span { start, end: i },
            });
            continue;
        }

        // Number: -?[0-9]+, optionally followed by `x` when a size like `32x32` continues.
        let negative = c == '-' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit();
        if c.is_ascii_digit() || negative {
            if negative {
                i += 1;
            }
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let s = &input[start..i];
            let v: i64 = s
                .parse()
                .map_err(|_| ParseError::new(start, format!("invalid number '{s}'")))?;
            if v.unsigned_abs() > u64::from(u32::MAX) {
                return Err(ParseError::new(start, format!("number '{s}' out of range")));
            }
            out.push(Token {
                kind: TokenKind::Number(v),
                span: Span { start, end: i },
            });

            if i + 1 < bytes.len()
                && matches!(bytes[i], b'x' | b'X')
                && bytes[i + 1].is_ascii_digit()
            {
                out.push(Token {
                    kind: TokenKind::X,
                    span: Span {
                        start: i,
                        end: i + 1,
                    },
                });
                i += 1;
            }
            continue;
        }

        if c == '"' {
            i += 1;
            let mut s = String::new();
            let mut closed = false;
            while i < bytes.len() {
                let ch = bytes[i];
                i += 1;
                match ch {
                    b'"' => {
                        closed = true;
                        break;
                    }
                    b'\\' if i < bytes.len() => {
                        let Some(esc) = input[i..].chars().next() else {
                            break;
                        };
                        i += esc.len_utf8();
                        s.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    _ => {
                        // Copy whole UTF-8 sequences untouched.
                        let seq_end = input[i - 1..]
                            .chars()
                            .next()
                            .map_or(i, |ch| i - 1 + ch.len_utf8());
                        s.push_str(&input[i - 1..seq_end]);
                        i = seq_end;
                    }
                }
            }
            if !closed {
                return Err(ParseError::new(start, "unterminated string literal"));
            }
            out.push(Token {
                kind: TokenKind::Str(s),
                span: Span { start, end: i },
            });
            continue;
        }

        if is_ident_start(c) {
            i += 1;
            while i < bytes.len() && is_ident_continue(bytes[i] as char) {
                i += 1;
            }
            out.push(Token {
                kind: TokenKind::Ident(input[start..i].to_owned()),
                span: Span { start, end: i },
            });
            continue;
        }

        let kind = match c {
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '=' => TokenKind::Eq,
            _ => {
                let ch = input[start..].chars().next().unwrap_or(c);
                return Err(ParseError::new(start, format!("unexpected character '{ch}'")));
            }
        };
        i += 1;
        out.push(Token {
            kind,
            span: Span { start, end: i },
        });
    }

    out.push(Token {
        kind: TokenKind::End,
        span: Span {
            start: input.len(),
            end: input.len(),
        },
    });

    Ok(out)
}

#[cfg(test)]
#[path = "../../tests/unit/program/lexer.rs"]
mod tests;
