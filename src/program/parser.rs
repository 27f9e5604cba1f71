use crate::program::ast::{Arg, Base, Call, MAX_NESTING_DEPTH, Pipeline, Value};
use crate::program::error::ParseError;
use crate::program::lexer::{Span, Token, TokenKind, lex};

pub(crate) fn parse_program(src: &str) -> Result<Pipeline, ParseError> {
    let tokens = lex(src)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let pipeline = p.parse_top()?;
    p.expect(TokenKind::End)?;
    Ok(pipeline)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let i = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn bump(&mut self) -> &Token {
        let t = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.peek().kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(ParseError::new(
                self.span().start,
                format!("expected {kind:?}, found {:?}", self.peek().kind),
            ))
        }
    }

    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn peek_ident(&self) -> Option<&str> {
        match &self.peek().kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    fn is_tex_keyword(&self) -> bool {
        self.peek_ident() == Some("tex")
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::new(
                self.span().start,
                format!("nested tex() deeper than {MAX_NESTING_DEPTH} levels"),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// `["tex"] base ("|>" call)*` at the top level.
    fn parse_top(&mut self) -> Result<Pipeline, ParseError> {
        if self.is_tex_keyword() {
            let next = self.peek_at(1).clone();
            match next {
                // `tex` alone names a texture called "tex".
                TokenKind::Pipe | TokenKind::End | TokenKind::RParen | TokenKind::Comma => {}
                TokenKind::LParen => {
                    let mut inner = self.parse_nested()?;
                    inner.stages.extend(self.parse_stages()?);
                    return Ok(inner);
                }
                _ => {
                    self.bump();
                }
            }
        }
        let base = self.parse_base()?;
        let stages = self.parse_stages()?;
        Ok(Pipeline { base, stages })
    }

    fn parse_stages(&mut self) -> Result<Vec<Call>, ParseError> {
        let mut stages = Vec::new();
        while self.consume(TokenKind::Pipe) {
            stages.push(self.parse_call()?);
        }
        Ok(stages)
    }

    fn parse_base(&mut self) -> Result<Base, ParseError> {
        let offset = self.span().start;
        match self.peek().kind.clone() {
            TokenKind::Number(w) => {
                self.bump();
                let is_x = match &self.peek().kind {
                    TokenKind::X => true,
                    TokenKind::Ident(s) => s == "x" || s == "X",
                    _ => false,
                };
                if !is_x {
                    return Err(ParseError::new(
                        self.span().start,
                        "expected 'x' in a WxH fill size",
                    ));
                }
                self.bump();
                let h = match self.peek().kind {
                    TokenKind::Number(h) => h,
                    _ => {
                        return Err(ParseError::new(
                            self.span().start,
                            "expected fill height after 'x'",
                        ));
                    }
                };
                self.bump();
                let color = match &self.peek().kind {
                    TokenKind::Ident(s) | TokenKind::Str(s) => s.clone(),
                    other => {
                        return Err(ParseError::new(
                            self.span().start,
                            format!("expected fill color, found {other:?}"),
                        ));
                    }
                };
                self.bump();
                Ok(Base::Fill {
                    width: w,
                    height: h,
                    color,
                    offset,
                })
            }
            TokenKind::Ident(name) => {
                let is_call = *self.peek_at(1) == TokenKind::LParen;
                if is_call && (name == "anim" || name == "combine") {
                    let call = self.parse_call()?;
                    return Ok(if name == "anim" {
                        Base::Anim(call)
                    } else {
                        Base::Combine(call)
                    });
                }
                self.bump();
                Ok(Base::Tex { name, offset })
            }
            TokenKind::Str(name) => {
                self.bump();
                Ok(Base::Tex { name, offset })
            }
            other => Err(ParseError::new(
                offset,
                format!("expected a texture name, fill or anim, found {other:?}"),
            )),
        }
    }

    fn parse_call(&mut self) -> Result<Call, ParseError> {
        let offset = self.span().start;
        let name = match self.peek_ident() {
            Some(s) => s.to_owned(),
            None => {
                return Err(ParseError::new(
                    offset,
                    format!("expected operation name, found {:?}", self.peek().kind),
                ));
            }
        };
        self.bump();

        let mut args = Vec::new();
        if self.consume(TokenKind::LParen) {
            if !self.consume(TokenKind::RParen) {
                loop {
                    args.push(self.parse_arg()?);
                    if self.consume(TokenKind::Comma) {
                        continue;
                    }
                    self.expect(TokenKind::RParen)?;
                    break;
                }
            }
        }
        Ok(Call { name, args, offset })
    }

    fn parse_arg(&mut self) -> Result<Arg, ParseError> {
        let offset = self.span().start;
        let mut name = None;
        if let Some(n) = self.peek_ident()
            && *self.peek_at(1) == TokenKind::Eq
        {
            name = Some(n.to_owned());
            self.bump();
            self.bump();
        }
        let value = self.parse_value()?;
        Ok(Arg {
            name,
            value,
            offset,
        })
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        if self.is_tex_keyword()
            && matches!(
                self.peek_at(1),
                TokenKind::LParen | TokenKind::Ident(_) | TokenKind::Str(_) | TokenKind::Number(_)
            )
        {
            let mut nested = self.parse_nested()?;
            nested.stages.extend(self.parse_stages()?);
            return Ok(Value::Nested(Box::new(nested)));
        }

        let t = self.peek().clone();
        let v = match t.kind {
            TokenKind::Number(n) => Value::Int(n),
            TokenKind::Str(s) => Value::Str(s),
            TokenKind::Ident(s) => Value::Ident(s),
            other => {
                return Err(ParseError::new(
                    t.span.start,
                    format!("expected a value, found {other:?}"),
                ));
            }
        };
        self.bump();
        Ok(v)
    }

    /// `tex ( name-args | pipeline )` or `tex base`. Trailing stages are left to the caller.
    fn parse_nested(&mut self) -> Result<Pipeline, ParseError> {
        self.enter()?;
        let start = self.span().start;
        // `tex`
        self.bump();

        let out = if self.consume(TokenKind::LParen) {
            let named = matches!(self.peek_at(1), TokenKind::Eq);
            let p = if named {
                self.parse_tex_name_args(start)?
            } else {
                self.parse_top()?
            };
            self.expect(TokenKind::RParen)?;
            p
        } else {
            Pipeline {
                base: self.parse_base()?,
                stages: Vec::new(),
            }
        };

        self.leave();
        Ok(out)
    }

    /// `name=X` / `tex=X` inside `tex(...)`.
    fn parse_tex_name_args(&mut self, start: usize) -> Result<Pipeline, ParseError> {
        let mut found = None;
        loop {
            let arg = self.parse_arg()?;
            match arg.name.as_deref() {
                Some("name") | Some("tex") => {
                    let Some(text) = arg.value.as_text() else {
                        return Err(ParseError::new(
                            arg.offset,
                            "texture name must be an identifier or string",
                        ));
                    };
                    found = Some((text.to_owned(), arg.offset));
                }
                Some(other) => {
                    return Err(ParseError::new(
                        arg.offset,
                        format!("unknown tex() argument '{other}'"),
                    ));
                }
                None => {
                    return Err(ParseError::new(
                        arg.offset,
                        "tex() takes either name=... or a pipeline",
                    ));
                }
            }
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        let (name, offset) =
            found.ok_or_else(|| ParseError::new(start, "tex() is missing a texture name"))?;
        Ok(Pipeline {
            base: Base::Tex { name, offset },
            stages: Vec::new(),
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/program/parser.rs"]
mod tests;
