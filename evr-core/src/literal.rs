//! Strict parser for string-encoded choice lists such as
//! `"['piano', \"producer's desk\", 'recording booth']"`.
//!
//! Only flat list or tuple displays of scalar literals are accepted: quoted
//! strings (single or double quotes, optional `u`/`r` prefix, adjacent
//! literals concatenated), numbers, and the keywords `True`, `False`, `None`
//! (plus their JSON spellings). Nothing is ever evaluated.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    /// Numbers keep their source spelling so rendering is lossless.
    Number(String),
    Bool(bool),
    None,
}

impl Literal {
    /// Text shown for this literal when used as a choice.
    pub fn render(&self) -> String {
        match self {
            Literal::Str(text) => text.clone(),
            Literal::Number(text) => text.clone(),
            Literal::Bool(true) => "True".to_string(),
            Literal::Bool(false) => "False".to_string(),
            Literal::None => "None".to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiteralError {
    #[error("expected '[' or '(' at offset {offset}")]
    NotASequence { offset: usize },

    #[error("unterminated string starting at offset {offset}")]
    Unterminated { offset: usize },

    #[error("unexpected '{found}' at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("invalid escape sequence at offset {offset}")]
    BadEscape { offset: usize },

    #[error("unexpected end of input")]
    Eof,
}

/// Parse a list or tuple display into its elements.
pub fn parse_list(input: &str) -> Result<Vec<Literal>, LiteralError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();

    let close = match parser.peek() {
        Some('[') => ']',
        Some('(') => ')',
        Some(_) | None => {
            return Err(LiteralError::NotASequence { offset: parser.pos });
        }
    };
    parser.pos += 1;

    let mut items = Vec::new();
    loop {
        parser.skip_ws();
        match parser.peek() {
            None => return Err(LiteralError::Eof),
            Some(ch) if ch == close => {
                parser.pos += 1;
                break;
            }
            Some(_) => {}
        }

        items.push(parser.item()?);
        parser.skip_ws();

        match parser.peek() {
            Some(',') => parser.pos += 1,
            Some(ch) if ch == close => {
                parser.pos += 1;
                break;
            }
            Some(found) => {
                return Err(LiteralError::Unexpected {
                    found,
                    offset: parser.pos,
                });
            }
            None => return Err(LiteralError::Eof),
        }
    }

    parser.skip_ws();
    if let Some(found) = parser.peek() {
        return Err(LiteralError::Unexpected {
            found,
            offset: parser.pos,
        });
    }

    Ok(items)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn item(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        let ch = self.peek().ok_or(LiteralError::Eof)?;

        if ch == '\'' || ch == '"' || self.at_prefixed_string() {
            let mut text = self.string()?;
            // Adjacent string literals concatenate.
            loop {
                let resume = self.pos;
                self.skip_ws();
                match self.peek() {
                    Some('\'' | '"') => text.push_str(&self.string()?),
                    Some(_) if self.at_prefixed_string() => text.push_str(&self.string()?),
                    _ => {
                        self.pos = resume;
                        break;
                    }
                }
            }
            return Ok(Literal::Str(text));
        }

        if ch == '-' || ch == '+' || ch == '.' || ch.is_ascii_digit() {
            return self.number();
        }

        if ch.is_ascii_alphabetic() {
            let word: String = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
            return match word.as_str() {
                "True" | "true" => Ok(Literal::Bool(true)),
                "False" | "false" => Ok(Literal::Bool(false)),
                "None" | "null" => Ok(Literal::None),
                _ => Err(LiteralError::Unexpected {
                    found: ch,
                    offset: start,
                }),
            };
        }

        Err(LiteralError::Unexpected {
            found: ch,
            offset: start,
        })
    }

    fn at_prefixed_string(&self) -> bool {
        matches!(self.peek(), Some('u' | 'U' | 'r' | 'R'))
            && matches!(self.peek_at(1), Some('\'' | '"'))
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if !keep(ch) {
                break;
            }
            out.push(ch);
            self.pos += 1;
        }
        out
    }

    fn number(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        let mut text = String::new();
        if let Some(sign @ ('-' | '+')) = self.peek() {
            text.push(sign);
            self.pos += 1;
        }
        let body = self.take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '_' | 'e' | 'E'));
        text.push_str(&body);

        // Exponent sign directly after 'e'.
        if body.ends_with(['e', 'E'])
            && let Some(sign @ ('-' | '+')) = self.peek()
        {
            text.push(sign);
            self.pos += 1;
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }

        let cleaned: String = text.chars().filter(|c| *c != '_').collect();
        if cleaned.parse::<f64>().is_err() {
            return Err(LiteralError::Unexpected {
                found: self.chars[start],
                offset: start,
            });
        }
        Ok(Literal::Number(cleaned))
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let start = self.pos;
        let mut raw = false;
        if matches!(self.peek(), Some('u' | 'U' | 'r' | 'R')) {
            raw = matches!(self.peek(), Some('r' | 'R'));
            self.pos += 1;
        }

        let quote = self.peek().ok_or(LiteralError::Eof)?;
        self.pos += 1;

        let mut out = String::new();
        loop {
            let ch = self
                .peek()
                .ok_or(LiteralError::Unterminated { offset: start })?;
            self.pos += 1;

            if ch == quote {
                return Ok(out);
            }
            if ch == '\n' {
                return Err(LiteralError::Unterminated { offset: start });
            }
            if ch != '\\' {
                out.push(ch);
                continue;
            }

            let escape_at = self.pos - 1;
            let next = self
                .peek()
                .ok_or(LiteralError::Unterminated { offset: start })?;
            self.pos += 1;

            if raw {
                out.push('\\');
                out.push(next);
                continue;
            }

            match next {
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\n' => {}
                'x' => out.push(self.hex_escape(2, escape_at)?),
                'u' => out.push(self.hex_escape(4, escape_at)?),
                'U' => out.push(self.hex_escape(8, escape_at)?),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex_escape(&mut self, digits: usize, escape_at: usize) -> Result<char, LiteralError> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(LiteralError::BadEscape { offset: escape_at });
        }
        let hex: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or(LiteralError::BadEscape { offset: escape_at })
    }
}
