//! Entity string lexer and parser.
//!
//! The entity string is a sequence of `{ "key" "value" ... }` blocks.
//! Tokens may be quoted or bare, and `//` starts a comment to the end of
//! the line.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    Open,
    Close,
    Str(&'a str),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    #[error("unterminated string at byte {0}")]
    UnterminatedString(usize),
    #[error("unexpected `{token}` at byte {offset}")]
    UnexpectedToken { token: String, offset: usize },
    #[error("key `{0}` has no value")]
    MissingValue(String),
    #[error("entity is not closed")]
    UnexpectedEnd,
}

pub struct Lexer<'a> {
    source: &'a str,
    offset: usize,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            failed: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn skip_blank(&mut self) {
        let bytes = self.source.as_bytes();
        loop {
            while self.offset < bytes.len() && bytes[self.offset].is_ascii_whitespace() {
                self.offset += 1;
            }
            if bytes[self.offset..].starts_with(b"//") {
                while self.offset < bytes.len() && bytes[self.offset] != b'\n' {
                    self.offset += 1;
                }
            } else {
                break;
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<(usize, Token<'a>), EntityError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.skip_blank();
        let bytes = self.source.as_bytes();
        let start = self.offset;
        let token = match *bytes.get(start)? {
            b'{' => {
                self.offset += 1;
                Token::Open
            }
            b'}' => {
                self.offset += 1;
                Token::Close
            }
            b'"' => match self.source[start + 1..].find('"') {
                Some(length) => {
                    self.offset = start + 1 + length + 1;
                    Token::Str(&self.source[start + 1..start + 1 + length])
                }
                None => {
                    self.failed = true;
                    return Some(Err(EntityError::UnterminatedString(start)));
                }
            },
            _ => {
                let length = bytes[start..]
                    .iter()
                    .position(|&b| b.is_ascii_whitespace() || b == b'{' || b == b'}' || b == b'"')
                    .unwrap_or(bytes.len() - start);
                self.offset = start + length;
                Token::Str(&self.source[start..start + length])
            }
        };
        Some(Ok((start, token)))
    }
}

/// Key/value pairs of one entity, in source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entity<'a> {
    pub pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Entity<'a> {
    /// The last value given for `key`.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .rev()
            .find(|&&(k, _)| k.eq_ignore_ascii_case(key))
            .map(|&(_, v)| v)
    }
}

/// Yields one result per entity. A malformed entity is reported and the
/// parser resynchronizes on the next closing brace.
pub struct EntityParser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> EntityParser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
        }
    }

    fn skip_entity(&mut self) {
        for token in self.lexer.by_ref() {
            match token {
                Ok((_, Token::Close)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }

    fn parse_body(&mut self) -> Result<Entity<'a>, EntityError> {
        let mut entity = Entity::default();
        loop {
            let key = match self.lexer.next() {
                None => return Err(EntityError::UnexpectedEnd),
                Some(Err(error)) => return Err(error),
                Some(Ok((_, Token::Close))) => return Ok(entity),
                Some(Ok((_, Token::Str(key)))) => key,
                Some(Ok((offset, Token::Open))) => {
                    return Err(EntityError::UnexpectedToken {
                        token: "{".to_string(),
                        offset,
                    })
                }
            };
            match self.lexer.next() {
                None => return Err(EntityError::UnexpectedEnd),
                Some(Err(error)) => return Err(error),
                Some(Ok((_, Token::Str(value)))) => entity.pairs.push((key, value)),
                Some(Ok((_, Token::Close))) => {
                    return Err(EntityError::MissingValue(key.to_string()))
                }
                Some(Ok((offset, Token::Open))) => {
                    return Err(EntityError::UnexpectedToken {
                        token: "{".to_string(),
                        offset,
                    })
                }
            }
        }
    }
}

impl<'a> Iterator for EntityParser<'a> {
    type Item = Result<Entity<'a>, EntityError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lexer.next()? {
            Err(error) => Some(Err(error)),
            Ok((_, Token::Open)) => {
                let result = self.parse_body();
                if let Err(EntityError::UnexpectedToken { .. }) = result {
                    self.skip_entity();
                }
                Some(result)
            }
            Ok((offset, Token::Close)) => Some(Err(EntityError::UnexpectedToken {
                token: "}".to_string(),
                offset,
            })),
            Ok((offset, Token::Str(text))) => Some(Err(EntityError::UnexpectedToken {
                token: text.to_string(),
                offset,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexer_handles_quotes_bare_words_and_comments() {
        let tokens = Lexer::new("{ \"classname\" light // note\n origin \"1 2 3\" }")
            .map(|result| result.map(|(_, token)| token))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            tokens,
            [
                Token::Open,
                Token::Str("classname"),
                Token::Str("light"),
                Token::Str("origin"),
                Token::Str("1 2 3"),
                Token::Close,
            ]
        );
    }

    #[test]
    fn parser_recovers_after_a_bad_entity() {
        let source = "{ \"a\" \"1\" } { \"b\" { } { \"c\" \"3\" \"c\" \"4\" }";
        let entities = EntityParser::new(source).collect::<Vec<_>>();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].as_ref().unwrap().get("a"), Some("1"));
        assert!(matches!(
            entities[1],
            Err(EntityError::UnexpectedToken { .. })
        ));
        assert_eq!(entities[2].as_ref().unwrap().get("c"), Some("4"));
    }

    #[test]
    fn unterminated_string_stops_parsing() {
        let entities = EntityParser::new("{ \"a\" \"1 }").collect::<Vec<_>>();
        assert_eq!(entities, [Err(EntityError::UnterminatedString(6))]);
    }
}
