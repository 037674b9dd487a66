//! Type signature parsing
//!
//! Signatures name a type by its full name with optional generic arguments in
//! angle brackets and array / by-ref / pointer suffixes:
//!
//! ```text
//! System.Collections.Generic.Dictionary<System.String, Core.Item[]>&
//! ```
//!
//! Suffixes do not change which type is referenced and are dropped.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("empty signature")]
    Empty,
    #[error("unexpected '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    #[error("unexpected end of signature")]
    UnexpectedEnd,
    #[error("empty name segment at offset {0}")]
    EmptySegment(usize),
}

/// A parsed type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSignature {
    pub name: String,
    pub arguments: Vec<TypeSignature>,
}

impl TypeSignature {
    pub fn parse(input: &str) -> Result<Self, SignatureError> {
        if input.trim().is_empty() {
            return Err(SignatureError::Empty);
        }
        let mut parser = Parser {
            chars: input.char_indices().peekable(),
            len: input.len(),
        };
        let signature = parser.parse_type()?;
        parser.skip_whitespace();
        match parser.chars.next() {
            None => Ok(signature),
            Some((offset, found)) => Err(SignatureError::UnexpectedChar { found, offset }),
        }
    }

    /// Names of this type and of every generic argument, depth first.
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for argument in &self.arguments {
            names.extend(argument.referenced_names());
        }
        names
    }

    /// Names of the generic arguments only (not the outer type).
    pub fn argument_names(&self) -> Vec<&str> {
        self.arguments
            .iter()
            .flat_map(|a| a.referenced_names())
            .collect()
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

impl Parser<'_> {
    fn parse_type(&mut self) -> Result<TypeSignature, SignatureError> {
        self.skip_whitespace();
        let name = self.parse_name()?;
        let mut arguments = Vec::new();

        if self.eat('<') {
            loop {
                arguments.push(self.parse_type()?);
                self.skip_whitespace();
                match self.chars.next() {
                    Some((_, ',')) => continue,
                    Some((_, '>')) => break,
                    Some((offset, found)) => {
                        return Err(SignatureError::UnexpectedChar { found, offset });
                    }
                    None => return Err(SignatureError::UnexpectedEnd),
                }
            }
        }

        self.parse_suffixes()?;
        Ok(TypeSignature { name, arguments })
    }

    fn parse_name(&mut self) -> Result<String, SignatureError> {
        let mut name = String::new();
        let mut segment_start = self.offset();
        let mut segment_len = 0;

        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '`' {
                segment_len += 1;
            } else if c == '.' || c == '+' {
                if segment_len == 0 {
                    return Err(SignatureError::EmptySegment(segment_start));
                }
                segment_len = 0;
                segment_start = offset + 1;
            } else {
                break;
            }
            name.push(c);
            self.chars.next();
        }

        if segment_len == 0 {
            return match self.chars.peek() {
                _ if !name.is_empty() => Err(SignatureError::EmptySegment(segment_start)),
                Some(&(offset, found)) => Err(SignatureError::UnexpectedChar { found, offset }),
                None => Err(SignatureError::UnexpectedEnd),
            };
        }
        Ok(name)
    }

    fn parse_suffixes(&mut self) -> Result<(), SignatureError> {
        loop {
            self.skip_whitespace();
            if self.eat('&') || self.eat('*') {
                continue;
            }
            if self.eat('[') {
                // Multi-dimensional arrays: `[]`, `[,]`, `[,,]`
                loop {
                    match self.chars.next() {
                        Some((_, ',')) => continue,
                        Some((_, ']')) => break,
                        Some((offset, found)) => {
                            return Err(SignatureError::UnexpectedChar { found, offset });
                        }
                        None => return Err(SignatureError::UnexpectedEnd),
                    }
                }
                continue;
            }
            return Ok(());
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().is_some_and(|&(_, c)| c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.len, |&(offset, _)| offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_name() {
        let sig = TypeSignature::parse("Core.Services.Parser").unwrap();
        assert_eq!(sig.name, "Core.Services.Parser");
        assert!(sig.arguments.is_empty());
    }

    #[test]
    fn test_parse_nested_generics_and_suffixes() {
        let sig = TypeSignature::parse(
            "System.Collections.Generic.Dictionary<System.String, System.Collections.Generic.List<Core.Item[]>>&",
        )
        .unwrap();

        assert_eq!(sig.name, "System.Collections.Generic.Dictionary");
        assert_eq!(
            sig.referenced_names(),
            vec![
                "System.Collections.Generic.Dictionary",
                "System.String",
                "System.Collections.Generic.List",
                "Core.Item",
            ]
        );
        assert_eq!(
            sig.argument_names(),
            vec!["System.String", "System.Collections.Generic.List", "Core.Item"]
        );
    }

    #[test]
    fn test_parse_nested_type_and_arity_marker() {
        let sig = TypeSignature::parse("Core.Outer+Inner`1<Core.A>*").unwrap();
        assert_eq!(sig.name, "Core.Outer+Inner`1");
        assert_eq!(sig.argument_names(), vec!["Core.A"]);

        let sig = TypeSignature::parse("Core.Grid[,]").unwrap();
        assert_eq!(sig.name, "Core.Grid");
    }

    #[test]
    fn test_malformed_signatures() {
        assert_eq!(TypeSignature::parse("   "), Err(SignatureError::Empty));
        assert_eq!(
            TypeSignature::parse("Core.List<Core.A"),
            Err(SignatureError::UnexpectedEnd)
        );
        assert_eq!(
            TypeSignature::parse("Core..A"),
            Err(SignatureError::EmptySegment(5))
        );
        assert_eq!(
            TypeSignature::parse("Core.A>"),
            Err(SignatureError::UnexpectedChar {
                found: '>',
                offset: 6
            })
        );
        assert!(TypeSignature::parse("Core.").is_err());
        assert!(TypeSignature::parse("<Core.A>").is_err());
    }
}
