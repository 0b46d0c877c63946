//! Validated SQL identifiers
//!
//! Table and column names cannot be bound as query parameters, so they are
//! validated once here and always rendered quoted.

use crate::store::StoreError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier regex"))
}

/// A table or column name safe to interpolate into SQL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.len() > 63 || !identifier_pattern().is_match(&name) {
            return Err(StoreError::InvalidIdentifier(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for Ident {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert_eq!(Ident::new("relationship_props").unwrap().quoted(), "\"relationship_props\"");
        assert!(Ident::new("_t1").is_ok());
    }

    #[test]
    fn rejects_injection() {
        assert!(Ident::new("nodes; DROP TABLE nodes").is_err());
        assert!(Ident::new("a\"b").is_err());
        assert!(Ident::new("1abc").is_err());
        assert!(Ident::new("").is_err());
        assert!(Ident::new("x".repeat(64)).is_err());
    }
}
