//! SQL dialect capabilities.
//!
//! The only capability the query engine needs from a dialect is identifier
//! escaping; everything else goes through the connection directly.

/// What kind of identifier is being escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    Table,
    Column,
}

/// Identifier escaping for a target SQL dialect.
pub trait Dialect {
    /// Escapes `name` so it can be embedded verbatim in SQL text.
    fn escape_identifier(&self, name: &str, kind: IdentKind) -> String;
}

/// The SQLite dialect: identifiers are wrapped in double quotes, embedded
/// quotes are doubled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn escape_identifier(&self, name: &str, _kind: IdentKind) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_plain_and_quoted_names() {
        let d = SqliteDialect;
        assert_eq!(d.escape_identifier("person", IdentKind::Table), "\"person\"");
        assert_eq!(
            d.escape_identifier("we\"ird", IdentKind::Column),
            "\"we\"\"ird\""
        );
    }
}
