//! SQL text formatting for wharf.
//!
//! Statements are written as templates with named placeholders and rendered
//! to finished SQL text, with every value escaped according to its format
//! selector. See [`format_sql`] for the template grammar.
//!
//! This crate also owns the short-hash helpers used to detect whether an
//! object's stored definition still matches the DDL we would issue for it.

mod format;
pub use format::*;

mod hash;
pub use hash::*;

/// A warehouse string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use wharf_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            match c {
                '\'' => write!(f, "''")?,
                '\\' => write!(f, "\\\\")?,
                c => write!(f, "{}", c)?,
            }
        }
        write!(f, "'")
    }
}

/// A warehouse identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use wharf_sql::Ident;
/// assert_eq!(format!("{}", Ident("SALES")), "\"SALES\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Quote a single identifier part.
///
/// Always quotes, so names that collide with keywords (`ORDER`, `GROUP`,
/// `TABLE`) are safe. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Quote a dotted identifier made of several parts.
///
/// ```
/// assert_eq!(wharf_sql::quote_parts(&["DB", "SCH", "T"]), "\"DB\".\"SCH\".\"T\"");
/// ```
pub fn quote_parts(parts: &[impl AsRef<str>]) -> String {
    parts
        .iter()
        .map(|p| quote_ident(p.as_ref()))
        .collect::<Vec<_>>()
        .join(".")
}
