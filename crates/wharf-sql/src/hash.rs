//! Hash-in-comment helpers.
//!
//! Some objects cannot be introspected faithfully enough to diff them
//! attribute by attribute. For those, the resolver renders the full DDL it
//! would issue, hashes it, and stores the hash at the end of the object's
//! comment. On the next run the stored hash is compared against a fresh one:
//! equal hashes mean the object is unchanged.

/// Separator between the user comment and the hash suffix.
const HASH_MARKER: &str = "#";

/// Length of the hex hash suffix.
pub const SHORT_HASH_LEN: usize = 16;

/// Compute the short hash of a DDL statement.
///
/// Whitespace outside of quoted regions is collapsed first, so reformatting
/// a template does not change the hash.
pub fn short_hash(sql: &str) -> String {
    let normalized = normalize_sql_for_hash(sql);
    let hex = blake3::hash(normalized.as_bytes()).to_hex().to_string();
    hex[..SHORT_HASH_LEN].to_string()
}

/// Append the hash of `sql` to `comment`.
///
/// ```
/// let c = wharf_sql::add_hash(Some("billing"), "CREATE FUNCTION f() ...");
/// assert!(c.starts_with("billing #"));
/// assert!(wharf_sql::matches_hash(Some(c.as_str()), "CREATE FUNCTION f() ..."));
/// ```
pub fn add_hash(comment: Option<&str>, sql: &str) -> String {
    let hash = short_hash(sql);
    match comment.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => format!("{c} {HASH_MARKER}{hash}"),
        None => format!("{HASH_MARKER}{hash}"),
    }
}

/// Extract the hash suffix from a stored comment, if there is one.
pub fn extract_hash(comment: &str) -> Option<&str> {
    let idx = comment.rfind(HASH_MARKER)?;
    let candidate = &comment[idx + HASH_MARKER.len()..];
    let valid = candidate.len() == SHORT_HASH_LEN
        && candidate.bytes().all(|b| b.is_ascii_hexdigit());
    valid.then_some(candidate)
}

/// Remove the hash suffix from a stored comment.
///
/// Returns `None` when nothing but the hash remains.
pub fn strip_hash(comment: &str) -> Option<&str> {
    let stripped = match extract_hash(comment) {
        Some(hash) => comment[..comment.len() - hash.len() - HASH_MARKER.len()].trim_end(),
        None => comment,
    };
    (!stripped.is_empty()).then_some(stripped)
}

/// Check whether the stored comment carries the hash of `sql`.
pub fn matches_hash(comment: Option<&str>, sql: &str) -> bool {
    comment
        .and_then(extract_hash)
        .is_some_and(|stored| stored == short_hash(sql))
}

fn normalize_sql_for_hash(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;

    let mut in_single_quote = false;
    let mut in_double_quote = false;

    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_single_quote {
            out.push(ch);
            if ch == '\'' {
                // '' is an escaped quote, not the end of the literal
                if let Some(next) = chars.next_if_eq(&'\'') {
                    out.push(next);
                } else {
                    in_single_quote = false;
                }
            }
            continue;
        }

        if in_double_quote {
            out.push(ch);
            if ch == '"' {
                if let Some(next) = chars.next_if_eq(&'"') {
                    out.push(next);
                } else {
                    in_double_quote = false;
                }
            }
            continue;
        }

        match ch {
            '\'' | '"' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(ch);
                if ch == '\'' {
                    in_single_quote = true;
                } else {
                    in_double_quote = true;
                }
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_ignores_layout() {
        assert_eq!(
            short_hash("CREATE  FUNCTION\n  f()"),
            short_hash("CREATE FUNCTION f()")
        );
    }

    #[test]
    fn test_hash_keeps_quoted_whitespace() {
        assert_ne!(short_hash("SELECT 'a  b'"), short_hash("SELECT 'a b'"));
    }

    #[test]
    fn test_hash_is_stable() {
        let sql = "CREATE OR REPLACE FUNCTION \"DB\".\"S\".\"F\"() RETURNS NUMBER AS '1'";
        assert_eq!(short_hash(sql), short_hash(sql));
        assert_eq!(short_hash(sql).len(), SHORT_HASH_LEN);
    }

    #[test]
    fn test_add_hash_without_comment() {
        let c = add_hash(None, "SELECT 1");
        assert!(c.starts_with('#'));
        assert_eq!(c.len(), 1 + SHORT_HASH_LEN);
        assert_eq!(strip_hash(&c), None);
    }

    #[test]
    fn test_strip_hash_round_trip() {
        let c = add_hash(Some("owned by finance"), "SELECT 1");
        assert_eq!(strip_hash(&c), Some("owned by finance"));
        assert_eq!(strip_hash("plain comment"), Some("plain comment"));
    }

    #[test]
    fn test_matches_hash() {
        let c = add_hash(Some("x"), "SELECT 1");
        assert!(matches_hash(Some(c.as_str()), "SELECT   1"));
        assert!(!matches_hash(Some(c.as_str()), "SELECT 2"));
        assert!(!matches_hash(Some("x"), "SELECT 1"));
        assert!(!matches_hash(None, "SELECT 1"));
    }

    #[test]
    fn test_comment_with_hash_sign_is_not_a_hash() {
        assert_eq!(extract_hash("ticket #42"), None);
    }
}
