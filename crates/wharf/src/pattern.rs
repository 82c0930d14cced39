//! Glob-like identifier patterns.
//!
//! A pattern is one or more sub-patterns separated by `|`. A sub-pattern
//! starting with `!` excludes matching names. `*` matches any run of
//! characters and `?` matches a single character. Matching is
//! case-insensitive and ignores the environment prefix, so `sales.*` selects
//! every schema of the `SALES` database in any environment.

use regex::Regex;

use crate::{Error, Identifier, Result};

#[derive(Debug, Clone)]
pub struct IdentPattern {
    source: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl IdentPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("empty pattern"));
        }

        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for sub in pattern.split('|').map(str::trim) {
            let (negated, body) = match sub.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, sub),
            };
            if body.is_empty() {
                return Err(invalid("empty sub-pattern"));
            }
            let regex = glob_to_regex(body).map_err(|e| invalid(&e.to_string()))?;
            if negated {
                exclude.push(regex);
            } else {
                include.push(regex);
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            include,
            exclude,
        })
    }

    /// Whether the identifier, without its environment prefix, matches.
    pub fn is_match(&self, ident: &impl Identifier) -> bool {
        self.is_match_text(&ident.text_without_prefix())
    }

    /// Match against bare text (already stripped of the environment prefix).
    pub fn is_match_text(&self, text: &str) -> bool {
        let text = text.to_uppercase();
        let included = self.include.is_empty() || self.include.iter().any(|r| r.is_match(&text));
        included && !self.exclude.iter().any(|r| r.is_match(&text))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::with_capacity(glob.len() * 2 + 2);
    re.push('^');
    for c in glob.to_uppercase().chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}
