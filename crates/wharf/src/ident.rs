//! Canonical object identifiers.
//!
//! Every identifier is normalized on construction (upper-cased, validated)
//! and has exactly one canonical text form. Equality, ordering and hashing
//! all go through that text, so two identifiers are equal iff their text
//! matches.
//!
//! | type | text |
//! |---|---|
//! | [`AccountObjectIdent`] | `DEV__ANALYST` |
//! | [`DatabaseIdent`] | `DEV__ACME` |
//! | [`DatabaseRoleIdent`] | `DEV__ACME.READER` |
//! | [`SchemaIdent`] | `DEV__ACME.SALES` |
//! | [`SchemaObjectIdent`] | `DEV__ACME.SALES.ORDERS` |
//! | [`SchemaObjectIdentWithArgs`] | `DEV__ACME.SALES.TAX(NUMBER,VARCHAR)` |
//! | [`TableConstraintIdent`] | `DEV__ACME.SALES.ORDERS(ID,REGION)` |

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use wharf_sql::{SqlValue, quote_parts};

use crate::{Error, ObjectKind, Result};

/// Common behavior of all identifier types.
pub trait Identifier {
    /// Canonical text form, including the environment prefix.
    fn text(&self) -> String;

    /// Canonical text form without the environment prefix.
    fn text_without_prefix(&self) -> String;

    /// Unquoted name parts, environment prefix applied.
    fn parts(&self) -> Vec<String>;

    /// Quoted form for SQL.
    fn quoted(&self) -> String {
        quote_parts(&self.parts())
    }

    /// Bind as an identifier value for the SQL formatter.
    fn to_sql(&self) -> SqlValue {
        SqlValue::Ident(self.parts())
    }
}

/// Upper-case and validate one name part.
pub fn normalize_part(part: &str) -> Result<String> {
    let part = part.trim().trim_matches('"').to_uppercase();
    let invalid = |reason: &str| Error::InvalidIdentifier {
        name: part.clone(),
        reason: reason.to_string(),
    };

    let first = part.chars().next().ok_or_else(|| invalid("empty name"))?;
    if first.is_ascii_digit() || first == '$' {
        return Err(invalid("must not start with a digit or '$'"));
    }
    if let Some(bad) = part
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
    {
        return Err(invalid(&format!("invalid character '{bad}'")));
    }
    Ok(part)
}

fn normalize_prefix(prefix: &str) -> Result<String> {
    if prefix.is_empty() {
        return Ok(String::new());
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::InvalidIdentifier {
            name: prefix.to_string(),
            reason: "environment prefix may only contain letters, digits and '_'".to_string(),
        });
    }
    Ok(prefix.to_uppercase())
}

/// Reduce an argument type to its base type: `number(10, 2)` becomes `NUMBER`.
pub fn normalize_data_type(data_type: &str) -> Result<String> {
    let base = data_type
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_uppercase();
    if base.is_empty()
        || !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
    {
        return Err(Error::InvalidIdentifier {
            name: data_type.to_string(),
            reason: "invalid argument data type".to_string(),
        });
    }
    Ok(base)
}

/// Strip the environment prefix from an introspected name.
fn strip_prefix<'a>(env_prefix: &str, name: &'a str) -> Result<&'a str> {
    let name = name.trim_matches('"');
    name.strip_prefix(env_prefix)
        .ok_or_else(|| Error::InvalidIdentifier {
            name: name.to_string(),
            reason: format!("does not start with environment prefix '{env_prefix}'"),
        })
}

/// Split dotted text, ignoring dots inside double quotes.
fn split_dotted(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => quoted = !quoted,
            '.' if !quoted => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Split `NAME(A,B)` into `NAME` and `[A, B]`.
fn split_args(text: &str) -> Result<(&str, Vec<&str>)> {
    let Some(open) = text.find('(') else {
        return Ok((text, Vec::new()));
    };
    let inner = text[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| Error::InvalidIdentifier {
            name: text.to_string(),
            reason: "unbalanced parentheses".to_string(),
        })?;
    let args = inner
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    Ok((&text[..open], args))
}

macro_rules! text_identity {
    ($($ty:ident),* $(,)?) => {
        $(
            impl PartialEq for $ty {
                fn eq(&self, other: &Self) -> bool {
                    self.text() == other.text()
                }
            }

            impl Eq for $ty {}

            impl Hash for $ty {
                fn hash<H: Hasher>(&self, state: &mut H) {
                    self.text().hash(state);
                }
            }

            impl PartialOrd for $ty {
                fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                    Some(self.cmp(other))
                }
            }

            impl Ord for $ty {
                fn cmp(&self, other: &Self) -> Ordering {
                    self.text().cmp(&other.text())
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.text())
                }
            }
        )*
    };
}

/// An account-level object: role, warehouse, user, integration, ...
#[derive(Debug, Clone)]
pub struct AccountObjectIdent {
    env_prefix: String,
    name: String,
}

impl AccountObjectIdent {
    pub fn new(env_prefix: &str, name: &str) -> Result<Self> {
        Ok(Self {
            env_prefix: normalize_prefix(env_prefix)?,
            name: normalize_part(name)?,
        })
    }

    /// Parse an introspected name that carries the environment prefix.
    pub fn parse(env_prefix: &str, text: &str) -> Result<Self> {
        let prefix = normalize_prefix(env_prefix)?;
        Self::new(&prefix, strip_prefix(&prefix, text)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Identifier for AccountObjectIdent {
    fn text(&self) -> String {
        format!("{}{}", self.env_prefix, self.name)
    }

    fn text_without_prefix(&self) -> String {
        self.name.clone()
    }

    fn parts(&self) -> Vec<String> {
        vec![self.text()]
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseIdent {
    env_prefix: String,
    database: String,
}

impl DatabaseIdent {
    pub fn new(env_prefix: &str, database: &str) -> Result<Self> {
        Ok(Self {
            env_prefix: normalize_prefix(env_prefix)?,
            database: normalize_part(database)?,
        })
    }

    pub fn parse(env_prefix: &str, text: &str) -> Result<Self> {
        let prefix = normalize_prefix(env_prefix)?;
        Self::new(&prefix, strip_prefix(&prefix, text)?)
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Database name without the environment prefix.
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl Identifier for DatabaseIdent {
    fn text(&self) -> String {
        format!("{}{}", self.env_prefix, self.database)
    }

    fn text_without_prefix(&self) -> String {
        self.database.clone()
    }

    fn parts(&self) -> Vec<String> {
        vec![self.text()]
    }
}

/// A role that lives inside a database.
#[derive(Debug, Clone)]
pub struct DatabaseRoleIdent {
    database: DatabaseIdent,
    name: String,
}

impl DatabaseRoleIdent {
    pub fn new(env_prefix: &str, database: &str, name: &str) -> Result<Self> {
        Ok(Self {
            database: DatabaseIdent::new(env_prefix, database)?,
            name: normalize_part(name)?,
        })
    }

    pub fn database_ident(&self) -> &DatabaseIdent {
        &self.database
    }
}

impl Identifier for DatabaseRoleIdent {
    fn text(&self) -> String {
        format!("{}.{}", self.database.text(), self.name)
    }

    fn text_without_prefix(&self) -> String {
        format!("{}.{}", self.database.database, self.name)
    }

    fn parts(&self) -> Vec<String> {
        vec![self.database.text(), self.name.clone()]
    }
}

#[derive(Debug, Clone)]
pub struct SchemaIdent {
    database: DatabaseIdent,
    schema: String,
}

impl SchemaIdent {
    pub fn new(env_prefix: &str, database: &str, schema: &str) -> Result<Self> {
        Ok(Self {
            database: DatabaseIdent::new(env_prefix, database)?,
            schema: normalize_part(schema)?,
        })
    }

    /// Parse `DEV__ACME.SALES`.
    pub fn parse(env_prefix: &str, text: &str) -> Result<Self> {
        match split_dotted(text).as_slice() {
            [db, schema] => {
                let database = DatabaseIdent::parse(env_prefix, db)?;
                Ok(Self {
                    schema: normalize_part(schema)?,
                    database,
                })
            }
            _ => Err(Error::InvalidIdentifier {
                name: text.to_string(),
                reason: "expected DATABASE.SCHEMA".to_string(),
            }),
        }
    }

    pub fn database_ident(&self) -> &DatabaseIdent {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

impl Identifier for SchemaIdent {
    fn text(&self) -> String {
        format!("{}.{}", self.database.text(), self.schema)
    }

    fn text_without_prefix(&self) -> String {
        format!("{}.{}", self.database.database, self.schema)
    }

    fn parts(&self) -> Vec<String> {
        vec![self.database.text(), self.schema.clone()]
    }
}

#[derive(Debug, Clone)]
pub struct SchemaObjectIdent {
    schema: SchemaIdent,
    name: String,
}

impl SchemaObjectIdent {
    pub fn new(env_prefix: &str, database: &str, schema: &str, name: &str) -> Result<Self> {
        Ok(Self {
            schema: SchemaIdent::new(env_prefix, database, schema)?,
            name: normalize_part(name)?,
        })
    }

    /// Build from an already validated schema.
    pub fn in_schema(schema: &SchemaIdent, name: &str) -> Result<Self> {
        Ok(Self {
            schema: schema.clone(),
            name: normalize_part(name)?,
        })
    }

    /// Parse `DEV__ACME.SALES.ORDERS`.
    pub fn parse(env_prefix: &str, text: &str) -> Result<Self> {
        match split_dotted(text).as_slice() {
            [db, schema, name] => {
                let schema = SchemaIdent::parse(env_prefix, &format!("{db}.{schema}"))?;
                Self::in_schema(&schema, name)
            }
            _ => Err(Error::InvalidIdentifier {
                name: text.to_string(),
                reason: "expected DATABASE.SCHEMA.NAME".to_string(),
            }),
        }
    }

    pub fn schema_ident(&self) -> &SchemaIdent {
        &self.schema
    }

    pub fn database_ident(&self) -> &DatabaseIdent {
        &self.schema.database
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Identifier for SchemaObjectIdent {
    fn text(&self) -> String {
        format!("{}.{}", self.schema.text(), self.name)
    }

    fn text_without_prefix(&self) -> String {
        format!("{}.{}", self.schema.text_without_prefix(), self.name)
    }

    fn parts(&self) -> Vec<String> {
        let mut parts = self.schema.parts();
        parts.push(self.name.clone());
        parts
    }
}

/// A callable (function, procedure) identified by name and argument types.
#[derive(Debug, Clone)]
pub struct SchemaObjectIdentWithArgs {
    object: SchemaObjectIdent,
    data_types: Vec<String>,
}

impl SchemaObjectIdentWithArgs {
    pub fn new(object: SchemaObjectIdent, data_types: &[impl AsRef<str>]) -> Result<Self> {
        Ok(Self {
            object,
            data_types: data_types
                .iter()
                .map(|t| normalize_data_type(t.as_ref()))
                .collect::<Result<_>>()?,
        })
    }

    /// Parse `DEV__ACME.SALES.TAX(NUMBER, VARCHAR)`.
    pub fn parse(env_prefix: &str, text: &str) -> Result<Self> {
        let (name, args) = split_args(text.trim())?;
        Self::new(SchemaObjectIdent::parse(env_prefix, name)?, &args)
    }

    pub fn object(&self) -> &SchemaObjectIdent {
        &self.object
    }

    pub fn data_types(&self) -> &[String] {
        &self.data_types
    }
}

impl Identifier for SchemaObjectIdentWithArgs {
    fn text(&self) -> String {
        format!("{}({})", self.object.text(), self.data_types.join(","))
    }

    fn text_without_prefix(&self) -> String {
        format!(
            "{}({})",
            self.object.text_without_prefix(),
            self.data_types.join(",")
        )
    }

    fn parts(&self) -> Vec<String> {
        self.object.parts()
    }

    fn quoted(&self) -> String {
        format!("{}({})", self.object.quoted(), self.data_types.join(", "))
    }

    fn to_sql(&self) -> SqlValue {
        // Argument types are not identifiers, so the caller renders this raw.
        SqlValue::Str(self.quoted())
    }
}

/// A constraint: the table it belongs to plus its column list.
#[derive(Debug, Clone)]
pub struct TableConstraintIdent {
    table: SchemaObjectIdent,
    columns: Vec<String>,
}

impl TableConstraintIdent {
    pub fn new(table: SchemaObjectIdent, columns: &[impl AsRef<str>]) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::InvalidIdentifier {
                name: table.text(),
                reason: "constraint needs at least one column".to_string(),
            });
        }
        Ok(Self {
            table,
            columns: columns
                .iter()
                .map(|c| normalize_part(c.as_ref()))
                .collect::<Result<_>>()?,
        })
    }

    pub fn parse(env_prefix: &str, text: &str) -> Result<Self> {
        let (name, columns) = split_args(text.trim())?;
        Self::new(SchemaObjectIdent::parse(env_prefix, name)?, &columns)
    }

    pub fn table_ident(&self) -> &SchemaObjectIdent {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Identifier for TableConstraintIdent {
    fn text(&self) -> String {
        format!("{}({})", self.table.text(), self.columns.join(","))
    }

    fn text_without_prefix(&self) -> String {
        format!(
            "{}({})",
            self.table.text_without_prefix(),
            self.columns.join(",")
        )
    }

    fn parts(&self) -> Vec<String> {
        self.table.parts()
    }
}

/// Any identifier. Used where targets of different kinds are stored side by
/// side, such as grants. Two values are equal only when both the shape and
/// the text match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnyIdent {
    Account(AccountObjectIdent),
    Database(DatabaseIdent),
    DatabaseRole(DatabaseRoleIdent),
    Schema(SchemaIdent),
    SchemaObject(SchemaObjectIdent),
    SchemaObjectWithArgs(SchemaObjectIdentWithArgs),
    TableConstraint(TableConstraintIdent),
}

impl AnyIdent {
    /// Parse introspected text into the identifier shape used by `kind`.
    pub fn parse(kind: ObjectKind, env_prefix: &str, text: &str) -> Result<Self> {
        Ok(match kind {
            ObjectKind::Database => AnyIdent::Database(DatabaseIdent::parse(env_prefix, text)?),
            ObjectKind::Schema => AnyIdent::Schema(SchemaIdent::parse(env_prefix, text)?),
            ObjectKind::Function | ObjectKind::Procedure | ObjectKind::ExternalFunction => {
                AnyIdent::SchemaObjectWithArgs(SchemaObjectIdentWithArgs::parse(env_prefix, text)?)
            }
            k if k.is_constraint() => {
                AnyIdent::TableConstraint(TableConstraintIdent::parse(env_prefix, text)?)
            }
            k if k.is_schema_object() => {
                AnyIdent::SchemaObject(SchemaObjectIdent::parse(env_prefix, text)?)
            }
            k if k.is_env_prefixed() => {
                AnyIdent::Account(AccountObjectIdent::parse(env_prefix, text)?)
            }
            _ => AnyIdent::Account(AccountObjectIdent::new("", text)?),
        })
    }
}

macro_rules! any_ident_dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            AnyIdent::Account($inner) => $body,
            AnyIdent::Database($inner) => $body,
            AnyIdent::DatabaseRole($inner) => $body,
            AnyIdent::Schema($inner) => $body,
            AnyIdent::SchemaObject($inner) => $body,
            AnyIdent::SchemaObjectWithArgs($inner) => $body,
            AnyIdent::TableConstraint($inner) => $body,
        }
    };
}

impl Identifier for AnyIdent {
    fn text(&self) -> String {
        any_ident_dispatch!(self, i => i.text())
    }

    fn text_without_prefix(&self) -> String {
        any_ident_dispatch!(self, i => i.text_without_prefix())
    }

    fn parts(&self) -> Vec<String> {
        any_ident_dispatch!(self, i => i.parts())
    }

    fn quoted(&self) -> String {
        any_ident_dispatch!(self, i => i.quoted())
    }

    fn to_sql(&self) -> SqlValue {
        any_ident_dispatch!(self, i => i.to_sql())
    }
}

macro_rules! any_ident_from {
    ($($variant:ident($ty:ident)),* $(,)?) => {
        $(
            impl From<$ty> for AnyIdent {
                fn from(i: $ty) -> Self {
                    AnyIdent::$variant(i)
                }
            }
        )*
    };
}

any_ident_from!(
    Account(AccountObjectIdent),
    Database(DatabaseIdent),
    DatabaseRole(DatabaseRoleIdent),
    Schema(SchemaIdent),
    SchemaObject(SchemaObjectIdent),
    SchemaObjectWithArgs(SchemaObjectIdentWithArgs),
    TableConstraint(TableConstraintIdent),
);

text_identity!(
    AccountObjectIdent,
    DatabaseIdent,
    DatabaseRoleIdent,
    SchemaIdent,
    SchemaObjectIdent,
    SchemaObjectIdentWithArgs,
    TableConstraintIdent,
);

impl fmt::Display for AnyIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
