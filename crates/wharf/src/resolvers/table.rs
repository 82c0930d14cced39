//! Tables.
//!
//! Existing columns come from `DESC TABLE` and are diffed against the
//! declared ones. Most differences are applied in place. The ones the
//! warehouse cannot express as an ALTER (an incompatible type change, a
//! dropped or moved column, a new NOT NULL column) re-create the table with
//! `CREATE OR REPLACE ... COPY GRANTS AS SELECT`, which keeps the data but
//! is gated behind `execute_replace_table`.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use wharf_sql::{SqlParams, escape_string, quote_ident};

use super::{comment_clause, has_option, render, schema_scopes};
use crate::transport::Row;
use crate::{
    Engine, Error, Identifier, ObjectKind, ResolveOutcome, Resolver, Result, SchemaIdent,
    SchemaObjectIdent, TableBlueprint, TableColumn, TaskContext, UnsafeGate,
    normalize_column_type,
};

#[derive(Debug, Clone)]
pub struct ExistingTable {
    pub full_name: SchemaObjectIdent,
    pub is_transient: bool,
    pub cluster_by: Vec<String>,
    pub retention_time: Option<u32>,
    pub change_tracking: bool,
    pub comment: Option<String>,
}

/// A single column-level difference.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnChange {
    /// Add a new column at the end of the table.
    AddColumn(TableColumn),
    /// Drop an existing column.
    DropColumn(String),
    /// Existing columns are no longer in declared order.
    ReorderColumns,
    /// Change a column's type.
    AlterColumnType {
        name: String,
        from: String,
        to: String,
    },
    /// Change a column's nullability.
    AlterColumnNullable { name: String, from: bool, to: bool },
    /// Change a column's default value.
    AlterColumnDefault {
        name: String,
        from: Option<String>,
        to: Option<String>,
    },
    /// Change a column's comment.
    AlterColumnComment {
        name: String,
        from: Option<String>,
        to: Option<String>,
    },
}

impl ColumnChange {
    /// Whether this change can only be applied by re-creating the table.
    pub fn requires_replace(&self) -> bool {
        match self {
            ColumnChange::AddColumn(col) => !col.nullable,
            ColumnChange::DropColumn(_) | ColumnChange::ReorderColumns => true,
            ColumnChange::AlterColumnType { from, to, .. } => !is_widening(from, to),
            // Only sequence defaults can be set on an existing column.
            ColumnChange::AlterColumnDefault { to: Some(default), .. } => {
                !default.to_uppercase().ends_with(".NEXTVAL")
            }
            _ => false,
        }
    }

    /// SQL for an in-place change, with whether it is unsafe.
    fn to_sql(&self, table: &SchemaObjectIdent) -> Result<Option<(String, bool)>> {
        let column = |name: &str| {
            SqlParams::new()
                .bind("table", table.to_sql())
                .bind("column", name)
        };
        let modify = "ALTER TABLE {table:i} MODIFY COLUMN {column:i}";

        Ok(Some(match self {
            ColumnChange::AddColumn(col) => (
                render(
                    "ALTER TABLE {table:i} ADD COLUMN {definition:r}",
                    &SqlParams::new()
                        .bind("table", table.to_sql())
                        .bind("definition", column_definition(col)),
                )?,
                false,
            ),
            ColumnChange::AlterColumnType { name, to, .. } => (
                render(
                    &format!("{modify} SET DATA TYPE {{to:r}}"),
                    &column(name).bind("to", to.as_str()),
                )?,
                false,
            ),
            ColumnChange::AlterColumnNullable { name, to, .. } => {
                if *to {
                    (render(&format!("{modify} DROP NOT NULL"), &column(name))?, false)
                } else {
                    (render(&format!("{modify} SET NOT NULL"), &column(name))?, true)
                }
            }
            ColumnChange::AlterColumnDefault { name, to, .. } => match to {
                Some(default) => (
                    render(
                        &format!("{modify} SET DEFAULT {{default:r}}"),
                        &column(name).bind("default", default.as_str()),
                    )?,
                    false,
                ),
                None => (render(&format!("{modify} DROP DEFAULT"), &column(name))?, true),
            },
            ColumnChange::AlterColumnComment { name, to, .. } => match to {
                Some(comment) => (
                    render(
                        &format!("{modify} COMMENT {{comment}}"),
                        &column(name).bind("comment", comment.as_str()),
                    )?,
                    false,
                ),
                None => (render(&format!("{modify} UNSET COMMENT"), &column(name))?, false),
            },
            ColumnChange::DropColumn(_) | ColumnChange::ReorderColumns => return Ok(None),
        }))
    }
}

impl fmt::Display for ColumnChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnChange::AddColumn(col) => {
                let nullable = if col.nullable { " (nullable)" } else { "" };
                write!(f, "+ {}: {}{}", col.name, col.data_type, nullable)
            }
            ColumnChange::DropColumn(name) => write!(f, "- {name}"),
            ColumnChange::ReorderColumns => write!(f, "~ column order"),
            ColumnChange::AlterColumnType { name, from, to } => {
                write!(f, "~ {name}: {from} -> {to}")
            }
            ColumnChange::AlterColumnNullable { name, to, .. } => {
                let what = if *to { "nullable" } else { "not null" };
                write!(f, "~ {name}: {what}")
            }
            ColumnChange::AlterColumnDefault { name, to, .. } => match to {
                Some(d) => write!(f, "~ {name}: default {d}"),
                None => write!(f, "~ {name}: no default"),
            },
            ColumnChange::AlterColumnComment { name, .. } => write!(f, "~ {name}: comment"),
        }
    }
}

/// Expand the type aliases `DESC TABLE` never reports, so `VARCHAR` and
/// `VARCHAR(16777216)` compare equal.
fn canonical_type(data_type: &str) -> String {
    let t = normalize_column_type(data_type);
    let (base, args) = match t.split_once('(') {
        Some((base, rest)) => (base, Some(rest.trim_end_matches(')'))),
        None => (t.as_str(), None),
    };
    match (base, args) {
        ("VARCHAR" | "STRING" | "TEXT" | "NVARCHAR", None) => "VARCHAR(16777216)".to_string(),
        ("STRING" | "TEXT" | "NVARCHAR", Some(len)) => format!("VARCHAR({len})"),
        ("NUMBER" | "DECIMAL" | "NUMERIC" | "INT" | "INTEGER" | "BIGINT" | "SMALLINT", None) => {
            "NUMBER(38,0)".to_string()
        }
        ("NUMBER" | "DECIMAL" | "NUMERIC", Some(p)) if !p.contains(',') => format!("NUMBER({p},0)"),
        ("DECIMAL" | "NUMERIC", Some(ps)) => format!("NUMBER({ps})"),
        _ => t.clone(),
    }
}

fn type_params(data_type: &str) -> Option<(&str, Vec<u32>)> {
    let (base, rest) = data_type.split_once('(')?;
    let params = rest
        .trim_end_matches(')')
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<u32>>>()?;
    Some((base, params))
}

/// Type changes the warehouse applies in place: longer strings, and more
/// precision at the same scale.
fn is_widening(from: &str, to: &str) -> bool {
    let (Some((from_base, from_params)), Some((to_base, to_params))) =
        (type_params(from), type_params(to))
    else {
        return false;
    };
    if from_base != to_base {
        return false;
    }
    match (from_base, from_params.as_slice(), to_params.as_slice()) {
        ("VARCHAR", [a], [b]) => b >= a,
        ("NUMBER", [p1, s1], [p2, s2]) => s1 == s2 && p2 >= p1,
        _ => false,
    }
}

/// Diff declared columns against existing ones.
pub fn diff_columns(desired: &[TableColumn], current: &[TableColumn]) -> Vec<ColumnChange> {
    let mut changes = Vec::new();

    let desired_names: HashSet<&str> = desired.iter().map(|c| c.name.as_str()).collect();
    let current_names: HashSet<&str> = current.iter().map(|c| c.name.as_str()).collect();

    // Columns to drop
    for col in current {
        if !desired_names.contains(col.name.as_str()) {
            changes.push(ColumnChange::DropColumn(col.name.clone()));
        }
    }

    // Existing columns must keep their relative order, and new columns can
    // only be appended.
    let kept_current: Vec<&str> = current
        .iter()
        .map(|c| c.name.as_str())
        .filter(|n| desired_names.contains(n))
        .collect();
    let kept_desired: Vec<&str> = desired
        .iter()
        .map(|c| c.name.as_str())
        .filter(|n| current_names.contains(n))
        .collect();
    let last_kept = desired
        .iter()
        .rposition(|c| current_names.contains(c.name.as_str()));
    let inserted_before_existing = desired
        .iter()
        .enumerate()
        .any(|(i, c)| !current_names.contains(c.name.as_str()) && last_kept.is_some_and(|l| i < l));
    if kept_current != kept_desired || inserted_before_existing {
        changes.push(ColumnChange::ReorderColumns);
    }

    // Columns to add
    for col in desired {
        if !current_names.contains(col.name.as_str()) {
            changes.push(ColumnChange::AddColumn(col.clone()));
        }
    }

    // Columns in both
    for desired_col in desired {
        let Some(current_col) = current.iter().find(|c| c.name == desired_col.name) else {
            continue;
        };

        let (from, to) = (
            canonical_type(&current_col.data_type),
            canonical_type(&desired_col.data_type),
        );
        if from != to {
            changes.push(ColumnChange::AlterColumnType {
                name: desired_col.name.clone(),
                from,
                to,
            });
        }

        if desired_col.nullable != current_col.nullable {
            changes.push(ColumnChange::AlterColumnNullable {
                name: desired_col.name.clone(),
                from: current_col.nullable,
                to: desired_col.nullable,
            });
        }

        if desired_col.default != current_col.default {
            changes.push(ColumnChange::AlterColumnDefault {
                name: desired_col.name.clone(),
                from: current_col.default.clone(),
                to: desired_col.default.clone(),
            });
        }

        if desired_col.comment != current_col.comment {
            changes.push(ColumnChange::AlterColumnComment {
                name: desired_col.name.clone(),
                from: current_col.comment.clone(),
                to: desired_col.comment.clone(),
            });
        }
    }

    changes
}

fn column_definition(col: &TableColumn) -> String {
    let mut sql = format!("{} {}", quote_ident(&col.name), col.data_type);
    if !col.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        sql.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(comment) = &col.comment {
        sql.push_str(&format!(" COMMENT {}", escape_string(comment)));
    }
    sql
}

/// `LINEAR(A, "B")` → `[A, B]`.
fn parse_cluster_by(text: Option<&str>) -> Vec<String> {
    let Some(text) = text else {
        return Vec::new();
    };
    let inner = text
        .trim()
        .strip_prefix("LINEAR(")
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);
    inner
        .split(',')
        .map(|k| k.trim().trim_matches('"').to_uppercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn normalized_keys(keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|k| k.trim().trim_matches('"').to_uppercase())
        .collect()
}

fn existing_column(row: &Row) -> Option<TableColumn> {
    Some(TableColumn {
        name: row.get_str("name")?.to_uppercase(),
        data_type: normalize_column_type(row.get_str("type")?),
        nullable: row.get_bool("null?"),
        default: row.get_str("default").map(str::to_string),
        comment: row.get_str("comment").map(str::to_string),
    })
}

pub struct TableResolver;

impl TableResolver {
    fn table_options(bp: &TableBlueprint) -> Result<Vec<String>> {
        let mut sql = Vec::new();
        if !bp.cluster_by.is_empty() {
            sql.push(format!("CLUSTER BY ({})", normalized_keys(&bp.cluster_by).join(", ")));
        }
        if let Some(retention) = bp.retention_time {
            sql.push(format!("DATA_RETENTION_TIME_IN_DAYS = {retention}"));
        }
        if bp.change_tracking {
            sql.push("CHANGE_TRACKING = TRUE".to_string());
        }
        sql.extend(comment_clause(bp.comment.as_deref())?);
        Ok(sql)
    }

    fn create_sql(bp: &TableBlueprint) -> Result<String> {
        let definitions = bp
            .columns
            .iter()
            .map(column_definition)
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = vec![render(
            if bp.is_transient {
                "CREATE TRANSIENT TABLE {name:i} ({columns:r})"
            } else {
                "CREATE TABLE {name:i} ({columns:r})"
            },
            &SqlParams::new()
                .bind("name", bp.full_name.to_sql())
                .bind("columns", definitions),
        )?];
        sql.extend(Self::table_options(bp)?);
        Ok(sql.join(" "))
    }

    /// Re-create the table, carrying the data over with casts.
    fn replace_sql(bp: &TableBlueprint, current: &[TableColumn]) -> Result<String> {
        let definitions = bp
            .columns
            .iter()
            .map(column_definition)
            .collect::<Vec<_>>()
            .join(", ");
        let select = bp
            .columns
            .iter()
            .map(|col| {
                let source = if current.iter().any(|c| c.name == col.name) {
                    quote_ident(&col.name)
                } else {
                    col.default.clone().unwrap_or_else(|| "NULL".to_string())
                };
                format!("{source}::{} AS {}", col.data_type, quote_ident(&col.name))
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = vec![render(
            if bp.is_transient {
                "CREATE OR REPLACE TRANSIENT TABLE {name:i} ({columns:r})"
            } else {
                "CREATE OR REPLACE TABLE {name:i} ({columns:r})"
            },
            &SqlParams::new()
                .bind("name", bp.full_name.to_sql())
                .bind("columns", definitions),
        )?];
        sql.extend(Self::table_options(bp)?);
        sql.push(render(
            "COPY GRANTS AS SELECT {select:r} FROM {name:i}",
            &SqlParams::new()
                .bind("name", bp.full_name.to_sql())
                .bind("select", select),
        )?);
        Ok(sql.join(" "))
    }

    fn describe(ctx: &TaskContext<'_>, table: &SchemaObjectIdent) -> Result<Vec<TableColumn>> {
        let rows = ctx.execute_meta(&render(
            "DESC TABLE {name:i}",
            &SqlParams::new().bind("name", table.to_sql()),
        )?)?;
        rows.iter()
            .map(|row| {
                existing_column(row).ok_or_else(|| {
                    Error::Introspection(format!("DESC TABLE {table} returned a row without name or type"))
                })
            })
            .collect()
    }

    /// Table-level ALTERs. Returns whether anything changed.
    fn alter_table(
        ctx: &mut TaskContext<'_>,
        bp: &TableBlueprint,
        existing: &ExistingTable,
    ) -> Result<bool> {
        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("keys", normalized_keys(&bp.cluster_by).join(", "))
            .bind("retention", bp.retention_time)
            .bind("change_tracking", bp.change_tracking)
            .bind("comment", bp.comment.as_deref());
        let mut changed = false;

        if normalized_keys(&bp.cluster_by) != existing.cluster_by {
            let template = if bp.cluster_by.is_empty() {
                "ALTER TABLE {name:i} DROP CLUSTERING KEY"
            } else {
                "ALTER TABLE {name:i} CLUSTER BY ({keys:r})"
            };
            ctx.execute_safe(&render(template, &params)?, true)?;
            changed = true;
        }

        if bp.retention_time.is_some() && bp.retention_time != existing.retention_time {
            ctx.execute_safe(
                &render(
                    "ALTER TABLE {name:i} SET DATA_RETENTION_TIME_IN_DAYS = {retention:d}",
                    &params,
                )?,
                true,
            )?;
            changed = true;
        }

        if bp.change_tracking != existing.change_tracking {
            ctx.execute_safe(
                &render(
                    "ALTER TABLE {name:i} SET CHANGE_TRACKING = {change_tracking:d}",
                    &params,
                )?,
                true,
            )?;
            changed = true;
        }

        if bp.comment != existing.comment {
            let template = if bp.comment.is_some() {
                "ALTER TABLE {name:i} SET COMMENT = {comment}"
            } else {
                "ALTER TABLE {name:i} UNSET COMMENT"
            };
            ctx.execute_safe(&render(template, &params)?, true)?;
            changed = true;
        }

        Ok(changed)
    }
}

impl Resolver for TableResolver {
    type Blueprint = TableBlueprint;
    type Existing = ExistingTable;
    type Scope = SchemaIdent;

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Table
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, TableBlueprint>> {
        Ok(engine.config().get_blueprints::<TableBlueprint>())
    }

    fn introspection_scopes(&self, engine: &Engine) -> Result<Vec<SchemaIdent>> {
        schema_scopes(engine)
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        schema: &SchemaIdent,
    ) -> Result<IndexMap<String, ExistingTable>> {
        let sql = render(
            "SHOW TABLES IN SCHEMA {schema:i}",
            &SqlParams::new().bind("schema", schema.to_sql()),
        )?;

        let mut out = IndexMap::new();
        for row in engine.execute_meta(&sql)? {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            if row.get_bool("is_external")
                || row.get_bool("is_hybrid")
                || row.get_bool("is_dynamic")
                || row
                    .get_str("kind")
                    .is_some_and(|k| k.eq_ignore_ascii_case("TEMPORARY"))
            {
                continue;
            }
            let Ok(full_name) = SchemaObjectIdent::in_schema(schema, name) else {
                engine
                    .intentions()
                    .mark_invalid_name(ObjectKind::Table, &format!("{}.{name}", schema.text()));
                continue;
            };
            out.insert(
                full_name.text(),
                ExistingTable {
                    is_transient: row
                        .get_str("kind")
                        .is_some_and(|k| k.eq_ignore_ascii_case("TRANSIENT"))
                        || has_option(&row, "TRANSIENT"),
                    cluster_by: parse_cluster_by(row.get_str("cluster_by")),
                    retention_time: row.get_u32("retention_time"),
                    change_tracking: row.get_bool("change_tracking"),
                    comment: row.get_str("comment").map(str::to_string),
                    full_name,
                },
            );
        }
        Ok(out)
    }

    fn create_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &TableBlueprint,
    ) -> Result<ResolveOutcome> {
        ctx.execute_safe(&Self::create_sql(bp)?, true)?;
        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &TableBlueprint,
        existing: &ExistingTable,
    ) -> Result<ResolveOutcome> {
        if bp.is_transient != existing.is_transient {
            return Err(Error::unsupported(format!(
                "table {} cannot change between transient and permanent",
                bp.full_name
            )));
        }

        let current = Self::describe(ctx, &bp.full_name)?;
        let changes = diff_columns(&bp.columns, &current);

        if changes.iter().any(ColumnChange::requires_replace) {
            ctx.intentions()
                .mark_replace(ObjectKind::Table, &bp.full_name.text());
            ctx.execute_unsafe(
                &Self::replace_sql(bp, &current)?,
                UnsafeGate::ReplaceTable,
                true,
            )?;
            return Ok(ResolveOutcome::Replace);
        }

        let mut changed = false;
        for change in &changes {
            if let Some((sql, is_unsafe)) = change.to_sql(&bp.full_name)? {
                if is_unsafe {
                    ctx.execute_unsafe(&sql, UnsafeGate::General, true)?;
                } else {
                    ctx.execute_safe(&sql, true)?;
                }
                changed = true;
            }
        }
        changed |= Self::alter_table(ctx, bp, existing)?;

        Ok(if changed {
            ResolveOutcome::Alter
        } else {
            ResolveOutcome::NoChange
        })
    }

    fn drop_object(
        &self,
        ctx: &mut TaskContext<'_>,
        existing: &ExistingTable,
    ) -> Result<ResolveOutcome> {
        ctx.intentions()
            .mark_drop(ObjectKind::Table, &existing.full_name.text());
        ctx.execute_unsafe(
            &render(
                "DROP TABLE {name:i}",
                &SqlParams::new().bind("name", existing.full_name.to_sql()),
            )?,
            UnsafeGate::General,
            true,
        )?;
        Ok(ResolveOutcome::Drop)
    }
}
