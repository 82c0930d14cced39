use indexmap::IndexMap;
use wharf_sql::SqlParams;

use super::{comment_clause, database_scopes, has_option, render};
use crate::{
    DatabaseIdent, Engine, Error, Identifier, ObjectKind, ResolveOutcome, Resolver, Result,
    SchemaBlueprint, SchemaIdent, TaskContext, UnsafeGate,
};

#[derive(Debug, Clone)]
pub struct ExistingSchema {
    pub full_name: SchemaIdent,
    pub is_transient: bool,
    pub is_managed_access: bool,
    pub retention_time: Option<u32>,
    pub comment: Option<String>,
}

/// Schemas are introspected one database at a time.
pub struct SchemaResolver;

impl Resolver for SchemaResolver {
    type Blueprint = SchemaBlueprint;
    type Existing = ExistingSchema;
    type Scope = DatabaseIdent;

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Schema
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, SchemaBlueprint>> {
        Ok(engine.config().get_blueprints::<SchemaBlueprint>())
    }

    fn introspection_scopes(&self, engine: &Engine) -> Result<Vec<DatabaseIdent>> {
        database_scopes(engine)
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        db: &DatabaseIdent,
    ) -> Result<IndexMap<String, ExistingSchema>> {
        let sql = render(
            "SHOW SCHEMAS IN DATABASE {db:i}",
            &SqlParams::new().bind("db", db.to_sql()),
        )?;

        let mut out = IndexMap::new();
        for row in engine.execute_meta(&sql)? {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            if name.eq_ignore_ascii_case("INFORMATION_SCHEMA") {
                continue;
            }
            let full_name = match SchemaIdent::parse(engine.env_prefix(), &format!("{}.{name}", db.text())) {
                Ok(ident) => ident,
                Err(_) => {
                    engine
                        .intentions()
                        .mark_invalid_name(ObjectKind::Schema, &format!("{}.{name}", db.text()));
                    continue;
                }
            };
            out.insert(
                full_name.text(),
                ExistingSchema {
                    is_transient: has_option(&row, "TRANSIENT"),
                    is_managed_access: has_option(&row, "MANAGED ACCESS"),
                    retention_time: row.get_u32("retention_time"),
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
        bp: &SchemaBlueprint,
    ) -> Result<ResolveOutcome> {
        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("retention", bp.retention_time);

        let mut sql = vec![render(
            if bp.is_transient {
                "CREATE TRANSIENT SCHEMA {name:i}"
            } else {
                "CREATE SCHEMA {name:i}"
            },
            &params,
        )?];
        if bp.is_managed_access {
            sql.push("WITH MANAGED ACCESS".to_string());
        }
        if bp.retention_time.is_some() {
            sql.push(render("DATA_RETENTION_TIME_IN_DAYS = {retention:d}", &params)?);
        }
        sql.extend(comment_clause(bp.comment.as_deref())?);
        ctx.execute_safe(&sql.join(" "), true)?;

        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &SchemaBlueprint,
        existing: &ExistingSchema,
    ) -> Result<ResolveOutcome> {
        if bp.is_transient != existing.is_transient {
            return Err(Error::unsupported(format!(
                "schema {} cannot change between transient and permanent",
                bp.full_name
            )));
        }

        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("retention", bp.retention_time)
            .bind("comment", bp.comment.as_deref());
        let mut changed = false;

        if bp.is_managed_access != existing.is_managed_access {
            let template = if bp.is_managed_access {
                "ALTER SCHEMA {name:i} ENABLE MANAGED ACCESS"
            } else {
                "ALTER SCHEMA {name:i} DISABLE MANAGED ACCESS"
            };
            ctx.execute_safe(&render(template, &params)?, true)?;
            changed = true;
        }

        if bp.retention_time.is_some() && bp.retention_time != existing.retention_time {
            ctx.execute_safe(
                &render(
                    "ALTER SCHEMA {name:i} SET DATA_RETENTION_TIME_IN_DAYS = {retention:d}",
                    &params,
                )?,
                true,
            )?;
            changed = true;
        }

        if bp.comment != existing.comment {
            let template = if bp.comment.is_some() {
                "ALTER SCHEMA {name:i} SET COMMENT = {comment}"
            } else {
                "ALTER SCHEMA {name:i} UNSET COMMENT"
            };
            ctx.execute_safe(&render(template, &params)?, true)?;
            changed = true;
        }

        Ok(if changed {
            ResolveOutcome::Alter
        } else {
            ResolveOutcome::NoChange
        })
    }

    fn drop_object(
        &self,
        ctx: &mut TaskContext<'_>,
        existing: &ExistingSchema,
    ) -> Result<ResolveOutcome> {
        ctx.intentions()
            .mark_drop(ObjectKind::Schema, &existing.full_name.text());
        ctx.execute_unsafe(
            &render(
                "DROP SCHEMA {name:i}",
                &SqlParams::new().bind("name", existing.full_name.to_sql()),
            )?,
            UnsafeGate::General,
            true,
        )?;
        Ok(ResolveOutcome::Drop)
    }
}
