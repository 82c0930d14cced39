use indexmap::IndexMap;
use wharf_sql::{SqlParams, SqlValue};

use super::{comment_clause, has_option, render, show_databases};
use crate::{
    DatabaseBlueprint, DatabaseIdent, Engine, Error, Identifier, ObjectKind, ResolveOutcome,
    Resolver, Result, TaskContext, UnsafeGate,
};

/// Schema every new database comes with. It is dropped right away so that
/// only declared schemas exist.
const DEFAULT_SCHEMA: &str = "PUBLIC";

#[derive(Debug, Clone)]
pub struct ExistingDatabase {
    pub full_name: DatabaseIdent,
    pub is_transient: bool,
    pub retention_time: Option<u32>,
    pub comment: Option<String>,
}

pub struct DatabaseResolver;

impl Resolver for DatabaseResolver {
    type Blueprint = DatabaseBlueprint;
    type Existing = ExistingDatabase;
    type Scope = ();

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Database
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, DatabaseBlueprint>> {
        Ok(engine.config().get_blueprints::<DatabaseBlueprint>())
    }

    fn introspection_scopes(&self, _engine: &Engine) -> Result<Vec<()>> {
        Ok(vec![()])
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        _: &(),
    ) -> Result<IndexMap<String, ExistingDatabase>> {
        Ok(show_databases(engine)?
            .into_iter()
            .map(|(full_name, row)| {
                let existing = ExistingDatabase {
                    is_transient: has_option(&row, "TRANSIENT"),
                    retention_time: row.get_u32("retention_time"),
                    comment: row.get_str("comment").map(str::to_string),
                    full_name,
                };
                (existing.full_name.text(), existing)
            })
            .collect())
    }

    fn create_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &DatabaseBlueprint,
    ) -> Result<ResolveOutcome> {
        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("retention", bp.retention_time);

        let mut sql = vec![render(
            if bp.is_transient {
                "CREATE TRANSIENT DATABASE {name:i}"
            } else {
                "CREATE DATABASE {name:i}"
            },
            &params,
        )?];
        if bp.retention_time.is_some() {
            sql.push(render("DATA_RETENTION_TIME_IN_DAYS = {retention:d}", &params)?);
        }
        sql.extend(comment_clause(bp.comment.as_deref())?);
        ctx.execute_safe(&sql.join(" "), true)?;

        let public = SqlValue::ident([bp.full_name.text(), DEFAULT_SCHEMA.to_string()]);
        ctx.execute_safe(
            &render("DROP SCHEMA {name:i}", &SqlParams::new().bind("name", public))?,
            true,
        )?;

        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &DatabaseBlueprint,
        existing: &ExistingDatabase,
    ) -> Result<ResolveOutcome> {
        if bp.is_transient != existing.is_transient {
            return Err(Error::unsupported(format!(
                "database {} cannot change between transient and permanent",
                bp.full_name
            )));
        }

        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("retention", bp.retention_time)
            .bind("comment", bp.comment.as_deref());
        let mut changed = false;

        if bp.retention_time.is_some() && bp.retention_time != existing.retention_time {
            ctx.execute_safe(
                &render(
                    "ALTER DATABASE {name:i} SET DATA_RETENTION_TIME_IN_DAYS = {retention:d}",
                    &params,
                )?,
                true,
            )?;
            changed = true;
        }

        if bp.comment != existing.comment {
            let template = if bp.comment.is_some() {
                "ALTER DATABASE {name:i} SET COMMENT = {comment}"
            } else {
                "ALTER DATABASE {name:i} UNSET COMMENT"
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
        existing: &ExistingDatabase,
    ) -> Result<ResolveOutcome> {
        let name = existing.full_name.text();
        ctx.intentions().mark_drop(ObjectKind::Database, &name);
        ctx.execute_unsafe(
            &render(
                "DROP DATABASE {name:i}",
                &SqlParams::new().bind("name", existing.full_name.to_sql()),
            )?,
            UnsafeGate::General,
            true,
        )?;
        Ok(ResolveOutcome::Drop)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wharf_config::Settings;

    use super::*;
    use crate::resolvers::testing::{ScriptedTransport, engine};
    use crate::transport::Row;
    use crate::{Config, resolve};

    fn config(dbs: &[&str]) -> Config {
        let mut config = Config::new("DEV__");
        for db in dbs {
            config.add_blueprint(DatabaseBlueprint::new(DatabaseIdent::new("DEV__", db).unwrap()));
        }
        config
    }

    #[tokio::test]
    async fn test_create_drops_public_schema() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(&transport, config(&["ACME"]), Settings::apply_all());

        let result = resolve(Arc::new(DatabaseResolver), engine).await.unwrap();

        assert_eq!(result.outcomes["DEV__ACME"], ResolveOutcome::Create);
        assert_eq!(
            transport.ddl(),
            vec![
                "CREATE DATABASE \"DEV__ACME\"",
                "DROP SCHEMA \"DEV__ACME\".\"PUBLIC\""
            ]
        );
    }

    #[tokio::test]
    async fn test_foreign_and_shared_databases_are_ignored() {
        let transport = Arc::new(ScriptedTransport::new().respond(
            "SHOW DATABASES",
            vec![
                Row::new().with("name", "DEV__ACME").with("retention_time", "1"),
                Row::new().with("name", "PROD__ACME"),
                Row::new().with("name", "DEV__SHARED").with("origin", "ORG.ACCT.SHARE"),
            ],
        ));
        let engine = engine(&transport, config(&["ACME"]), Settings::apply_all());

        let result = resolve(Arc::new(DatabaseResolver), engine).await.unwrap();

        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes["DEV__ACME"], ResolveOutcome::NoChange);
        assert!(transport.ddl().is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_database_is_dropped_and_marked() {
        let transport = Arc::new(ScriptedTransport::new().respond(
            "SHOW DATABASES",
            vec![Row::new().with("name", "DEV__OLD")],
        ));
        let engine = engine(&transport, config(&[]), Settings::apply_all());

        let result = resolve(Arc::new(DatabaseResolver), engine.clone())
            .await
            .unwrap();

        assert_eq!(result.outcomes["DEV__OLD"], ResolveOutcome::Drop);
        assert_eq!(transport.ddl(), vec!["DROP DATABASE \"DEV__OLD\""]);
        assert!(engine.intentions().is_marked_drop(ObjectKind::Database, "DEV__OLD"));
    }

    #[tokio::test]
    async fn test_transient_flip_is_unsupported() {
        let transport = Arc::new(ScriptedTransport::new().respond(
            "SHOW DATABASES",
            vec![Row::new().with("name", "DEV__ACME").with("options", "TRANSIENT")],
        ));
        let engine = engine(&transport, config(&["ACME"]), Settings::apply_all());

        let result = resolve(Arc::new(DatabaseResolver), engine).await.unwrap();

        assert_eq!(result.outcomes["DEV__ACME"], ResolveOutcome::Unsupported);
        assert!(transport.ddl().is_empty());
    }

    #[tokio::test]
    async fn test_comment_and_retention_are_altered() {
        let transport = Arc::new(ScriptedTransport::new().respond(
            "SHOW DATABASES",
            vec![Row::new().with("name", "DEV__ACME").with("comment", "old")],
        ));
        let mut config = Config::new("DEV__");
        let mut bp = DatabaseBlueprint::new(DatabaseIdent::new("DEV__", "ACME").unwrap());
        bp.retention_time = Some(7);
        bp.comment = Some("new".to_string());
        config.add_blueprint(bp);
        let engine = engine(&transport, config, Settings::apply_all());

        let result = resolve(Arc::new(DatabaseResolver), engine).await.unwrap();

        assert_eq!(result.outcomes["DEV__ACME"], ResolveOutcome::Alter);
        insta::assert_debug_snapshot!(transport.ddl(), @r#"
        [
            "ALTER DATABASE \"DEV__ACME\" SET DATA_RETENTION_TIME_IN_DAYS = 7",
            "ALTER DATABASE \"DEV__ACME\" SET COMMENT = 'new'",
        ]
        "#);
    }
}
