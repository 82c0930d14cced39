use indexmap::IndexMap;
use wharf_sql::{SqlParams, add_hash, matches_hash};

use super::{comment_clause, render, schema_scopes};
use crate::{
    Engine, Identifier, ObjectKind, ResolveOutcome, Resolver, Result, SchemaIdent,
    SchemaObjectIdent, TaskContext, UnsafeGate, ViewBlueprint,
};

#[derive(Debug, Clone)]
pub struct ExistingView {
    pub full_name: SchemaObjectIdent,
    pub is_secure: bool,
    pub comment: Option<String>,
}

/// Views are always re-created with `COPY GRANTS`. Whether that is needed
/// is decided by the hash stored in the comment.
pub struct ViewResolver;

impl ViewResolver {
    fn build_sql(bp: &ViewBlueprint, comment: Option<&str>) -> Result<String> {
        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("text", bp.text.trim());

        let mut sql = vec![render(
            if bp.is_secure {
                "CREATE OR REPLACE SECURE VIEW {name:i}"
            } else {
                "CREATE OR REPLACE VIEW {name:i}"
            },
            &params,
        )?];
        sql.extend(comment_clause(comment)?);
        sql.push(render("COPY GRANTS AS {text:r}", &params)?);
        Ok(sql.join(" "))
    }

    fn replace(&self, ctx: &mut TaskContext<'_>, bp: &ViewBlueprint) -> Result<()> {
        let base = Self::build_sql(bp, bp.comment.as_deref())?;
        let sql = Self::build_sql(bp, Some(&add_hash(bp.comment.as_deref(), &base)))?;
        ctx.execute_safe(&sql, true)
    }
}

impl Resolver for ViewResolver {
    type Blueprint = ViewBlueprint;
    type Existing = ExistingView;
    type Scope = SchemaIdent;

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::View
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, ViewBlueprint>> {
        Ok(engine.config().get_blueprints::<ViewBlueprint>())
    }

    fn introspection_scopes(&self, engine: &Engine) -> Result<Vec<SchemaIdent>> {
        schema_scopes(engine)
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        schema: &SchemaIdent,
    ) -> Result<IndexMap<String, ExistingView>> {
        let sql = render(
            "SHOW VIEWS IN SCHEMA {schema:i}",
            &SqlParams::new().bind("schema", schema.to_sql()),
        )?;

        let mut out = IndexMap::new();
        for row in engine.execute_meta(&sql)? {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            // Materialized views are a separate kind.
            if row.get_bool("is_materialized") {
                continue;
            }
            let Ok(full_name) = SchemaObjectIdent::in_schema(schema, name) else {
                engine
                    .intentions()
                    .mark_invalid_name(ObjectKind::View, &format!("{}.{name}", schema.text()));
                continue;
            };
            out.insert(
                full_name.text(),
                ExistingView {
                    full_name,
                    is_secure: row.get_bool("is_secure"),
                    comment: row.get_str("comment").map(str::to_string),
                },
            );
        }
        Ok(out)
    }

    fn create_object(&self, ctx: &mut TaskContext<'_>, bp: &ViewBlueprint) -> Result<ResolveOutcome> {
        self.replace(ctx, bp)?;
        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &ViewBlueprint,
        existing: &ExistingView,
    ) -> Result<ResolveOutcome> {
        let base = Self::build_sql(bp, bp.comment.as_deref())?;
        if bp.is_secure == existing.is_secure && matches_hash(existing.comment.as_deref(), &base) {
            return Ok(ResolveOutcome::NoChange);
        }
        self.replace(ctx, bp)?;
        Ok(ResolveOutcome::Replace)
    }

    fn drop_object(
        &self,
        ctx: &mut TaskContext<'_>,
        existing: &ExistingView,
    ) -> Result<ResolveOutcome> {
        ctx.execute_unsafe(
            &render(
                "DROP VIEW {name:i}",
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

    fn view(name: &str, text: &str) -> ViewBlueprint {
        ViewBlueprint {
            full_name: SchemaObjectIdent::new("DEV__", "ACME", "SALES", name).unwrap(),
            text: text.to_string(),
            is_secure: false,
            comment: None,
            depends_on: Vec::new(),
        }
    }

    fn transport(views: Vec<Row>) -> Arc<ScriptedTransport> {
        Arc::new(
            ScriptedTransport::new()
                .respond(
                    "SHOW SCHEMAS IN ACCOUNT",
                    vec![
                        Row::new()
                            .with("database_name", "DEV__ACME")
                            .with("name", "SALES"),
                    ],
                )
                .respond("SHOW VIEWS IN SCHEMA", views),
        )
    }

    #[test]
    fn test_view_sql() {
        let mut bp = view("DAILY", "  SELECT 1 AS X\n");
        bp.is_secure = true;
        bp.comment = Some("daily totals".to_string());
        insta::assert_snapshot!(
            ViewResolver::build_sql(&bp, bp.comment.as_deref()).unwrap(),
            @r#"CREATE OR REPLACE SECURE VIEW "DEV__ACME"."SALES"."DAILY" COMMENT = 'daily totals' COPY GRANTS AS SELECT 1 AS X"#
        );
    }

    #[tokio::test]
    async fn test_dependencies_are_created_first() {
        let transport = transport(vec![]);
        let mut config = Config::new("DEV__");
        let mut daily = view("DAILY", "SELECT * FROM DEV__ACME.SALES.BASE");
        daily
            .depends_on
            .push(SchemaObjectIdent::new("DEV__", "ACME", "SALES", "BASE").unwrap());
        config.add_blueprint(daily);
        config.add_blueprint(view("BASE", "SELECT 1 AS X"));

        let result = resolve(
            Arc::new(ViewResolver),
            engine(&transport, config, Settings::apply_all()),
        )
        .await
        .unwrap();

        assert_eq!(result.count(ResolveOutcome::Create), 2);
        let ddl = transport.ddl();
        assert!(ddl[0].contains("\"BASE\""));
        assert!(ddl[1].contains("\"DAILY\""));
    }

    #[tokio::test]
    async fn test_materialized_views_are_ignored_and_secure_flip_replaces() {
        let bp = view("DAILY", "SELECT 1 AS X");
        let base = ViewResolver::build_sql(&bp, None).unwrap();
        let transport = transport(vec![
            Row::new()
                .with("name", "DAILY")
                .with("is_secure", "true")
                .with("comment", add_hash(None, &base).as_str()),
            Row::new().with("name", "ROLLUP").with("is_materialized", "true"),
        ]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(bp);

        let result = resolve(
            Arc::new(ViewResolver),
            engine(&transport, config, Settings::apply_all()),
        )
        .await
        .unwrap();

        assert_eq!(result.outcomes["DEV__ACME.SALES.DAILY"], ResolveOutcome::Replace);
        assert!(!result.outcomes.contains_key("DEV__ACME.SALES.ROLLUP"));
    }
}
