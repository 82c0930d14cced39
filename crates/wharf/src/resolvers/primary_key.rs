use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use wharf_sql::{SqlParams, quote_ident};

use super::{render, schema_scopes};
use crate::{
    Engine, Identifier, ObjectKind, PrimaryKeyBlueprint, ResolveOutcome, Resolver, Result,
    SchemaIdent, SchemaObjectIdent, TableConstraintIdent, TaskContext, UnsafeGate,
};

#[derive(Debug, Clone)]
pub struct ExistingPrimaryKey {
    pub full_name: TableConstraintIdent,
    pub constraint_name: Option<String>,
}

/// Primary keys are named after their table and column list, so a changed
/// column list shows up as a new key plus an undeclared old one. The old
/// key is dropped as part of creating the new one, since a table has at
/// most one.
#[derive(Default)]
pub struct PrimaryKeyResolver {
    /// Existing key per table, filled during introspection.
    by_table: Mutex<HashMap<String, TableConstraintIdent>>,
}

impl PrimaryKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_for_table(&self, table: &SchemaObjectIdent) -> Option<TableConstraintIdent> {
        self.by_table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table.text())
            .cloned()
    }

    fn add_sql(bp: &PrimaryKeyBlueprint) -> Result<String> {
        let columns = bp
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        render(
            "ALTER TABLE {table:i} ADD PRIMARY KEY ({columns:r})",
            &SqlParams::new()
                .bind("table", bp.table_name.to_sql())
                .bind("columns", columns),
        )
    }

    fn drop_sql(table: &SchemaObjectIdent) -> Result<String> {
        render(
            "ALTER TABLE {table:i} DROP PRIMARY KEY",
            &SqlParams::new().bind("table", table.to_sql()),
        )
    }
}

impl Resolver for PrimaryKeyResolver {
    type Blueprint = PrimaryKeyBlueprint;
    type Existing = ExistingPrimaryKey;
    type Scope = SchemaIdent;

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::PrimaryKey
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, PrimaryKeyBlueprint>> {
        Ok(engine.config().get_blueprints::<PrimaryKeyBlueprint>())
    }

    fn introspection_scopes(&self, engine: &Engine) -> Result<Vec<SchemaIdent>> {
        self.by_table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        schema_scopes(engine)
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        schema: &SchemaIdent,
    ) -> Result<IndexMap<String, ExistingPrimaryKey>> {
        let sql = render(
            "SHOW PRIMARY KEYS IN SCHEMA {schema:i}",
            &SqlParams::new().bind("schema", schema.to_sql()),
        )?;

        // table -> (constraint name, [(position, column)])
        let mut tables: IndexMap<String, (Option<String>, Vec<(i64, String)>)> = IndexMap::new();
        for row in engine.execute_meta(&sql)? {
            let (Some(table), Some(column)) = (row.get_str("table_name"), row.get_str("column_name"))
            else {
                continue;
            };
            let entry = tables
                .entry(table.to_string())
                .or_insert_with(|| (row.get_str("constraint_name").map(str::to_string), Vec::new()));
            entry
                .1
                .push((row.get_i64("key_sequence").unwrap_or_default(), column.to_string()));
        }

        let mut out = IndexMap::new();
        for (table, (constraint_name, mut columns)) in tables {
            columns.sort_by_key(|(position, _)| *position);
            let columns: Vec<String> = columns.into_iter().map(|(_, c)| c).collect();
            let full_name = SchemaObjectIdent::in_schema(schema, &table)
                .and_then(|t| TableConstraintIdent::new(t, &columns));
            let Ok(full_name) = full_name else {
                engine.intentions().mark_invalid_name(
                    ObjectKind::PrimaryKey,
                    &format!("{}.{table}({})", schema.text(), columns.join(",")),
                );
                continue;
            };
            self.by_table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(full_name.table_ident().text(), full_name.clone());
            out.insert(
                full_name.text(),
                ExistingPrimaryKey {
                    full_name,
                    constraint_name,
                },
            );
        }
        Ok(out)
    }

    fn create_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &PrimaryKeyBlueprint,
    ) -> Result<ResolveOutcome> {
        let table_replaced = ctx
            .intentions()
            .is_marked_replace(ObjectKind::Table, &bp.table_name.text());

        if !table_replaced && self.existing_for_table(&bp.table_name).is_some() {
            ctx.execute_unsafe(&Self::drop_sql(&bp.table_name)?, UnsafeGate::General, true)?;
            ctx.execute_safe(&Self::add_sql(bp)?, true)?;
            return Ok(ResolveOutcome::Replace);
        }

        ctx.execute_safe(&Self::add_sql(bp)?, true)?;
        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &PrimaryKeyBlueprint,
        _existing: &ExistingPrimaryKey,
    ) -> Result<ResolveOutcome> {
        // A re-created table comes back without its constraints.
        if ctx
            .intentions()
            .is_marked_replace(ObjectKind::Table, &bp.table_name.text())
        {
            ctx.execute_safe(&Self::add_sql(bp)?, true)?;
            return Ok(ResolveOutcome::Replace);
        }
        Ok(ResolveOutcome::NoChange)
    }

    fn drop_object(
        &self,
        ctx: &mut TaskContext<'_>,
        existing: &ExistingPrimaryKey,
    ) -> Result<ResolveOutcome> {
        ctx.execute_unsafe(
            &Self::drop_sql(existing.full_name.table_ident())?,
            UnsafeGate::General,
            true,
        )?;
        Ok(ResolveOutcome::Drop)
    }

    fn should_drop(&self, engine: &Engine, name: &str, existing: &ExistingPrimaryKey) -> bool {
        let kind = self.object_kind();
        if engine.intentions().is_parent_marked_drop(kind, name) || engine.is_sandboxed(kind, name)
        {
            return false;
        }
        let table = existing.full_name.table_ident().text();
        if engine.intentions().is_marked_replace(ObjectKind::Table, &table) {
            return false;
        }
        // Replaced by the declared key for the same table.
        !engine
            .config()
            .get_blueprints::<PrimaryKeyBlueprint>()
            .values()
            .any(|bp| bp.table_name.text() == table)
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

    fn key(columns: &[&str]) -> PrimaryKeyBlueprint {
        let table = SchemaObjectIdent::new("DEV__", "ACME", "SALES", "ORDERS").unwrap();
        PrimaryKeyBlueprint::new(TableConstraintIdent::new(table, columns).unwrap())
    }

    fn transport(keys: Vec<Row>) -> Arc<ScriptedTransport> {
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
                .respond("SHOW PRIMARY KEYS IN SCHEMA", keys),
        )
    }

    fn key_row(column: &str, position: i64) -> Row {
        Row::new()
            .with("table_name", "ORDERS")
            .with("column_name", column)
            .with("key_sequence", position)
            .with("constraint_name", "SYS_CONSTRAINT_1")
    }

    #[tokio::test]
    async fn test_existing_key_columns_follow_key_sequence() {
        let transport = transport(vec![key_row("LINE", 2), key_row("ID", 1)]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(key(&["id", "line"]));

        let result = resolve(
            Arc::new(PrimaryKeyResolver::new()),
            engine(&transport, config, Settings::apply_all()),
        )
        .await
        .unwrap();

        assert_eq!(
            result.outcomes["DEV__ACME.SALES.ORDERS(ID,LINE)"],
            ResolveOutcome::NoChange
        );
        assert!(transport.ddl().is_empty());
    }

    #[tokio::test]
    async fn test_changed_columns_replace_the_key() {
        let transport = transport(vec![key_row("ID", 1)]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(key(&["id", "line"]));

        let result = resolve(
            Arc::new(PrimaryKeyResolver::new()),
            engine(&transport, config, Settings::apply_all()),
        )
        .await
        .unwrap();

        assert_eq!(
            result.outcomes["DEV__ACME.SALES.ORDERS(ID,LINE)"],
            ResolveOutcome::Replace
        );
        assert!(!result.outcomes.contains_key("DEV__ACME.SALES.ORDERS(ID)"));
        insta::assert_debug_snapshot!(transport.ddl(), @r#"
        [
            "ALTER TABLE \"DEV__ACME\".\"SALES\".\"ORDERS\" DROP PRIMARY KEY",
            "ALTER TABLE \"DEV__ACME\".\"SALES\".\"ORDERS\" ADD PRIMARY KEY (\"ID\", \"LINE\")",
        ]
        "#);
    }

    #[tokio::test]
    async fn test_replaced_table_gets_its_key_back() {
        let transport = transport(vec![key_row("ID", 1)]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(key(&["id"]));
        let engine = engine(&transport, config, Settings::apply_all());
        engine
            .intentions()
            .mark_replace(ObjectKind::Table, "DEV__ACME.SALES.ORDERS");

        let result = resolve(Arc::new(PrimaryKeyResolver::new()), engine)
            .await
            .unwrap();

        assert_eq!(
            result.outcomes["DEV__ACME.SALES.ORDERS(ID)"],
            ResolveOutcome::Replace
        );
        assert_eq!(
            transport.ddl(),
            vec!["ALTER TABLE \"DEV__ACME\".\"SALES\".\"ORDERS\" ADD PRIMARY KEY (\"ID\")"]
        );
    }

    #[tokio::test]
    async fn test_undeclared_key_is_dropped() {
        let transport = transport(vec![key_row("ID", 1)]);
        let result = resolve(
            Arc::new(PrimaryKeyResolver::new()),
            engine(&transport, Config::new("DEV__"), Settings::apply_all()),
        )
        .await
        .unwrap();
        assert_eq!(
            result.outcomes["DEV__ACME.SALES.ORDERS(ID)"],
            ResolveOutcome::Drop
        );
    }

    #[tokio::test]
    async fn test_key_of_dropped_table_is_left_alone() {
        let transport = transport(vec![key_row("ID", 1)]);
        let engine = engine(&transport, Config::new("DEV__"), Settings::apply_all());
        engine
            .intentions()
            .mark_drop(ObjectKind::Table, "DEV__ACME.SALES.ORDERS");
        let result = resolve(Arc::new(PrimaryKeyResolver::new()), engine)
            .await
            .unwrap();
        assert!(result.outcomes.is_empty());
        assert!(transport.ddl().is_empty());
    }
}
