//! Masking policies and the columns they are applied to.
//!
//! A policy that is still attached to a column cannot be replaced, so a
//! changed body means: unset every reference, `CREATE OR REPLACE`, then set
//! the declared references again. Every statement here goes through the
//! `execute_masking_policy` gate, since a wrong policy exposes or hides
//! data.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use tracing::debug;
use wharf_config::Edition;
use wharf_sql::{SqlParams, add_hash, matches_hash, quote_ident};

use super::{comment_clause, render, schema_scopes};
use crate::{
    Engine, Identifier, MaskingPolicyBlueprint, ObjectKind, ResolveOutcome, Resolver, Result,
    SchemaIdent, SchemaObjectIdent, TaskContext, UnsafeGate,
};

#[derive(Debug, Clone)]
pub struct ExistingMaskingPolicy {
    pub full_name: SchemaObjectIdent,
    pub comment: Option<String>,
}

/// One column a policy is attached to.
#[derive(Debug, Clone)]
struct ColumnReference {
    kind: ObjectKind,
    object: SchemaObjectIdent,
    column: String,
}

impl ColumnReference {
    fn sql(&self, policy: Option<&SchemaObjectIdent>) -> Result<String> {
        let keyword = if self.kind == ObjectKind::View {
            "VIEW"
        } else {
            "TABLE"
        };
        let params = SqlParams::new()
            .bind("object", self.object.to_sql())
            .bind("column", self.column.as_str());
        match policy {
            Some(policy) => render(
                &format!("ALTER {keyword} {{object:i}} MODIFY COLUMN {{column:i}} SET MASKING POLICY {{policy:i}}"),
                &params.bind("policy", policy.to_sql()),
            ),
            None => render(
                &format!("ALTER {keyword} {{object:i}} MODIFY COLUMN {{column:i}} UNSET MASKING POLICY"),
                &params,
            ),
        }
    }
}

type References = BTreeMap<(String, String), ColumnReference>;

fn declared_references(bp: &MaskingPolicyBlueprint) -> References {
    let mut out = BTreeMap::new();
    for reference in &bp.references {
        for column in &reference.columns {
            let column = column.trim().trim_matches('"').to_uppercase();
            out.insert(
                (reference.object_name.text(), column.clone()),
                ColumnReference {
                    kind: reference.object_kind,
                    object: reference.object_name.clone(),
                    column,
                },
            );
        }
    }
    out
}

pub struct MaskingPolicyResolver;

impl MaskingPolicyResolver {
    fn build_sql(bp: &MaskingPolicyBlueprint, comment: Option<&str>) -> Result<String> {
        let arguments = bp
            .arguments
            .iter()
            .map(|a| format!("{} {}", quote_ident(&a.name), a.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("arguments", arguments)
            .bind("returns", bp.returns.as_str())
            .bind("body", bp.body.trim());

        let mut sql = vec![render(
            "CREATE OR REPLACE MASKING POLICY {name:i} AS ({arguments:r}) RETURNS {returns:r} -> {body:r}",
            &params,
        )?];
        sql.extend(comment_clause(comment)?);
        if bp.exempt_other_policies {
            sql.push("EXEMPT_OTHER_POLICIES = TRUE".to_string());
        }
        Ok(sql.join(" "))
    }

    /// Columns the policy is currently attached to.
    fn existing_references(
        ctx: &TaskContext<'_>,
        policy: &SchemaObjectIdent,
    ) -> Result<References> {
        let sql = render(
            "SELECT * FROM TABLE({db:i}.INFORMATION_SCHEMA.POLICY_REFERENCES(POLICY_NAME => {policy}))",
            &SqlParams::new()
                .bind("db", policy.database_ident().to_sql())
                .bind("policy", policy.quoted()),
        )?;
        let prefix = ctx.engine().env_prefix();

        let mut out = BTreeMap::new();
        for row in ctx.execute_meta(&sql)? {
            let (Some(db), Some(schema), Some(entity), Some(column)) = (
                row.get_str("ref_database_name"),
                row.get_str("ref_schema_name"),
                row.get_str("ref_entity_name"),
                row.get_str("ref_column_name"),
            ) else {
                continue;
            };
            let text = format!("{db}.{schema}.{entity}");
            let Ok(object) = SchemaObjectIdent::parse(prefix, &text) else {
                debug!(policy = %policy, object = %text, "reference outside this environment");
                continue;
            };
            let kind = match row.get_str("ref_entity_domain") {
                Some(domain) if domain.eq_ignore_ascii_case("VIEW") => ObjectKind::View,
                _ => ObjectKind::Table,
            };
            let column = column.to_uppercase();
            out.insert(
                (object.text(), column.clone()),
                ColumnReference {
                    kind,
                    object,
                    column,
                },
            );
        }
        Ok(out)
    }

    fn execute(ctx: &mut TaskContext<'_>, sql: &str) -> Result<()> {
        ctx.execute_unsafe(sql, UnsafeGate::MaskingPolicy, true)
    }

    fn replace(ctx: &mut TaskContext<'_>, bp: &MaskingPolicyBlueprint) -> Result<()> {
        let base = Self::build_sql(bp, bp.comment.as_deref())?;
        let sql = Self::build_sql(bp, Some(&add_hash(bp.comment.as_deref(), &base)))?;
        Self::execute(ctx, &sql)
    }

    fn set_references<'r>(
        ctx: &mut TaskContext<'_>,
        policy: Option<&SchemaObjectIdent>,
        references: impl IntoIterator<Item = &'r ColumnReference>,
    ) -> Result<usize> {
        let mut count = 0;
        for reference in references {
            Self::execute(ctx, &reference.sql(policy)?)?;
            count += 1;
        }
        Ok(count)
    }
}

impl Resolver for MaskingPolicyResolver {
    type Blueprint = MaskingPolicyBlueprint;
    type Existing = ExistingMaskingPolicy;
    type Scope = SchemaIdent;

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::MaskingPolicy
    }

    fn min_edition(&self) -> Edition {
        Edition::Enterprise
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, MaskingPolicyBlueprint>> {
        Ok(engine.config().get_blueprints::<MaskingPolicyBlueprint>())
    }

    fn introspection_scopes(&self, engine: &Engine) -> Result<Vec<SchemaIdent>> {
        schema_scopes(engine)
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        schema: &SchemaIdent,
    ) -> Result<IndexMap<String, ExistingMaskingPolicy>> {
        let sql = render(
            "SHOW MASKING POLICIES IN SCHEMA {schema:i}",
            &SqlParams::new().bind("schema", schema.to_sql()),
        )?;

        let mut out = IndexMap::new();
        for row in engine.execute_meta(&sql)? {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            let Ok(full_name) = SchemaObjectIdent::in_schema(schema, name) else {
                engine.intentions().mark_invalid_name(
                    ObjectKind::MaskingPolicy,
                    &format!("{}.{name}", schema.text()),
                );
                continue;
            };
            out.insert(
                full_name.text(),
                ExistingMaskingPolicy {
                    full_name,
                    comment: row.get_str("comment").map(str::to_string),
                },
            );
        }
        Ok(out)
    }

    fn create_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &MaskingPolicyBlueprint,
    ) -> Result<ResolveOutcome> {
        Self::replace(ctx, bp)?;
        let declared = declared_references(bp);
        Self::set_references(ctx, Some(&bp.full_name), declared.values())?;
        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &MaskingPolicyBlueprint,
        existing: &ExistingMaskingPolicy,
    ) -> Result<ResolveOutcome> {
        let declared = declared_references(bp);
        let current = Self::existing_references(ctx, &bp.full_name)?;

        let base = Self::build_sql(bp, bp.comment.as_deref())?;
        if !matches_hash(existing.comment.as_deref(), &base) {
            Self::set_references(ctx, None, current.values())?;
            Self::replace(ctx, bp)?;
            Self::set_references(ctx, Some(&bp.full_name), declared.values())?;
            return Ok(ResolveOutcome::Replace);
        }

        let unset = Self::set_references(
            ctx,
            None,
            current.iter().filter(|(k, _)| !declared.contains_key(*k)).map(|(_, r)| r),
        )?;
        let set = Self::set_references(
            ctx,
            Some(&bp.full_name),
            declared.iter().filter(|(k, _)| !current.contains_key(*k)).map(|(_, r)| r),
        )?;

        Ok(if unset + set > 0 {
            ResolveOutcome::Alter
        } else {
            ResolveOutcome::NoChange
        })
    }

    fn drop_object(
        &self,
        ctx: &mut TaskContext<'_>,
        existing: &ExistingMaskingPolicy,
    ) -> Result<ResolveOutcome> {
        let current = Self::existing_references(ctx, &existing.full_name)?;
        Self::set_references(ctx, None, current.values())?;
        Self::execute(
            ctx,
            &render(
                "DROP MASKING POLICY {name:i}",
                &SqlParams::new().bind("name", existing.full_name.to_sql()),
            )?,
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
    use crate::{ArgumentWithType, Config, PolicyReference, ResolverStatus, resolve};

    fn policy(body: &str) -> MaskingPolicyBlueprint {
        MaskingPolicyBlueprint {
            full_name: SchemaObjectIdent::new("DEV__", "ACME", "SEC", "MASK_EMAIL").unwrap(),
            arguments: vec![ArgumentWithType::new("val", "VARCHAR")],
            returns: "VARCHAR".to_string(),
            body: body.to_string(),
            exempt_other_policies: false,
            references: vec![PolicyReference {
                object_kind: ObjectKind::Table,
                object_name: SchemaObjectIdent::new("DEV__", "ACME", "CRM", "USERS").unwrap(),
                columns: vec!["email".to_string()],
            }],
            comment: None,
        }
    }

    const BODY: &str = "CASE WHEN CURRENT_ROLE() = 'ADMIN' THEN val ELSE '***' END";

    fn reference_row(column: &str) -> Row {
        Row::new()
            .with("ref_database_name", "DEV__ACME")
            .with("ref_schema_name", "CRM")
            .with("ref_entity_name", "USERS")
            .with("ref_entity_domain", "TABLE")
            .with("ref_column_name", column)
    }

    fn transport(comment: &str, references: Vec<Row>) -> Arc<ScriptedTransport> {
        Arc::new(
            ScriptedTransport::new()
                .respond(
                    "SHOW SCHEMAS IN ACCOUNT",
                    vec![
                        Row::new()
                            .with("database_name", "DEV__ACME")
                            .with("name", "SEC"),
                    ],
                )
                .respond(
                    "SHOW MASKING POLICIES IN SCHEMA",
                    vec![Row::new().with("name", "MASK_EMAIL").with("comment", comment)],
                )
                .respond("SELECT * FROM TABLE(", references),
        )
    }

    fn enterprise() -> Settings {
        Settings {
            edition: Edition::Enterprise,
            ..Settings::apply_all()
        }
    }

    fn hashed(bp: &MaskingPolicyBlueprint) -> String {
        add_hash(None, &MaskingPolicyResolver::build_sql(bp, None).unwrap())
    }

    #[test]
    fn test_policy_sql() {
        insta::assert_snapshot!(
            MaskingPolicyResolver::build_sql(&policy(BODY), Some("hide email")).unwrap(),
            @r#"CREATE OR REPLACE MASKING POLICY "DEV__ACME"."SEC"."MASK_EMAIL" AS ("VAL" VARCHAR) RETURNS VARCHAR -> CASE WHEN CURRENT_ROLE() = 'ADMIN' THEN val ELSE '***' END COMMENT = 'hide email'"#
        );
    }

    #[tokio::test]
    async fn test_standard_edition_skips() {
        let transport = transport("", vec![]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(policy(BODY));

        let settings = Settings {
            edition: Edition::Standard,
            ..Settings::apply_all()
        };

        let result = resolve(
            Arc::new(MaskingPolicyResolver),
            engine(&transport, config, settings),
        )
        .await
        .unwrap();

        assert!(matches!(result.status, ResolverStatus::Skipped(_)));
        assert!(transport.statements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_reference_is_set() {
        let bp = policy(BODY);
        let transport = transport(&hashed(&bp), vec![]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(bp);

        let result = resolve(
            Arc::new(MaskingPolicyResolver),
            engine(&transport, config, enterprise()),
        )
        .await
        .unwrap();

        assert_eq!(
            result.outcomes["DEV__ACME.SEC.MASK_EMAIL"],
            ResolveOutcome::Alter
        );
        assert_eq!(
            transport.ddl(),
            vec!["ALTER TABLE \"DEV__ACME\".\"CRM\".\"USERS\" MODIFY COLUMN \"EMAIL\" SET MASKING POLICY \"DEV__ACME\".\"SEC\".\"MASK_EMAIL\""]
        );
    }

    #[tokio::test]
    async fn test_changed_body_unsets_replaces_and_reapplies() {
        let old = policy("val");
        let transport = transport(&hashed(&old), vec![reference_row("EMAIL")]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(policy(BODY));

        let result = resolve(
            Arc::new(MaskingPolicyResolver),
            engine(&transport, config, enterprise()),
        )
        .await
        .unwrap();

        assert_eq!(
            result.outcomes["DEV__ACME.SEC.MASK_EMAIL"],
            ResolveOutcome::Replace
        );
        let ddl = transport.ddl();
        assert_eq!(ddl.len(), 3);
        assert!(ddl[0].ends_with("UNSET MASKING POLICY"));
        assert!(ddl[1].starts_with("CREATE OR REPLACE MASKING POLICY"));
        assert!(ddl[2].ends_with("SET MASKING POLICY \"DEV__ACME\".\"SEC\".\"MASK_EMAIL\""));
    }

    #[tokio::test]
    async fn test_policy_statements_need_their_own_flag() {
        let bp = policy(BODY);
        let transport = transport(&hashed(&bp), vec![reference_row("PHONE")]);
        let mut config = Config::new("DEV__");
        config.add_blueprint(bp);
        let settings = Settings {
            execute_masking_policy: false,
            ..enterprise()
        };
        let engine = engine(&transport, config, settings);

        let result = resolve(Arc::new(MaskingPolicyResolver), engine.clone())
            .await
            .unwrap();

        assert_eq!(
            result.outcomes["DEV__ACME.SEC.MASK_EMAIL"],
            ResolveOutcome::Alter
        );
        assert!(transport.ddl().is_empty());
        assert_eq!(engine.suggested_ddl().len(), 2);
    }
}
