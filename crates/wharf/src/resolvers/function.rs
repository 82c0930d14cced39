use indexmap::IndexMap;
use wharf_sql::{SqlParams, add_hash, matches_hash, quote_ident};

use super::{comment_clause, render, schema_scopes};
use crate::{
    Engine, FunctionBlueprint, Identifier, ObjectKind, ResolveOutcome, Resolver, Result,
    SchemaIdent, SchemaObjectIdentWithArgs, TaskContext, UnsafeGate,
};

#[derive(Debug, Clone)]
pub struct ExistingFunction {
    pub full_name: SchemaObjectIdentWithArgs,
    pub comment: Option<String>,
}

/// User-defined functions. The body cannot be read back reliably, so
/// changes are detected by the hash stored in the comment and applied with
/// `CREATE OR REPLACE`.
pub struct FunctionResolver;

impl FunctionResolver {
    fn build_sql(bp: &FunctionBlueprint, comment: Option<&str>) -> Result<String> {
        let arguments = bp
            .arguments
            .iter()
            .map(|a| format!("{} {}", quote_ident(&a.name), a.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        let params = SqlParams::new()
            .bind("name", bp.full_name.object().quoted())
            .bind("arguments", arguments)
            .bind("returns", bp.returns.as_str())
            .bind("language", bp.language.to_uppercase())
            .bind("runtime_version", bp.runtime_version.as_deref())
            .bind("body", bp.body.as_str());

        let mut sql = vec![render(
            if bp.is_secure {
                "CREATE OR REPLACE SECURE FUNCTION {name:r}({arguments:r})"
            } else {
                "CREATE OR REPLACE FUNCTION {name:r}({arguments:r})"
            },
            &params,
        )?];
        sql.push(render("RETURNS {returns:r} LANGUAGE {language:r}", &params)?);
        if bp.runtime_version.is_some() {
            sql.push(render("RUNTIME_VERSION = {runtime_version}", &params)?);
        }
        if bp.is_immutable {
            sql.push("IMMUTABLE".to_string());
        }
        sql.extend(comment_clause(comment)?);
        sql.push(render("AS {body}", &params)?);
        Ok(sql.join(" "))
    }

    fn replace(&self, ctx: &mut TaskContext<'_>, bp: &FunctionBlueprint) -> Result<()> {
        let base = Self::build_sql(bp, bp.comment.as_deref())?;
        let sql = Self::build_sql(bp, Some(&add_hash(bp.comment.as_deref(), &base)))?;
        ctx.execute_safe(&sql, true)
    }
}

/// `TAX(NUMBER, VARCHAR) RETURN NUMBER` → `TAX(NUMBER, VARCHAR)`.
fn signature(arguments: &str) -> &str {
    arguments
        .rsplit_once(" RETURN ")
        .map_or(arguments, |(signature, _)| signature)
        .trim()
}

impl Resolver for FunctionResolver {
    type Blueprint = FunctionBlueprint;
    type Existing = ExistingFunction;
    type Scope = SchemaIdent;

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Function
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, FunctionBlueprint>> {
        Ok(engine.config().get_blueprints::<FunctionBlueprint>())
    }

    fn introspection_scopes(&self, engine: &Engine) -> Result<Vec<SchemaIdent>> {
        schema_scopes(engine)
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        schema: &SchemaIdent,
    ) -> Result<IndexMap<String, ExistingFunction>> {
        let sql = render(
            "SHOW USER FUNCTIONS IN SCHEMA {schema:i}",
            &SqlParams::new().bind("schema", schema.to_sql()),
        )?;

        let mut out = IndexMap::new();
        for row in engine.execute_meta(&sql)? {
            let Some(arguments) = row.get_str("arguments") else {
                continue;
            };
            let text = format!("{}.{}", schema.text(), signature(arguments));
            match SchemaObjectIdentWithArgs::parse(engine.env_prefix(), &text) {
                Ok(full_name) => {
                    out.insert(
                        full_name.text(),
                        ExistingFunction {
                            full_name,
                            comment: row.get_str("description").map(str::to_string),
                        },
                    );
                }
                Err(_) => engine
                    .intentions()
                    .mark_invalid_name(ObjectKind::Function, &text),
            }
        }
        Ok(out)
    }

    fn create_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &FunctionBlueprint,
    ) -> Result<ResolveOutcome> {
        self.replace(ctx, bp)?;
        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &FunctionBlueprint,
        existing: &ExistingFunction,
    ) -> Result<ResolveOutcome> {
        let base = Self::build_sql(bp, bp.comment.as_deref())?;
        if matches_hash(existing.comment.as_deref(), &base) {
            return Ok(ResolveOutcome::NoChange);
        }
        self.replace(ctx, bp)?;
        Ok(ResolveOutcome::Replace)
    }

    fn drop_object(
        &self,
        ctx: &mut TaskContext<'_>,
        existing: &ExistingFunction,
    ) -> Result<ResolveOutcome> {
        ctx.execute_unsafe(
            &render(
                "DROP FUNCTION {name:r}",
                &SqlParams::new().bind("name", existing.full_name.to_sql()),
            )?,
            UnsafeGate::General,
            true,
        )?;
        Ok(ResolveOutcome::Drop)
    }
}
