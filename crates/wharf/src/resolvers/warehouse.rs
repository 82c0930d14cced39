use indexmap::IndexMap;
use wharf_sql::SqlParams;

use super::{comment_clause, render};
use crate::{
    AccountObjectIdent, Engine, Identifier, ObjectKind, ResolveOutcome, Resolver, Result,
    TaskContext, UnsafeGate, WarehouseBlueprint,
};

#[derive(Debug, Clone)]
pub struct ExistingWarehouse {
    pub full_name: AccountObjectIdent,
    pub size: String,
    pub auto_suspend: Option<u32>,
    pub resource_monitor: Option<String>,
    pub comment: Option<String>,
}

/// `X-Small`, `x_small` and `XSMALL` are the same size.
fn normalize_size(size: &str) -> String {
    size.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect::<String>()
        .to_uppercase()
}

/// Warehouses cost money while they run, so an account without any declared
/// warehouse is left alone instead of being emptied.
pub struct WarehouseResolver;

impl Resolver for WarehouseResolver {
    type Blueprint = WarehouseBlueprint;
    type Existing = ExistingWarehouse;
    type Scope = ();

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Warehouse
    }

    fn skip_when_empty(&self) -> bool {
        true
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, WarehouseBlueprint>> {
        Ok(engine.config().get_blueprints::<WarehouseBlueprint>())
    }

    fn introspection_scopes(&self, _engine: &Engine) -> Result<Vec<()>> {
        Ok(vec![()])
    }

    fn get_existing_objects(
        &self,
        engine: &Engine,
        _: &(),
    ) -> Result<IndexMap<String, ExistingWarehouse>> {
        let prefix = engine.env_prefix();
        let mut out = IndexMap::new();

        for row in engine.execute_meta("SHOW WAREHOUSES")? {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            let Ok(full_name) = AccountObjectIdent::parse(prefix, name) else {
                engine
                    .intentions()
                    .mark_invalid_name(ObjectKind::Warehouse, name);
                continue;
            };
            out.insert(
                full_name.text(),
                ExistingWarehouse {
                    size: normalize_size(row.get_str("size").unwrap_or_default()),
                    auto_suspend: row.get_u32("auto_suspend"),
                    resource_monitor: row
                        .get_str("resource_monitor")
                        .filter(|m| !m.eq_ignore_ascii_case("null"))
                        .map(str::to_uppercase),
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
        bp: &WarehouseBlueprint,
    ) -> Result<ResolveOutcome> {
        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("size", normalize_size(&bp.size))
            .bind("auto_suspend", bp.auto_suspend);

        let mut sql = vec![render(
            "CREATE WAREHOUSE {name:i} WAREHOUSE_SIZE = {size} AUTO_SUSPEND = {auto_suspend:d} INITIALLY_SUSPENDED = TRUE",
            &params,
        )?];
        sql.extend(comment_clause(bp.comment.as_deref())?);
        ctx.execute_safe(&sql.join(" "), true)?;

        if let Some(monitor) = &bp.resource_monitor {
            set_resource_monitor(ctx, bp, Some(monitor))?;
        }
        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &WarehouseBlueprint,
        existing: &ExistingWarehouse,
    ) -> Result<ResolveOutcome> {
        let size = normalize_size(&bp.size);
        let params = SqlParams::new()
            .bind("name", bp.full_name.to_sql())
            .bind("size", size.as_str())
            .bind("auto_suspend", bp.auto_suspend)
            .bind("comment", bp.comment.as_deref());
        let mut changed = false;

        if size != existing.size {
            ctx.execute_safe(
                &render("ALTER WAREHOUSE {name:i} SET WAREHOUSE_SIZE = {size}", &params)?,
                true,
            )?;
            changed = true;
        }

        if Some(bp.auto_suspend) != existing.auto_suspend {
            ctx.execute_safe(
                &render(
                    "ALTER WAREHOUSE {name:i} SET AUTO_SUSPEND = {auto_suspend:d}",
                    &params,
                )?,
                true,
            )?;
            changed = true;
        }

        if bp.comment != existing.comment {
            let template = if bp.comment.is_some() {
                "ALTER WAREHOUSE {name:i} SET COMMENT = {comment}"
            } else {
                "ALTER WAREHOUSE {name:i} UNSET COMMENT"
            };
            ctx.execute_safe(&render(template, &params)?, true)?;
            changed = true;
        }

        let wanted = bp.resource_monitor.as_ref().map(Identifier::text);
        if wanted != existing.resource_monitor {
            set_resource_monitor(ctx, bp, bp.resource_monitor.as_ref())?;
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
        existing: &ExistingWarehouse,
    ) -> Result<ResolveOutcome> {
        ctx.execute_unsafe(
            &render(
                "DROP WAREHOUSE {name:i}",
                &SqlParams::new().bind("name", existing.full_name.to_sql()),
            )?,
            UnsafeGate::General,
            true,
        )?;
        Ok(ResolveOutcome::Drop)
    }
}

fn set_resource_monitor(
    ctx: &mut TaskContext<'_>,
    bp: &WarehouseBlueprint,
    monitor: Option<&AccountObjectIdent>,
) -> Result<()> {
    let sql = match monitor {
        Some(monitor) => render(
            "ALTER WAREHOUSE {name:i} SET RESOURCE_MONITOR = {monitor:i}",
            &SqlParams::new()
                .bind("name", bp.full_name.to_sql())
                .bind("monitor", monitor.to_sql()),
        )?,
        None => render(
            "ALTER WAREHOUSE {name:i} UNSET RESOURCE_MONITOR",
            &SqlParams::new().bind("name", bp.full_name.to_sql()),
        )?,
    };
    ctx.execute_unsafe(&sql, UnsafeGate::ResourceMonitor, true)
}
