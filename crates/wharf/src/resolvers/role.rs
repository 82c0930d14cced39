//! Roles and their grants.
//!
//! The declared set is every access role implied by database and schema
//! blueprints plus the roles declared directly; a declared role replaces an
//! implied one of the same name. Grants are diffed per role as three sets:
//! object grants, account grants and future grants. Granting is safe,
//! revoking is not.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;
use wharf_sql::SqlParams;

use super::{comment_clause, render};
use crate::permission::access_roles;
use crate::{
    AccountGrant, AccountObjectIdent, AnyIdent, Engine, FutureGrant, Grant, Identifier,
    ObjectKind, ResolveOutcome, Resolver, Result, RoleBlueprint, TaskContext, UnsafeGate,
};

/// Suffixes of roles generated by permission models. Roles with these
/// suffixes are managed even when nothing declares them, so stale ones get
/// dropped.
const ACCESS_ROLE_SUFFIXES: [&str; 3] = ["__D_ROLE", "__S_ROLE", "__B_ROLE"];

/// Kinds whose object grants are always diffed.
const MANAGED_GRANT_KINDS: [ObjectKind; 5] = [
    ObjectKind::Database,
    ObjectKind::Schema,
    ObjectKind::Role,
    ObjectKind::Warehouse,
    ObjectKind::Integration,
];

#[derive(Debug, Clone)]
pub struct ExistingRole {
    pub full_name: AccountObjectIdent,
    pub comment: Option<String>,
}

#[derive(Debug, Default)]
struct RoleGrants {
    grants: BTreeSet<Grant>,
    account_grants: BTreeSet<AccountGrant>,
    future_grants: BTreeSet<FutureGrant>,
}

impl RoleGrants {
    fn declared(bp: &RoleBlueprint) -> Self {
        Self {
            grants: bp.grants.iter().cloned().collect(),
            account_grants: bp.account_grants.iter().cloned().collect(),
            future_grants: bp.future_grants.iter().cloned().collect(),
        }
    }
}

pub struct RoleResolver;

impl Resolver for RoleResolver {
    type Blueprint = RoleBlueprint;
    type Existing = ExistingRole;
    type Scope = ();

    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Role
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, RoleBlueprint>> {
        let mut roles: IndexMap<String, RoleBlueprint> = access_roles(engine.config())?
            .into_iter()
            .map(|r| (r.full_name.text(), r))
            .collect();
        roles.extend(engine.config().get_blueprints::<RoleBlueprint>());
        Ok(roles)
    }

    fn introspection_scopes(&self, _engine: &Engine) -> Result<Vec<()>> {
        Ok(vec![()])
    }

    fn get_existing_objects(&self, engine: &Engine, _: &()) -> Result<IndexMap<String, ExistingRole>> {
        let prefix = engine.env_prefix();
        let declared = engine.config().get_by_kind(ObjectKind::Role);

        let mut out = IndexMap::new();
        for row in engine.execute_meta("SHOW ROLES")? {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            let managed = declared.contains_key(name)
                || ACCESS_ROLE_SUFFIXES.iter().any(|s| name.ends_with(s));
            if !managed {
                continue;
            }
            match AccountObjectIdent::parse(prefix, name) {
                Ok(full_name) => {
                    out.insert(
                        full_name.text(),
                        ExistingRole {
                            full_name,
                            comment: row.get_str("comment").map(str::to_string),
                        },
                    );
                }
                Err(_) => engine
                    .intentions()
                    .mark_invalid_name(ObjectKind::Role, name),
            }
        }
        Ok(out)
    }

    fn create_object(&self, ctx: &mut TaskContext<'_>, bp: &RoleBlueprint) -> Result<ResolveOutcome> {
        let mut sql = vec![render(
            "CREATE ROLE {name:i}",
            &SqlParams::new().bind("name", bp.full_name.to_sql()),
        )?];
        sql.extend(comment_clause(bp.comment.as_deref())?);
        ctx.execute_safe(&sql.join(" "), true)?;

        let declared = RoleGrants::declared(bp);
        for grant in &declared.grants {
            ctx.execute_safe(&grant_sql(grant, &bp.full_name, false)?, true)?;
        }
        for grant in &declared.account_grants {
            ctx.execute_safe(&account_grant_sql(grant, &bp.full_name, false)?, true)?;
        }
        for grant in &declared.future_grants {
            ctx.execute_safe(&future_grant_sql(grant, &bp.full_name, false)?, true)?;
        }

        Ok(ResolveOutcome::Create)
    }

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &RoleBlueprint,
        existing: &ExistingRole,
    ) -> Result<ResolveOutcome> {
        let role = &bp.full_name;
        let mut altered = false;

        if bp.comment != existing.comment {
            let params = SqlParams::new()
                .bind("name", role.to_sql())
                .bind("comment", bp.comment.as_deref());
            let template = if bp.comment.is_some() {
                "ALTER ROLE {name:i} SET COMMENT = {comment}"
            } else {
                "ALTER ROLE {name:i} UNSET COMMENT"
            };
            ctx.execute_safe(&render(template, &params)?, true)?;
            altered = true;
        }

        let declared = RoleGrants::declared(bp);
        let kinds: HashSet<ObjectKind> = MANAGED_GRANT_KINDS
            .into_iter()
            .chain(declared.grants.iter().map(|g| g.on))
            .collect();
        let current = existing_grants(ctx, role, &kinds)?;
        let mut granted = false;

        for grant in declared.grants.difference(&current.grants) {
            ctx.execute_safe(&grant_sql(grant, role, false)?, true)?;
            granted = true;
        }
        for grant in current.grants.difference(&declared.grants) {
            ctx.execute_unsafe(&grant_sql(grant, role, true)?, UnsafeGate::General, true)?;
            granted = true;
        }

        for grant in declared.account_grants.difference(&current.account_grants) {
            ctx.execute_safe(&account_grant_sql(grant, role, false)?, true)?;
            granted = true;
        }
        for grant in current.account_grants.difference(&declared.account_grants) {
            ctx.execute_unsafe(
                &account_grant_sql(grant, role, true)?,
                UnsafeGate::General,
                true,
            )?;
            granted = true;
        }

        // Future grants only apply to objects created afterwards; refreshing
        // re-issues them for containers that were re-created.
        let refresh = ctx.settings().refresh_future_grants;
        for grant in &declared.future_grants {
            if refresh || !current.future_grants.contains(grant) {
                ctx.execute_safe(&future_grant_sql(grant, role, false)?, true)?;
                granted = true;
            }
        }
        for grant in current.future_grants.difference(&declared.future_grants) {
            ctx.execute_unsafe(
                &future_grant_sql(grant, role, true)?,
                UnsafeGate::General,
                true,
            )?;
            granted = true;
        }

        Ok(match (altered, granted) {
            (true, _) => ResolveOutcome::Alter,
            (false, true) => ResolveOutcome::Grant,
            (false, false) => ResolveOutcome::NoChange,
        })
    }

    fn drop_object(&self, ctx: &mut TaskContext<'_>, existing: &ExistingRole) -> Result<ResolveOutcome> {
        ctx.intentions()
            .mark_drop(ObjectKind::Role, &existing.full_name.text());
        ctx.execute_unsafe(
            &render(
                "DROP ROLE {name:i}",
                &SqlParams::new().bind("name", existing.full_name.to_sql()),
            )?,
            UnsafeGate::General,
            true,
        )?;
        Ok(ResolveOutcome::Drop)
    }
}

fn grant_sql(grant: &Grant, role: &AccountObjectIdent, revoke: bool) -> Result<String> {
    let params = SqlParams::new()
        .bind("privilege", grant.privilege.as_str())
        .bind("kind", grant.on.singular())
        .bind("name", grant.name.quoted())
        .bind("role", role.to_sql());
    let role_usage = grant.on == ObjectKind::Role && grant.privilege == "USAGE";
    let template = match (role_usage, revoke) {
        (true, false) => "GRANT ROLE {name:r} TO ROLE {role:i}",
        (true, true) => "REVOKE ROLE {name:r} FROM ROLE {role:i}",
        (false, false) => "GRANT {privilege:r} ON {kind:r} {name:r} TO ROLE {role:i}",
        (false, true) => "REVOKE {privilege:r} ON {kind:r} {name:r} FROM ROLE {role:i}",
    };
    render(template, &params)
}

fn account_grant_sql(grant: &AccountGrant, role: &AccountObjectIdent, revoke: bool) -> Result<String> {
    let params = SqlParams::new()
        .bind("privilege", grant.privilege.as_str())
        .bind("role", role.to_sql());
    render(
        if revoke {
            "REVOKE {privilege:r} ON ACCOUNT FROM ROLE {role:i}"
        } else {
            "GRANT {privilege:r} ON ACCOUNT TO ROLE {role:i}"
        },
        &params,
    )
}

fn future_grant_sql(grant: &FutureGrant, role: &AccountObjectIdent, revoke: bool) -> Result<String> {
    let params = SqlParams::new()
        .bind("privilege", grant.privilege.as_str())
        .bind("kinds", grant.on_future.plural())
        .bind("parent", grant.in_parent.singular())
        .bind("name", grant.name.quoted())
        .bind("role", role.to_sql());
    render(
        if revoke {
            "REVOKE {privilege:r} ON FUTURE {kinds:r} IN {parent:r} {name:r} FROM ROLE {role:i}"
        } else {
            "GRANT {privilege:r} ON FUTURE {kinds:r} IN {parent:r} {name:r} TO ROLE {role:i}"
        },
        &params,
    )
}

/// Parse a grant target, falling back to an unprefixed name for objects
/// that live outside this environment (shared databases, integrations).
fn parse_target(kind: ObjectKind, prefix: &str, name: &str) -> Option<AnyIdent> {
    AnyIdent::parse(kind, prefix, name)
        .or_else(|_| AnyIdent::parse(kind, "", name))
        .ok()
}

fn existing_grants(
    ctx: &TaskContext<'_>,
    role: &AccountObjectIdent,
    kinds: &HashSet<ObjectKind>,
) -> Result<RoleGrants> {
    let prefix = ctx.engine().env_prefix();
    let params = SqlParams::new().bind("role", role.to_sql());
    let mut out = RoleGrants::default();

    for row in ctx.execute_meta(&render("SHOW GRANTS TO ROLE {role:i}", &params)?)? {
        let (Some(privilege), Some(granted_on)) = (row.get_str("privilege"), row.get_str("granted_on")) else {
            continue;
        };
        if privilege.eq_ignore_ascii_case("OWNERSHIP") {
            continue;
        }
        if granted_on.eq_ignore_ascii_case("ACCOUNT") {
            out.account_grants.insert(AccountGrant::new(privilege));
            continue;
        }
        let Ok(kind) = granted_on.parse::<ObjectKind>() else {
            continue;
        };
        if !kinds.contains(&kind) {
            continue;
        }
        let Some(name) = row.get_str("name") else {
            continue;
        };
        match parse_target(kind, prefix, name) {
            Some(target) => {
                out.grants.insert(Grant::new(privilege, kind, target));
            }
            None => ctx.intentions().mark_invalid_name(kind, name),
        }
    }

    for row in ctx.execute_meta(&render("SHOW FUTURE GRANTS TO ROLE {role:i}", &params)?)? {
        let (Some(privilege), Some(grant_on), Some(name)) =
            (row.get_str("privilege"), row.get_str("grant_on"), row.get_str("name"))
        else {
            continue;
        };
        let Ok(on_future) = grant_on.parse::<ObjectKind>() else {
            continue;
        };
        // `DB.SCHEMA.<TABLE>`: the container is everything before the marker.
        let parent = name.rsplit_once(".<").map_or(name, |(parent, _)| parent);
        let in_parent = match parent.split('.').count() {
            1 => ObjectKind::Database,
            2 => ObjectKind::Schema,
            _ => continue,
        };
        match parse_target(in_parent, prefix, parent) {
            Some(target) => {
                out.future_grants
                    .insert(FutureGrant::new(privilege, on_future, in_parent, target));
            }
            None => ctx.intentions().mark_invalid_name(in_parent, parent),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wharf_config::Settings;

    use super::*;
    use crate::resolvers::testing::{ScriptedTransport, engine};
    use crate::transport::Row;
    use crate::{Config, DatabaseBlueprint, DatabaseIdent, resolve};

    fn role(name: &str) -> AccountObjectIdent {
        AccountObjectIdent::new("DEV__", name).unwrap()
    }

    fn database() -> DatabaseIdent {
        DatabaseIdent::new("DEV__", "ACME").unwrap()
    }

    #[test]
    fn test_grant_statements() {
        let analyst = role("ANALYST");
        let usage = Grant::new("USAGE", ObjectKind::Database, database());
        assert_eq!(
            grant_sql(&usage, &analyst, false).unwrap(),
            "GRANT USAGE ON DATABASE \"DEV__ACME\" TO ROLE \"DEV__ANALYST\""
        );

        let inherit = Grant::new("USAGE", ObjectKind::Role, role("READER"));
        assert_eq!(
            grant_sql(&inherit, &analyst, true).unwrap(),
            "REVOKE ROLE \"DEV__READER\" FROM ROLE \"DEV__ANALYST\""
        );

        let future = FutureGrant::new("SELECT", ObjectKind::Table, ObjectKind::Database, database());
        assert_eq!(
            future_grant_sql(&future, &analyst, false).unwrap(),
            "GRANT SELECT ON FUTURE TABLES IN DATABASE \"DEV__ACME\" TO ROLE \"DEV__ANALYST\""
        );

        assert_eq!(
            account_grant_sql(&AccountGrant::new("create database"), &analyst, false).unwrap(),
            "GRANT CREATE DATABASE ON ACCOUNT TO ROLE \"DEV__ANALYST\""
        );
    }

    fn analyst_config() -> Config {
        let mut config = Config::new("DEV__");
        let mut bp = RoleBlueprint::new(role("ANALYST"));
        bp.grants
            .push(Grant::new("USAGE", ObjectKind::Database, database()));
        bp.future_grants.push(FutureGrant::new(
            "SELECT",
            ObjectKind::Table,
            ObjectKind::Database,
            database(),
        ));
        config.add_blueprint(bp);
        config
    }

    #[tokio::test]
    async fn test_grant_diff() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(
                    "SHOW ROLES",
                    vec![
                        Row::new().with("name", "DEV__ANALYST"),
                        Row::new().with("name", "DEV__SOMEONE_ELSES"),
                    ],
                )
                .respond(
                    "SHOW GRANTS TO ROLE",
                    vec![
                        Row::new()
                            .with("privilege", "OWNERSHIP")
                            .with("granted_on", "ROLE")
                            .with("name", "DEV__ANALYST"),
                        Row::new()
                            .with("privilege", "USAGE")
                            .with("granted_on", "WAREHOUSE")
                            .with("name", "DEV__LOAD"),
                        Row::new()
                            .with("privilege", "SELECT")
                            .with("granted_on", "TABLE")
                            .with("name", "DEV__ACME.SALES.ORDERS"),
                    ],
                )
                .respond(
                    "SHOW FUTURE GRANTS TO ROLE",
                    vec![
                        Row::new()
                            .with("privilege", "SELECT")
                            .with("grant_on", "TABLE")
                            .with("name", "DEV__ACME.<TABLE>"),
                    ],
                ),
        );
        let engine = engine(&transport, analyst_config(), Settings::apply_all());

        let result = resolve(Arc::new(RoleResolver), engine).await.unwrap();

        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes["DEV__ANALYST"], ResolveOutcome::Grant);
        assert_eq!(
            transport.ddl(),
            vec![
                "GRANT USAGE ON DATABASE \"DEV__ACME\" TO ROLE \"DEV__ANALYST\"",
                "REVOKE USAGE ON WAREHOUSE \"DEV__LOAD\" FROM ROLE \"DEV__ANALYST\"",
            ]
        );
    }

    #[tokio::test]
    async fn test_grant_on_unparseable_name_is_reported() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("SHOW ROLES", vec![Row::new().with("name", "DEV__ANALYST")])
                .respond(
                    "SHOW GRANTS TO ROLE",
                    vec![
                        Row::new()
                            .with("privilege", "USAGE")
                            .with("granted_on", "DATABASE")
                            .with("name", "DEV__ACME"),
                        Row::new()
                            .with("privilege", "USAGE")
                            .with("granted_on", "SCHEMA")
                            .with("name", "DEV__ACME.\"SALES-EU\""),
                    ],
                )
                .respond(
                    "SHOW FUTURE GRANTS TO ROLE",
                    vec![
                        Row::new()
                            .with("privilege", "SELECT")
                            .with("grant_on", "TABLE")
                            .with("name", "DEV__ACME.<TABLE>"),
                    ],
                ),
        );
        let engine = engine(&transport, analyst_config(), Settings::apply_all());

        let result = resolve(Arc::new(RoleResolver), engine.clone())
            .await
            .unwrap();

        assert_eq!(result.outcomes["DEV__ANALYST"], ResolveOutcome::NoChange);
        assert!(transport.ddl().is_empty());
        assert_eq!(
            engine.intentions().invalid_names(),
            vec![(ObjectKind::Schema, "DEV__ACME.\"SALES-EU\"".to_string())]
        );
    }

    #[tokio::test]
    async fn test_refresh_future_grants() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("SHOW ROLES", vec![Row::new().with("name", "DEV__ANALYST")])
                .respond(
                    "SHOW GRANTS TO ROLE",
                    vec![
                        Row::new()
                            .with("privilege", "USAGE")
                            .with("granted_on", "DATABASE")
                            .with("name", "DEV__ACME"),
                    ],
                )
                .respond(
                    "SHOW FUTURE GRANTS TO ROLE",
                    vec![
                        Row::new()
                            .with("privilege", "SELECT")
                            .with("grant_on", "TABLE")
                            .with("name", "DEV__ACME.<TABLE>"),
                    ],
                ),
        );
        let converged = engine(&transport, analyst_config(), Settings::apply_all());
        let result = resolve(Arc::new(RoleResolver), converged).await.unwrap();
        assert_eq!(result.outcomes["DEV__ANALYST"], ResolveOutcome::NoChange);

        let settings = Settings {
            refresh_future_grants: true,
            ..Settings::apply_all()
        };
        let refreshed = engine(&transport, analyst_config(), settings);
        let result = resolve(Arc::new(RoleResolver), refreshed).await.unwrap();
        assert_eq!(result.outcomes["DEV__ANALYST"], ResolveOutcome::Grant);
        assert_eq!(
            transport.ddl(),
            vec!["GRANT SELECT ON FUTURE TABLES IN DATABASE \"DEV__ACME\" TO ROLE \"DEV__ANALYST\""]
        );
    }

    #[tokio::test]
    async fn test_access_roles_are_created_and_stale_ones_dropped() {
        let transport = Arc::new(ScriptedTransport::new().respond(
            "SHOW ROLES",
            vec![Row::new().with("name", "DEV__GONE__READ__D_ROLE")],
        ));
        let mut config = Config::new("DEV__");
        config.add_blueprint(DatabaseBlueprint::new(database()));
        let settings = Settings {
            execute_safe_ddl: true,
            ..Settings::default()
        };
        let engine = engine(&transport, config, settings);

        let result = resolve(Arc::new(RoleResolver), engine.clone())
            .await
            .unwrap();

        assert_eq!(result.outcomes["DEV__ACME__READ__D_ROLE"], ResolveOutcome::Create);
        assert_eq!(result.outcomes["DEV__ACME__WRITE__D_ROLE"], ResolveOutcome::Create);
        assert_eq!(result.outcomes["DEV__GONE__READ__D_ROLE"], ResolveOutcome::Drop);
        assert_eq!(
            engine.suggested_ddl(),
            vec!["DROP ROLE \"DEV__GONE__READ__D_ROLE\""]
        );
        assert!(
            transport
                .ddl()
                .contains(&"CREATE ROLE \"DEV__ACME__READ__D_ROLE\"".to_string())
        );
    }
}
