//! Permission models and access role synthesis.
//!
//! A permission model decides which access roles exist for a database or
//! schema and what they are granted. Everything here is a pure function of
//! the registry; the role resolver turns the result into DDL.

use std::fmt;

use crate::{
    AccountObjectIdent, AnyIdent, Config, DatabaseBlueprint, DatabaseIdent, Error, FutureGrant,
    Grant, Identifier, IdentPattern, ObjectKind, OwnerReferences, Result, RoleBlueprint,
    SchemaBlueprint, SchemaIdent,
};

/// Which container level owns objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionModelRuleset {
    /// Database owner, write and read roles. Schemas get no owner role.
    DatabaseOwner,
    /// Schema owner, write and read roles. Databases get no owner role.
    SchemaOwner,
}

impl PermissionModelRuleset {
    fn allows_database_role(self, role_type: AccessRoleType) -> bool {
        !(self == PermissionModelRuleset::SchemaOwner && role_type == AccessRoleType::Owner)
    }

    fn allows_schema_role(self, role_type: AccessRoleType) -> bool {
        !(self == PermissionModelRuleset::DatabaseOwner && role_type == AccessRoleType::Owner)
    }
}

/// `CREATE <KIND>` privilege given to owner roles on their container.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionModelCreateGrant {
    pub on: ObjectKind,
}

/// A privilege on future objects of one kind inside the container.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionModelFutureGrant {
    pub privilege: String,
    pub on: ObjectKind,
}

impl PermissionModelFutureGrant {
    pub fn new(privilege: &str, on: ObjectKind) -> Self {
        Self {
            privilege: privilege.to_uppercase(),
            on,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionModel {
    pub ruleset: PermissionModelRuleset,
    pub owner_create_grants: Vec<PermissionModelCreateGrant>,
    pub owner_future_grants: Vec<PermissionModelFutureGrant>,
    pub write_future_grants: Vec<PermissionModelFutureGrant>,
    pub read_future_grants: Vec<PermissionModelFutureGrant>,
}

impl Default for PermissionModel {
    fn default() -> Self {
        use ObjectKind::*;

        let create = |kinds: &[ObjectKind]| {
            kinds
                .iter()
                .map(|&on| PermissionModelCreateGrant { on })
                .collect()
        };
        let future = |grants: &[(&str, ObjectKind)]| {
            grants
                .iter()
                .map(|(p, k)| PermissionModelFutureGrant::new(p, *k))
                .collect()
        };

        Self {
            ruleset: PermissionModelRuleset::SchemaOwner,
            owner_create_grants: create(&[
                Table,
                View,
                Function,
                Procedure,
                Sequence,
                Stage,
                FileFormat,
                Stream,
                Task,
                MaskingPolicy,
            ]),
            owner_future_grants: future(&[
                ("OWNERSHIP", Table),
                ("OWNERSHIP", View),
                ("OWNERSHIP", Function),
                ("OWNERSHIP", Procedure),
                ("OWNERSHIP", Sequence),
                ("OWNERSHIP", Stage),
            ]),
            write_future_grants: future(&[
                ("INSERT", Table),
                ("UPDATE", Table),
                ("DELETE", Table),
                ("TRUNCATE", Table),
                ("USAGE", Sequence),
                ("WRITE", Stage),
            ]),
            read_future_grants: future(&[
                ("SELECT", Table),
                ("SELECT", View),
                ("USAGE", Function),
                ("USAGE", Procedure),
                ("READ", Stage),
            ]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRoleType {
    Owner,
    Write,
    Read,
}

impl AccessRoleType {
    pub const ALL: [AccessRoleType; 3] = [
        AccessRoleType::Owner,
        AccessRoleType::Write,
        AccessRoleType::Read,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccessRoleType::Owner => "OWNER",
            AccessRoleType::Write => "WRITE",
            AccessRoleType::Read => "READ",
        }
    }
}

impl fmt::Display for AccessRoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{prefix}{DB}__{TYPE}__D_ROLE`
pub fn database_role_ident(db: &DatabaseIdent, role_type: AccessRoleType) -> Result<AccountObjectIdent> {
    AccountObjectIdent::new(
        db.env_prefix(),
        &format!("{}__{}__D_ROLE", db.database(), role_type),
    )
}

/// `{prefix}{DB}__{SCHEMA}__{TYPE}__S_ROLE`
pub fn schema_role_ident(schema: &SchemaIdent, role_type: AccessRoleType) -> Result<AccountObjectIdent> {
    let db = schema.database_ident();
    AccountObjectIdent::new(
        db.env_prefix(),
        &format!("{}__{}__{}__S_ROLE", db.database(), schema.schema(), role_type),
    )
}

fn forbidden(model: &str, what: String) -> Error {
    Error::PermissionModel {
        model: model.to_string(),
        reason: format!("ruleset does not allow {what}"),
    }
}

/// Build one access role of a database.
pub fn database_role(
    config: &Config,
    bp: &DatabaseBlueprint,
    role_type: AccessRoleType,
) -> Result<RoleBlueprint> {
    let model_name = bp.permission_model.as_deref();
    let model = config.get_permission_model(model_name)?;
    if !model.ruleset.allows_database_role(role_type) {
        return Err(forbidden(
            model_name.unwrap_or(crate::DEFAULT_PERMISSION_MODEL),
            format!("{role_type} roles on databases"),
        ));
    }

    let db = &bp.full_name;
    let mut role = RoleBlueprint::new(database_role_ident(db, role_type)?);
    role.grants.push(Grant::new("USAGE", ObjectKind::Database, db.clone()));

    let future = match role_type {
        AccessRoleType::Owner => {
            role.grants
                .push(Grant::new("CREATE SCHEMA", ObjectKind::Database, db.clone()));
            &model.owner_future_grants
        }
        AccessRoleType::Write => &model.write_future_grants,
        AccessRoleType::Read => &model.read_future_grants,
    };
    for fg in future {
        role.future_grants.push(FutureGrant::new(
            &fg.privilege,
            fg.on,
            ObjectKind::Database,
            db.clone(),
        ));
    }

    if role_type == AccessRoleType::Owner {
        add_owner_references(config, &mut role, &bp.owner)?;
    }
    Ok(role)
}

/// Build one access role of a schema. The schema inherits its database's
/// permission model unless it names its own.
pub fn schema_role(
    config: &Config,
    bp: &SchemaBlueprint,
    role_type: AccessRoleType,
) -> Result<RoleBlueprint> {
    let schema = &bp.full_name;
    let db = schema.database_ident();
    let model_name = match &bp.permission_model {
        Some(name) => Some(name.as_str()),
        None => config
            .get_blueprint::<DatabaseBlueprint>(&db.text())
            .and_then(|d| d.permission_model.as_deref()),
    };
    let model = config.get_permission_model(model_name)?;
    if !model.ruleset.allows_schema_role(role_type) {
        return Err(forbidden(
            model_name.unwrap_or(crate::DEFAULT_PERMISSION_MODEL),
            format!("{role_type} roles on schemas"),
        ));
    }

    let mut role = RoleBlueprint::new(schema_role_ident(schema, role_type)?);
    role.grants.push(Grant::new("USAGE", ObjectKind::Database, db.clone()));
    role.grants.push(Grant::new("USAGE", ObjectKind::Schema, schema.clone()));

    let future = match role_type {
        AccessRoleType::Owner => {
            for create in &model.owner_create_grants {
                role.grants.push(Grant::new(
                    &format!("CREATE {}", create.on.singular()),
                    ObjectKind::Schema,
                    schema.clone(),
                ));
            }
            &model.owner_future_grants
        }
        AccessRoleType::Write => &model.write_future_grants,
        AccessRoleType::Read => &model.read_future_grants,
    };
    for fg in future {
        role.future_grants.push(FutureGrant::new(
            &fg.privilege,
            fg.on,
            ObjectKind::Schema,
            schema.clone(),
        ));
    }

    if role_type == AccessRoleType::Owner {
        add_owner_references(config, &mut role, &bp.owner)?;
    }
    Ok(role)
}

/// Every access role the registry implies, in declaration order.
pub fn access_roles(config: &Config) -> Result<Vec<RoleBlueprint>> {
    let mut roles = Vec::new();

    for db in config.get_blueprints::<DatabaseBlueprint>().values() {
        let model = config.get_permission_model(db.permission_model.as_deref())?;
        for role_type in AccessRoleType::ALL {
            if model.ruleset.allows_database_role(role_type) {
                roles.push(database_role(config, db, role_type)?);
            }
        }
    }

    for schema in config.get_blueprints::<SchemaBlueprint>().values() {
        for role_type in AccessRoleType::ALL {
            match schema_role(config, schema, role_type) {
                Ok(role) => roles.push(role),
                Err(Error::PermissionModel { .. }) => {}
                Err(e) => return Err(e),
            }
        }
    }

    Ok(roles)
}

fn add_owner_references(
    config: &Config,
    role: &mut RoleBlueprint,
    refs: &OwnerReferences,
) -> Result<()> {
    let role_usage = |ident: AccountObjectIdent| Grant::new("USAGE", ObjectKind::Role, ident);

    for (patterns, role_type) in [
        (&refs.database_read, AccessRoleType::Read),
        (&refs.database_write, AccessRoleType::Write),
    ] {
        for db in matching::<DatabaseBlueprint>(config, patterns) {
            role.grants
                .push(role_usage(database_role_ident(&db.full_name, role_type)?));
        }
    }

    for (patterns, role_type) in [
        (&refs.schema_read, AccessRoleType::Read),
        (&refs.schema_write, AccessRoleType::Write),
    ] {
        for schema in matching::<SchemaBlueprint>(config, patterns) {
            role.grants
                .push(role_usage(schema_role_ident(&schema.full_name, role_type)?));
        }
    }

    for integration in &refs.integration_usage {
        role.grants.push(Grant::new(
            "USAGE",
            ObjectKind::Integration,
            integration.clone(),
        ));
    }
    for share_db in &refs.share_read {
        role.grants.push(Grant::new(
            "IMPORTED PRIVILEGES",
            ObjectKind::Database,
            AnyIdent::from(share_db.clone()),
        ));
    }
    for warehouse in &refs.warehouse_usage {
        role.grants
            .push(Grant::new("USAGE", ObjectKind::Warehouse, warehouse.clone()));
    }
    role.account_grants.extend(refs.account_grants.iter().cloned());

    Ok(())
}

fn matching<T: crate::TypedBlueprint>(config: &Config, patterns: &[IdentPattern]) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for pattern in patterns {
        for (name, bp) in config.get_blueprints_by_pattern::<T>(pattern) {
            if seen.insert(name) {
                out.push(bp);
            }
        }
    }
    out
}
