//! Declared object state.
//!
//! A blueprint describes one object the way the configuration wants it to
//! be. Blueprints are built by the config layer and stay immutable, except
//! policy blueprints whose reference lists grow while the config is loaded.

use crate::{
    AccountObjectIdent, AnyIdent, DatabaseIdent, Identifier, IdentPattern, ObjectKind, SchemaIdent,
    SchemaObjectIdent, SchemaObjectIdentWithArgs, TableConstraintIdent,
};

/// Ordering-only dependencies of a blueprint.
///
/// The scheduler never resolves a blueprint before everything it depends on
/// has been placed in an earlier batch.
pub trait DependsOn {
    /// Canonical text of every identifier this blueprint depends on.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Typed access to one variant of [`Blueprint`].
pub trait TypedBlueprint: Clone + Send + Sync + 'static {
    const KIND: ObjectKind;

    /// Canonical text of the blueprint's full name.
    fn full_name(&self) -> String;

    fn from_blueprint(bp: &Blueprint) -> Option<&Self>;

    fn into_blueprint(self) -> Blueprint;
}

/// A privilege on a specific object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Grant {
    pub privilege: String,
    pub on: ObjectKind,
    pub name: AnyIdent,
}

impl Grant {
    pub fn new(privilege: &str, on: ObjectKind, name: impl Into<AnyIdent>) -> Self {
        Self {
            privilege: privilege.to_uppercase(),
            on,
            name: name.into(),
        }
    }
}

/// An account-level privilege (`CREATE DATABASE`, `EXECUTE TASK`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountGrant {
    pub privilege: String,
}

impl AccountGrant {
    pub fn new(privilege: &str) -> Self {
        Self {
            privilege: privilege.to_uppercase(),
        }
    }
}

/// A privilege that applies automatically to objects of kind `on_future`
/// created later inside the container `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FutureGrant {
    pub privilege: String,
    pub on_future: ObjectKind,
    pub in_parent: ObjectKind,
    pub name: AnyIdent,
}

impl FutureGrant {
    pub fn new(
        privilege: &str,
        on_future: ObjectKind,
        in_parent: ObjectKind,
        name: impl Into<AnyIdent>,
    ) -> Self {
        Self {
            privilege: privilege.to_uppercase(),
            on_future,
            in_parent,
            name: name.into(),
        }
    }
}

/// Cross-references declared on a database or schema. They become grants of
/// the container's owner role.
#[derive(Debug, Clone, Default)]
pub struct OwnerReferences {
    pub database_read: Vec<IdentPattern>,
    pub database_write: Vec<IdentPattern>,
    pub schema_read: Vec<IdentPattern>,
    pub schema_write: Vec<IdentPattern>,
    pub integration_usage: Vec<AccountObjectIdent>,
    pub share_read: Vec<DatabaseIdent>,
    pub warehouse_usage: Vec<AccountObjectIdent>,
    pub account_grants: Vec<AccountGrant>,
}

#[derive(Debug, Clone)]
pub struct DatabaseBlueprint {
    pub full_name: DatabaseIdent,
    pub permission_model: Option<String>,
    pub is_transient: bool,
    pub retention_time: Option<u32>,
    pub is_sandbox: bool,
    pub owner: OwnerReferences,
    pub comment: Option<String>,
}

impl DatabaseBlueprint {
    pub fn new(full_name: DatabaseIdent) -> Self {
        Self {
            full_name,
            permission_model: None,
            is_transient: false,
            retention_time: None,
            is_sandbox: false,
            owner: OwnerReferences::default(),
            comment: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaBlueprint {
    pub full_name: SchemaIdent,
    pub permission_model: Option<String>,
    pub is_transient: bool,
    pub is_managed_access: bool,
    pub retention_time: Option<u32>,
    /// Unmanaged content: objects found here are never dropped.
    pub is_sandbox: bool,
    pub owner: OwnerReferences,
    pub comment: Option<String>,
}

impl SchemaBlueprint {
    pub fn new(full_name: SchemaIdent) -> Self {
        Self {
            full_name,
            permission_model: None,
            is_transient: false,
            is_managed_access: false,
            retention_time: None,
            is_sandbox: false,
            owner: OwnerReferences::default(),
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    /// Upper-cased type, e.g. `NUMBER(38,0)` or `VARCHAR(255)`.
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
}

impl TableColumn {
    pub fn new(name: &str, data_type: &str, nullable: bool) -> Self {
        Self {
            name: name.to_uppercase(),
            data_type: normalize_column_type(data_type),
            nullable,
            default: None,
            comment: None,
        }
    }
}

/// Upper-case and drop whitespace so `number( 38, 0 )` equals `NUMBER(38,0)`.
pub fn normalize_column_type(data_type: &str) -> String {
    data_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(", ", ",")
        .replace("( ", "(")
        .replace(" (", "(")
        .replace(" )", ")")
        .to_uppercase()
}

#[derive(Debug, Clone)]
pub struct TableBlueprint {
    pub full_name: SchemaObjectIdent,
    pub columns: Vec<TableColumn>,
    pub is_transient: bool,
    pub cluster_by: Vec<String>,
    pub retention_time: Option<u32>,
    pub change_tracking: bool,
    pub comment: Option<String>,
    pub depends_on: Vec<SchemaObjectIdent>,
}

impl TableBlueprint {
    pub fn new(full_name: SchemaObjectIdent, columns: Vec<TableColumn>) -> Self {
        Self {
            full_name,
            columns,
            is_transient: false,
            cluster_by: Vec::new(),
            retention_time: None,
            change_tracking: false,
            comment: None,
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewBlueprint {
    pub full_name: SchemaObjectIdent,
    pub text: String,
    pub is_secure: bool,
    pub comment: Option<String>,
    pub depends_on: Vec<SchemaObjectIdent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentWithType {
    pub name: String,
    pub data_type: String,
}

impl ArgumentWithType {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            data_type: normalize_column_type(data_type),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionBlueprint {
    pub full_name: SchemaObjectIdentWithArgs,
    pub language: String,
    pub arguments: Vec<ArgumentWithType>,
    pub returns: String,
    pub body: String,
    pub is_secure: bool,
    pub is_immutable: bool,
    pub runtime_version: Option<String>,
    pub comment: Option<String>,
    pub depends_on: Vec<SchemaObjectIdentWithArgs>,
}

#[derive(Debug, Clone)]
pub struct RoleBlueprint {
    pub full_name: AccountObjectIdent,
    pub grants: Vec<Grant>,
    pub account_grants: Vec<AccountGrant>,
    pub future_grants: Vec<FutureGrant>,
    pub comment: Option<String>,
}

impl RoleBlueprint {
    pub fn new(full_name: AccountObjectIdent) -> Self {
        Self {
            full_name,
            grants: Vec::new(),
            account_grants: Vec::new(),
            future_grants: Vec::new(),
            comment: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseBlueprint {
    pub full_name: AccountObjectIdent,
    pub size: String,
    pub auto_suspend: u32,
    pub resource_monitor: Option<AccountObjectIdent>,
    pub comment: Option<String>,
}

/// A column of a table or view that a policy is attached to.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyReference {
    pub object_kind: ObjectKind,
    pub object_name: SchemaObjectIdent,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MaskingPolicyBlueprint {
    pub full_name: SchemaObjectIdent,
    pub arguments: Vec<ArgumentWithType>,
    pub returns: String,
    pub body: String,
    pub exempt_other_policies: bool,
    pub references: Vec<PolicyReference>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PrimaryKeyBlueprint {
    pub full_name: TableConstraintIdent,
    pub table_name: SchemaObjectIdent,
    pub columns: Vec<String>,
}

impl PrimaryKeyBlueprint {
    pub fn new(full_name: TableConstraintIdent) -> Self {
        Self {
            table_name: full_name.table_ident().clone(),
            columns: full_name.columns().to_vec(),
            full_name,
        }
    }
}

impl DependsOn for DatabaseBlueprint {}
impl DependsOn for SchemaBlueprint {}
impl DependsOn for WarehouseBlueprint {}
impl DependsOn for MaskingPolicyBlueprint {}
impl DependsOn for PrimaryKeyBlueprint {}

/// A role depends on the roles granted to it.
impl DependsOn for RoleBlueprint {
    fn depends_on(&self) -> Vec<String> {
        self.grants
            .iter()
            .filter(|g| g.on == ObjectKind::Role)
            .map(|g| g.name.text())
            .collect()
    }
}

impl DependsOn for TableBlueprint {
    fn depends_on(&self) -> Vec<String> {
        self.depends_on.iter().map(Identifier::text).collect()
    }
}

impl DependsOn for ViewBlueprint {
    fn depends_on(&self) -> Vec<String> {
        self.depends_on.iter().map(Identifier::text).collect()
    }
}

impl DependsOn for FunctionBlueprint {
    fn depends_on(&self) -> Vec<String> {
        self.depends_on.iter().map(Identifier::text).collect()
    }
}

macro_rules! blueprints {
    ($($variant:ident($ty:ident) => $kind:ident,)*) => {
        /// Any declared object.
        #[derive(Debug, Clone)]
        pub enum Blueprint {
            $($variant($ty),)*
        }

        impl Blueprint {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(Blueprint::$variant(_) => ObjectKind::$kind,)*
                }
            }

            /// Canonical text of the full name; the registry key.
            pub fn full_name(&self) -> String {
                match self {
                    $(Blueprint::$variant(bp) => bp.full_name.text(),)*
                }
            }

            /// Full name without the environment prefix, as patterns see it.
            pub fn full_name_without_prefix(&self) -> String {
                match self {
                    $(Blueprint::$variant(bp) => bp.full_name.text_without_prefix(),)*
                }
            }

            pub fn depends_on(&self) -> Vec<String> {
                match self {
                    $(Blueprint::$variant(bp) => DependsOn::depends_on(bp),)*
                }
            }
        }

        $(
            impl TypedBlueprint for $ty {
                const KIND: ObjectKind = ObjectKind::$kind;

                fn full_name(&self) -> String {
                    self.full_name.text()
                }

                fn from_blueprint(bp: &Blueprint) -> Option<&Self> {
                    match bp {
                        Blueprint::$variant(inner) => Some(inner),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn into_blueprint(self) -> Blueprint {
                    Blueprint::$variant(self)
                }
            }

            impl From<$ty> for Blueprint {
                fn from(bp: $ty) -> Self {
                    Blueprint::$variant(bp)
                }
            }
        )*
    };
}

blueprints! {
    Database(DatabaseBlueprint) => Database,
    Schema(SchemaBlueprint) => Schema,
    Table(TableBlueprint) => Table,
    View(ViewBlueprint) => View,
    Function(FunctionBlueprint) => Function,
    Role(RoleBlueprint) => Role,
    Warehouse(WarehouseBlueprint) => Warehouse,
    MaskingPolicy(MaskingPolicyBlueprint) => MaskingPolicy,
    PrimaryKey(PrimaryKeyBlueprint) => PrimaryKey,
}

impl Blueprint {
    pub fn comment(&self) -> Option<&str> {
        match self {
            Blueprint::Database(bp) => bp.comment.as_deref(),
            Blueprint::Schema(bp) => bp.comment.as_deref(),
            Blueprint::Table(bp) => bp.comment.as_deref(),
            Blueprint::View(bp) => bp.comment.as_deref(),
            Blueprint::Function(bp) => bp.comment.as_deref(),
            Blueprint::Role(bp) => bp.comment.as_deref(),
            Blueprint::Warehouse(bp) => bp.comment.as_deref(),
            Blueprint::MaskingPolicy(bp) => bp.comment.as_deref(),
            Blueprint::PrimaryKey(_) => None,
        }
    }

    /// Policy reference list, for the policy kinds that carry one.
    pub(crate) fn references_mut(&mut self) -> Option<&mut Vec<PolicyReference>> {
        match self {
            Blueprint::MaskingPolicy(bp) => Some(&mut bp.references),
            _ => None,
        }
    }
}
