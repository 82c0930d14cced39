//! Declarative reconciliation for a cloud data warehouse.
//!
//! Objects are declared as blueprints in a [`Config`]. For every object kind
//! a [`Resolver`] reads what exists, compares it with what is declared, and
//! issues the DDL that closes the gap:
//!
//! - declared but missing: CREATE
//! - declared and different: ALTER, or a REPLACE where the warehouse cannot
//!   alter in place
//! - existing but not declared: DROP
//!
//! Nothing runs unless the [`Settings`] allow it. Statements that are not
//! allowed are collected as suggestions instead, so the same run doubles as
//! a plan:
//!
//! ```ignore
//! let engine = Arc::new(Engine::new(transport, config, settings)?);
//! let report = Driver::standard().apply(engine).await?;
//! for sql in report.suggested_ddl() {
//!     println!("{sql};");
//! }
//! ```
//!
//! # Environments
//!
//! Databases and account-level objects carry an environment prefix
//! (`DEV__`, `CI_1234__`), so several environments can share one account.
//! Only objects with the run's prefix are ever introspected or dropped.

mod blueprint;
mod config;
mod driver;
mod engine;
mod error;
mod ident;
mod intention;
mod kind;
mod pattern;
pub mod permission;
mod resolver;
pub mod resolvers;
mod scheduler;
mod traced;
pub mod transport;

pub use blueprint::{
    AccountGrant, ArgumentWithType, Blueprint, DatabaseBlueprint, DependsOn, FunctionBlueprint,
    FutureGrant, Grant, MaskingPolicyBlueprint, OwnerReferences, PolicyReference,
    PrimaryKeyBlueprint, RoleBlueprint, SchemaBlueprint, TableBlueprint, TableColumn,
    TypedBlueprint, ViewBlueprint, WarehouseBlueprint, normalize_column_type,
};
pub use config::{Config, ConfigIssue, DEFAULT_PERMISSION_MODEL, PlaceholderValue};
pub use driver::{Driver, RunReport};
pub use engine::{DdlLog, Engine, TaskContext, UnsafeGate};
pub use error::Error;
pub use ident::{
    AccountObjectIdent, AnyIdent, DatabaseIdent, DatabaseRoleIdent, Identifier, SchemaIdent,
    SchemaObjectIdent, SchemaObjectIdentWithArgs, TableConstraintIdent, normalize_data_type,
    normalize_part,
};
pub use intention::IntentionCache;
pub use kind::ObjectKind;
pub use pattern::IdentPattern;
pub use permission::{AccessRoleType, PermissionModel, PermissionModelRuleset};
pub use resolver::{
    AnyResolver, BoxFuture, ResolveOutcome, ResolveResult, Resolver, ResolverStatus, destroy,
    resolve,
};
pub use scheduler::{Task, split_into_batches};
pub use traced::TracedTransport;

pub use wharf_config::{Edition, Settings};

/// Result type for wharf operations.
pub type Result<T> = std::result::Result<T, Error>;
