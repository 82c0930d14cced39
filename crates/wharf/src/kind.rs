//! Object kinds the engine can address.

use std::fmt;
use std::str::FromStr;

use crate::Error;

macro_rules! object_kinds {
    ($($variant:ident => $name:literal, $plural:literal;)*) => {
        /// Every kind of warehouse object known to the engine.
        ///
        /// Used as the registry key, the intention cache key, the
        /// include/exclude filter, and the identity of a resolver.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ObjectKind {
            $($variant,)*
        }

        impl ObjectKind {
            pub const ALL: &'static [ObjectKind] = &[$(ObjectKind::$variant,)*];

            /// SQL keyword, singular (`MASKING POLICY`).
            pub fn singular(self) -> &'static str {
                match self {
                    $(ObjectKind::$variant => $name,)*
                }
            }

            /// SQL keyword, plural (`MASKING POLICIES`).
            pub fn plural(self) -> &'static str {
                match self {
                    $(ObjectKind::$variant => $plural,)*
                }
            }
        }
    };
}

object_kinds! {
    AccountParameter => "ACCOUNT PARAMETER", "ACCOUNT PARAMETERS";
    AggregationPolicy => "AGGREGATION POLICY", "AGGREGATION POLICIES";
    Alert => "ALERT", "ALERTS";
    Database => "DATABASE", "DATABASES";
    DatabaseRole => "DATABASE ROLE", "DATABASE ROLES";
    DynamicTable => "DYNAMIC TABLE", "DYNAMIC TABLES";
    EventTable => "EVENT TABLE", "EVENT TABLES";
    ExternalAccessIntegration => "EXTERNAL ACCESS INTEGRATION", "EXTERNAL ACCESS INTEGRATIONS";
    ExternalFunction => "EXTERNAL FUNCTION", "EXTERNAL FUNCTIONS";
    ExternalTable => "EXTERNAL TABLE", "EXTERNAL TABLES";
    FileFormat => "FILE FORMAT", "FILE FORMATS";
    ForeignKey => "FOREIGN KEY", "FOREIGN KEYS";
    Function => "FUNCTION", "FUNCTIONS";
    HybridTable => "HYBRID TABLE", "HYBRID TABLES";
    Integration => "INTEGRATION", "INTEGRATIONS";
    MaskingPolicy => "MASKING POLICY", "MASKING POLICIES";
    MaterializedView => "MATERIALIZED VIEW", "MATERIALIZED VIEWS";
    NetworkPolicy => "NETWORK POLICY", "NETWORK POLICIES";
    NetworkRule => "NETWORK RULE", "NETWORK RULES";
    PermissionModel => "PERMISSION MODEL", "PERMISSION MODELS";
    Pipe => "PIPE", "PIPES";
    PrimaryKey => "PRIMARY KEY", "PRIMARY KEYS";
    Procedure => "PROCEDURE", "PROCEDURES";
    ProjectionPolicy => "PROJECTION POLICY", "PROJECTION POLICIES";
    ResourceMonitor => "RESOURCE MONITOR", "RESOURCE MONITORS";
    Role => "ROLE", "ROLES";
    RowAccessPolicy => "ROW ACCESS POLICY", "ROW ACCESS POLICIES";
    Schema => "SCHEMA", "SCHEMAS";
    Secret => "SECRET", "SECRETS";
    Sequence => "SEQUENCE", "SEQUENCES";
    Share => "SHARE", "SHARES";
    Stage => "STAGE", "STAGES";
    StageFile => "STAGE FILE", "STAGE FILES";
    Stream => "STREAM", "STREAMS";
    Table => "TABLE", "TABLES";
    Tag => "TAG", "TAGS";
    Task => "TASK", "TASKS";
    UniqueKey => "UNIQUE KEY", "UNIQUE KEYS";
    User => "USER", "USERS";
    View => "VIEW", "VIEWS";
    Warehouse => "WAREHOUSE", "WAREHOUSES";
}

impl ObjectKind {
    /// Whether objects of this kind live inside a schema.
    pub fn is_schema_object(self) -> bool {
        use ObjectKind::*;
        matches!(
            self,
            AggregationPolicy
                | Alert
                | DynamicTable
                | EventTable
                | ExternalFunction
                | ExternalTable
                | FileFormat
                | Function
                | HybridTable
                | MaskingPolicy
                | MaterializedView
                | NetworkRule
                | Pipe
                | Procedure
                | ProjectionPolicy
                | RowAccessPolicy
                | Secret
                | Sequence
                | Stage
                | Stream
                | Table
                | Tag
                | Task
                | View
        )
    }

    /// Whether objects of this kind are constraints attached to a table.
    pub fn is_constraint(self) -> bool {
        matches!(
            self,
            ObjectKind::PrimaryKey | ObjectKind::UniqueKey | ObjectKind::ForeignKey
        )
    }

    /// The kind whose drop takes objects of this kind with it. Constraints
    /// report `Table`, though every table-like kind qualifies.
    pub fn container(self) -> Option<ObjectKind> {
        use ObjectKind::*;
        if self.is_constraint() {
            Some(Table)
        } else if self == StageFile {
            Some(Stage)
        } else if self.is_schema_object() {
            Some(Schema)
        } else if matches!(self, Schema | DatabaseRole) {
            Some(Database)
        } else {
            None
        }
    }

    /// Whether this kind is a table whose drop takes its constraints with it.
    pub fn is_table_like(self) -> bool {
        matches!(
            self,
            ObjectKind::Table | ObjectKind::ExternalTable | ObjectKind::HybridTable
        )
    }

    /// Whether objects of this kind carry the environment prefix in their
    /// own name (account-level objects and databases).
    pub fn is_env_prefixed(self) -> bool {
        use ObjectKind::*;
        matches!(
            self,
            Database
                | ExternalAccessIntegration
                | Integration
                | NetworkPolicy
                | ResourceMonitor
                | Role
                | Share
                | User
                | Warehouse
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    /// Parse `masking_policy`, `MASKING POLICY` or `Masking Policy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', " ").to_uppercase();
        ObjectKind::ALL
            .iter()
            .copied()
            .find(|k| k.singular() == wanted)
            .ok_or_else(|| Error::UnknownObjectKind(s.to_string()))
    }
}
