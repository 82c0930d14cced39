//! Run-scoped record of pending drops and replaces.
//!
//! Resolvers mark objects here before dropping or replacing them. Later
//! resolvers consult the marks so they do not try to drop something the
//! warehouse already removed as part of a cascade.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::ObjectKind;

#[derive(Debug, Default)]
pub struct IntentionCache {
    drop: Mutex<HashMap<ObjectKind, HashSet<String>>>,
    replace: Mutex<HashMap<ObjectKind, HashSet<String>>>,
    invalid_names: Mutex<Vec<(ObjectKind, String)>>,
}

impl IntentionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_drop(&self, kind: ObjectKind, name: &str) {
        insert(&self.drop, kind, name);
    }

    pub fn mark_replace(&self, kind: ObjectKind, name: &str) {
        insert(&self.replace, kind, name);
    }

    pub fn is_marked_drop(&self, kind: ObjectKind, name: &str) -> bool {
        contains(&self.drop, kind, name)
    }

    pub fn is_marked_replace(&self, kind: ObjectKind, name: &str) -> bool {
        contains(&self.replace, kind, name)
    }

    /// Whether a container that holds `name` is being dropped, which takes
    /// `name` with it.
    ///
    /// - a database drop covers its schemas, its database roles and
    ///   everything inside its schemas
    /// - a schema drop covers its schema objects
    /// - a stage drop covers its files
    /// - a table drop (any table-like kind) covers its constraints
    pub fn is_parent_marked_drop(&self, kind: ObjectKind, name: &str) -> bool {
        // Strip argument lists, column lists and stage file paths.
        let base = name.split(['(', '/']).next().unwrap_or(name);
        let parts: Vec<&str> = base.split('.').collect();

        let database_marked = || self.is_marked_drop(ObjectKind::Database, parts[0]);
        let schema_marked = || {
            parts.len() >= 2
                && self.is_marked_drop(ObjectKind::Schema, &format!("{}.{}", parts[0], parts[1]))
        };

        match kind.container() {
            Some(ObjectKind::Database) => database_marked(),
            Some(ObjectKind::Schema) => database_marked() || schema_marked(),
            Some(ObjectKind::Stage) => {
                database_marked()
                    || schema_marked()
                    || (parts.len() >= 3 && self.is_marked_drop(ObjectKind::Stage, base))
            }
            Some(_) => {
                database_marked()
                    || schema_marked()
                    || (parts.len() >= 3
                        && ObjectKind::ALL
                            .iter()
                            .filter(|k| k.is_table_like())
                            .any(|&table| self.is_marked_drop(table, base)))
            }
            None => false,
        }
    }

    /// Record an introspected name that does not fit the identifier model.
    pub fn mark_invalid_name(&self, kind: ObjectKind, name: &str) {
        warn!(kind = %kind, name, "ignoring object with unexpected name");
        self.invalid_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, name.to_string()));
    }

    pub fn invalid_names(&self) -> Vec<(ObjectKind, String)> {
        self.invalid_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn insert(set: &Mutex<HashMap<ObjectKind, HashSet<String>>>, kind: ObjectKind, name: &str) {
    set.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(kind)
        .or_default()
        .insert(name.to_string());
}

fn contains(set: &Mutex<HashMap<ObjectKind, HashSet<String>>>, kind: ObjectKind, name: &str) -> bool {
    set.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&kind)
        .is_some_and(|names| names.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_marks() {
        let cache = IntentionCache::new();
        cache.mark_drop(ObjectKind::Table, "ACME.SALES.ORDERS");
        cache.mark_replace(ObjectKind::Table, "ACME.SALES.ITEMS");

        assert!(cache.is_marked_drop(ObjectKind::Table, "ACME.SALES.ORDERS"));
        assert!(!cache.is_marked_drop(ObjectKind::View, "ACME.SALES.ORDERS"));
        assert!(cache.is_marked_replace(ObjectKind::Table, "ACME.SALES.ITEMS"));
        assert!(!cache.is_marked_drop(ObjectKind::Table, "ACME.SALES.ITEMS"));
    }

    #[test]
    fn test_database_drop_covers_everything_inside() {
        let cache = IntentionCache::new();
        cache.mark_drop(ObjectKind::Database, "DEV__ACME");

        assert!(cache.is_parent_marked_drop(ObjectKind::Schema, "DEV__ACME.SALES"));
        assert!(cache.is_parent_marked_drop(ObjectKind::Table, "DEV__ACME.SALES.ORDERS"));
        assert!(cache.is_parent_marked_drop(ObjectKind::Function, "DEV__ACME.UTIL.TAX(NUMBER)"));
        assert!(cache.is_parent_marked_drop(ObjectKind::PrimaryKey, "DEV__ACME.SALES.ORDERS(ID)"));
        assert!(cache.is_parent_marked_drop(ObjectKind::DatabaseRole, "DEV__ACME.READER"));
        assert!(!cache.is_parent_marked_drop(ObjectKind::Schema, "DEV__HR.PEOPLE"));
        assert!(!cache.is_parent_marked_drop(ObjectKind::Database, "DEV__ACME"));
        assert!(!cache.is_parent_marked_drop(ObjectKind::Role, "DEV__ACME"));
    }

    #[test]
    fn test_schema_drop_covers_schema_objects_only() {
        let cache = IntentionCache::new();
        cache.mark_drop(ObjectKind::Schema, "ACME.SALES");

        assert!(cache.is_parent_marked_drop(ObjectKind::View, "ACME.SALES.V1"));
        assert!(!cache.is_parent_marked_drop(ObjectKind::View, "ACME.HR.V1"));
        assert!(!cache.is_parent_marked_drop(ObjectKind::Schema, "ACME.SALES"));
    }

    #[test]
    fn test_table_drop_covers_constraints() {
        let cache = IntentionCache::new();
        cache.mark_drop(ObjectKind::HybridTable, "ACME.SALES.ORDERS");

        assert!(cache.is_parent_marked_drop(ObjectKind::PrimaryKey, "ACME.SALES.ORDERS(ID)"));
        assert!(cache.is_parent_marked_drop(ObjectKind::ForeignKey, "ACME.SALES.ORDERS(CUSTOMER_ID)"));
        assert!(!cache.is_parent_marked_drop(ObjectKind::PrimaryKey, "ACME.SALES.ITEMS(ID)"));
    }

    #[test]
    fn test_stage_drop_covers_files() {
        let cache = IntentionCache::new();
        cache.mark_drop(ObjectKind::Stage, "ACME.RAW.LANDING");

        assert!(cache.is_parent_marked_drop(ObjectKind::StageFile, "ACME.RAW.LANDING/2024/a.csv"));
        assert!(!cache.is_parent_marked_drop(ObjectKind::StageFile, "ACME.RAW.OTHER/a.csv"));
    }

    #[test]
    fn test_invalid_names_are_collected() {
        let cache = IntentionCache::new();
        cache.mark_invalid_name(ObjectKind::Role, "weird-role");
        assert_eq!(
            cache.invalid_names(),
            vec![(ObjectKind::Role, "weird-role".to_string())]
        );
    }
}
