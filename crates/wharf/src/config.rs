//! The blueprint registry.
//!
//! Built once per run by the config layer, then read by every resolver.
//! Mutation (`add_blueprint`, `remove_blueprint`) is for the loading phase
//! and for resolvers that inject generated blueprints before the resolver
//! that consumes them runs; it is not meant to happen concurrently.

use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::IndexMap;

use crate::{
    Blueprint, Error, IdentPattern, ObjectKind, PermissionModel, PolicyReference, Result,
    TypedBlueprint,
};

/// Name of the permission model used when a blueprint names none.
pub const DEFAULT_PERMISSION_MODEL: &str = "default";

static EMPTY: LazyLock<IndexMap<String, Blueprint>> = LazyLock::new(IndexMap::new);

/// A placeholder value substituted into config files.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// A problem found while building the registry. Collected rather than
/// raised, so that one run reports every broken file at once.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub path: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    env_prefix: String,
    blueprints: HashMap<ObjectKind, IndexMap<String, Blueprint>>,
    permission_models: IndexMap<String, PermissionModel>,
    placeholders: IndexMap<String, PlaceholderValue>,
    errors: Vec<ConfigIssue>,
}

impl Config {
    pub fn new(env_prefix: &str) -> Self {
        let mut permission_models = IndexMap::new();
        permission_models.insert(
            DEFAULT_PERMISSION_MODEL.to_string(),
            PermissionModel::default(),
        );

        Self {
            env_prefix: env_prefix.to_uppercase(),
            blueprints: HashMap::new(),
            permission_models,
            placeholders: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Insert a blueprint, replacing any previous one with the same kind and
    /// name. Generated blueprints rely on this to extend declared ones.
    pub fn add_blueprint(&mut self, bp: impl Into<Blueprint>) {
        let bp = bp.into();
        self.blueprints
            .entry(bp.kind())
            .or_default()
            .insert(bp.full_name(), bp);
    }

    pub fn remove_blueprint(&mut self, bp: &Blueprint) -> Result<Blueprint> {
        let name = bp.full_name();
        self.blueprints
            .get_mut(&bp.kind())
            .and_then(|m| m.shift_remove(&name))
            .ok_or(Error::BlueprintNotFound {
                kind: bp.kind(),
                name,
            })
    }

    /// Every blueprint of `kind`, keyed by full name.
    pub fn get_by_kind(&self, kind: ObjectKind) -> &IndexMap<String, Blueprint> {
        self.blueprints.get(&kind).unwrap_or(&EMPTY)
    }

    /// Blueprints of `kind` whose name (without env prefix) matches `pattern`.
    pub fn get_by_kind_and_pattern(
        &self,
        kind: ObjectKind,
        pattern: &IdentPattern,
    ) -> IndexMap<String, &Blueprint> {
        self.get_by_kind(kind)
            .iter()
            .filter(|(_, bp)| pattern.is_match_text(&bp.full_name_without_prefix()))
            .map(|(name, bp)| (name.clone(), bp))
            .collect()
    }

    /// Typed view of every blueprint of `T::KIND`.
    pub fn get_blueprints<T: TypedBlueprint>(&self) -> IndexMap<String, T> {
        self.get_by_kind(T::KIND)
            .iter()
            .filter_map(|(name, bp)| T::from_blueprint(bp).map(|t| (name.clone(), t.clone())))
            .collect()
    }

    /// Typed lookup of one blueprint by full name.
    pub fn get_blueprint<T: TypedBlueprint>(&self, name: &str) -> Option<&T> {
        self.get_by_kind(T::KIND)
            .get(name)
            .and_then(T::from_blueprint)
    }

    /// Typed, pattern-filtered view.
    pub fn get_blueprints_by_pattern<T: TypedBlueprint>(
        &self,
        pattern: &IdentPattern,
    ) -> IndexMap<String, T> {
        self.get_by_kind_and_pattern(T::KIND, pattern)
            .into_iter()
            .filter_map(|(name, bp)| T::from_blueprint(bp).map(|t| (name, t.clone())))
            .collect()
    }

    pub fn add_permission_model(&mut self, name: &str, model: PermissionModel) {
        self.permission_models.insert(name.to_lowercase(), model);
    }

    /// The named permission model, or the default one when `name` is `None`.
    pub fn get_permission_model(&self, name: Option<&str>) -> Result<&PermissionModel> {
        let name = name
            .map(str::to_lowercase)
            .unwrap_or_else(|| DEFAULT_PERMISSION_MODEL.to_string());
        self.permission_models
            .get(&name)
            .ok_or(Error::UnknownPermissionModel(name))
    }

    /// Attach a policy reference to an already loaded policy blueprint.
    ///
    /// Policies have to be loaded before the objects that reference them, so
    /// a missing policy is an error rather than something to defer.
    pub fn add_policy_reference(
        &mut self,
        kind: ObjectKind,
        name: &str,
        reference: PolicyReference,
    ) -> Result<()> {
        let bp = self
            .blueprints
            .get_mut(&kind)
            .and_then(|m| m.get_mut(name))
            .ok_or_else(|| Error::BlueprintNotFound {
                kind,
                name: name.to_string(),
            })?;

        let references = bp.references_mut().ok_or_else(|| {
            Error::unsupported(format!("{kind} blueprints do not carry policy references"))
        })?;
        references.push(reference);
        Ok(())
    }

    pub fn add_placeholder(&mut self, name: &str, value: PlaceholderValue) {
        self.placeholders.insert(name.to_uppercase(), value);
    }

    pub fn get_placeholder(&self, name: &str) -> Option<&PlaceholderValue> {
        self.placeholders.get(&name.to_uppercase())
    }

    pub fn add_error(&mut self, path: Option<&str>, message: impl Into<String>) {
        self.errors.push(ConfigIssue {
            path: path.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> &[ConfigIssue] {
        &self.errors
    }
}
