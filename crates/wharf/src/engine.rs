//! The engine: one per run.
//!
//! Owns the warehouse transport, the registry, the run settings, the
//! intention cache, the worker pool and the DDL logs. Every statement a
//! resolver wants to run goes through one of the `execute_*` methods, which
//! decide from the settings whether the statement runs or is only recorded
//! as a suggestion. A plan and an apply share all of that logic; only the
//! settings differ.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tracing::{debug, info};
use wharf_config::{Edition, Settings};

use crate::transport::{ColumnMeta, Row, Transport};
use crate::{
    Config, DatabaseBlueprint, IntentionCache, ObjectKind, Result, SchemaBlueprint, TracedTransport,
};

/// The setting that must be on, next to `execute_unsafe_ddl`, for an unsafe
/// statement to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeGate {
    General,
    ReplaceTable,
    MaskingPolicy,
    RowAccessPolicy,
    AggregationPolicy,
    ProjectionPolicy,
    NetworkPolicy,
    ResourceMonitor,
    AccountParameter,
}

impl UnsafeGate {
    pub fn is_open(self, settings: &Settings) -> bool {
        settings.execute_unsafe_ddl
            && match self {
                UnsafeGate::General => true,
                UnsafeGate::ReplaceTable => settings.execute_replace_table,
                UnsafeGate::MaskingPolicy => settings.execute_masking_policy,
                UnsafeGate::RowAccessPolicy => settings.execute_row_access_policy,
                UnsafeGate::AggregationPolicy => settings.execute_aggregation_policy,
                UnsafeGate::ProjectionPolicy => settings.execute_projection_policy,
                UnsafeGate::NetworkPolicy => settings.execute_network_policy,
                UnsafeGate::ResourceMonitor => settings.execute_resource_monitor,
                UnsafeGate::AccountParameter => settings.execute_account_parameter,
            }
    }
}

/// Statements a task executed or only suggested, in emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DdlLog {
    pub executed: Vec<String>,
    pub suggested: Vec<String>,
}

impl DdlLog {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.suggested.is_empty()
    }

    pub fn extend(&mut self, other: DdlLog) {
        self.executed.extend(other.executed);
        self.suggested.extend(other.suggested);
    }
}

pub struct Engine {
    transport: TracedTransport,
    config: Config,
    settings: Settings,
    intentions: IntentionCache,
    included: HashSet<ObjectKind>,
    excluded: HashSet<ObjectKind>,
    log: Mutex<DdlLog>,
    workers: Arc<Semaphore>,
}

impl Engine {
    /// Create the engine and run the session bootstrap statements.
    pub fn new(transport: Arc<dyn Transport>, config: Config, settings: Settings) -> Result<Self> {
        let parse_kinds = |names: &[String]| {
            names
                .iter()
                .map(|n| n.parse::<ObjectKind>())
                .collect::<Result<HashSet<_>>>()
        };
        let included = parse_kinds(&settings.include_object_types)?;
        let excluded = parse_kinds(&settings.exclude_object_types)?;
        let workers = settings.worker_count();

        let engine = Self {
            transport: TracedTransport::new(transport),
            config,
            included,
            excluded,
            intentions: IntentionCache::new(),
            log: Mutex::new(DdlLog::default()),
            workers: Arc::new(Semaphore::new(workers)),
            settings,
        };

        for sql in &engine.settings.session_statements {
            engine.execute_context(sql)?;
        }

        info!(
            env_prefix = engine.config.env_prefix(),
            workers,
            execute_safe_ddl = engine.settings.execute_safe_ddl,
            execute_unsafe_ddl = engine.settings.execute_unsafe_ddl,
            "engine ready"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn intentions(&self) -> &IntentionCache {
        &self.intentions
    }

    pub fn edition(&self) -> Edition {
        self.settings.edition
    }

    pub fn env_prefix(&self) -> &str {
        self.config.env_prefix()
    }

    pub(crate) fn workers(&self) -> &Arc<Semaphore> {
        &self.workers
    }

    /// Whether the include/exclude settings let `kind` be resolved.
    pub fn is_included(&self, kind: ObjectKind) -> bool {
        (self.included.is_empty() || self.included.contains(&kind)) && !self.excluded.contains(&kind)
    }

    /// Whether `name` lives in a database or schema declared as a sandbox.
    /// Objects in sandboxes are never dropped.
    pub fn is_sandboxed(&self, kind: ObjectKind, name: &str) -> bool {
        let in_schema =
            kind.is_schema_object() || kind.is_constraint() || kind == ObjectKind::StageFile;
        if !(in_schema || kind == ObjectKind::Schema) {
            return false;
        }
        let mut parts = name.split(['(', '/']).next().unwrap_or(name).split('.');
        let Some(db) = parts.next() else {
            return false;
        };
        if self
            .config
            .get_blueprint::<DatabaseBlueprint>(db)
            .is_some_and(|d| d.is_sandbox)
        {
            return true;
        }
        let (true, Some(schema)) = (in_schema, parts.next()) else {
            return false;
        };
        self.config
            .get_blueprint::<SchemaBlueprint>(&format!("{db}.{schema}"))
            .is_some_and(|s| s.is_sandbox)
    }

    /// Read-only introspection. Never gated, never logged as DDL.
    pub fn execute_meta(&self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.transport.execute(sql)?)
    }

    pub fn describe_meta(&self, sql: &str) -> Result<Vec<ColumnMeta>> {
        Ok(self.transport.describe(sql)?)
    }

    /// Session bootstrap (`USE ROLE`, `USE WAREHOUSE`). Always executed.
    pub fn execute_context(&self, sql: &str) -> Result<()> {
        self.transport.execute(sql)?;
        Ok(())
    }

    /// CREATE and additive ALTER.
    pub fn execute_safe(&self, sql: &str, condition: bool) -> Result<()> {
        let allowed = self.settings.execute_safe_ddl && condition;
        let entry = self.run_or_suggest(sql, allowed)?;
        self.lock_log().extend(entry);
        Ok(())
    }

    /// DROP, destructive ALTER and the categories behind their own flags.
    pub fn execute_unsafe(&self, sql: &str, gate: UnsafeGate, condition: bool) -> Result<()> {
        let allowed = gate.is_open(&self.settings) && condition;
        let entry = self.run_or_suggest(sql, allowed)?;
        self.lock_log().extend(entry);
        Ok(())
    }

    pub fn executed_ddl(&self) -> Vec<String> {
        self.lock_log().executed.clone()
    }

    pub fn suggested_ddl(&self) -> Vec<String> {
        self.lock_log().suggested.clone()
    }

    /// Append a finished task's log to the shared one.
    pub(crate) fn merge_log(&self, log: DdlLog) {
        if !log.is_empty() {
            self.lock_log().extend(log);
        }
    }

    fn run_or_suggest(&self, sql: &str, allowed: bool) -> Result<DdlLog> {
        let mut entry = DdlLog::default();
        if allowed {
            self.transport.execute(sql)?;
            entry.executed.push(sql.to_string());
        } else {
            debug!(sql, "suggested");
            entry.suggested.push(sql.to_string());
        }
        Ok(entry)
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, DdlLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The engine as seen by one worker task.
///
/// Same execution gate as [`Engine`], but DDL is recorded in a task-local
/// [`DdlLog`] which the scheduler merges once the task's batch is done.
pub struct TaskContext<'a> {
    engine: &'a Engine,
    log: DdlLog,
}

impl<'a> TaskContext<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            log: DdlLog::default(),
        }
    }

    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub fn config(&self) -> &'a Config {
        self.engine.config()
    }

    pub fn settings(&self) -> &'a Settings {
        self.engine.settings()
    }

    pub fn intentions(&self) -> &'a IntentionCache {
        self.engine.intentions()
    }

    pub fn execute_meta(&self, sql: &str) -> Result<Vec<Row>> {
        self.engine.execute_meta(sql)
    }

    pub fn describe_meta(&self, sql: &str) -> Result<Vec<ColumnMeta>> {
        self.engine.describe_meta(sql)
    }

    pub fn execute_safe(&mut self, sql: &str, condition: bool) -> Result<()> {
        let allowed = self.engine.settings.execute_safe_ddl && condition;
        let entry = self.engine.run_or_suggest(sql, allowed)?;
        self.log.extend(entry);
        Ok(())
    }

    pub fn execute_unsafe(&mut self, sql: &str, gate: UnsafeGate, condition: bool) -> Result<()> {
        let allowed = gate.is_open(&self.engine.settings) && condition;
        let entry = self.engine.run_or_suggest(sql, allowed)?;
        self.log.extend(entry);
        Ok(())
    }

    pub fn log(&self) -> &DdlLog {
        &self.log
    }

    pub fn into_log(self) -> DdlLog {
        self.log
    }
}
