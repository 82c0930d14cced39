//! The resolver protocol.
//!
//! One resolver per object kind. A resolver declares how to read the
//! declared state (blueprints) and the existing state (snapshot) of its
//! kind, and how to create, compare and drop a single object. The shared
//! pipelines in this module do the rest:
//!
//! - [`resolve`]: skip guard, snapshot, pre-process, batched reconcile,
//!   drop phase, post-process
//! - [`destroy`]: skip guard, snapshot, drop everything
//!
//! Per-object failures never abort a pipeline. They become
//! [`ResolveOutcome::Error`] or [`ResolveOutcome::Unsupported`] entries in the
//! [`ResolveResult`]. A failed snapshot fails the whole resolver. Errors in
//! the configuration itself are returned as `Err`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{error, info};
use wharf_config::Edition;

use crate::scheduler::{Task, run_all, run_batch, run_blocking, split_into_batches};
use crate::{DependsOn, Engine, Error, ObjectKind, Result, TaskContext};

/// What happened to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveOutcome {
    Create,
    Alter,
    Replace,
    Drop,
    Grant,
    Skip,
    NoChange,
    Error,
    Unsupported,
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolveOutcome::Create => "CREATE",
            ResolveOutcome::Alter => "ALTER",
            ResolveOutcome::Replace => "REPLACE",
            ResolveOutcome::Drop => "DROP",
            ResolveOutcome::Grant => "GRANT",
            ResolveOutcome::Skip => "SKIP",
            ResolveOutcome::NoChange => "NOCHANGE",
            ResolveOutcome::Error => "ERROR",
            ResolveOutcome::Unsupported => "UNSUPPORTED",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolverStatus {
    Completed,
    Skipped(String),
    /// Introspection failed; nothing was resolved.
    Failed(String),
}

/// Everything one resolver run produced.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    pub kind: ObjectKind,
    pub status: ResolverStatus,
    pub outcomes: IndexMap<String, ResolveOutcome>,
    pub errors: IndexMap<String, String>,
}

impl ResolveResult {
    fn new(kind: ObjectKind, status: ResolverStatus) -> Self {
        Self {
            kind,
            status,
            outcomes: IndexMap::new(),
            errors: IndexMap::new(),
        }
    }

    /// Per-object errors, plus one if the resolver itself failed.
    pub fn error_count(&self) -> usize {
        self.errors.len() + usize::from(matches!(self.status, ResolverStatus::Failed(_)))
    }

    pub fn count(&self, outcome: ResolveOutcome) -> usize {
        self.outcomes.values().filter(|o| **o == outcome).count()
    }

    /// Whether nothing needed doing.
    pub fn is_converged(&self) -> bool {
        self.error_count() == 0
            && self
                .outcomes
                .values()
                .all(|o| matches!(o, ResolveOutcome::NoChange | ResolveOutcome::Skip))
    }

    fn record(&mut self, name: String, result: Result<ResolveOutcome>) {
        match result {
            Ok(outcome) => {
                if !matches!(outcome, ResolveOutcome::NoChange | ResolveOutcome::Skip) {
                    info!(kind = %self.kind, name = %name, %outcome);
                }
                self.outcomes.insert(name, outcome);
            }
            Err(e) => {
                let outcome = match e {
                    Error::Unsupported(_) => ResolveOutcome::Unsupported,
                    _ => ResolveOutcome::Error,
                };
                error!(kind = %self.kind, name = %name, %outcome, "{e}");
                self.errors.insert(name.clone(), e.to_string());
                self.outcomes.insert(name, outcome);
            }
        }
    }
}

/// Converges one object kind.
///
/// `Scope` is the unit of introspection: `()` for kinds listed with one
/// account-wide call, a database or schema identifier for kinds listed one
/// container at a time.
pub trait Resolver: Send + Sync + 'static {
    type Blueprint: DependsOn + Send + Sync + 'static;
    type Existing: Send + Sync + 'static;
    type Scope: Send + 'static;

    fn object_kind(&self) -> ObjectKind;

    fn min_edition(&self) -> Edition {
        Edition::Standard
    }

    /// Skip entirely when nothing of this kind is declared, instead of
    /// dropping every existing object.
    fn skip_when_empty(&self) -> bool {
        false
    }

    fn get_blueprints(&self, engine: &Engine) -> Result<IndexMap<String, Self::Blueprint>>;

    /// Containers to introspect, one `get_existing_objects` call each.
    fn introspection_scopes(&self, engine: &Engine) -> Result<Vec<Self::Scope>>;

    fn get_existing_objects(
        &self,
        engine: &Engine,
        scope: &Self::Scope,
    ) -> Result<IndexMap<String, Self::Existing>>;

    fn create_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &Self::Blueprint,
    ) -> Result<ResolveOutcome>;

    fn compare_object(
        &self,
        ctx: &mut TaskContext<'_>,
        bp: &Self::Blueprint,
        existing: &Self::Existing,
    ) -> Result<ResolveOutcome>;

    fn drop_object(
        &self,
        ctx: &mut TaskContext<'_>,
        existing: &Self::Existing,
    ) -> Result<ResolveOutcome>;

    /// Whether an undeclared object should get a drop task. Objects whose
    /// container is being dropped, and objects in sandbox schemas, are left
    /// alone.
    fn should_drop(&self, engine: &Engine, name: &str, _existing: &Self::Existing) -> bool {
        let kind = self.object_kind();
        !engine.intentions().is_parent_marked_drop(kind, name) && !engine.is_sandboxed(kind, name)
    }

    fn pre_process(&self, _engine: &Engine) -> Result<()> {
        Ok(())
    }

    fn post_process(&self, _engine: &Engine, _result: &ResolveResult) -> Result<()> {
        Ok(())
    }
}

fn skip_reason<R: Resolver>(resolver: &R, engine: &Engine) -> Option<String> {
    let kind = resolver.object_kind();
    if engine.edition() < resolver.min_edition() {
        return Some(format!(
            "requires {:?} edition, account is {:?}",
            resolver.min_edition(),
            engine.edition()
        ));
    }
    if !engine.is_included(kind) {
        return Some("excluded by settings".to_string());
    }
    None
}

async fn snapshot<R: Resolver>(
    resolver: &Arc<R>,
    engine: &Arc<Engine>,
) -> Result<IndexMap<String, R::Existing>> {
    let r = resolver.clone();
    let scopes = run_blocking(engine, move |engine| r.introspection_scopes(engine)).await?;

    let jobs: Vec<_> = scopes
        .into_iter()
        .map(|scope| {
            let r = resolver.clone();
            move |engine: &Engine| r.get_existing_objects(engine, &scope)
        })
        .collect();

    let mut existing = IndexMap::new();
    for part in run_all(engine, jobs).await? {
        existing.extend(part);
    }
    existing.sort_keys();
    Ok(existing)
}

/// Converge declared and existing state for one kind.
pub async fn resolve<R: Resolver>(resolver: Arc<R>, engine: Arc<Engine>) -> Result<ResolveResult> {
    let kind = resolver.object_kind();
    if let Some(reason) = skip_reason(resolver.as_ref(), &engine) {
        info!(kind = %kind, %reason, "skipped");
        return Ok(ResolveResult::new(kind, ResolverStatus::Skipped(reason)));
    }

    let blueprints = Arc::new(resolver.get_blueprints(&engine)?);
    if blueprints.is_empty() && (resolver.skip_when_empty() || engine.settings().ignore_empty_kinds)
    {
        info!(kind = %kind, "skipped, nothing declared");
        return Ok(ResolveResult::new(
            kind,
            ResolverStatus::Skipped("nothing declared".to_string()),
        ));
    }

    info!(kind = %kind, declared = blueprints.len(), "resolving");
    let existing = match snapshot(&resolver, &engine).await {
        Ok(existing) => Arc::new(existing),
        Err(e) => {
            error!(kind = %kind, "introspection failed: {e}");
            return Ok(ResolveResult::new(kind, ResolverStatus::Failed(e.to_string())));
        }
    };

    let r = resolver.clone();
    run_blocking(&engine, move |engine| r.pre_process(engine)).await?;

    let mut result = ResolveResult::new(kind, ResolverStatus::Completed);

    let deps: IndexMap<String, Vec<String>> = blueprints
        .iter()
        .map(|(name, bp)| (name.clone(), bp.depends_on()))
        .collect();

    for batch in split_into_batches(kind, &deps) {
        let tasks = batch
            .into_iter()
            .map(|name| {
                let (r, bps, ex) = (resolver.clone(), blueprints.clone(), existing.clone());
                let key = name.clone();
                let task: Task = Box::new(move |ctx| {
                    let bp = bps
                        .get(&key)
                        .ok_or_else(|| Error::Task(format!("blueprint '{key}' vanished")))?;
                    match ex.get(&key) {
                        Some(existing) => r.compare_object(ctx, bp, existing),
                        None => r.create_object(ctx, bp),
                    }
                });
                (name, task)
            })
            .collect();

        for (name, outcome) in run_batch(&engine, tasks).await? {
            result.record(name, outcome);
        }
    }

    let mut drops = Vec::new();
    for name in existing.keys().filter(|n| !blueprints.contains_key(*n)) {
        let Some(obj) = existing.get(name) else {
            continue;
        };
        if !resolver.should_drop(&engine, name, obj) {
            result.record(name.clone(), Ok(ResolveOutcome::Skip));
            continue;
        }
        drops.push((name.clone(), drop_task(&resolver, &existing, name)));
    }
    for (name, outcome) in run_batch(&engine, drops).await? {
        result.record(name, outcome);
    }

    let r = resolver.clone();
    let summary = result.clone();
    run_blocking(&engine, move |engine| r.post_process(engine, &summary)).await?;

    info!(
        kind = %kind,
        created = result.count(ResolveOutcome::Create),
        altered = result.count(ResolveOutcome::Alter),
        replaced = result.count(ResolveOutcome::Replace),
        dropped = result.count(ResolveOutcome::Drop),
        errors = result.error_count(),
        "resolved"
    );
    Ok(result)
}

/// Drop every existing object of one kind.
pub async fn destroy<R: Resolver>(resolver: Arc<R>, engine: Arc<Engine>) -> Result<ResolveResult> {
    let kind = resolver.object_kind();

    if let Some(reason) = skip_reason(resolver.as_ref(), &engine) {
        info!(kind = %kind, %reason, "skipped");
        return Ok(ResolveResult::new(kind, ResolverStatus::Skipped(reason)));
    }

    let existing = match snapshot(&resolver, &engine).await {
        Ok(existing) => Arc::new(existing),
        Err(e) => {
            error!(kind = %kind, "introspection failed: {e}");
            return Ok(ResolveResult::new(kind, ResolverStatus::Failed(e.to_string())));
        }
    };

    let drops = existing
        .keys()
        .map(|name| (name.clone(), drop_task(&resolver, &existing, name)))
        .collect();

    let mut result = ResolveResult::new(kind, ResolverStatus::Completed);
    for (name, outcome) in run_batch(&engine, drops).await? {
        result.record(name, outcome);
    }

    info!(
        kind = %kind,
        dropped = result.count(ResolveOutcome::Drop),
        errors = result.error_count(),
        "destroyed"
    );
    Ok(result)
}

fn drop_task<R: Resolver>(
    resolver: &Arc<R>,
    existing: &Arc<IndexMap<String, R::Existing>>,
    name: &str,
) -> Task {
    let (r, ex, key) = (resolver.clone(), existing.clone(), name.to_string());
    Box::new(move |ctx| {
        let obj = ex
            .get(&key)
            .ok_or_else(|| Error::Task(format!("object '{key}' vanished")))?;
        r.drop_object(ctx, obj)
    })
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe view of a [`Resolver`], so the driver can hold a list of
/// resolvers of different kinds.
pub trait AnyResolver: Send + Sync {
    fn kind(&self) -> ObjectKind;

    fn resolve(self: Arc<Self>, engine: Arc<Engine>) -> BoxFuture<'static, Result<ResolveResult>>;

    fn destroy(self: Arc<Self>, engine: Arc<Engine>) -> BoxFuture<'static, Result<ResolveResult>>;
}

impl<R: Resolver> AnyResolver for R {
    fn kind(&self) -> ObjectKind {
        Resolver::object_kind(self)
    }

    fn resolve(self: Arc<Self>, engine: Arc<Engine>) -> BoxFuture<'static, Result<ResolveResult>> {
        Box::pin(resolve(self, engine))
    }

    fn destroy(self: Arc<Self>, engine: Arc<Engine>) -> BoxFuture<'static, Result<ResolveResult>> {
        Box::pin(destroy(self, engine))
    }
}
