//! Dependency batching and the bounded worker pool.
//!
//! Blueprints of one kind are split into batches so that nothing is resolved
//! before the blueprints it depends on. Batches run strictly one after the
//! other; the tasks inside a batch run concurrently on blocking worker
//! threads, at most `max_workers` at a time.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::task::JoinSet;
use tracing::warn;

use crate::{DdlLog, Engine, Error, ObjectKind, ResolveOutcome, Result, TaskContext};

/// One unit of work: create, compare or drop a single object.
pub type Task = Box<dyn FnOnce(&mut TaskContext<'_>) -> Result<ResolveOutcome> + Send>;

/// Split names into dependency-respecting batches.
///
/// `deps` maps each name to the names it depends on. A name goes into the
/// current batch once every dependency has been placed in an earlier batch.
/// Dependencies outside `deps` belong to other object kinds, which the
/// driver has already resolved, so they never hold a name back.
///
/// When nothing qualifies (a cycle), all remaining names are placed in the
/// current batch. Ordering is best effort: the warehouse accepts most
/// forward references anyway.
pub fn split_into_batches(kind: ObjectKind, deps: &IndexMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut allocated: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&String> = deps.keys().collect();

    while !remaining.is_empty() {
        let (mut ready, blocked): (Vec<&String>, Vec<&String>) = std::mem::take(&mut remaining)
            .into_iter()
            .partition(|name| {
                // An undeclared dependency counts as satisfied, it never
                // reaches the cycle fallback.
                deps[name.as_str()]
                    .iter()
                    .all(|d| !deps.contains_key(d) || allocated.contains(d.as_str()))
            });

        if ready.is_empty() {
            warn!(
                kind = %kind,
                count = blocked.len(),
                "dependency cycle, resolving the remaining blueprints together"
            );
            ready = blocked;
        } else {
            remaining = blocked;
        }

        allocated.extend(ready.iter().map(|n| n.as_str()));
        batches.push(ready.into_iter().cloned().collect());
    }

    batches
}

/// Run one batch of tasks concurrently and wait for all of them.
///
/// Results come back in completion order. A task that fails or panics only
/// affects its own entry. Task logs are merged into the engine once the
/// whole batch is done.
pub(crate) async fn run_batch(
    engine: &Arc<Engine>,
    tasks: Vec<(String, Task)>,
) -> Result<Vec<(String, Result<ResolveOutcome>)>> {
    let mut set = JoinSet::new();

    for (name, task) in tasks {
        let permit = engine
            .workers()
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        let engine = engine.clone();

        set.spawn_blocking(move || {
            let _permit = permit;
            let mut ctx = TaskContext::new(&engine);
            let result = catch_unwind(AssertUnwindSafe(|| task(&mut ctx)))
                .unwrap_or_else(|panic| Err(Error::Task(panic_message(panic.as_ref()))));
            (name, result, ctx.into_log())
        });
    }

    let mut results = Vec::new();
    let mut logs: Vec<DdlLog> = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (name, result, log) = joined.map_err(|e| Error::Task(e.to_string()))?;
        results.push((name, result));
        logs.push(log);
    }

    for log in logs {
        engine.merge_log(log);
    }
    Ok(results)
}

/// Run one blocking closure on the worker pool.
pub(crate) async fn run_blocking<T, F>(engine: &Arc<Engine>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T> + Send + 'static,
{
    let permit = engine
        .workers()
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| Error::Task(e.to_string()))?;
    let engine = engine.clone();

    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        f(&engine)
    })
    .await
    .map_err(|e| Error::Task(e.to_string()))?
}

/// Run several blocking closures on the worker pool and collect every
/// result, failing on the first error.
pub(crate) async fn run_all<T, F>(engine: &Arc<Engine>, jobs: Vec<F>) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T> + Send + 'static,
{
    let mut set = JoinSet::new();
    for job in jobs {
        let permit = engine
            .workers()
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        let engine = engine.clone();
        set.spawn_blocking(move || {
            let _permit = permit;
            job(&engine)
        });
    }

    let mut out = Vec::new();
    while let Some(joined) = set.join_next().await {
        out.push(joined.map_err(|e| Error::Task(e.to_string()))??);
    }
    Ok(out)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}
