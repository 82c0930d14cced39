//! Runs resolvers in order.
//!
//! Containers come before their contents, so [`Driver::apply`] walks the
//! registered resolvers front to back and [`Driver::destroy`] walks them
//! back to front.

use std::sync::Arc;

use tracing::{info, warn};

use crate::resolvers::{
    DatabaseResolver, FunctionResolver, MaskingPolicyResolver, PrimaryKeyResolver, RoleResolver,
    SchemaResolver, TableResolver, ViewResolver, WarehouseResolver,
};
use crate::{AnyResolver, DdlLog, Engine, ObjectKind, ResolveResult, Resolver, ResolverStatus, Result};

/// What one apply or destroy run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<ResolveResult>,
    pub ddl: DdlLog,
}

impl RunReport {
    /// Errors across all resolvers, failed introspections included.
    pub fn error_count(&self) -> usize {
        self.results.iter().map(ResolveResult::error_count).sum()
    }

    pub fn is_success(&self) -> bool {
        self.error_count() == 0
    }

    pub fn result(&self, kind: ObjectKind) -> Option<&ResolveResult> {
        self.results.iter().find(|r| r.kind == kind)
    }

    pub fn executed_ddl(&self) -> &[String] {
        &self.ddl.executed
    }

    pub fn suggested_ddl(&self) -> &[String] {
        &self.ddl.suggested
    }
}

/// An ordered list of resolvers.
#[derive(Default)]
pub struct Driver {
    resolvers: Vec<Arc<dyn AnyResolver>>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every resolver this crate ships, in dependency order. Masking
    /// policies come last because applying them alters table and view
    /// columns.
    pub fn standard() -> Self {
        Self::new()
            .with(DatabaseResolver)
            .with(SchemaResolver)
            .with(RoleResolver)
            .with(WarehouseResolver)
            .with(FunctionResolver)
            .with(TableResolver)
            .with(PrimaryKeyResolver::new())
            .with(ViewResolver)
            .with(MaskingPolicyResolver)
    }

    /// Append a resolver. It runs after everything registered before it.
    pub fn with(mut self, resolver: impl Resolver) -> Self {
        self.register(resolver);
        self
    }

    pub fn register(&mut self, resolver: impl Resolver) {
        self.resolvers.push(Arc::new(resolver));
    }

    pub fn kinds(&self) -> Vec<ObjectKind> {
        self.resolvers.iter().map(|r| r.kind()).collect()
    }

    /// Converge every registered kind.
    pub async fn apply(&self, engine: Arc<Engine>) -> Result<RunReport> {
        let mut results = Vec::with_capacity(self.resolvers.len());
        for resolver in &self.resolvers {
            let result = resolver.clone().resolve(engine.clone()).await?;
            warn_if_failed(&result);
            results.push(result);
        }
        Ok(Self::report(&engine, results, "apply"))
    }

    /// Drop every object of every registered kind, contents first.
    pub async fn destroy(&self, engine: Arc<Engine>) -> Result<RunReport> {
        let mut results = Vec::with_capacity(self.resolvers.len());
        for resolver in self.resolvers.iter().rev() {
            let result = resolver.clone().destroy(engine.clone()).await?;
            warn_if_failed(&result);
            results.push(result);
        }
        Ok(Self::report(&engine, results, "destroy"))
    }

    fn report(engine: &Engine, results: Vec<ResolveResult>, run: &str) -> RunReport {
        let report = RunReport {
            results,
            ddl: DdlLog {
                executed: engine.executed_ddl(),
                suggested: engine.suggested_ddl(),
            },
        };
        info!(
            run,
            errors = report.error_count(),
            executed = report.ddl.executed.len(),
            suggested = report.ddl.suggested.len(),
            "run finished"
        );
        report
    }
}

fn warn_if_failed(result: &ResolveResult) {
    if let ResolverStatus::Failed(reason) = &result.status {
        warn!(kind = %result.kind, %reason, "resolver failed, continuing with the next kind");
    }
}
