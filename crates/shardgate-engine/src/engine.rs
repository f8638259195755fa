use crate::connection::DataSourceRegistry;
use crate::dispatcher::Dispatcher;
use crate::executor::{ConnectionMode, ShardExecutor};
use crate::merge::merge;
use crate::strategy::ResultMergeStrategy;
use metrics::{counter, histogram};
use shardgate_core::types::{ExecutionUnit, MergedOutcome, StatementKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub mode: ConnectionMode,
    pub worker_threads: usize,
    pub statement_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::MemoryStrictly,
            worker_threads: 16,
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// Dispatch followed by merge for one routed statement.
#[derive(Clone)]
pub struct ScatterGatherEngine {
    dispatcher: Dispatcher,
}

impl ScatterGatherEngine {
    pub fn new(registry: Arc<DataSourceRegistry>, options: EngineOptions) -> Self {
        let executor = ShardExecutor::new(registry, options.mode);
        Self {
            dispatcher: Dispatcher::new(executor, options.worker_threads, options.statement_timeout),
        }
    }

    pub async fn execute(
        &self,
        kind: StatementKind,
        units: Vec<ExecutionUnit>,
        strategy: &dyn ResultMergeStrategy,
    ) -> MergedOutcome {
        if kind == StatementKind::None || units.is_empty() {
            return MergedOutcome::empty();
        }
        counter!("shardgate_shard_unit_total").increment(units.len() as u64);
        let started = Instant::now();
        let outcomes = match self.dispatcher.dispatch(units, kind).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!("statement dispatch failed: {err}");
                return err.into();
            }
        };
        histogram!("shardgate_dispatch_seconds").record(started.elapsed().as_secs_f64());
        merge(kind, outcomes, strategy)
    }
}
