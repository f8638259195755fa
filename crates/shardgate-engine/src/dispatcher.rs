use crate::executor::ShardExecutor;
use metrics::counter;
use shardgate_core::error::{ShardgateError, ER_UNKNOWN_ERROR};
use shardgate_core::types::{ExecutionUnit, Failure, ShardOutcome, StatementKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Runs the execution units of one statement on a bounded worker pool.
///
/// The pool (`workers`) is the only state shared between statements.
#[derive(Clone)]
pub struct Dispatcher {
    executor: ShardExecutor,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(executor: ShardExecutor, worker_threads: usize, timeout: Duration) -> Self {
        Self {
            executor,
            workers: Arc::new(Semaphore::new(worker_threads.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Outcome `i` always belongs to `units[i]`. On deadline expiry every
    /// collected outcome is dropped and the whole statement fails.
    pub async fn dispatch(
        &self,
        mut units: Vec<ExecutionUnit>,
        kind: StatementKind,
    ) -> Result<Vec<ShardOutcome>, ShardgateError> {
        match units.len() {
            0 => return Ok(Vec::new()),
            1 => {
                let unit = units.remove(0);
                return self.dispatch_single(unit, kind).await;
            }
            _ => {}
        }

        let total = units.len();
        let mut join_set = JoinSet::new();
        for (index, unit) in units.into_iter().enumerate() {
            let executor = self.executor.clone();
            let workers = self.workers.clone();
            join_set.spawn(async move {
                let outcome = match workers.acquire_owned().await {
                    Ok(permit) => run_unit(executor, unit, kind, Some(permit)).await,
                    Err(_) => ShardOutcome::Failure(internal_failure("worker pool is closed")),
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ShardOutcome>> = (0..total).map(|_| None).collect();
        let collected = tokio::time::timeout(self.timeout, async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((index, outcome)) => slots[index] = Some(outcome),
                    Err(err) => error!("dispatch task failed: {err}"),
                }
            }
        })
        .await;

        if collected.is_err() {
            join_set.abort_all();
            counter!("shardgate_dispatch_timeout_total").increment(1);
            warn!(
                units = total,
                completed = slots.iter().filter(|slot| slot.is_some()).count(),
                "statement deadline of {:?} exceeded",
                self.timeout
            );
            return Err(ShardgateError::Timeout(self.timeout));
        }

        debug!(units = total, "dispatch complete");
        Ok(slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    ShardOutcome::Failure(internal_failure("shard task ended without an outcome"))
                })
            })
            .collect())
    }

    /// The unsharded fast path skips the worker pool.
    async fn dispatch_single(
        &self,
        unit: ExecutionUnit,
        kind: StatementKind,
    ) -> Result<Vec<ShardOutcome>, ShardgateError> {
        let run = run_unit(self.executor.clone(), unit, kind, None);
        match tokio::time::timeout(self.timeout, run).await {
            Ok(outcome) => Ok(vec![outcome]),
            Err(_) => {
                counter!("shardgate_dispatch_timeout_total").increment(1);
                warn!("statement deadline of {:?} exceeded", self.timeout);
                Err(ShardgateError::Timeout(self.timeout))
            }
        }
    }
}

/// The permit moves into the blocking closure, so a worker slot stays taken
/// until the shard call returns even if the waiting task was cancelled.
async fn run_unit(
    executor: ShardExecutor,
    unit: ExecutionUnit,
    kind: StatementKind,
    permit: Option<OwnedSemaphorePermit>,
) -> ShardOutcome {
    let shard_id = unit.shard_id.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        executor.execute(&unit, kind)
    });
    match handle.await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(shard = %shard_id, "shard executor did not complete: {err}");
            ShardOutcome::Failure(internal_failure(&format!(
                "executor for {shard_id} did not complete"
            )))
        }
    }
}

fn internal_failure(message: &str) -> Failure {
    Failure::new(ER_UNKNOWN_ERROR, "HY000", message)
}
