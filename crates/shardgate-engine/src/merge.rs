use crate::strategy::ResultMergeStrategy;
use shardgate_core::error::ER_UNKNOWN_ERROR;
use shardgate_core::types::{Failure, MergedOutcome, QueryResult, ShardOutcome, StatementKind};
use tracing::debug;

/// Combine the ordered outcomes of one statement into the single outcome the
/// client sees.
///
/// The first failure in unit order wins and every other outcome is dropped,
/// which closes any cursors they hold. A lone outcome is passed through
/// untouched.
pub fn merge(
    kind: StatementKind,
    outcomes: Vec<ShardOutcome>,
    strategy: &dyn ResultMergeStrategy,
) -> MergedOutcome {
    if let Some(index) = outcomes.iter().position(|o| o.failure().is_some()) {
        debug!(index, shards = outcomes.len(), "failing statement on first shard failure");
        return outcomes
            .into_iter()
            .nth(index)
            .map(MergedOutcome::from)
            .unwrap_or_else(MergedOutcome::empty);
    }
    if outcomes.is_empty() {
        return MergedOutcome::empty();
    }
    if outcomes.len() == 1 {
        return outcomes
            .into_iter()
            .next()
            .map(MergedOutcome::from)
            .unwrap_or_else(MergedOutcome::empty);
    }
    match kind {
        StatementKind::None => MergedOutcome::empty(),
        StatementKind::Update => merge_counts(outcomes),
        StatementKind::Query | StatementKind::Admin => merge_rows(outcomes, strategy),
    }
}

/// Affected rows are summed. The last insert id is the first non-zero one in
/// unit order; ids from different shards are not comparable.
fn merge_counts(outcomes: Vec<ShardOutcome>) -> MergedOutcome {
    let mut affected = 0u64;
    let mut last_id = 0u64;
    for outcome in &outcomes {
        if let ShardOutcome::Count {
            affected_rows,
            last_insert_id,
        } = outcome
        {
            affected += affected_rows;
            if last_id == 0 {
                last_id = *last_insert_id;
            }
        }
    }
    MergedOutcome::Count {
        affected_rows: affected,
        last_insert_id: last_id,
    }
}

fn merge_rows(outcomes: Vec<ShardOutcome>, strategy: &dyn ResultMergeStrategy) -> MergedOutcome {
    let row_outcomes = outcomes
        .iter()
        .filter(|o| matches!(o, ShardOutcome::Rows(_)))
        .count();
    if row_outcomes == 0 {
        // DDL and other statements without rows answer with the first shard
        return outcomes
            .into_iter()
            .next()
            .map(MergedOutcome::from)
            .unwrap_or_else(MergedOutcome::empty);
    }
    if row_outcomes != outcomes.len() {
        return MergedOutcome::Failure(Failure::new(
            ER_UNKNOWN_ERROR,
            "HY000",
            "shards returned inconsistent result shapes",
        ));
    }

    let results: Vec<QueryResult> = outcomes
        .into_iter()
        .filter_map(|o| match o {
            ShardOutcome::Rows(result) => Some(result),
            _ => None,
        })
        .collect();
    let columns = results[0].columns.clone();
    match strategy.merge(results) {
        Ok(rows) => MergedOutcome::Rows(QueryResult::new(columns, rows)),
        Err(err) => MergedOutcome::Failure(err.failure()),
    }
}
