use crate::connection::{CursorStream, DataSourceRegistry, DriverResult, RowCursor, ShardConnection};
use metrics::counter;
use shardgate_core::error::ShardgateError;
use shardgate_core::types::{ExecutionUnit, QueryResult, ShardOutcome, StatementKind};
use std::sync::Arc;
use tracing::warn;

/// How long a shard connection is held for a row-producing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Stream rows from the open cursor; the connection lives as long as
    /// the row stream.
    #[default]
    MemoryStrictly,
    /// Buffer every row before returning and release the connection
    /// immediately.
    ConnectionStrictly,
}

/// Runs one execution unit against its shard. Never fails: errors are
/// returned as `ShardOutcome::Failure`.
#[derive(Clone)]
pub struct ShardExecutor {
    registry: Arc<DataSourceRegistry>,
    mode: ConnectionMode,
}

impl ShardExecutor {
    pub fn new(registry: Arc<DataSourceRegistry>, mode: ConnectionMode) -> Self {
        Self { registry, mode }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn execute(&self, unit: &ExecutionUnit, kind: StatementKind) -> ShardOutcome {
        match self.try_execute(unit, kind) {
            Ok(outcome) => outcome,
            Err(err) => {
                counter!("shardgate_shard_failure_total").increment(1);
                warn!(shard = %unit.shard_id, sql = %unit.sql, "shard execution failed: {err}");
                ShardOutcome::Failure(err.failure())
            }
        }
    }

    fn try_execute(
        &self,
        unit: &ExecutionUnit,
        kind: StatementKind,
    ) -> Result<ShardOutcome, ShardgateError> {
        let source = self
            .registry
            .get(&unit.shard_id)
            .ok_or_else(|| ShardgateError::Routing(format!("unknown data source: {}", unit.shard_id)))?;
        let mut connection = source.connection()?;
        match kind {
            StatementKind::Query => {
                let cursor = connection.execute_query(&unit.sql, &unit.parameters)?;
                self.rows(cursor, connection)
            }
            StatementKind::Update => {
                let insert = is_insert_statement(&unit.sql);
                let result = connection.execute_update(&unit.sql, &unit.parameters, insert)?;
                let last_insert_id = if insert {
                    result.generated_keys.first().copied().unwrap_or(0)
                } else {
                    0
                };
                Ok(ShardOutcome::Count {
                    affected_rows: result.affected_rows,
                    last_insert_id,
                })
            }
            StatementKind::Admin | StatementKind::None => {
                match connection.execute(&unit.sql, &unit.parameters)? {
                    DriverResult::ResultSet(cursor) => self.rows(cursor, connection),
                    DriverResult::UpdateCount(affected_rows) => Ok(ShardOutcome::Count {
                        affected_rows,
                        last_insert_id: 0,
                    }),
                }
            }
        }
    }

    fn rows(
        &self,
        mut cursor: Box<dyn RowCursor>,
        connection: Box<dyn ShardConnection>,
    ) -> Result<ShardOutcome, ShardgateError> {
        let columns = cursor.columns().to_vec();
        match self.mode {
            ConnectionMode::MemoryStrictly => {
                let stream = CursorStream::new(cursor, connection);
                Ok(ShardOutcome::Rows(QueryResult::new(columns, Box::new(stream))))
            }
            ConnectionMode::ConnectionStrictly => {
                let mut rows = Vec::new();
                while let Some(row) = cursor.next_row()? {
                    rows.push(row);
                }
                drop(cursor);
                drop(connection);
                Ok(ShardOutcome::Rows(QueryResult::from_rows(columns, rows)))
            }
        }
    }
}

/// INSERT and REPLACE statements report generated keys.
pub fn is_insert_statement(sql: &str) -> bool {
    let head = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("");
    head.eq_ignore_ascii_case("insert") || head.eq_ignore_ascii_case("replace")
}
