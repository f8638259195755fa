use parking_lot::RwLock;
use shardgate_core::error::ShardgateError;
use shardgate_core::types::{ColumnMeta, DataValue, Row};
use std::collections::HashMap;
use std::sync::Arc;

/// A backing database. Hands out one connection per execution unit.
pub trait DataSource: Send + Sync {
    fn connection(&self) -> Result<Box<dyn ShardConnection>, ShardgateError>;
}

/// Blocking connection to one backing database.
pub trait ShardConnection: Send {
    fn execute_query(
        &mut self,
        sql: &str,
        parameters: &[DataValue],
    ) -> Result<Box<dyn RowCursor>, ShardgateError>;

    fn execute_update(
        &mut self,
        sql: &str,
        parameters: &[DataValue],
        return_generated_keys: bool,
    ) -> Result<UpdateResult, ShardgateError>;

    /// Execute a statement whose result shape is not known up front.
    fn execute(
        &mut self,
        sql: &str,
        parameters: &[DataValue],
    ) -> Result<DriverResult, ShardgateError>;
}

/// An open result cursor. Rows are produced once, in order.
pub trait RowCursor: Send {
    fn columns(&self) -> &[ColumnMeta];

    fn next_row(&mut self) -> Result<Option<Row>, ShardgateError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub affected_rows: u64,
    pub generated_keys: Vec<u64>,
}

pub enum DriverResult {
    ResultSet(Box<dyn RowCursor>),
    UpdateCount(u64),
}

/// Row stream that owns its cursor and the connection the cursor reads from.
/// Both are released when the stream is exhausted, fails, or is dropped.
pub(crate) struct CursorStream {
    cursor: Option<Box<dyn RowCursor>>,
    connection: Option<Box<dyn ShardConnection>>,
}

impl CursorStream {
    pub(crate) fn new(cursor: Box<dyn RowCursor>, connection: Box<dyn ShardConnection>) -> Self {
        Self {
            cursor: Some(cursor),
            connection: Some(connection),
        }
    }

    fn release(&mut self) {
        self.cursor = None;
        self.connection = None;
    }
}

impl Iterator for CursorStream {
    type Item = Result<Row, ShardgateError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        match cursor.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.release();
                None
            }
            Err(err) => {
                self.release();
                Some(Err(err))
            }
        }
    }
}

/// Data sources keyed by shard id.
///
/// Lookups take the read lock only; registration re-checks under the write
/// lock so each id is initialized at most once.
#[derive(Default)]
pub struct DataSourceRegistry {
    sources: RwLock<HashMap<String, Arc<dyn DataSource>>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, shard_id: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.read().get(shard_id).cloned()
    }

    pub fn get_or_init<F>(&self, shard_id: &str, init: F) -> Arc<dyn DataSource>
    where
        F: FnOnce() -> Arc<dyn DataSource>,
    {
        if let Some(source) = self.get(shard_id) {
            return source;
        }
        let mut sources = self.sources.write();
        sources
            .entry(shard_id.to_string())
            .or_insert_with(init)
            .clone()
    }

    pub fn shard_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
