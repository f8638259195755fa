use crate::error::ShardgateError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Null,
    Int64(i64),
    Float64(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Textual rendering used by the MySQL text protocol. `None` is SQL NULL.
    pub fn to_text(&self) -> Option<Vec<u8>> {
        match self {
            DataValue::Null => None,
            DataValue::Int64(v) => Some(v.to_string().into_bytes()),
            DataValue::Float64(v) => Some(v.to_string().into_bytes()),
            DataValue::Bool(v) => Some(if *v { b"1".to_vec() } else { b"0".to_vec() }),
            DataValue::String(v) => Some(v.clone().into_bytes()),
            DataValue::Bytes(v) => Some(v.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Int64(v) => Some(*v),
            DataValue::Float64(v) => Some(*v as i64),
            DataValue::Bool(v) => Some(i64::from(*v)),
            DataValue::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Int64(v) => Some(*v as f64),
            DataValue::Float64(v) => Some(*v),
            DataValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            DataValue::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Column metadata as reported by a backing database for one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub schema: String,
    pub table: String,
    pub label: String,
    pub name: String,
    pub display_size: u32,
    /// SQL type name as declared, e.g. `BIGINT` or `VARCHAR(32)`.
    pub data_type: String,
    pub decimals: u8,
}

impl ColumnMeta {
    pub fn new(table: impl Into<String>, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            schema: String::new(),
            table: table.into(),
            label: name.clone(),
            name,
            display_size: 0,
            data_type: data_type.into(),
            decimals: 0,
        }
    }
}

pub type Row = Vec<DataValue>;

/// Lazy, single-pass row sequence. Dropping it releases whatever cursor or
/// connection backs it.
pub type RowStream = Box<dyn Iterator<Item = Result<Row, ShardgateError>> + Send>;

/// One routed piece of a client statement, bound to a single shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    pub shard_id: String,
    pub sql: String,
    pub parameters: Vec<DataValue>,
}

impl ExecutionUnit {
    pub fn new(shard_id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<DataValue>) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Update,
    Admin,
    /// The router produced no execution units.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: i32,
    pub sql_state: String,
    pub message: String,
}

impl Failure {
    pub fn new(code: i32, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.sql_state, self.message)
    }
}

/// Columns plus a row cursor, the unit handed to a result merge strategy.
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: RowStream,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnMeta>, rows: RowStream) -> Self {
        Self { columns, rows }
    }

    pub fn from_rows(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: Box::new(rows.into_iter().map(Ok)),
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Result of running one execution unit. Produced exactly once per unit.
#[derive(Debug)]
pub enum ShardOutcome {
    Count { affected_rows: u64, last_insert_id: u64 },
    Rows(QueryResult),
    Failure(Failure),
}

impl ShardOutcome {
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ShardOutcome::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// The single client-visible outcome of a statement.
#[derive(Debug)]
pub enum MergedOutcome {
    Count { affected_rows: u64, last_insert_id: u64 },
    Rows(QueryResult),
    Failure(Failure),
}

impl MergedOutcome {
    pub fn empty() -> Self {
        MergedOutcome::Count {
            affected_rows: 0,
            last_insert_id: 0,
        }
    }
}

impl From<ShardOutcome> for MergedOutcome {
    fn from(outcome: ShardOutcome) -> Self {
        match outcome {
            ShardOutcome::Count {
                affected_rows,
                last_insert_id,
            } => MergedOutcome::Count {
                affected_rows,
                last_insert_id,
            },
            ShardOutcome::Rows(result) => MergedOutcome::Rows(result),
            ShardOutcome::Failure(failure) => MergedOutcome::Failure(failure),
        }
    }
}

impl From<ShardgateError> for MergedOutcome {
    fn from(err: ShardgateError) -> Self {
        MergedOutcome::Failure(err.failure())
    }
}
