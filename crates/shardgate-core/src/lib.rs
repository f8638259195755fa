pub mod error;
pub mod types;

pub use error::ShardgateError;
pub use types::{
    ColumnMeta, DataValue, ExecutionUnit, Failure, MergedOutcome, QueryResult, Row, RowStream,
    ShardOutcome, StatementKind,
};
