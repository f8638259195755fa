use crate::types::Failure;
use std::time::Duration;
use thiserror::Error;

pub const ER_UNKNOWN_ERROR: i32 = 1105;
pub const ER_PARSE_ERROR: i32 = 1064;
pub const ER_NOT_SUPPORTED_YET: i32 = 1235;
pub const ER_UNKNOWN_COM_ERROR: i32 = 1047;
pub const ER_QUERY_TIMEOUT: i32 = 3024;
pub const ER_WARN_DATA_OUT_OF_RANGE: i32 = 1264;
pub const ER_TRUNCATED_WRONG_VALUE_FOR_FIELD: i32 = 1366;

#[derive(Debug, Clone, Error)]
pub enum ShardgateError {
    #[error("driver error {0}")]
    Driver(Failure),
    #[error("statement timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("merge strategy error: {0}")]
    MergeStrategy(String),
    #[error("routing error: {0}")]
    Routing(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl ShardgateError {
    pub fn driver(code: i32, sql_state: &str, message: impl Into<String>) -> Self {
        ShardgateError::Driver(Failure::new(code, sql_state, message))
    }

    /// Client-visible error payload for this error.
    pub fn failure(&self) -> Failure {
        match self {
            ShardgateError::Driver(failure) => failure.clone(),
            ShardgateError::Timeout(_) => Failure::new(ER_QUERY_TIMEOUT, "HY000", self.to_string()),
            ShardgateError::MergeStrategy(_) | ShardgateError::Routing(_) => {
                Failure::new(ER_UNKNOWN_ERROR, "HY000", self.to_string())
            }
            ShardgateError::Syntax(_) => Failure::new(ER_PARSE_ERROR, "42000", self.to_string()),
            ShardgateError::Protocol(_) => {
                Failure::new(ER_UNKNOWN_COM_ERROR, "08S01", self.to_string())
            }
            ShardgateError::NotSupported(_) => {
                Failure::new(ER_NOT_SUPPORTED_YET, "42000", self.to_string())
            }
        }
    }
}
