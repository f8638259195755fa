pub mod connection;
pub mod dispatcher;
pub mod emitter;
pub mod engine;
pub mod executor;
pub mod merge;
pub mod strategy;

pub use connection::{DataSource, DataSourceRegistry, DriverResult, RowCursor, ShardConnection, UpdateResult};
pub use emitter::{emit, FrameStream, RowEncoding};
pub use engine::{EngineOptions, ScatterGatherEngine};
pub use executor::{ConnectionMode, ShardExecutor};
pub use strategy::{merge_strategy_for, MergeSpec, OrderKey, ResultMergeStrategy};
