//! SQL query layer for StreamScope.
//!
//! Compiles a SQL subset into an abstract query, plans one scan task per
//! partition against the current metadata snapshot, fans the scans out with
//! bounded concurrency under a shared deadline, and merges the per-partition
//! results into one deterministic tabular answer.
//!
//! Pipeline: [`parser`] -> [`planner`] -> [`scanner`] (one per partition) ->
//! [`merger`], driven end to end by [`QueryEngine::execute`].

pub mod engine;
pub mod error;
pub mod merger;
pub mod parser;
pub mod planner;
pub mod scanner;
pub mod types;

pub use engine::QueryEngine;
pub use error::{Result, SqlError};
pub use parser::parse_query;
pub use types::{
    Aggregate, AggregateSpec, CompareOp, ExecuteResponse, ExecutionPlan, Field, Literal,
    PartialAggregate, Predicate, Projection, Query, ResponseStatus, Row, ScanResult, ScanStatus,
    ScanTask,
};
