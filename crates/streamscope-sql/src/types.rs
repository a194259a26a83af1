//! Query, plan, and result types shared across the SQL pipeline.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A column in a row produced by the engine. `preserve_order` keeps field
/// order stable in the serialized output.
pub type Row = serde_json::Map<String, Value>;

/// A referenceable field of a record.
///
/// `partition`, `offset`, `timestamp`, `key`, and `value` name record
/// metadata; any other identifier names a field inside the record's JSON
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Partition,
    Offset,
    Timestamp,
    Key,
    Value,
    ValuePath(String),
}

impl Field {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "partition" => Field::Partition,
            "offset" => Field::Offset,
            "timestamp" => Field::Timestamp,
            "key" => Field::Key,
            "value" => Field::Value,
            _ => Field::ValuePath(name.to_string()),
        }
    }

    /// Column label in result rows.
    pub fn label(&self) -> &str {
        match self {
            Field::Partition => "partition",
            Field::Offset => "offset",
            Field::Timestamp => "timestamp",
            Field::Key => "key",
            Field::Value => "value",
            Field::ValuePath(name) => name,
        }
    }

    /// Whether evaluating this field requires the record value to be
    /// deserialized.
    pub fn needs_value(&self) -> bool {
        matches!(self, Field::Value | Field::ValuePath(_))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
}

impl CompareOp {
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::GtEq => ordering != Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::GtEq => ">=",
            CompareOp::LtEq => "<=",
        };
        f.write_str(op)
    }
}

/// A typed literal from the query text. Timestamp-typed string literals are
/// lowered to `Int` milliseconds at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
}

impl Literal {
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Int(n) => Value::from(*n),
            Literal::Float(f) => Value::from(*f),
        }
    }
}

/// Predicate tree. AND binds tighter than OR, encoded in the tree shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: Field,
        op: CompareOp,
        literal: Literal,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn needs_value(&self) -> bool {
        match self {
            Predicate::Compare { field, .. } => field.needs_value(),
            Predicate::And(a, b) | Predicate::Or(a, b) => a.needs_value() || b.needs_value(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Min,
    Max,
    Sum,
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Sum => "sum",
        }
    }
}

/// An aggregate projection. `field` is `None` only for `COUNT(*)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub function: Aggregate,
    pub field: Option<Field>,
}

impl AggregateSpec {
    /// Column label, e.g. `count(*)` or `max(amount)`.
    pub fn label(&self) -> String {
        match &self.field {
            Some(field) => format!("{}({})", self.function.name(), field),
            None => format!("{}(*)", self.function.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `SELECT *`: partition, offset, key, value, timestamp.
    All,
    Fields(Vec<Field>),
    Aggregate(AggregateSpec),
}

impl Projection {
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Projection::Aggregate(_))
    }

    pub fn needs_value(&self) -> bool {
        match self {
            Projection::All => true,
            Projection::Fields(fields) => fields.iter().any(Field::needs_value),
            Projection::Aggregate(spec) => {
                spec.field.as_ref().map(Field::needs_value).unwrap_or(false)
            }
        }
    }
}

/// A parsed query, ready for planning. Produced only by [`crate::parser`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub topic: String,
    pub projection: Projection,
    pub predicate: Option<Predicate>,
    pub limit: Option<usize>,
    /// Lower time bound in epoch milliseconds, hoisted from AND-connected
    /// `timestamp >= ...` terms; used for offset-for-timestamp planning.
    pub start_timestamp: Option<i64>,
}

/// One partition's slice of work. Offsets are a half-open window
/// `[start_offset, end_offset)`; the ceiling is the high watermark at plan
/// time and is never chased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub partition: u32,
    pub start_offset: u64,
    pub end_offset: u64,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub topic: String,
    pub tasks: Vec<ScanTask>,
    /// Partitions dropped at plan time (failed timestamp resolution).
    pub warnings: Vec<String>,
}

/// Outcome of one partition scan, ordered from best to worst. The merged
/// status is the maximum across partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScanStatus {
    Complete,
    TruncatedByLimit,
    TruncatedByTimeout,
    PartialFailure,
}

/// Running state of one aggregate over a partition; combined pairwise by the
/// merger.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialAggregate {
    Count(u64),
    Sum(f64),
    Min(Option<Value>),
    Max(Option<Value>),
}

impl PartialAggregate {
    pub fn new(function: Aggregate) -> Self {
        match function {
            Aggregate::Count => PartialAggregate::Count(0),
            Aggregate::Sum => PartialAggregate::Sum(0.0),
            Aggregate::Min => PartialAggregate::Min(None),
            Aggregate::Max => PartialAggregate::Max(None),
        }
    }

    /// Folds another partition's partial into this one. Mismatched variants
    /// cannot occur for partials of one plan and are ignored.
    pub fn combine(&mut self, other: PartialAggregate) {
        match (self, other) {
            (PartialAggregate::Count(a), PartialAggregate::Count(b)) => *a += b,
            (PartialAggregate::Sum(a), PartialAggregate::Sum(b)) => *a += b,
            (PartialAggregate::Min(a), PartialAggregate::Min(b)) => {
                *a = reduce(a.take(), b, Ordering::Less);
            }
            (PartialAggregate::Max(a), PartialAggregate::Max(b)) => {
                *a = reduce(a.take(), b, Ordering::Greater);
            }
            _ => {}
        }
    }

    /// Final value for the result row.
    pub fn into_value(self) -> Value {
        match self {
            PartialAggregate::Count(n) => Value::from(n),
            PartialAggregate::Sum(s) => Value::from(s),
            PartialAggregate::Min(v) | PartialAggregate::Max(v) => v.unwrap_or(Value::Null),
        }
    }
}

fn reduce(a: Option<Value>, b: Option<Value>, keep: Ordering) -> Option<Value> {
    match (a, b) {
        (Some(a), Some(b)) => match json_compare(&a, &b) {
            Some(ordering) if ordering == keep => Some(a),
            Some(_) => Some(b),
            // Incomparable values keep the first seen.
            None => Some(a),
        },
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

/// Ordering between two JSON scalars, when one exists. Integer pairs compare
/// exactly, mixed numbers as f64, strings lexicographically. Cross-type
/// comparisons have no ordering.
pub(crate) fn json_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            // Offsets and timestamps can exceed 2^53, where f64 loses
            // precision.
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64().and_then(|a| b.as_f64().and_then(|b| a.partial_cmp(&b)))
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// What one partition scan produced.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub partition: u32,
    /// Matching rows in offset order. Empty for aggregating queries.
    pub rows: Vec<Row>,
    /// Partial aggregate, for aggregating queries.
    pub aggregate: Option<PartialAggregate>,
    /// Records that could not be deserialized and were skipped.
    pub skipped: u64,
    pub status: ScanStatus,
    pub warnings: Vec<String>,
}

/// Caller-facing status of a whole query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Truncated,
    Error,
}

/// The structured payload handed to the embedding layer.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub status: ResponseStatus,
    pub rows: Vec<Row>,
    pub warnings: Vec<String>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_status_orders_by_degradation() {
        assert!(ScanStatus::Complete < ScanStatus::TruncatedByLimit);
        assert!(ScanStatus::TruncatedByLimit < ScanStatus::TruncatedByTimeout);
        assert!(ScanStatus::TruncatedByTimeout < ScanStatus::PartialFailure);
    }

    #[test]
    fn field_parsing_recognizes_builtins() {
        assert_eq!(Field::parse("OFFSET"), Field::Offset);
        assert_eq!(Field::parse("value"), Field::Value);
        assert_eq!(Field::parse("amount"), Field::ValuePath("amount".into()));
    }

    #[test]
    fn aggregate_labels() {
        let spec = AggregateSpec {
            function: Aggregate::Count,
            field: None,
        };
        assert_eq!(spec.label(), "count(*)");

        let spec = AggregateSpec {
            function: Aggregate::Max,
            field: Some(Field::ValuePath("amount".into())),
        };
        assert_eq!(spec.label(), "max(amount)");
    }

    #[test]
    fn partial_aggregates_combine() {
        let mut count = PartialAggregate::Count(3);
        count.combine(PartialAggregate::Count(7));
        assert_eq!(count.into_value(), Value::from(10u64));

        let mut min = PartialAggregate::Min(Some(Value::from(5)));
        min.combine(PartialAggregate::Min(Some(Value::from(2))));
        assert_eq!(min.into_value(), Value::from(2));

        let mut max = PartialAggregate::Max(None);
        max.combine(PartialAggregate::Max(Some(Value::from(9))));
        assert_eq!(max.into_value(), Value::from(9));
    }

    #[test]
    fn json_compare_is_none_across_types() {
        assert!(json_compare(&Value::from(1), &Value::from("1")).is_none());
        assert_eq!(
            json_compare(&Value::from(2), &Value::from(3)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn json_compare_is_exact_above_the_f64_mantissa() {
        // Adjacent integers above 2^53 collapse to the same f64.
        let bigger = Value::from(9_007_199_254_740_993_i64);
        let smaller = Value::from(9_007_199_254_740_992_i64);
        assert_eq!(json_compare(&bigger, &smaller), Some(Ordering::Greater));
        assert_eq!(json_compare(&bigger, &bigger), Some(Ordering::Equal));
    }
}
