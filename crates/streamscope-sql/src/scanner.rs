//! Partition scanner.
//!
//! Reads one partition sequentially from the task's start offset toward its
//! fixed ceiling, evaluating the predicate and projection per record. The
//! shared deadline and the cancellation signal are observed between records,
//! never mid-record. A record that fails to deserialize is counted and
//! skipped; it can neither match nor abort the scan.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use streamscope_core::Record;
use streamscope_cluster::ClusterProtocol;

use crate::types::{
    json_compare, Aggregate, Field, PartialAggregate, Predicate, Projection, Query, Row,
    ScanResult, ScanStatus, ScanTask,
};

pub struct ScanContext {
    pub protocol: Arc<dyn ClusterProtocol>,
    pub batch_size: usize,
    pub deadline: Instant,
    pub cancel: watch::Receiver<bool>,
}

/// Scans one partition to completion, deadline, or failure. Never returns an
/// error: every degradation is expressed in the result's status.
pub async fn scan(ctx: ScanContext, topic: &str, task: ScanTask, query: &Query) -> ScanResult {
    let needs_value = query.projection.needs_value()
        || query
            .predicate
            .as_ref()
            .map(Predicate::needs_value)
            .unwrap_or(false);

    let mut rows = Vec::new();
    let mut aggregate = match &query.projection {
        Projection::Aggregate(spec) => Some(PartialAggregate::new(spec.function)),
        _ => None,
    };
    let mut skipped: u64 = 0;
    let mut warnings = Vec::new();
    let mut status = ScanStatus::Complete;

    let mut offset = task.start_offset;
    'scan: while offset < task.end_offset {
        if interrupted(&ctx) {
            status = ScanStatus::TruncatedByTimeout;
            break;
        }

        let remaining = (task.end_offset - offset) as usize;
        let batch = match ctx
            .protocol
            .fetch_records(topic, task.partition, offset, ctx.batch_size.min(remaining))
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                warn!(
                    topic,
                    partition = task.partition,
                    offset,
                    error = %err,
                    "fetch failed, returning partial scan"
                );
                warnings.push(format!(
                    "partition {}: scan stopped at offset {offset}: {err}",
                    task.partition
                ));
                status = ScanStatus::PartialFailure;
                break;
            }
        };

        // An empty batch below the ceiling means the broker has nothing
        // more for us right now; the window is exhausted.
        if batch.is_empty() {
            break;
        }

        for record in batch {
            if record.offset >= task.end_offset {
                break 'scan;
            }
            offset = offset.max(record.offset + 1);

            if interrupted(&ctx) {
                status = ScanStatus::TruncatedByTimeout;
                break 'scan;
            }

            let parsed = if needs_value {
                match serde_json::from_slice::<Value>(&record.value) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        skipped += 1;
                        continue;
                    }
                }
            } else {
                None
            };

            if let Some(predicate) = &query.predicate {
                if !eval_predicate(predicate, &record, parsed.as_ref()) {
                    continue;
                }
            }

            match (&query.projection, &mut aggregate) {
                (Projection::Aggregate(spec), Some(partial)) => {
                    fold(partial, spec.function, spec.field.as_ref(), &record, parsed.as_ref());
                }
                (projection, _) => {
                    rows.push(project(projection, &record, parsed.as_ref()));
                }
            }
        }
    }

    debug!(
        topic,
        partition = task.partition,
        rows = rows.len(),
        skipped,
        status = ?status,
        "partition scan finished"
    );

    ScanResult {
        partition: task.partition,
        rows,
        aggregate,
        skipped,
        status,
        warnings,
    }
}

fn interrupted(ctx: &ScanContext) -> bool {
    *ctx.cancel.borrow() || Instant::now() >= ctx.deadline
}

/// The value of a field for one record, or `None` when the record has no
/// such field.
fn field_value(field: &Field, record: &Record, parsed: Option<&Value>) -> Option<Value> {
    match field {
        Field::Partition => Some(Value::from(record.partition)),
        Field::Offset => Some(Value::from(record.offset)),
        Field::Timestamp => Some(Value::from(record.timestamp)),
        Field::Key => record
            .key
            .as_ref()
            .map(|key| Value::String(String::from_utf8_lossy(key).into_owned())),
        Field::Value => parsed.cloned(),
        Field::ValuePath(path) => {
            let mut current = parsed?;
            for segment in path.split('.') {
                current = current.get(segment)?;
            }
            Some(current.clone())
        }
    }
}

fn eval_predicate(predicate: &Predicate, record: &Record, parsed: Option<&Value>) -> bool {
    match predicate {
        Predicate::And(a, b) => {
            eval_predicate(a, record, parsed) && eval_predicate(b, record, parsed)
        }
        Predicate::Or(a, b) => {
            eval_predicate(a, record, parsed) || eval_predicate(b, record, parsed)
        }
        Predicate::Compare { field, op, literal } => {
            // Absent fields and cross-type comparisons are false, never an
            // error; a malformed record must not abort the scan.
            match field_value(field, record, parsed) {
                Some(actual) => match json_compare(&actual, &literal.to_json()) {
                    Some(ordering) => op.matches(ordering),
                    None => false,
                },
                None => false,
            }
        }
    }
}

fn project(projection: &Projection, record: &Record, parsed: Option<&Value>) -> Row {
    let mut row = Row::new();
    match projection {
        Projection::All => {
            for field in [
                Field::Partition,
                Field::Offset,
                Field::Key,
                Field::Value,
                Field::Timestamp,
            ] {
                row.insert(
                    field.label().to_string(),
                    field_value(&field, record, parsed).unwrap_or(Value::Null),
                );
            }
        }
        Projection::Fields(fields) => {
            for field in fields {
                row.insert(
                    field.label().to_string(),
                    field_value(field, record, parsed).unwrap_or(Value::Null),
                );
            }
        }
        // Aggregates never reach here; the scan loop folds them.
        Projection::Aggregate(_) => {}
    }
    row
}

fn fold(
    partial: &mut PartialAggregate,
    function: Aggregate,
    field: Option<&Field>,
    record: &Record,
    parsed: Option<&Value>,
) {
    let value = match field {
        Some(field) => field_value(field, record, parsed),
        // COUNT(*)
        None => Some(Value::Null),
    };
    let Some(value) = value else {
        return;
    };

    match (partial, function) {
        (PartialAggregate::Count(n), Aggregate::Count) => *n += 1,
        (PartialAggregate::Sum(sum), Aggregate::Sum) => {
            if let Some(n) = value.as_f64() {
                *sum += n;
            }
        }
        (PartialAggregate::Min(current), Aggregate::Min) => {
            update_extreme(current, value, std::cmp::Ordering::Less);
        }
        (PartialAggregate::Max(current), Aggregate::Max) => {
            update_extreme(current, value, std::cmp::Ordering::Greater);
        }
        _ => {}
    }
}

fn update_extreme(current: &mut Option<Value>, candidate: Value, keep: std::cmp::Ordering) {
    match current {
        None => *current = Some(candidate),
        Some(existing) => {
            if json_compare(&candidate, existing) == Some(keep) {
                *current = Some(candidate);
            }
        }
    }
}
