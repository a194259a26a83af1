//! Result merger.
//!
//! Joins the per-partition scan results into one final answer. Row order is
//! ascending partition index, then offset within the partition: deterministic
//! and documented, but not chronological across partitions. The merged
//! status is the worst status any partition reported, further degraded to
//! truncated-by-limit if the global LIMIT cut rows off.

use crate::types::{PartialAggregate, Projection, Query, Row, ScanResult, ScanStatus};

/// Merged output of all partition scans, before it is shaped into the
/// caller-facing response.
#[derive(Debug)]
pub struct MergedResult {
    pub rows: Vec<Row>,
    pub status: ScanStatus,
    pub warnings: Vec<String>,
    pub skipped: u64,
}

/// Merges scan results. `max_rows` is the engine-wide cap applied after the
/// query's own LIMIT.
pub fn merge(mut results: Vec<ScanResult>, query: &Query, max_rows: usize) -> MergedResult {
    results.sort_by_key(|result| result.partition);

    let mut status = results
        .iter()
        .map(|result| result.status)
        .max()
        .unwrap_or(ScanStatus::Complete);
    let mut warnings: Vec<String> = results
        .iter()
        .flat_map(|result| result.warnings.iter().cloned())
        .collect();
    let skipped: u64 = results.iter().map(|result| result.skipped).sum();
    if skipped > 0 {
        warnings.push(format!("{skipped} record(s) could not be deserialized and were skipped"));
    }

    let rows = match &query.projection {
        Projection::Aggregate(spec) => {
            let mut combined = PartialAggregate::new(spec.function);
            for result in results {
                if let Some(partial) = result.aggregate {
                    combined.combine(partial);
                }
            }
            let mut row = Row::new();
            row.insert(spec.label(), combined.into_value());
            vec![row]
        }
        _ => {
            let mut rows: Vec<Row> = results
                .into_iter()
                .flat_map(|result| result.rows)
                .collect();
            let cap = query.limit.unwrap_or(usize::MAX).min(max_rows);
            if rows.len() > cap {
                rows.truncate(cap);
                status = status.max(ScanStatus::TruncatedByLimit);
            }
            rows
        }
    };

    MergedResult {
        rows,
        status,
        warnings,
        skipped,
    }
}
