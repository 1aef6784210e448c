//! Batch loading of source rows into a [`FactStore`].
//!
//! Rows are mapped independently, so large batches are split into contiguous
//! chunks and mapped on scoped worker threads that share the read-only
//! [`Schema`]. Results are stitched back in input order before anything
//! touches the store, which keeps strict mode atomic: a batch with a bad row
//! inserts nothing.

use std::thread;

use log::{debug, info, warn};

use crate::{
    error::{EngineError, RowError},
    fact::{FactRecord, SourceRow},
    mapper::map_row,
    schema::Schema,
    store::FactStore,
};

/// Batches smaller than this are mapped on the calling thread.
const PARALLEL_THRESHOLD: usize = 1024;

/// How per-row mapping failures are handled. Callers must pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// The first failing row aborts the batch.
    Strict,
    /// Failing rows are skipped and reported.
    Lenient,
}

impl ErrorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorMode::Strict => "strict",
            ErrorMode::Lenient => "lenient",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub mode: ErrorMode,
    pub workers: usize,
}

impl LoadOptions {
    pub fn new(mode: ErrorMode) -> Self {
        Self {
            mode,
            workers: default_workers(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(4)
        .clamp(1, 64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    /// 1-based position of the row within the batch.
    pub row: usize,
    pub error: RowError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Loaded records that replaced an existing record with the same id.
    pub replaced: usize,
    pub skipped: Vec<SkippedRow>,
}

impl LoadReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Maps every row, preserving input order in the returned vector.
pub fn map_rows(
    schema: &Schema,
    rows: &[SourceRow],
    workers: usize,
) -> Vec<Result<FactRecord, RowError>> {
    let workers = workers.max(1);
    if workers == 1 || rows.len() < PARALLEL_THRESHOLD {
        return rows.iter().map(|row| map_row(schema, row)).collect();
    }

    let chunk_size = rows.len().div_ceil(workers);
    debug!(
        "Mapping {} row(s) across {} chunk(s) of up to {chunk_size}",
        rows.len(),
        rows.len().div_ceil(chunk_size)
    );
    thread::scope(|scope| {
        let handles: Vec<_> = rows
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|row| map_row(schema, row))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    })
}

pub fn load_rows<S: FactStore + ?Sized>(
    schema: &Schema,
    rows: &[SourceRow],
    store: &mut S,
    options: &LoadOptions,
) -> Result<LoadReport, EngineError> {
    let mapped = map_rows(schema, rows, options.workers);

    let mut records = Vec::with_capacity(mapped.len());
    let mut report = LoadReport::default();
    for (index, result) in mapped.into_iter().enumerate() {
        let row = index + 1;
        match (result, options.mode) {
            (Ok(record), _) => records.push(record),
            (Err(source), ErrorMode::Strict) => return Err(EngineError::Row { row, source }),
            (Err(error), ErrorMode::Lenient) => {
                warn!("Skipping row {row}: {error}");
                report.skipped.push(SkippedRow { row, error });
            }
        }
    }

    // Only key dimensions identify a fact; keyless rows never replace each other.
    let keyed = schema.keys().next().is_some();
    for record in records {
        let record = if keyed {
            record
        } else {
            record.with_ordinal(store.len())
        };
        if store.upsert(record) {
            report.replaced += 1;
        }
        report.loaded += 1;
    }
    info!(
        "Loaded {} fact(s) into '{}' ({} replaced, {} skipped, mode {})",
        report.loaded,
        schema.dataset().name,
        report.replaced,
        report.skipped.len(),
        options.mode.as_str()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::MappingError, schema::ModelDocument, store::MemoryFactStore};

    fn schema() -> Schema {
        ModelDocument::from_json_str(
            r#"{
            "dataset": {"name": "demo"},
            "mapping": {"region": {"column": "region"}, "amount": {"column": "amount"}},
            "dimensions": {
                "region": {"type": "value", "datatype": "string"},
                "amount": {"type": "measure", "datatype": "float"}
            }
        }"#,
        )
        .unwrap()
        .into_schema()
        .unwrap()
    }

    fn rows() -> Vec<SourceRow> {
        vec![
            [("region", "London"), ("amount", "1")].into_iter().collect(),
            [("region", "Wales")].into_iter().collect(),
            [("region", "Scotland"), ("amount", "3")].into_iter().collect(),
        ]
    }

    #[test]
    fn strict_mode_inserts_nothing_on_failure() {
        let mut store = MemoryFactStore::new();
        let err = load_rows(
            &schema(),
            &rows(),
            &mut store,
            &LoadOptions::new(ErrorMode::Strict),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Row { row: 2, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn lenient_mode_skips_and_reports() {
        let mut store = MemoryFactStore::new();
        let report = load_rows(
            &schema(),
            &rows(),
            &mut store,
            &LoadOptions::new(ErrorMode::Lenient),
        )
        .unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(
            report.skipped,
            vec![SkippedRow {
                row: 2,
                error: RowError::Mapping(MappingError {
                    path: "amount".to_string(),
                    column: "amount".to_string(),
                }),
            }]
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn parallel_mapping_preserves_row_order() {
        let schema = schema();
        let rows: Vec<SourceRow> = (0..PARALLEL_THRESHOLD * 3 + 7)
            .map(|i| {
                [("region", format!("r{i}")), ("amount", i.to_string())]
                    .into_iter()
                    .collect()
            })
            .collect();
        let sequential = map_rows(&schema, &rows, 1);
        let parallel = map_rows(&schema, &rows, 4);
        assert_eq!(sequential, parallel);
    }
}
