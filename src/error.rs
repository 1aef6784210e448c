//! Error types raised by the mapping and aggregation engine.
//!
//! Schema problems are collected into a single [`SchemaError`] so a model
//! author sees every violation at once. Row-level failures carry the
//! attribute path that could not be resolved.

use thiserror::Error;

use crate::{data::ValueParseError, schema::DataType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("dataset name must not be empty")]
    EmptyDatasetName,
    #[error("dimension '{0}' is declared more than once")]
    DuplicateDimension(String),
    #[error("dimension '{dimension}' has unknown type '{kind}'")]
    UnknownDimensionKind { dimension: String, kind: String },
    #[error("'{path}' declares unknown datatype '{datatype}'")]
    UnknownDatatype { path: String, datatype: String },
    #[error("dimension '{0}' must declare a datatype")]
    MissingDatatype(String),
    #[error("dimension '{0}' must declare attributes")]
    MissingAttributes(String),
    #[error("dimension '{0}' must declare a 'name' attribute")]
    MissingNameAttribute(String),
    #[error("attribute '{path}' has invalid default '{value}': {reason}")]
    InvalidDefault {
        path: String,
        value: String,
        reason: String,
    },
    #[error("key dimension '{dimension}' must be string-typed, found {datatype}")]
    KeyNotString {
        dimension: String,
        datatype: DataType,
    },
    #[error("measure '{dimension}' must be numeric, found {datatype}")]
    MeasureNotNumeric {
        dimension: String,
        datatype: DataType,
    },
    #[error("attribute '{0}' has no mapping entry")]
    UnmappedAttribute(String),
    #[error("attribute '{0}' has more than one mapping entry")]
    DuplicateMapping(String),
    #[error("mapping entry '{0}' does not match a declared attribute")]
    UnknownMappingTarget(String),
    #[error("mapping entry '{0}' names an empty column")]
    EmptyMappingColumn(String),
    #[error("taxonomy '{taxonomy}' declares level {level} more than once ({dimensions})")]
    DuplicateTaxonomyLevel {
        taxonomy: String,
        level: u32,
        dimensions: String,
    },
    #[error("dimension '{dimension}' has invalid level '{level}'")]
    InvalidLevel { dimension: String, level: String },
    #[error("view '{view}' has unknown entity scope '{entity}'")]
    UnknownViewScope { view: String, entity: String },
    #[error("view '{view}' summarizes unknown dimension '{dimension}'")]
    UnknownViewDimension { view: String, dimension: String },
    #[error("view '{view}' of scope '{entity}' cannot summarize dimension '{dimension}'")]
    ViewScopeMismatch {
        view: String,
        entity: String,
        dimension: String,
    },
    #[error("view '{view}' breaks down by unknown dimension '{breakdown}'")]
    UnknownViewBreakdown { view: String, breakdown: String },
    #[error("view '{view}' filters on unknown attribute '{key}'")]
    UnknownViewFilter { view: String, key: String },
    #[error("view '{name}' is declared more than once for {entity}/{dimension}")]
    DuplicateView {
        entity: String,
        dimension: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "invalid model for dataset '{dataset}' ({} violation(s)):\n{}",
    .violations.len(),
    render_violations(.violations)
)]
pub struct SchemaError {
    pub dataset: String,
    pub violations: Vec<Violation>,
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|violation| format!("  - {violation}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no value for '{path}': column '{column}' is missing or empty and no default is declared")]
pub struct MappingError {
    pub path: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot coerce '{path}' to {datatype}: {source}")]
pub struct CoercionError {
    pub path: String,
    pub datatype: DataType,
    pub source: ValueParseError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("unknown measure '{0}'")]
    UnknownMeasure(String),
    #[error("invalid condition '{0}'")]
    InvalidCondition(String),
    #[error("invalid literal for '{field}': {source}")]
    InvalidLiteral {
        field: String,
        source: ValueParseError,
    },
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("row {row}: {source}")]
    Row { row: usize, source: RowError },
    #[error("no view named '{name}' for entity '{entity}'")]
    ViewNotFound { entity: String, name: String },
    #[error("view '{view}' cannot be aggregated: {reason}")]
    ViewConfiguration { view: String, reason: String },
    #[error(transparent)]
    Query(#[from] QueryError),
}
