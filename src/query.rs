//! Ad-hoc aggregation queries.
//!
//! A [`Query`] is written in terms of field paths (`cofog1`, `from.label`,
//! `time.year`) and compiled once against a [`Schema`] into a
//! [`CompiledQuery`] whose fields are resolved [`FieldRef`]s and whose
//! literals are already coerced to the field's datatype.
//!
//! Filtering has two layers:
//!
//! - cuts (`field:value`): values cut on the same field are OR-ed, different
//!   fields are AND-ed
//! - a slice in disjunctive normal form: any group matches when all of its
//!   conditions match

use std::{cmp::Ordering, fmt};

use log::debug;

use crate::{
    data::{Value, parse_typed_value},
    error::QueryError,
    fact::FactRecord,
    schema::{FieldRef, Schema},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::NotEq => ordering != Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
        }
    }
}

// Two-character spellings first so `>=` is not read as `>`.
const OPERATORS: &[(&str, Operator)] = &[
    ("!=", Operator::NotEq),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    (">:", Operator::Ge),
    ("<:", Operator::Le),
    ("=", Operator::Eq),
    (":", Operator::Eq),
    ("!", Operator::NotEq),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Parses `field<op>value`, splitting at the leftmost operator.
    pub fn parse(expr: &str) -> Result<Self, QueryError> {
        let trimmed = expr.trim();
        let invalid = || QueryError::InvalidCondition(expr.to_string());
        let (index, needle, operator) = trimmed
            .char_indices()
            .find_map(|(index, _)| {
                OPERATORS
                    .iter()
                    .find(|(needle, _)| trimmed[index..].starts_with(needle))
                    .map(|(needle, operator)| (index, *needle, *operator))
            })
            .ok_or_else(invalid)?;
        let field = trimmed[..index].trim();
        if field.is_empty() {
            return Err(invalid());
        }
        let value = unquote(trimmed[index + needle.len()..].trim());
        Ok(Condition::new(field, operator, value))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.operator.symbol(), self.value)
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if value.len() >= 2
        && ((bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\''))
    {
        return &value[1..value.len() - 1];
    }
    value
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cut {
    pub field: String,
    pub value: String,
}

impl Cut {
    pub fn parse(expr: &str) -> Result<Self, QueryError> {
        let (field, value) = expr
            .split_once(':')
            .ok_or_else(|| QueryError::InvalidCondition(expr.to_string()))?;
        let field = field.trim();
        if field.is_empty() {
            return Err(QueryError::InvalidCondition(expr.to_string()));
        }
        Ok(Cut {
            field: field.to_string(),
            value: unquote(value.trim()).to_string(),
        })
    }
}

/// Parses one conjunction of `;`-separated conditions.
pub fn parse_slice_group(expr: &str) -> Result<Vec<Condition>, QueryError> {
    expr.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Condition::parse)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn is_ascending(self) -> bool {
        matches!(self, SortDirection::Asc)
    }

    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderKey {
    /// Parses `field`, `field:asc` or `field:desc`.
    pub fn parse(expr: &str) -> Result<Self, QueryError> {
        let (field, direction) = match expr.rsplit_once(':') {
            Some((field, dir)) => {
                let direction = match dir.trim().to_ascii_lowercase().as_str() {
                    "asc" => SortDirection::Asc,
                    "desc" => SortDirection::Desc,
                    _ => return Err(QueryError::InvalidCondition(expr.to_string())),
                };
                (field.trim(), direction)
            }
            None => (expr.trim(), SortDirection::Asc),
        };
        if field.is_empty() {
            return Err(QueryError::InvalidCondition(expr.to_string()));
        }
        Ok(OrderKey {
            field: field.to_string(),
            direction,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub drilldowns: Vec<String>,
    pub cuts: Vec<Cut>,
    /// Disjunction of conjunctions; empty matches everything.
    pub slice: Vec<Vec<Condition>>,
    /// Measures to sum; empty selects every measure.
    pub measures: Vec<String>,
    pub order: Vec<OrderKey>,
    /// 1-based page number.
    pub page: usize,
    pub pagesize: Option<usize>,
    pub collection: Option<String>,
}

impl Query {
    pub fn new() -> Self {
        Self {
            page: 1,
            ..Self::default()
        }
    }

    pub fn drilldown(mut self, field: impl Into<String>) -> Self {
        self.drilldowns.push(field.into());
        self
    }

    pub fn cut(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.cuts.push(Cut {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn slice_group(mut self, conditions: Vec<Condition>) -> Self {
        self.slice.push(conditions);
        self
    }

    pub fn measure(mut self, name: impl Into<String>) -> Self {
        self.measures.push(name.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push(OrderKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn paged(mut self, page: usize, pagesize: usize) -> Self {
        self.page = page;
        self.pagesize = Some(pagesize);
        self
    }

    pub fn from_collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn compile(&self, schema: &Schema) -> Result<CompiledQuery, QueryError> {
        let resolve = |path: &str| {
            schema
                .resolve_field(path)
                .ok_or_else(|| QueryError::UnknownField(path.to_string()))
        };
        let literal = |path: &str, field: FieldRef, raw: &str| {
            parse_typed_value(raw, schema.field_datatype(field)).map_err(|source| {
                QueryError::InvalidLiteral {
                    field: path.to_string(),
                    source,
                }
            })
        };

        let drilldowns = self
            .drilldowns
            .iter()
            .map(|path| resolve(path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut cuts: Vec<(FieldRef, Vec<Value>)> = Vec::new();
        for cut in &self.cuts {
            let field = resolve(&cut.field)?;
            let value = literal(&cut.field, field, &cut.value)?;
            match cuts.iter_mut().find(|(existing, _)| *existing == field) {
                Some((_, values)) => values.push(value),
                None => cuts.push((field, vec![value])),
            }
        }

        let mut slice = Vec::with_capacity(self.slice.len());
        for group in &self.slice {
            let mut compiled = Vec::with_capacity(group.len());
            for condition in group {
                let field = resolve(&condition.field)?;
                compiled.push(FieldPredicate {
                    field,
                    predicate: Predicate::Compare {
                        operator: condition.operator,
                        literal: literal(&condition.field, field, &condition.value)?,
                    },
                });
            }
            slice.push(compiled);
        }

        let measures: Vec<(usize, String)> = if self.measures.is_empty() {
            schema
                .measures()
                .map(|(index, dim)| (index, dim.name.clone()))
                .collect()
        } else {
            self.measures
                .iter()
                .map(|name| {
                    schema
                        .measures()
                        .find(|(_, dim)| &dim.name == name)
                        .map(|(index, dim)| (index, dim.name.clone()))
                        .ok_or_else(|| QueryError::UnknownMeasure(name.clone()))
                })
                .collect::<Result<_, _>>()?
        };

        let mut order = Vec::with_capacity(self.order.len());
        for key in &self.order {
            let target = if let Some(position) = self.drilldowns.iter().position(|d| *d == key.field)
            {
                OrderTarget::Drilldown(position)
            } else if let Some(position) = measures.iter().position(|(_, name)| *name == key.field) {
                OrderTarget::Measure(position)
            } else if key.field == "num_entries" {
                OrderTarget::Count
            } else {
                return Err(QueryError::UnknownField(key.field.clone()));
            };
            order.push((target, key.direction));
        }

        debug!(
            "Compiled query: {} drilldown(s), {} cut field(s), {} slice group(s), {} measure(s)",
            drilldowns.len(),
            cuts.len(),
            slice.len(),
            measures.len()
        );
        Ok(CompiledQuery {
            drilldown_names: self.drilldowns.clone(),
            drilldowns,
            cuts,
            filters: Vec::new(),
            slice,
            measures,
            order,
            page: self.page.max(1),
            pagesize: self.pagesize,
            collection: self.collection.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    Compare { operator: Operator, literal: Value },
    /// Equality on the value's textual form, used by view filters.
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldPredicate {
    pub field: FieldRef,
    pub predicate: Predicate,
}

impl FieldPredicate {
    fn matches(&self, record: &FactRecord) -> bool {
        let Some(value) = record.value(self.field) else {
            return false;
        };
        match &self.predicate {
            Predicate::Compare { operator, literal } => operator.accepts(Value::cmp(&value, literal)),
            Predicate::Text(expected) => value.as_display() == *expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderTarget {
    Drilldown(usize),
    Measure(usize),
    Count,
}

/// A query resolved against one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub(crate) drilldown_names: Vec<String>,
    pub(crate) drilldowns: Vec<FieldRef>,
    pub(crate) cuts: Vec<(FieldRef, Vec<Value>)>,
    /// Conjunctive filters applied before cuts and slice.
    pub(crate) filters: Vec<FieldPredicate>,
    pub(crate) slice: Vec<Vec<FieldPredicate>>,
    pub(crate) measures: Vec<(usize, String)>,
    pub(crate) order: Vec<(OrderTarget, SortDirection)>,
    pub(crate) page: usize,
    pub(crate) pagesize: Option<usize>,
    pub(crate) collection: Option<String>,
}

impl CompiledQuery {
    pub fn measure_names(&self) -> Vec<String> {
        self.measures.iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn drilldown_names(&self) -> &[String] {
        &self.drilldown_names
    }

    pub fn matches(&self, record: &FactRecord) -> bool {
        self.filters.iter().all(|filter| filter.matches(record))
            && self.cuts.iter().all(|(field, values)| {
                record
                    .value(*field)
                    .is_some_and(|value| values.iter().any(|v| Value::cmp(&value, v).is_eq()))
            })
            && (self.slice.is_empty()
                || self
                    .slice
                    .iter()
                    .any(|group| group.iter().all(|condition| condition.matches(record))))
    }

    /// Drilldown key for `record`, or `None` when any drilldown field is
    /// unpopulated.
    pub fn group_key(&self, record: &FactRecord) -> Option<Vec<Value>> {
        self.drilldowns
            .iter()
            .map(|field| {
                record
                    .value(*field)
                    .filter(|value| !value.is_blank())
                    .map(|value| value.into_owned())
            })
            .collect()
    }

    pub fn measure_values(&self, record: &FactRecord) -> Vec<f64> {
        self.measures
            .iter()
            .map(|(dimension, _)| {
                record
                    .value(FieldRef::Scalar {
                        dimension: *dimension,
                    })
                    .and_then(|value| value.as_f64())
                    .unwrap_or(0.0)
            })
            .collect()
    }
}
