//! View and query execution over a [`FactStore`].
//!
//! Execution is a map-then-reduce: the store is split into contiguous
//! partitions, each partition folds its matching facts into a
//! [`PartialAggregate`] keyed by drilldown values, and partials are merged
//! by summing matching keys. Both steps are associative and commutative, so
//! the result does not depend on partitioning or on input order. Groups come
//! out in ascending key order unless the query asks otherwise.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    thread,
};

use log::debug;
use serde::Serialize;

use crate::{
    data::Value,
    error::{EngineError, QueryError},
    fact::FactRecord,
    query::{CompiledQuery, FieldPredicate, OrderTarget, Predicate, Query, SortDirection},
    schema::{FieldRef, NAME_ATTRIBUTE, Schema, ScopeProperty, View, ViewFilter, ViewScope},
    store::FactStore,
};

/// Partitions smaller than this are not worth a thread.
const MIN_PARTITION: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq)]
struct Accum {
    sums: Vec<f64>,
    count: usize,
}

impl Accum {
    fn add(&mut self, values: &[f64]) {
        if self.sums.len() < values.len() {
            self.sums.resize(values.len(), 0.0);
        }
        for (sum, value) in self.sums.iter_mut().zip(values) {
            *sum += value;
        }
        self.count += 1;
    }

    fn merge(&mut self, other: Accum) {
        if self.sums.len() < other.sums.len() {
            self.sums.resize(other.sums.len(), 0.0);
        }
        for (sum, value) in self.sums.iter_mut().zip(other.sums) {
            *sum += value;
        }
        self.count += other.count;
    }
}

/// Per-partition group sums.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialAggregate {
    groups: BTreeMap<Vec<Value>, Accum>,
}

impl PartialAggregate {
    fn fold<'r>(
        query: &CompiledQuery,
        records: impl IntoIterator<Item = &'r FactRecord>,
        members: Option<&BTreeSet<String>>,
    ) -> Self {
        let mut partial = PartialAggregate::default();
        for record in records {
            if members.is_some_and(|ids| !ids.contains(record.id())) || !query.matches(record) {
                continue;
            }
            let Some(key) = query.group_key(record) else {
                continue;
            };
            partial
                .groups
                .entry(key)
                .or_default()
                .add(&query.measure_values(record));
        }
        partial
    }

    pub fn merge(&mut self, other: PartialAggregate) {
        for (key, accum) in other.groups {
            self.groups.entry(key).or_default().merge(accum);
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrilldownRow {
    pub keys: Vec<Value>,
    /// Sums aligned with [`AggregateResult::measures`].
    pub totals: Vec<f64>,
    pub num_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub totals: BTreeMap<String, f64>,
    pub num_entries: usize,
    pub num_drilldowns: usize,
    pub page: usize,
    pub pages: usize,
    pub pagesize: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub drilldowns: Vec<String>,
    pub measures: Vec<String>,
    pub rows: Vec<DrilldownRow>,
    pub summary: Summary,
}

/// Output of a view: groups keyed by the breakdown, ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewResult {
    pub scope: ViewScope,
    pub name: String,
    pub label: String,
    pub breakdown: String,
    pub measures: Vec<String>,
    pub rows: Vec<DrilldownRow>,
}

impl ViewResult {
    /// `(breakdown value, total)` pairs for the first declared measure.
    pub fn pairs(&self) -> Vec<(String, f64)> {
        self.rows
            .iter()
            .map(|row| {
                let key = row.keys.first().map(Value::as_display).unwrap_or_default();
                (key, row.totals.first().copied().unwrap_or(0.0))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'a> {
    schema: &'a Schema,
    workers: usize,
}

impl<'a> Aggregator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema, workers: 1 }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn aggregate<S: FactStore + ?Sized>(
        &self,
        query: &Query,
        store: &S,
    ) -> Result<AggregateResult, EngineError> {
        let compiled = query.compile(self.schema)?;
        let members = collection_members(&compiled, store)?;
        let partial = self.run(&compiled, store, members);

        let measures = compiled.measure_names();
        let mut totals = vec![0.0; measures.len()];
        let mut num_entries = 0;
        let mut rows: Vec<DrilldownRow> = partial
            .groups
            .into_iter()
            .map(|(keys, accum)| {
                for (total, sum) in totals.iter_mut().zip(&accum.sums) {
                    *total += sum;
                }
                num_entries += accum.count;
                DrilldownRow {
                    keys,
                    totals: padded(accum.sums, measures.len()),
                    num_entries: accum.count,
                }
            })
            .collect();
        sort_rows(&mut rows, &compiled.order);

        let num_drilldowns = rows.len();
        let pagesize = compiled.pagesize.unwrap_or(num_drilldowns).max(1);
        let pages = num_drilldowns.div_ceil(pagesize);
        let rows: Vec<DrilldownRow> = rows
            .into_iter()
            .skip((compiled.page - 1).saturating_mul(pagesize))
            .take(pagesize)
            .collect();

        Ok(AggregateResult {
            drilldowns: compiled.drilldown_names().to_vec(),
            summary: Summary {
                totals: measures.iter().cloned().zip(totals).collect(),
                num_entries,
                num_drilldowns,
                page: compiled.page,
                pages,
                pagesize,
            },
            measures,
            rows,
        })
    }

    /// Runs the view registered as `(entity, name)`. `dimension` picks among
    /// same-named views of one scope; `member` restricts a classifier or
    /// entity view to facts whose subject has that `name`.
    pub fn execute_view<S: FactStore + ?Sized>(
        &self,
        store: &S,
        entity: &str,
        name: &str,
        dimension: Option<&str>,
        member: Option<&str>,
    ) -> Result<ViewResult, EngineError> {
        let view = self
            .schema
            .find_view(entity, name, dimension)
            .ok_or_else(|| EngineError::ViewNotFound {
                entity: entity.to_string(),
                name: name.to_string(),
            })?;
        let compiled = self.compile_view(view, member)?;
        let measures = compiled.measure_names();
        let mut result = ViewResult {
            scope: view.scope,
            name: view.name.clone(),
            label: view.label.clone(),
            breakdown: view.breakdown_name.clone(),
            measures: measures.clone(),
            rows: Vec::new(),
        };

        if !self.scope_matches(view) {
            debug!("View '{}' scope filters do not match this dataset", view.name);
            return Ok(result);
        }

        let partial = self.run(&compiled, store, None);
        result.rows = partial
            .groups
            .into_iter()
            .map(|(keys, accum)| DrilldownRow {
                keys,
                totals: padded(accum.sums, measures.len()),
                num_entries: accum.count,
            })
            .collect();
        Ok(result)
    }

    /// Adds the ids of every fact matching `query` to `collection`. Returns
    /// how many ids were not already members.
    pub fn collect<S: FactStore + ?Sized>(
        &self,
        query: &Query,
        store: &mut S,
        collection: &str,
    ) -> Result<usize, EngineError> {
        let compiled = query.compile(self.schema)?;
        let members = collection_members(&compiled, &*store)?;
        let ids: Vec<String> = store
            .records()
            .filter(|record| members.is_none_or(|ids| ids.contains(record.id())))
            .filter(|record| compiled.matches(record))
            .map(|record| record.id().to_string())
            .collect();
        let added = ids
            .iter()
            .filter(|id| store.add_to_collection(collection, id))
            .count();
        debug!("Collected {added} new fact(s) into '{collection}'");
        Ok(added)
    }

    /// Sorted distinct, non-blank values of `field` across the store.
    pub fn distinct<S: FactStore + ?Sized>(
        &self,
        field: &str,
        store: &S,
    ) -> Result<Vec<Value>, EngineError> {
        let field_ref = self
            .schema
            .resolve_field(field)
            .ok_or_else(|| QueryError::UnknownField(field.to_string()))?;
        let values: BTreeSet<Value> = store
            .records()
            .filter_map(|record| record.value(field_ref))
            .filter(|value| !value.is_blank())
            .map(|value| value.into_owned())
            .collect();
        Ok(values.into_iter().collect())
    }

    fn compile_view(&self, view: &View, member: Option<&str>) -> Result<CompiledQuery, EngineError> {
        let measures: Vec<(usize, String)> = self
            .schema
            .measures()
            .map(|(index, dim)| (index, dim.name.clone()))
            .collect();
        if measures.is_empty() {
            return Err(EngineError::ViewConfiguration {
                view: view.name.clone(),
                reason: "the dataset declares no measure dimension".to_string(),
            });
        }

        let mut filters: Vec<FieldPredicate> = view
            .filters
            .iter()
            .filter_map(|filter| match filter {
                ViewFilter::Fact {
                    field, expected, ..
                } => Some(FieldPredicate {
                    field: *field,
                    predicate: Predicate::Text(expected.clone()),
                }),
                ViewFilter::Scope { .. } => None,
            })
            .collect();

        if let Some(member) = member {
            let subject = view.subject.ok_or_else(|| EngineError::ViewConfiguration {
                view: view.name.clone(),
                reason: format!("{} views have no members", view.scope),
            })?;
            let attribute = self.schema.dimensions()[subject]
                .attribute_index(NAME_ATTRIBUTE)
                .ok_or_else(|| EngineError::ViewConfiguration {
                    view: view.name.clone(),
                    reason: "subject dimension has no name attribute".to_string(),
                })?;
            filters.push(FieldPredicate {
                field: FieldRef::Attribute {
                    dimension: subject,
                    attribute,
                },
                predicate: Predicate::Text(member.to_string()),
            });
        }

        Ok(CompiledQuery {
            drilldown_names: vec![view.breakdown_name.clone()],
            drilldowns: vec![view.breakdown],
            cuts: Vec::new(),
            filters,
            slice: Vec::new(),
            measures,
            order: Vec::new(),
            page: 1,
            pagesize: None,
            collection: None,
        })
    }

    fn scope_matches(&self, view: &View) -> bool {
        let dataset = self.schema.dataset();
        view.filters.iter().all(|filter| match filter {
            ViewFilter::Scope {
                property, expected, ..
            } => {
                let actual = match property {
                    ScopeProperty::DatasetName => Some(dataset.name.as_str()),
                    ScopeProperty::DatasetLabel => Some(dataset.label.as_str()),
                    ScopeProperty::DatasetCurrency => Some(dataset.currency.as_str()),
                    ScopeProperty::Taxonomy => view
                        .subject
                        .and_then(|index| self.schema.dimensions()[index].taxonomy.as_deref()),
                };
                actual == Some(expected.as_str())
            }
            ViewFilter::Fact { .. } => true,
        })
    }

    fn run<S: FactStore + ?Sized>(
        &self,
        query: &CompiledQuery,
        store: &S,
        members: Option<&BTreeSet<String>>,
    ) -> PartialAggregate {
        if self.workers == 1 || store.len() < MIN_PARTITION * 2 {
            return PartialAggregate::fold(query, store.records(), members);
        }

        let records: Vec<&FactRecord> = store.records().collect();
        let partition = records
            .len()
            .div_ceil(self.workers)
            .max(MIN_PARTITION);
        debug!(
            "Aggregating {} fact(s) in {} partition(s)",
            records.len(),
            records.len().div_ceil(partition)
        );
        thread::scope(|scope| {
            let handles: Vec<_> = records
                .chunks(partition)
                .map(|chunk| {
                    scope.spawn(move || {
                        PartialAggregate::fold(query, chunk.iter().copied(), members)
                    })
                })
                .collect();
            let mut merged = PartialAggregate::default();
            for handle in handles {
                let partial = handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
                merged.merge(partial);
            }
            merged
        })
    }
}

fn collection_members<'s, S: FactStore + ?Sized>(
    query: &CompiledQuery,
    store: &'s S,
) -> Result<Option<&'s BTreeSet<String>>, QueryError> {
    match &query.collection {
        Some(name) => store
            .collection(name)
            .map(Some)
            .ok_or_else(|| QueryError::UnknownCollection(name.clone())),
        None => Ok(None),
    }
}

fn padded(mut sums: Vec<f64>, len: usize) -> Vec<f64> {
    sums.resize(len, 0.0);
    sums
}

/// Stable sort by the requested keys; rows arrive in ascending key order, so
/// ties keep that order.
fn sort_rows(rows: &mut [DrilldownRow], order: &[(OrderTarget, SortDirection)]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for (target, direction) in order {
            let ordering = match target {
                OrderTarget::Drilldown(index) => a.keys[*index].cmp(&b.keys[*index]),
                OrderTarget::Measure(index) => a.totals[*index].total_cmp(&b.totals[*index]),
                OrderTarget::Count => a.num_entries.cmp(&b.num_entries),
            };
            let ordering = if direction.is_ascending() {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fact::SourceRow,
        mapper::map_row,
        schema::ModelDocument,
        store::MemoryFactStore,
    };

    fn schema() -> Schema {
        ModelDocument::from_json_str(
            r#"{
            "dataset": {"name": "demo", "currency": "GBP"},
            "mapping": {
                "ref": {"column": "ref"},
                "region": {"column": "region"},
                "amount": {"column": "amount"}
            },
            "dimensions": {
                "ref": {"type": "value", "datatype": "string", "key": true},
                "region": {"type": "value", "datatype": "string"},
                "amount": {"type": "measure", "datatype": "float"}
            },
            "views": [
                {"entity": "dataset", "name": "region", "dimension": "dataset",
                 "breakdown": "region", "filters": {"currency": "GBP"}},
                {"entity": "dataset", "name": "euro", "dimension": "dataset",
                 "breakdown": "region", "filters": {"currency": "EUR"}}
            ]
        }"#,
        )
        .unwrap()
        .into_schema()
        .unwrap()
    }

    fn store(schema: &Schema, rows: &[(&str, &str, &str)]) -> MemoryFactStore {
        let mut store = MemoryFactStore::new();
        for (reference, region, amount) in rows {
            let row: SourceRow = [("ref", *reference), ("region", *region), ("amount", *amount)]
                .into_iter()
                .collect();
            store.upsert(map_row(schema, &row).unwrap());
        }
        store
    }

    #[test]
    fn query_orders_by_measure_and_pages() {
        let schema = schema();
        let store = store(
            &schema,
            &[("a", "North", "5"), ("b", "South", "20"), ("c", "East", "10"), ("d", "South", "1")],
        );
        let query = Query::new()
            .drilldown("region")
            .order_by("amount", SortDirection::Desc)
            .paged(1, 2);
        let result = Aggregator::new(&schema).aggregate(&query, &store).unwrap();
        let keys: Vec<String> = result.rows.iter().map(|r| r.keys[0].as_display()).collect();
        assert_eq!(keys, ["South", "East"]);
        assert_eq!(result.rows[0].totals, vec![21.0]);
        assert_eq!(result.summary.num_drilldowns, 3);
        assert_eq!(result.summary.pages, 2);
        assert_eq!(result.summary.num_entries, 4);
        assert_eq!(result.summary.totals.get("amount"), Some(&36.0));
    }

    #[test]
    fn scope_filters_that_do_not_match_yield_nothing() {
        let schema = schema();
        let store = store(&schema, &[("a", "North", "5")]);
        let aggregator = Aggregator::new(&schema);
        let matched = aggregator
            .execute_view(&store, "dataset", "region", None, None)
            .unwrap();
        assert_eq!(matched.pairs(), vec![("North".to_string(), 5.0)]);
        let empty = aggregator
            .execute_view(&store, "dataset", "euro", None, None)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn partials_merge_by_summing_matching_keys() {
        let schema = schema();
        let store = store(&schema, &[("a", "North", "5"), ("b", "North", "7"), ("c", "West", "1")]);
        let query = Query::new().drilldown("region").compile(&schema).unwrap();
        let records = store.as_slice();
        let mut left = PartialAggregate::fold(&query, &records[..1], None);
        let right = PartialAggregate::fold(&query, &records[1..], None);
        left.merge(right);
        let whole = PartialAggregate::fold(&query, records, None);
        assert_eq!(left, whole);
        assert_eq!(whole.len(), 2);
    }

    #[test]
    fn collections_restrict_later_queries() {
        let schema = schema();
        let mut store = store(&schema, &[("a", "North", "5"), ("b", "South", "7")]);
        let aggregator = Aggregator::new(&schema);
        let added = aggregator
            .collect(&Query::new().cut("region", "South"), &mut store, "south")
            .unwrap();
        assert_eq!(added, 1);
        let again = aggregator
            .collect(&Query::new().cut("region", "South"), &mut store, "south")
            .unwrap();
        assert_eq!(again, 0);

        let result = aggregator
            .aggregate(&Query::new().from_collection("south"), &store)
            .unwrap();
        assert_eq!(result.summary.totals.get("amount"), Some(&7.0));

        let err = aggregator
            .aggregate(&Query::new().from_collection("missing"), &store)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Query(QueryError::UnknownCollection(_))
        ));
    }

    #[test]
    fn distinct_values_are_sorted() {
        let schema = schema();
        let store = store(&schema, &[("a", "West", "1"), ("b", "East", "1"), ("c", "West", "1")]);
        let values = Aggregator::new(&schema).distinct("region", &store).unwrap();
        assert_eq!(
            values,
            vec![Value::String("East".into()), Value::String("West".into())]
        );
    }
}
