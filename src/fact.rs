//! Source rows and the fact records produced from them.

use std::{borrow::Cow, collections::HashMap};

use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

use crate::{
    data::Value,
    schema::{DatePart, DimensionShape, FieldRef, NAME_ATTRIBUTE, Schema},
};

/// One flat input row: column name to raw text. Columns may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRow {
    values: HashMap<String, String>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs headers with a record's cells; surplus cells are ignored.
    pub fn from_record(headers: &[String], record: &[String]) -> Self {
        headers
            .iter()
            .zip(record)
            .map(|(header, value)| (header.clone(), value.clone()))
            .collect()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.values.remove(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for SourceRow
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DimensionValue {
    Scalar(Value),
    /// Attribute values in the dimension's declared attribute order.
    Compound(Vec<Value>),
}

/// A fully resolved fact: one value per declared attribute path, aligned
/// with [`Schema::dimensions()`].
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    id: String,
    dimensions: Vec<DimensionValue>,
}

impl FactRecord {
    pub(crate) fn new(schema: &Schema, dimensions: Vec<DimensionValue>) -> Self {
        let id = fact_id(schema, &dimensions);
        Self { id, dimensions }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Folds `ordinal` into the id. Facts of a dataset without key
    /// dimensions get one per insertion so identical rows stay distinct;
    /// `ordinal` must not repeat within a store.
    pub(crate) fn with_ordinal(mut self, ordinal: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(b"\x1d");
        hasher.update(ordinal.to_le_bytes());
        self.id = format!("{:x}", hasher.finalize());
        self
    }

    pub fn dimensions(&self) -> &[DimensionValue] {
        &self.dimensions
    }

    pub fn value(&self, field: FieldRef) -> Option<Cow<'_, Value>> {
        match (field, self.dimensions.get(field.dimension())?) {
            (FieldRef::Scalar { .. }, DimensionValue::Scalar(value)) => Some(Cow::Borrowed(value)),
            (FieldRef::Attribute { attribute, .. }, DimensionValue::Compound(values)) => {
                values.get(attribute).map(Cow::Borrowed)
            }
            (FieldRef::DatePart { part, .. }, DimensionValue::Scalar(Value::Date(period))) => {
                let label = match part {
                    DatePart::Year => period.year_label(),
                    DatePart::Month => period.month_label(),
                };
                Some(Cow::Owned(Value::String(label)))
            }
            _ => None,
        }
    }

    /// The record as nested JSON: compound dimensions become objects of
    /// their attributes, classifiers also carry their `taxonomy`.
    pub fn to_json(&self, schema: &Schema) -> JsonValue {
        let mut object = Map::new();
        object.insert("id".to_string(), JsonValue::String(self.id.clone()));
        for (dim, value) in schema.dimensions().iter().zip(&self.dimensions) {
            let rendered = match value {
                DimensionValue::Scalar(value) => json_value(value),
                DimensionValue::Compound(values) => {
                    let mut nested = Map::new();
                    for (attr, value) in dim.attributes().iter().zip(values) {
                        nested.insert(attr.name.clone(), json_value(value));
                    }
                    if let Some(taxonomy) = &dim.taxonomy {
                        nested
                            .entry("taxonomy")
                            .or_insert_with(|| JsonValue::String(taxonomy.clone()));
                    }
                    JsonValue::Object(nested)
                }
            };
            object.insert(dim.name.clone(), rendered);
        }
        JsonValue::Object(object)
    }
}

fn json_value(value: &Value) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

/// Stable identity for a fact: SHA-256 over the dataset name and the values
/// of `key` dimensions (the `name` attribute for compound ones). Without key
/// dimensions every mapped value takes part, and the loader later folds in
/// an ordinal with [`FactRecord::with_ordinal`].
fn fact_id(schema: &Schema, dimensions: &[DimensionValue]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(schema.dataset().name.as_bytes());

    let mut keyed = false;
    for (index, dim) in schema.keys() {
        keyed = true;
        let text = match (&dim.shape, dimensions.get(index)) {
            (DimensionShape::Scalar { .. }, Some(DimensionValue::Scalar(value))) => {
                value.as_display()
            }
            (DimensionShape::Compound { .. }, Some(DimensionValue::Compound(values))) => dim
                .attribute_index(NAME_ATTRIBUTE)
                .and_then(|attr| values.get(attr))
                .map(Value::as_display)
                .unwrap_or_default(),
            _ => String::new(),
        };
        hasher.update(b"\x1f");
        hasher.update(text.as_bytes());
    }

    if !keyed {
        for value in dimensions {
            match value {
                DimensionValue::Scalar(value) => {
                    hasher.update(b"\x1f");
                    hasher.update(value.as_display().as_bytes());
                }
                DimensionValue::Compound(values) => {
                    for value in values {
                        hasher.update(b"\x1e");
                        hasher.update(value.as_display().as_bytes());
                    }
                }
            }
        }
    }
    format!("{:x}", hasher.finalize())
}
