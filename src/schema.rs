//! Dataset model: the configuration document and its validated form.
//!
//! A [`ModelDocument`] is the raw `dataset`/`mapping`/`dimensions`/`views`
//! document as written by a model author (JSON or YAML). It is never used for
//! mapping directly; [`ModelDocument::into_schema()`] runs the validator and
//! produces an immutable [`Schema`] in which every attribute path has already
//! been resolved to a [`FieldRef`].
//!
//! ## Responsibilities
//!
//! - Document loading with preserved declaration order for `dimensions` and
//!   `mapping`
//! - The [`DataType`] table shared by the mapper and the query engine
//! - Path resolution (`from.label`, `cofog1`, `time.year`) for callers

use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, anyhow};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{data::Value, error::SchemaError, validate};

pub const NAME_ATTRIBUTE: &str = "name";
pub const DATASET_SUBJECT: &str = "dataset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "integer", "float", "boolean", "date"]
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(DataType::String),
            "integer" | "int" => Ok(DataType::Integer),
            "float" | "double" => Ok(DataType::Float),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "date" => Ok(DataType::Date),
            _ => Err(anyhow!(
                "Unknown datatype '{value}'. Supported types: {}",
                DataType::variants().join(", ")
            )),
        }
    }
}

/// A scalar written in the document; numbers and booleans are accepted and
/// carried as their textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Literal {
    pub fn as_text(&self) -> String {
        match self {
            Literal::Text(s) => s.clone(),
            Literal::Integer(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Boolean(b) => b.to_string(),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

/// (De)serializes a JSON/YAML object as an ordered list of entries so that
/// declaration order and duplicate keys survive until validation.
mod ordered {
    use std::{fmt, marker::PhantomData};

    use serde::{
        Deserialize, Deserializer, Serialize, Serializer,
        de::{MapAccess, Visitor},
        ser::SerializeMap,
    };

    struct OrderedVisitor<V>(PhantomData<V>);

    impl<'de, V> Visitor<'de> for OrderedVisitor<V>
    where
        V: Deserialize<'de>,
    {
        type Value = Vec<(String, V)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map keyed by name")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, V>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S, V>(entries: &Vec<(String, V)>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub datatype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Literal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, with = "ordered", skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, AttributeSpec)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Literal>,
    #[serde(default)]
    pub facet: bool,
    #[serde(default)]
    pub key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSpec {
    pub entity: String,
    #[serde(default)]
    pub label: String,
    pub name: String,
    pub dimension: String,
    pub breakdown: String,
    #[serde(default, with = "ordered")]
    pub filters: Vec<(String, Literal)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDocument {
    pub dataset: DatasetSpec,
    #[serde(default, with = "ordered")]
    pub mapping: Vec<(String, MappingEntry)>,
    #[serde(default, with = "ordered")]
    pub dimensions: Vec<(String, DimensionSpec)>,
    #[serde(default)]
    pub views: Vec<ViewSpec>,
}

impl ModelDocument {
    /// Reads a document from disk; `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening model file {path:?}"))?;
        let reader = BufReader::new(file);
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_reader(reader).context("Parsing model JSON")
        } else {
            serde_yaml::from_reader(reader).context("Parsing model YAML")
        }
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("Parsing model JSON")
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context("Parsing model YAML")
    }

    pub fn dimension_mut(&mut self, name: &str) -> Option<&mut DimensionSpec> {
        self.dimensions
            .iter_mut()
            .find(|(dim, _)| dim == name)
            .map(|(_, spec)| spec)
    }

    pub fn into_schema(self) -> Result<Schema, SchemaError> {
        validate::validate(&self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub name: String,
    pub label: String,
    pub description: String,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    Entity,
    Value,
    Measure,
    Classifier,
}

impl DimensionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "entity" => Some(DimensionKind::Entity),
            "value" => Some(DimensionKind::Value),
            "measure" => Some(DimensionKind::Measure),
            "classifier" => Some(DimensionKind::Classifier),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKind::Entity => "entity",
            DimensionKind::Value => "value",
            DimensionKind::Measure => "measure",
            DimensionKind::Classifier => "classifier",
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, DimensionKind::Entity | DimensionKind::Classifier)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub datatype: DataType,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DimensionShape {
    Scalar {
        datatype: DataType,
        default: Option<Value>,
    },
    Compound {
        attributes: Vec<Attribute>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
    pub label: String,
    pub description: String,
    pub facet: bool,
    pub key: bool,
    pub taxonomy: Option<String>,
    /// Declared level, or the one assigned during validation for classifiers.
    pub level: Option<u32>,
    pub change_date: Option<String>,
    pub shape: DimensionShape,
}

impl Dimension {
    pub fn attributes(&self) -> &[Attribute] {
        match &self.shape {
            DimensionShape::Compound { attributes } => attributes,
            DimensionShape::Scalar { .. } => &[],
        }
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes().iter().position(|attr| attr.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes().iter().find(|attr| attr.name == name)
    }

    pub fn scalar_datatype(&self) -> Option<DataType> {
        match &self.shape {
            DimensionShape::Scalar { datatype, .. } => Some(*datatype),
            DimensionShape::Compound { .. } => None,
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.shape, DimensionShape::Compound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
}

/// A resolved attribute path. Indices point into [`Schema::dimensions()`] and
/// the owning dimension's attribute list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRef {
    Scalar { dimension: usize },
    Attribute { dimension: usize, attribute: usize },
    DatePart { dimension: usize, part: DatePart },
}

impl FieldRef {
    pub fn dimension(&self) -> usize {
        match self {
            FieldRef::Scalar { dimension }
            | FieldRef::Attribute { dimension, .. }
            | FieldRef::DatePart { dimension, .. } => *dimension,
        }
    }
}

/// One attribute path with its source column, in dimension-declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedField {
    pub path: String,
    pub column: String,
    pub target: FieldRef,
    pub datatype: DataType,
    pub default: Option<Value>,
    /// Compound string attributes fall back to an empty string when absent.
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyLevel {
    pub level: u32,
    pub dimension: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    pub name: String,
    pub levels: Vec<TaxonomyLevel>,
}

impl Taxonomy {
    pub fn dimension_for_level(&self, level: u32) -> Option<usize> {
        self.levels
            .iter()
            .find(|entry| entry.level == level)
            .map(|entry| entry.dimension)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewScope {
    Dataset,
    Classifier,
    Entity,
}

impl ViewScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dataset" => Some(ViewScope::Dataset),
            "classifier" => Some(ViewScope::Classifier),
            "entity" => Some(ViewScope::Entity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewScope::Dataset => "dataset",
            ViewScope::Classifier => "classifier",
            ViewScope::Entity => "entity",
        }
    }
}

impl fmt::Display for ViewScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeProperty {
    DatasetName,
    DatasetLabel,
    DatasetCurrency,
    Taxonomy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewFilter {
    /// Compared once against the view's scope object, not against facts.
    Scope {
        key: String,
        property: ScopeProperty,
        expected: String,
    },
    Fact {
        key: String,
        field: FieldRef,
        expected: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub scope: ViewScope,
    pub name: String,
    pub label: String,
    pub subject: Option<usize>,
    pub dimension: String,
    pub breakdown: FieldRef,
    pub breakdown_name: String,
    pub filters: Vec<ViewFilter>,
}

/// A validated dataset model. Immutable once built.
#[derive(Debug, Clone)]
pub struct Schema {
    pub(crate) dataset: Dataset,
    pub(crate) dimensions: Vec<Dimension>,
    pub(crate) fields: Vec<MappedField>,
    pub(crate) taxonomies: Vec<Taxonomy>,
    pub(crate) views: Vec<View>,
}

impl Schema {
    pub fn load(path: &Path) -> Result<Self> {
        let document = ModelDocument::load(path)?;
        let schema = document
            .into_schema()
            .with_context(|| format!("Validating model {path:?}"))?;
        info!(
            "Loaded model '{}' with {} dimension(s), {} mapped field(s) and {} view(s)",
            schema.dataset.name,
            schema.dimensions.len(),
            schema.fields.len(),
            schema.views.len()
        );
        Ok(schema)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.name == name)
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|dim| dim.name == name)
    }

    pub fn fields(&self) -> &[MappedField] {
        &self.fields
    }

    pub fn measures(&self) -> impl Iterator<Item = (usize, &Dimension)> {
        self.dimensions
            .iter()
            .enumerate()
            .filter(|(_, dim)| dim.kind == DimensionKind::Measure)
    }

    pub fn compounds(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter().filter(|dim| dim.is_compound())
    }

    pub fn facets(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter().filter(|dim| dim.facet)
    }

    pub fn keys(&self) -> impl Iterator<Item = (usize, &Dimension)> {
        self.dimensions.iter().enumerate().filter(|(_, dim)| dim.key)
    }

    pub fn taxonomies(&self) -> &[Taxonomy] {
        &self.taxonomies
    }

    pub fn taxonomy(&self, name: &str) -> Option<&Taxonomy> {
        self.taxonomies.iter().find(|tax| tax.name == name)
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// Resolves `dim`, `dim.attribute` or `dim.year`/`dim.month` (date-typed
    /// value dimensions only). A bare compound dimension resolves to its
    /// `name` attribute.
    pub fn resolve_field(&self, path: &str) -> Option<FieldRef> {
        let (head, tail) = match path.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (path, None),
        };
        let dimension = self.dimension_index(head)?;
        let dim = &self.dimensions[dimension];
        match (&dim.shape, tail) {
            (DimensionShape::Scalar { .. }, None) => Some(FieldRef::Scalar { dimension }),
            (DimensionShape::Scalar { datatype, .. }, Some(part)) => {
                if *datatype != DataType::Date {
                    return None;
                }
                let part = match part {
                    "year" => DatePart::Year,
                    "month" | "yearmonth" => DatePart::Month,
                    _ => return None,
                };
                Some(FieldRef::DatePart { dimension, part })
            }
            (DimensionShape::Compound { .. }, tail) => {
                let attribute = dim.attribute_index(tail.unwrap_or(NAME_ATTRIBUTE))?;
                Some(FieldRef::Attribute {
                    dimension,
                    attribute,
                })
            }
        }
    }

    pub fn field_path(&self, field: FieldRef) -> String {
        let dim = &self.dimensions[field.dimension()];
        match field {
            FieldRef::Scalar { .. } => dim.name.clone(),
            FieldRef::Attribute { attribute, .. } => {
                format!("{}.{}", dim.name, dim.attributes()[attribute].name)
            }
            FieldRef::DatePart { part, .. } => match part {
                DatePart::Year => format!("{}.year", dim.name),
                DatePart::Month => format!("{}.month", dim.name),
            },
        }
    }

    pub fn field_datatype(&self, field: FieldRef) -> DataType {
        let dim = &self.dimensions[field.dimension()];
        match field {
            FieldRef::Scalar { .. } => dim.scalar_datatype().unwrap_or(DataType::String),
            FieldRef::Attribute { attribute, .. } => dim.attributes()[attribute].datatype,
            FieldRef::DatePart { .. } => DataType::String,
        }
    }

    /// Looks up a view by entity scope and name. When several dimensions
    /// declare a view with that name, `dimension` picks one; otherwise the
    /// first declared match wins.
    pub fn find_view(&self, entity: &str, name: &str, dimension: Option<&str>) -> Option<&View> {
        self.views.iter().find(|view| {
            view.scope.as_str() == entity
                && view.name == name
                && dimension.is_none_or(|dim| view.dimension == dim)
        })
    }
}
