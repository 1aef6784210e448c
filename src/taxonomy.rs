//! Per-level classifier lookup tables built from the observed facts.
//!
//! Every classifier dimension is one level of its taxonomy. Levels are
//! indexed independently by `name`; nothing checks that a level-2 code is a
//! child of the level-1 code on the same fact.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::{
    data::Value,
    fact::DimensionValue,
    schema::{Dimension, NAME_ATTRIBUTE, Schema},
    store::FactStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifierEntry {
    pub name: String,
    pub label: String,
    pub description: String,
    pub change_date: String,
}

#[derive(Debug, Clone)]
struct LevelIndex {
    dimension: String,
    default_label: Option<String>,
    entries: BTreeMap<String, ClassifierEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyIndex {
    taxonomies: BTreeMap<String, BTreeMap<u32, LevelIndex>>,
}

struct AttributeSlots {
    name: Option<usize>,
    label: Option<usize>,
    description: Option<usize>,
    change_date: Option<usize>,
}

impl AttributeSlots {
    fn of(dim: &Dimension) -> Self {
        Self {
            name: dim.attribute_index(NAME_ATTRIBUTE),
            label: dim.attribute_index("label"),
            description: dim.attribute_index("description"),
            change_date: dim.attribute_index("change_date"),
        }
    }
}

fn text_at(values: &[Value], slot: Option<usize>) -> String {
    slot.and_then(|index| values.get(index))
        .map(Value::as_display)
        .unwrap_or_default()
}

impl TaxonomyIndex {
    /// Scans every record once. When the same code appears with different
    /// labels, the first record seen wins.
    pub fn build<S: FactStore + ?Sized>(schema: &Schema, store: &S) -> Self {
        let mut index = TaxonomyIndex::default();
        let mut sources = Vec::new();
        for taxonomy in schema.taxonomies() {
            let levels = index.taxonomies.entry(taxonomy.name.clone()).or_default();
            for level in &taxonomy.levels {
                let dim = &schema.dimensions()[level.dimension];
                let default_label = dim
                    .attribute("label")
                    .and_then(|attr| attr.default.as_ref())
                    .map(Value::as_display);
                levels.insert(
                    level.level,
                    LevelIndex {
                        dimension: dim.name.clone(),
                        default_label,
                        entries: BTreeMap::new(),
                    },
                );
                sources.push((taxonomy.name.clone(), level.level, level.dimension, AttributeSlots::of(dim)));
            }
        }

        for record in store.records() {
            for (taxonomy, level, dimension, slots) in &sources {
                let Some(DimensionValue::Compound(values)) = record.dimensions().get(*dimension)
                else {
                    continue;
                };
                let name = text_at(values, slots.name);
                if name.is_empty() {
                    continue;
                }
                let Some(level_index) = index
                    .taxonomies
                    .get_mut(taxonomy)
                    .and_then(|levels| levels.get_mut(level))
                else {
                    continue;
                };
                level_index
                    .entries
                    .entry(name.clone())
                    .or_insert_with(|| ClassifierEntry {
                        name,
                        label: text_at(values, slots.label),
                        description: text_at(values, slots.description),
                        change_date: text_at(values, slots.change_date),
                    });
            }
        }

        for (name, levels) in &index.taxonomies {
            let counts: Vec<String> = levels
                .iter()
                .map(|(level, idx)| format!("{level}:{}", idx.entries.len()))
                .collect();
            debug!("Taxonomy '{name}' entries per level [{}]", counts.join(", "));
        }
        index
    }

    fn level(&self, taxonomy: &str, level: u32) -> Option<&LevelIndex> {
        self.taxonomies.get(taxonomy)?.get(&level)
    }

    pub fn lookup(&self, taxonomy: &str, level: u32, name: &str) -> Option<&ClassifierEntry> {
        self.level(taxonomy, level)?.entries.get(name)
    }

    /// The observed label for `name`, else the level's declared default
    /// label, else the code itself.
    pub fn label_or_default(&self, taxonomy: &str, level: u32, name: &str) -> String {
        let level_index = self.level(taxonomy, level);
        level_index
            .and_then(|idx| idx.entries.get(name))
            .map(|entry| entry.label.clone())
            .filter(|label| !label.is_empty())
            .or_else(|| level_index.and_then(|idx| idx.default_label.clone()))
            .unwrap_or_else(|| name.to_string())
    }

    pub fn taxonomy_names(&self) -> impl Iterator<Item = &str> {
        self.taxonomies.keys().map(String::as_str)
    }

    pub fn levels(&self, taxonomy: &str) -> Vec<u32> {
        self.taxonomies
            .get(taxonomy)
            .map(|levels| levels.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn level_dimension(&self, taxonomy: &str, level: u32) -> Option<&str> {
        self.level(taxonomy, level).map(|idx| idx.dimension.as_str())
    }

    /// Entries of one level, ordered by code.
    pub fn members(&self, taxonomy: &str, level: u32) -> Vec<&ClassifierEntry> {
        self.level(taxonomy, level)
            .map(|idx| idx.entries.values().collect())
            .unwrap_or_default()
    }

    /// Codes whose label matches `label`, for label-based filtering.
    pub fn names_for_label(&self, taxonomy: &str, level: u32, label: &str) -> Vec<&str> {
        self.level(taxonomy, level)
            .map(|idx| {
                idx.entries
                    .values()
                    .filter(|entry| entry.label == label)
                    .map(|entry| entry.name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fact::SourceRow, mapper::map_row, schema::ModelDocument, store::MemoryFactStore,
    };

    fn schema() -> Schema {
        ModelDocument::from_json_str(
            r#"{
            "dataset": {"name": "demo"},
            "mapping": {
                "f1.name": {"column": "f1"},
                "f1.label": {"column": "f1_label"},
                "f2.name": {"column": "f2"},
                "f2.label": {"column": "f2_label"},
                "amount": {"column": "amount"}
            },
            "dimensions": {
                "f1": {"type": "classifier", "taxonomy": "fn", "attributes": {
                    "name": {"datatype": "string", "default_value": "XX"},
                    "label": {"datatype": "string", "default_value": "(Undefined)"}
                }},
                "f2": {"type": "classifier", "taxonomy": "fn", "attributes": {
                    "name": {"datatype": "string"},
                    "label": {"datatype": "string"}
                }},
                "amount": {"type": "measure", "datatype": "float"}
            }
        }"#,
        )
        .unwrap()
        .into_schema()
        .unwrap()
    }

    fn store(schema: &Schema, rows: &[&[(&str, &str)]]) -> MemoryFactStore {
        let mut store = MemoryFactStore::new();
        for row in rows {
            let row: SourceRow = row.iter().copied().collect();
            store.upsert(map_row(schema, &row).unwrap());
        }
        store
    }

    #[test]
    fn levels_are_indexed_independently() {
        let schema = schema();
        let store = store(
            &schema,
            &[
                &[("f1", "01"), ("f1_label", "Services"), ("f2", "01.1"), ("f2_label", "Executive"), ("amount", "1")],
                &[("f1", "02"), ("f1_label", "Defence"), ("f2", "01.1"), ("f2_label", "Other"), ("amount", "1")],
            ],
        );
        let index = TaxonomyIndex::build(&schema, &store);
        assert_eq!(index.levels("fn"), vec![1, 2]);
        assert_eq!(index.level_dimension("fn", 2), Some("f2"));
        assert_eq!(index.lookup("fn", 1, "02").map(|e| e.label.as_str()), Some("Defence"));
        assert_eq!(index.lookup("fn", 2, "01.1").map(|e| e.label.as_str()), Some("Executive"));
        assert!(index.lookup("fn", 2, "02").is_none());
        assert_eq!(index.members("fn", 1).len(), 2);
        assert_eq!(index.names_for_label("fn", 1, "Defence"), vec!["02"]);
    }

    #[test]
    fn unknown_codes_fall_back_to_default_label() {
        let schema = schema();
        let store = store(&schema, &[&[("amount", "1")]]);
        let index = TaxonomyIndex::build(&schema, &store);
        assert_eq!(index.lookup("fn", 1, "XX").map(|e| e.label.as_str()), Some("(Undefined)"));
        assert_eq!(index.label_or_default("fn", 1, "07"), "(Undefined)");
        assert_eq!(index.label_or_default("fn", 2, "07.1"), "07.1");
        assert!(index.lookup("other", 1, "XX").is_none());
    }
}
