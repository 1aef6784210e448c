//! The fact store the aggregator queries.
//!
//! [`FactStore`] is the seam for alternative backends; [`MemoryFactStore`] is
//! the in-process implementation used by the loader and the CLI. Record order
//! is insertion order but carries no meaning for aggregation output.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::fact::FactRecord;

pub trait FactStore {
    /// Inserts `record`, replacing any record with the same id. Returns
    /// `true` when a record was replaced.
    fn upsert(&mut self, record: FactRecord) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> Box<dyn Iterator<Item = &FactRecord> + '_>;

    fn get(&self, id: &str) -> Option<&FactRecord>;

    fn clear(&mut self);

    fn collection(&self, name: &str) -> Option<&BTreeSet<String>>;

    /// Adds `id` to the named collection, creating it on first use. Returns
    /// `false` when the id was already a member.
    fn add_to_collection(&mut self, name: &str, id: &str) -> bool;

    fn remove_from_collection(&mut self, name: &str, id: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFactStore {
    records: Vec<FactRecord>,
    by_id: HashMap<String, usize>,
    collections: BTreeMap<String, BTreeSet<String>>,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Contiguous view of the records, used for partitioned aggregation.
    pub fn as_slice(&self) -> &[FactRecord] {
        &self.records
    }
}

impl FactStore for MemoryFactStore {
    fn upsert(&mut self, record: FactRecord) -> bool {
        match self.by_id.get(record.id()) {
            Some(&index) => {
                self.records[index] = record;
                true
            }
            None => {
                self.by_id.insert(record.id().to_string(), self.records.len());
                self.records.push(record);
                false
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn records(&self) -> Box<dyn Iterator<Item = &FactRecord> + '_> {
        Box::new(self.records.iter())
    }

    fn get(&self, id: &str) -> Option<&FactRecord> {
        self.by_id.get(id).map(|&index| &self.records[index])
    }

    fn clear(&mut self) {
        self.records.clear();
        self.by_id.clear();
        self.collections.clear();
    }

    fn collection(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.collections.get(name)
    }

    fn add_to_collection(&mut self, name: &str, id: &str) -> bool {
        self.collections
            .entry(name.to_string())
            .or_default()
            .insert(id.to_string())
    }

    fn remove_from_collection(&mut self, name: &str, id: &str) -> bool {
        self.collections
            .get_mut(name)
            .is_some_and(|members| members.remove(id))
    }
}

impl Extend<FactRecord> for MemoryFactStore {
    fn extend<I: IntoIterator<Item = FactRecord>>(&mut self, iter: I) {
        for record in iter {
            self.upsert(record);
        }
    }
}
