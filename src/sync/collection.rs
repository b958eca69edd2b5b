//! Id-unique, domain-sorted list of records.

use super::Record;

/// The client-held list backing one view.
///
/// No two records share an id, and the records are always sorted by
/// [`Record::ordering`]. Equal keys keep their insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<R> {
    records: Vec<R>,
}

impl<R> Default for Collection<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<R: Record> Collection<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a fetched batch. A later row with a repeated id replaces the earlier one.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut collection = Self::new();
        for record in records {
            match collection.position(record.id()) {
                Some(index) => collection.records[index] = record,
                None => collection.records.push(record),
            }
        }
        collection.sort();
        collection
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.records.iter().find(|record| record.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|record| record.id() == id)
    }

    /// Insert unless the id is already present. Returns whether it was inserted.
    pub(crate) fn insert(&mut self, record: R) -> bool {
        if self.contains(record.id()) {
            return false;
        }
        let index = self
            .records
            .partition_point(|existing| R::ordering(existing, &record).is_le());
        self.records.insert(index, record);
        true
    }

    /// Replace the record with the same id. Returns whether one was found.
    pub(crate) fn replace(&mut self, record: R) -> bool {
        match self.position(record.id()) {
            Some(index) => {
                self.records[index] = record;
                self.sort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<R> {
        self.position(id).map(|index| self.records.remove(index))
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&R) -> bool) {
        self.records.retain(keep);
    }

    fn sort(&mut self) {
        self.records.sort_by(R::ordering);
    }
}
