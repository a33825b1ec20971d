use std::collections::HashMap;

use crate::error::{Error, Result};

/// One externalized constant: the raw payload plus the metadata needed to
/// re-embed it. The key is the constant node's name, so recompressing the same
/// graph yields the same keys.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantRecord {
    pub key: String,
    pub dtype: i32,
    pub shape: Vec<i64>,
    pub payload: Vec<u8>,
}

/// Write-once container for externalized tensor payloads.
///
/// Append-only during a single conversion, keyed by record key, handed
/// unchanged to the packager. Records keep insertion order.
#[derive(Debug, Default)]
pub struct ExternalTensorStore {
    records: Vec<ConstantRecord>,
    index: HashMap<String, usize>,
}

impl ExternalTensorStore {
    pub fn new() -> ExternalTensorStore {
        ExternalTensorStore::default()
    }

    pub fn insert(&mut self, record: ConstantRecord) -> Result<()> {
        if self.index.contains_key(&record.key) {
            return Err(Error::Malformed(format!(
                "duplicate external tensor key `{}'",
                record.key
            )));
        }
        self.index.insert(record.key.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ConstantRecord> {
        self.index.get(key).map(|ix| &self.records[*ix])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstantRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
