//! Records - attribute maps with association slots filled in place by the preloader

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::schema::AttributeSet;

/// Shared handle to a record; several owners may point at the same target
pub type RecordRef = Arc<RwLock<Record>>;

/// Loaded target(s) of one association
#[derive(Debug, Clone)]
pub enum Association {
    One(Option<RecordRef>),
    Many(Vec<RecordRef>),
}

impl Association {
    pub fn records(&self) -> Vec<RecordRef> {
        match self {
            Association::One(record) => record.iter().cloned().collect(),
            Association::Many(records) => records.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Association::One(record) => usize::from(record.is_some()),
            Association::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    model: String,
    attributes: Map<String, Value>,
    associations: HashMap<String, Association>,
}

impl Record {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            attributes: Map::new(),
            associations: HashMap::new(),
        }
    }

    pub fn from_attributes(model: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            model: model.into(),
            attributes,
            associations: HashMap::new(),
        }
    }

    pub fn from_attribute_set(set: AttributeSet) -> Self {
        let model = set.model().to_string();
        Self::from_attributes(model, set.into_map())
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn into_ref(self) -> RecordRef {
        Arc::new(RwLock::new(self))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attribute value, `Null` when absent
    pub fn attribute(&self, name: &str) -> Value {
        self.attributes.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn is_loaded(&self, association: &str) -> bool {
        self.associations.contains_key(association)
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.get(name)
    }

    pub fn set_association(&mut self, name: impl Into<String>, association: Association) {
        self.associations.insert(name.into(), association);
    }

    pub fn reset_association(&mut self, name: &str) {
        self.associations.remove(name);
    }

    /// Loaded targets of `name`; empty when not loaded
    pub fn targets(&self, name: &str) -> Vec<RecordRef> {
        self.associations
            .get(name)
            .map(Association::records)
            .unwrap_or_default()
    }
}

/// Remove repeated handles (by identity) keeping first occurrences
pub(crate) fn dedup_refs(records: impl IntoIterator<Item = RecordRef>) -> Vec<RecordRef> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(Arc::as_ptr(record) as usize))
        .collect()
}
