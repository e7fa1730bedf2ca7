//! Collection schemas: each field's CRDT kind, declared once.

use mcrs_core::CrdtKind;
use std::collections::BTreeMap;

/// A named collection and the CRDT kind of each of its fields.
///
/// The kind is selected when the schema is defined and never changes for
/// the life of the field; every replica merging a field sees the same
/// declared kind.
#[derive(Clone, Debug)]
pub struct CollectionSchema {
    name: String,
    fields: BTreeMap<String, CrdtKind>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionSchema {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: CrdtKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_of(&self, field: &str) -> Option<CrdtKind> {
        self.fields.get(field).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, CrdtKind)> {
        self.fields.iter().map(|(name, kind)| (name, *kind))
    }
}
