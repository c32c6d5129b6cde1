//! Entity and field names known for a set of databases.

use crate::io::{EntityKind, EntityName};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Names seen for one entity kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSchema {
    pub entities: BTreeSet<EntityName>,
    pub fields: BTreeSet<String>,
}

/// Entity and field names per kind.
///
/// Merging is a set union, so merging the schemas of every shard in any order
/// produces the same result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    kinds: BTreeMap<EntityKind, KindSchema>,
}

impl EntitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entity(&mut self, kind: EntityKind, name: EntityName) {
        self.kinds.entry(kind).or_default().entities.insert(name);
    }

    pub fn insert_fields<I>(&mut self, kind: EntityKind, fields: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.kinds.entry(kind).or_default().fields.extend(fields);
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: EntitySchema) {
        for (kind, schema) in other.kinds {
            let mine = self.kinds.entry(kind).or_default();
            mine.entities.extend(schema.entities);
            mine.fields.extend(schema.fields);
        }
    }

    /// Entities of `kind`, ordered by id then name.
    pub fn entities(&self, kind: EntityKind) -> impl Iterator<Item = &EntityName> {
        self.kinds.get(&kind).into_iter().flat_map(|k| k.entities.iter())
    }

    pub fn fields(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.kinds
            .get(&kind)
            .into_iter()
            .flat_map(|k| k.fields.iter().map(String::as_str))
    }

    pub fn contains_entity(&self, kind: EntityKind, name: &str) -> bool {
        self.entities(kind).any(|e| e.name == name)
    }

    /// `true` when every entity of `self` is also in `other`.
    pub fn entities_subset_of(&self, other: &EntitySchema) -> bool {
        self.kinds.iter().all(|(kind, schema)| {
            schema.entities.is_empty()
                || other
                    .kinds
                    .get(kind)
                    .is_some_and(|o| schema.entities.is_subset(&o.entities))
        })
    }

    pub fn entity_count(&self) -> usize {
        self.kinds.values().map(|k| k.entities.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds
            .values()
            .all(|k| k.entities.is_empty() && k.fields.is_empty())
    }

    pub(crate) fn log_summary(&self) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        for (kind, schema) in &self.kinds {
            log::trace!(
                "{kind}: {} entities, fields [{}]",
                schema.entities.len(),
                schema.fields.iter().join(", ")
            );
        }
    }
}

/// Flattened dataset index of every entity except node blocks.
///
/// Kinds are walked in [`EntityKind::ALL`] order and entities in id-then-name
/// order, numbering consecutively from zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIndexMap {
    indices: BTreeMap<(EntityKind, String), usize>,
}

impl DatasetIndexMap {
    pub fn build(schema: &EntitySchema) -> Self {
        let indices = EntityKind::ALL
            .iter()
            .filter(|&&k| k != EntityKind::NodeBlock)
            .flat_map(|&kind| schema.entities(kind).map(move |e| (kind, e.name.clone())))
            .enumerate()
            .map(|(idx, key)| (key, idx))
            .collect();
        Self { indices }
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<usize> {
        self.indices.get(&(kind, name.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
