//! User-facing entity and field selections.

use crate::io::EntityKind;
use crate::metadata::schema::EntitySchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type NameStates = BTreeMap<String, bool>;

/// Enabled/disabled state of every known entity and field, per kind.
///
/// Names discovered by a schema refresh are added with their default state
/// (blocks enabled, sets disabled); names already present keep whatever the
/// user chose.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selections {
    entities: BTreeMap<EntityKind, NameStates>,
    fields: BTreeMap<EntityKind, NameStates>,
    entity_ids: BTreeMap<EntityKind, BTreeMap<String, u64>>,
}

impl Selections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every name of `schema` not seen before.
    pub fn update_from_schema(&mut self, schema: &EntitySchema) {
        for kind in EntityKind::ALL {
            let default = kind.is_block();
            for entity in schema.entities(kind) {
                self.entities
                    .entry(kind)
                    .or_default()
                    .entry(entity.name.clone())
                    .or_insert(default);
                if entity.id != 0 {
                    self.entity_ids
                        .entry(kind)
                        .or_default()
                        .insert(entity.name.clone(), entity.id);
                }
            }
            for field in schema.fields(kind) {
                self.fields
                    .entry(kind)
                    .or_default()
                    .entry(field.to_string())
                    .or_insert(default);
            }
        }
    }

    pub fn set_entity_enabled(&mut self, kind: EntityKind, name: &str, enabled: bool) {
        self.entities
            .entry(kind)
            .or_default()
            .insert(name.to_string(), enabled);
    }

    pub fn entity_enabled(&self, kind: EntityKind, name: &str) -> bool {
        lookup(&self.entities, kind, name)
    }

    /// Enabled entities of `kind`, in name order.
    pub fn enabled_entities(&self, kind: EntityKind) -> Vec<String> {
        enabled(&self.entities, kind)
    }

    pub fn set_field_enabled(&mut self, kind: EntityKind, name: &str, enabled: bool) {
        self.fields
            .entry(kind)
            .or_default()
            .insert(name.to_string(), enabled);
    }

    pub fn field_enabled(&self, kind: EntityKind, name: &str) -> bool {
        lookup(&self.fields, kind, name)
    }

    pub fn enabled_fields(&self, kind: EntityKind) -> Vec<String> {
        enabled(&self.fields, kind)
    }

    /// Non-zero id reported for an entity.
    pub fn entity_id(&self, kind: EntityKind, name: &str) -> Option<u64> {
        self.entity_ids.get(&kind)?.get(name).copied()
    }

    /// Entity name → id map for one kind.
    pub fn entity_id_map(&self, kind: EntityKind) -> Option<&BTreeMap<String, u64>> {
        self.entity_ids.get(&kind)
    }
}

fn lookup(map: &BTreeMap<EntityKind, NameStates>, kind: EntityKind, name: &str) -> bool {
    map.get(&kind)
        .and_then(|m| m.get(name))
        .copied()
        .unwrap_or(false)
}

fn enabled(map: &BTreeMap<EntityKind, NameStates>, kind: EntityKind) -> Vec<String> {
    map.get(&kind)
        .map(|m| {
            m.iter()
                .filter(|(_, on)| **on)
                .map(|(n, _)| n.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::EntityName;

    fn schema() -> EntitySchema {
        let mut s = EntitySchema::new();
        s.insert_entity(EntityKind::ElementBlock, EntityName::new(10, "block_1"));
        s.insert_entity(EntityKind::ElementBlock, EntityName::new(0, "unnamed"));
        s.insert_entity(EntityKind::SideSet, EntityName::new(4, "wall"));
        s.insert_fields(EntityKind::ElementBlock, ["vonmises".to_string()]);
        s.insert_fields(EntityKind::SideSet, ["pressure".to_string()]);
        s
    }

    #[test]
    fn blocks_default_on_sets_default_off() {
        let mut sel = Selections::new();
        sel.update_from_schema(&schema());
        assert_eq!(sel.enabled_entities(EntityKind::ElementBlock), vec!["block_1", "unnamed"]);
        assert!(!sel.entity_enabled(EntityKind::SideSet, "wall"));
        assert!(sel.field_enabled(EntityKind::ElementBlock, "vonmises"));
        assert!(!sel.field_enabled(EntityKind::SideSet, "pressure"));
    }

    #[test]
    fn user_choices_survive_refresh() {
        let mut sel = Selections::new();
        sel.update_from_schema(&schema());
        sel.set_entity_enabled(EntityKind::ElementBlock, "block_1", false);
        sel.set_entity_enabled(EntityKind::SideSet, "wall", true);
        sel.update_from_schema(&schema());
        assert!(!sel.entity_enabled(EntityKind::ElementBlock, "block_1"));
        assert!(sel.entity_enabled(EntityKind::SideSet, "wall"));
    }

    #[test]
    fn only_nonzero_ids_are_mapped() {
        let mut sel = Selections::new();
        sel.update_from_schema(&schema());
        assert_eq!(sel.entity_id(EntityKind::ElementBlock, "block_1"), Some(10));
        assert_eq!(sel.entity_id(EntityKind::ElementBlock, "unnamed"), None);
        assert_eq!(sel.entity_id_map(EntityKind::SideSet).map(|m| m.len()), Some(1));
    }
}
