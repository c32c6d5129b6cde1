//! In-memory region descriptions.
//!
//! A [`RegionDescription`] is a plain, serde-friendly summary of one physical
//! file: its format, time axis, entities with their fields, and assemblies.
//! [`MemoryRegionSource`] serves such descriptions keyed by physical file name.

use crate::io::{
    AssemblyRecord, DatabaseFormat, EntityKind, EntityName, OpenRequest, Region, RegionSource,
};
use crate::mesh_error::MeshDbError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One block or set of a described region.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
    /// When set, listing this entity's fields fails with the given reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<String>,
}

impl EntityDescription {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_fields<I, T>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Summary of a physical file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionDescription {
    #[serde(default)]
    pub format: DatabaseFormat,
    /// `(state index, time)` pairs.
    #[serde(default)]
    pub times: Vec<(i32, f64)>,
    #[serde(default)]
    pub entities: BTreeMap<EntityKind, Vec<EntityDescription>>,
    #[serde(default)]
    pub assemblies: Vec<AssemblyRecord>,
}

impl RegionDescription {
    pub fn new(format: DatabaseFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Set the time axis from plain values, numbering states from 1.
    pub fn with_times(mut self, times: &[f64]) -> Self {
        self.times = times
            .iter()
            .enumerate()
            .map(|(i, &t)| (i as i32 + 1, t))
            .collect();
        self
    }

    pub fn with_entity(mut self, kind: EntityKind, entity: EntityDescription) -> Self {
        self.entities.entry(kind).or_default().push(entity);
        self
    }

    pub fn with_assembly(mut self, assembly: AssemblyRecord) -> Self {
        self.assemblies.push(assembly);
        self
    }
}

/// A [`Region`] backed by a [`RegionDescription`].
#[derive(Clone, Debug)]
pub struct DescribedRegion {
    file_name: String,
    description: RegionDescription,
    open: bool,
}

impl DescribedRegion {
    pub fn new(file_name: impl Into<String>, description: RegionDescription) -> Self {
        Self {
            file_name: file_name.into(),
            description,
            open: true,
        }
    }

    /// Whether the region still holds its (simulated) descriptor.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Region for DescribedRegion {
    fn format(&self) -> DatabaseFormat {
        self.description.format
    }

    fn timeline(&self) -> Result<Vec<(i32, f64)>, MeshDbError> {
        Ok(self.description.times.clone())
    }

    fn entity_names(&self, kind: EntityKind) -> Vec<EntityName> {
        self.description
            .entities
            .get(&kind)
            .map(|list| {
                list.iter()
                    .map(|e| EntityName::new(e.id, e.name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn field_names(&self, kind: EntityKind, name: &str) -> Result<Option<Vec<String>>, MeshDbError> {
        let Some(entity) = self
            .description
            .entities
            .get(&kind)
            .and_then(|list| list.iter().find(|e| e.name == name))
        else {
            return Ok(None);
        };
        match &entity.malformed {
            Some(reason) => Err(MeshDbError::EntityRead {
                kind,
                entity: name.to_string(),
                file: self.file_name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(Some(entity.fields.clone())),
        }
    }

    fn assemblies(&self) -> Vec<AssemblyRecord> {
        self.description.assemblies.clone()
    }

    fn release_handles(&mut self) {
        self.open = false;
    }
}

/// Serves [`RegionDescription`]s keyed by physical file name.
///
/// Records every successful open so callers can check which ranks touched
/// which files.
#[derive(Clone, Debug, Default)]
pub struct MemoryRegionSource {
    files: HashMap<String, RegionDescription>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MemoryRegionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file_name: impl Into<String>, description: RegionDescription) -> Self {
        self.insert(file_name, description);
        self
    }

    pub fn insert(&mut self, file_name: impl Into<String>, description: RegionDescription) {
        self.files.insert(file_name.into(), description);
    }

    /// Physical file names known to this source, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Files opened so far, in open order (repeats included).
    pub fn opened_files(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl RegionSource for MemoryRegionSource {
    type Region = DescribedRegion;

    fn open(&self, request: &OpenRequest) -> Result<DescribedRegion, MeshDbError> {
        let description =
            self.files
                .get(&request.file_name)
                .ok_or_else(|| MeshDbError::OpenFailed {
                    file: request.file_name.clone(),
                    reason: "no such file".into(),
                })?;
        self.opened.lock().push(request.file_name.clone());
        Ok(DescribedRegion::new(
            request.file_name.clone(),
            description.clone(),
        ))
    }
}
