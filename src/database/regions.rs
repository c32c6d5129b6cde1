//! Open regions, keyed by `(database, rank)`.
//!
//! Opening a file is expensive and file descriptors are bounded, so the map
//! separates two kinds of release: [`RegionMap::release_handles`] closes
//! descriptors but keeps every region's metadata, while
//! [`RegionMap::release_regions`] drops the regions altogether.

use crate::database::registry::{DatabaseHandle, DatabaseRegistry};
use crate::io::{DatabaseFormat, OpenRequest, PartitionSlot, PropertyValue, RegionSource};
use crate::mesh_error::MeshDbError;
use std::collections::BTreeMap;

/// Properties every open request carries before user properties are applied.
pub fn default_properties(partition: Option<PartitionSlot>) -> BTreeMap<String, PropertyValue> {
    let mut props = BTreeMap::new();
    if let Some(slot) = partition {
        props.insert("my_processor".into(), PropertyValue::Int(slot.rank as i64));
        props.insert(
            "processor_count".into(),
            PropertyValue::Int(slot.process_count as i64),
        );
    }
    // read every block, even empty ones, so one file can describe the schema
    props.insert("RETAIN_EMPTY_BLOCKS".into(), "on".into());
    props.insert("FIELD_STRIP_TRAILING_UNDERSCORE".into(), "on".into());
    props.insert("LOWER_CASE_VARIABLE_NAMES".into(), "off".into());
    let rank0 = partition.map_or(true, |s| s.rank == 0);
    props.insert(
        "EXODUS_CALL_GET_ALL_TIMES".into(),
        if rank0 { "on" } else { "off" }.into(),
    );
    props.insert("SURFACE_SPLIT_TYPE".into(), "BLOCK".into());
    props
}

/// Cache of opened regions plus the detected database format.
pub struct RegionMap<S: RegionSource> {
    source: S,
    regions: BTreeMap<(String, u32), S::Region>,
    format: DatabaseFormat,
    type_override: Option<String>,
    user_properties: BTreeMap<String, PropertyValue>,
}

impl<S: RegionSource> RegionMap<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            regions: BTreeMap::new(),
            format: DatabaseFormat::Unknown,
            type_override: None,
            user_properties: BTreeMap::new(),
        }
    }

    /// Set the format override and user properties for future opens.
    pub fn configure(
        &mut self,
        type_override: Option<String>,
        user_properties: BTreeMap<String, PropertyValue>,
    ) {
        self.type_override = type_override;
        self.user_properties = user_properties;
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Format detected from the regions opened so far.
    pub fn format(&self) -> DatabaseFormat {
        self.format
    }

    pub fn set_format(&mut self, format: DatabaseFormat) {
        self.format = format;
    }

    /// Number of regions currently held.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Build the open request for `database`/`file_index`.
    pub fn open_request(
        &self,
        registry: &DatabaseRegistry,
        handle: &DatabaseHandle,
    ) -> Result<OpenRequest, MeshDbError> {
        let info = registry
            .get(&handle.database)
            .ok_or_else(|| MeshDbError::UnknownDatabase(handle.database.clone()))?;
        let rank = registry.file_rank(handle)?;
        let partition = info.is_partitioned().then_some(PartitionSlot {
            rank,
            process_count: info.process_count,
        });
        let mut properties = default_properties(partition);
        for (k, v) in &self.user_properties {
            properties.insert(k.clone(), v.clone());
        }
        let format_type = self
            .type_override
            .clone()
            .unwrap_or_else(|| DatabaseFormat::detect(&handle.database).type_name().to_string());
        Ok(OpenRequest {
            database: handle.database.clone(),
            file_name: registry.raw_file_name(handle, false)?,
            partition,
            format_type,
            properties,
        })
    }

    /// Region behind `handle`, opening it on first use.
    pub fn region(
        &mut self,
        registry: &DatabaseRegistry,
        handle: &DatabaseHandle,
    ) -> Result<&mut S::Region, MeshDbError> {
        let rank = registry.file_rank(handle)?;
        let key = (handle.database.clone(), rank);
        if !self.regions.contains_key(&key) {
            let region = self.open(registry, handle)?;
            self.regions.insert(key.clone(), region);
        }
        self.regions
            .get_mut(&key)
            .ok_or_else(|| MeshDbError::BadDatabaseHandle {
                database: handle.database.clone(),
                file_index: handle.file_index,
            })
    }

    fn open(
        &mut self,
        registry: &DatabaseRegistry,
        handle: &DatabaseHandle,
    ) -> Result<S::Region, MeshDbError> {
        let request = self.open_request(registry, handle)?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("opening '{}' as {}", request.file_name, request.format_type);
            for (k, v) in &request.properties {
                log::trace!("  {k} : {v}");
            }
        }
        let region = self.source.open(&request).map_err(|e| match e {
            e @ MeshDbError::OpenFailed { .. } => e,
            other => MeshDbError::OpenFailed {
                file: request.file_name.clone(),
                reason: other.to_string(),
            },
        })?;
        let found = crate::io::Region::format(&region);
        if self.format != DatabaseFormat::Unknown && found != self.format {
            return Err(MeshDbError::FormatMismatch {
                file: request.file_name,
                expected: self.format,
                found,
            });
        }
        self.format = found;
        Ok(region)
    }

    /// Close descriptors of every region, keeping metadata.
    pub fn release_handles(&mut self) {
        for region in self.regions.values_mut() {
            crate::io::Region::release_handles(region);
        }
    }

    /// Drop every region.
    pub fn release_regions(&mut self) {
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{MemoryRegionSource, RegionDescription};

    fn source() -> MemoryRegionSource {
        MemoryRegionSource::new()
            .with_file("m.e.2.0", RegionDescription::new(DatabaseFormat::Exodus))
            .with_file("m.e.2.1", RegionDescription::new(DatabaseFormat::Exodus))
            .with_file("c.cgns", RegionDescription::new(DatabaseFormat::Cgns))
    }

    #[test]
    fn default_properties_mark_rank_zero_for_times() {
        let p0 = default_properties(Some(PartitionSlot { rank: 0, process_count: 2 }));
        let p1 = default_properties(Some(PartitionSlot { rank: 1, process_count: 2 }));
        assert_eq!(p0["EXODUS_CALL_GET_ALL_TIMES"], PropertyValue::from("on"));
        assert_eq!(p1["EXODUS_CALL_GET_ALL_TIMES"], PropertyValue::from("off"));
        assert_eq!(p1["my_processor"], PropertyValue::Int(1));
        assert!(!default_properties(None).contains_key("processor_count"));
    }

    #[test]
    fn regions_are_opened_once() {
        let reg = DatabaseRegistry::from_file_names(["m.e.2.0", "m.e.2.1"]).unwrap();
        let src = source();
        let mut map = RegionMap::new(&src);
        let h = DatabaseHandle::new("m.e", 1);
        map.region(&reg, &h).unwrap();
        map.region(&reg, &h).unwrap();
        assert_eq!(src.open_count(), 1);
        assert_eq!(map.format(), DatabaseFormat::Exodus);
        map.release_handles();
        assert_eq!(map.len(), 1);
        map.release_regions();
        assert!(map.is_empty());
    }

    #[test]
    fn user_properties_override_defaults() {
        let reg = DatabaseRegistry::from_file_names(["m.e.2.0"]).unwrap();
        let mut map = RegionMap::new(source());
        let mut user = BTreeMap::new();
        user.insert("SURFACE_SPLIT_TYPE".to_string(), PropertyValue::from("TOPOLOGY"));
        map.configure(Some("exodusII".into()), user);
        let req = map.open_request(&reg, &DatabaseHandle::new("m.e", 0)).unwrap();
        assert_eq!(req.file_name, "m.e.2.0");
        assert_eq!(req.properties["SURFACE_SPLIT_TYPE"], PropertyValue::from("TOPOLOGY"));
        assert_eq!(req.partition, Some(PartitionSlot { rank: 0, process_count: 2 }));
    }

    #[test]
    fn format_mismatch_is_fatal() {
        let reg = DatabaseRegistry::from_file_names(["m.e.2.0", "c.cgns"]).unwrap();
        let mut map = RegionMap::new(source());
        map.region(&reg, &DatabaseHandle::new("m.e", 0)).unwrap();
        let err = map.region(&reg, &DatabaseHandle::new("c.cgns", 0)).map(|_| ()).unwrap_err();
        assert!(matches!(err, MeshDbError::FormatMismatch { .. }));
        assert_eq!(map.len(), 1);
        assert!(map.region(&reg, &DatabaseHandle::new("m.e", 0)).is_ok());
    }

    #[test]
    fn missing_file_reports_raw_name() {
        let reg = DatabaseRegistry::from_file_names(["gone.e.2.1"]).unwrap();
        let mut map = RegionMap::new(source());
        let err = map.region(&reg, &DatabaseHandle::new("gone.e", 0)).map(|_| ()).unwrap_err();
        assert!(err.to_string().contains("gone.e.2.1"));
    }
}
