//! JSON region reader/writer.
//!
//! Each physical file is a JSON document holding a [`RegionDescription`].
//! Partitioned and restarted databases use the regular naming scheme
//! (`run.json-s.0002.4.1`), so this source is a convenient stand-in for a
//! real binary format when driving the reader end to end.

use crate::io::memory::{DescribedRegion, RegionDescription};
use crate::io::{OpenRequest, RegionSource};
use crate::mesh_error::MeshDbError;
use std::fs;
use std::path::Path;

/// Opens JSON region descriptions from disk.
#[derive(Debug, Default, Clone)]
pub struct JsonRegionSource;

/// Writes JSON region descriptions.
#[derive(Debug, Default, Clone)]
pub struct JsonRegionWriter;

impl JsonRegionSource {
    /// Parse a description from a JSON string.
    pub fn parse(file: &str, contents: &str) -> Result<RegionDescription, MeshDbError> {
        serde_json::from_str(contents).map_err(|e| MeshDbError::Parse {
            file: file.to_string(),
            reason: e.to_string(),
        })
    }
}

impl RegionSource for JsonRegionSource {
    type Region = DescribedRegion;

    fn open(&self, request: &OpenRequest) -> Result<DescribedRegion, MeshDbError> {
        let contents = fs::read_to_string(&request.file_name).map_err(|e| MeshDbError::OpenFailed {
            file: request.file_name.clone(),
            reason: e.to_string(),
        })?;
        let description =
            Self::parse(&request.file_name, &contents).map_err(|e| MeshDbError::OpenFailed {
                file: request.file_name.clone(),
                reason: e.to_string(),
            })?;
        log::trace!(
            "opened '{}' as {} ({} states)",
            request.file_name,
            request.format_type,
            description.times.len()
        );
        Ok(DescribedRegion::new(request.file_name.clone(), description))
    }
}

impl JsonRegionWriter {
    pub fn write(&self, path: impl AsRef<Path>, description: &RegionDescription) -> Result<(), MeshDbError> {
        let bytes = serde_json::to_vec_pretty(description)
            .map_err(|e| MeshDbError::Serialization(e.to_string()))?;
        fs::write(path, bytes)?;
        Ok(())
    }
}
