//! Reader configuration.

use crate::database::registry::FileSubset;
use crate::io::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options controlling how a database is discovered and read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Half-open rank range `[start, end)` to read; `None` reads every rank.
    pub file_range: Option<(i32, i32)>,
    /// Stride within `file_range`.
    pub file_stride: i32,
    /// Scan every file for blocks/sets instead of trusting the first one.
    pub read_all_files_to_determine_structure: bool,
    /// Keep artifacts across timesteps.
    pub caching: bool,
    /// Add restart and partition files found next to the given ones.
    pub scan_for_related_files: bool,
    /// Force the format type string passed to the open primitive.
    pub database_type_override: Option<String>,
    /// Extra properties forwarded to every open request.
    pub database_properties: BTreeMap<String, PropertyValue>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            file_range: None,
            file_stride: 1,
            read_all_files_to_determine_structure: true,
            caching: true,
            scan_for_related_files: false,
            database_type_override: None,
            database_properties: BTreeMap::new(),
        }
    }
}

impl ReaderOptions {
    /// Rank subset implied by `file_range` and `file_stride`.
    pub fn file_subset(&self) -> Option<FileSubset> {
        self.file_range
            .map(|(start, end)| FileSubset::new(start, end, self.file_stride))
            .filter(FileSubset::is_active)
    }
}
