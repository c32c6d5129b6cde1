//! Collaborator interfaces for opening physical mesh files.
//!
//! The reader layer never decodes a file format itself. It talks to a
//! [`RegionSource`] that opens one physical file and returns a [`Region`]
//! describing its time axis, blocks/sets, fields and assemblies. Two sources
//! ship with the crate: [`memory::MemoryRegionSource`] for embedders and tests,
//! and [`json::JsonRegionSource`] which reads JSON region descriptions from disk.

pub mod json;
pub mod memory;

use crate::mesh_error::MeshDbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a block or set inside a database.
///
/// The declaration order is the canonical iteration order used for dataset
/// indices and schema exchange.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    NodeBlock,
    EdgeBlock,
    FaceBlock,
    ElementBlock,
    StructuredBlock,
    NodeSet,
    EdgeSet,
    FaceSet,
    ElementSet,
    SideSet,
}

impl EntityKind {
    /// All kinds in canonical order.
    pub const ALL: [EntityKind; 10] = [
        EntityKind::NodeBlock,
        EntityKind::EdgeBlock,
        EntityKind::FaceBlock,
        EntityKind::ElementBlock,
        EntityKind::StructuredBlock,
        EntityKind::NodeSet,
        EntityKind::EdgeSet,
        EntityKind::FaceSet,
        EntityKind::ElementSet,
        EntityKind::SideSet,
    ];

    /// Number of entity kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// Position of this kind in [`EntityKind::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// `true` for blocks, `false` for sets.
    pub fn is_block(self) -> bool {
        matches!(
            self,
            EntityKind::NodeBlock
                | EntityKind::EdgeBlock
                | EntityKind::FaceBlock
                | EntityKind::ElementBlock
                | EntityKind::StructuredBlock
        )
    }

    /// Short identifier used in entity paths and log messages.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::NodeBlock => "node_block",
            EntityKind::EdgeBlock => "edge_block",
            EntityKind::FaceBlock => "face_block",
            EntityKind::ElementBlock => "element_block",
            EntityKind::StructuredBlock => "structured_block",
            EntityKind::NodeSet => "node_set",
            EntityKind::EdgeSet => "edge_set",
            EntityKind::FaceSet => "face_set",
            EntityKind::ElementSet => "element_set",
            EntityKind::SideSet => "side_set",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a block or set: ordered by `id`, then `name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityName {
    pub id: u64,
    pub name: String,
}

impl EntityName {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// File format family of a database.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseFormat {
    #[default]
    Unknown,
    Exodus,
    Cgns,
    Catalyst,
}

impl DatabaseFormat {
    /// Guess the format from a database name.
    pub fn detect(name: &str) -> Self {
        let file = std::path::Path::new(name)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(name);
        if file.starts_with("catalyst.bin") {
            DatabaseFormat::Catalyst
        } else if file.to_ascii_lowercase().contains(".cgns") {
            DatabaseFormat::Cgns
        } else {
            DatabaseFormat::Exodus
        }
    }

    /// Type string handed to the open primitive.
    pub fn type_name(self) -> &'static str {
        match self {
            DatabaseFormat::Cgns => "cgns",
            DatabaseFormat::Catalyst => "catalyst",
            DatabaseFormat::Exodus | DatabaseFormat::Unknown => "exodusII",
        }
    }

    /// Wire encoding used when the format tag is broadcast.
    pub fn to_wire(self) -> u32 {
        match self {
            DatabaseFormat::Unknown => 0,
            DatabaseFormat::Exodus => 1,
            DatabaseFormat::Cgns => 2,
            DatabaseFormat::Catalyst => 3,
        }
    }

    pub fn from_wire(w: u32) -> Self {
        match w {
            1 => DatabaseFormat::Exodus,
            2 => DatabaseFormat::Cgns,
            3 => DatabaseFormat::Catalyst,
            _ => DatabaseFormat::Unknown,
        }
    }
}

/// Free-form property value forwarded to the open primitive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Real(f64),
    Str(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Real(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

/// Spatial partition slot of one physical file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartitionSlot {
    pub rank: u32,
    pub process_count: u32,
}

/// Everything the open primitive needs to open one physical file.
#[derive(Clone, Debug)]
pub struct OpenRequest {
    /// Logical database name (partition suffix stripped).
    pub database: String,
    /// Physical file name, with partition suffix when partitioned.
    pub file_name: String,
    /// `None` for unpartitioned databases.
    pub partition: Option<PartitionSlot>,
    /// Type string (`exodusII`, `cgns`, `catalyst`, or a user override).
    pub format_type: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// One member of a format-level assembly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyMember {
    /// A nested assembly, by name.
    Assembly(String),
    /// A block or set, by kind and name.
    Entity(EntityKind, String),
}

/// A flat assembly record as reported by a region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyRecord {
    pub name: String,
    #[serde(default)]
    pub members: Vec<AssemblyMember>,
}

/// An opened physical file.
pub trait Region {
    /// Format family the file belongs to.
    fn format(&self) -> DatabaseFormat;

    /// `(state index, time value)` pairs of the file's time axis.
    fn timeline(&self) -> Result<Vec<(i32, f64)>, MeshDbError>;

    /// Names of all blocks/sets of `kind` present in this file.
    fn entity_names(&self, kind: EntityKind) -> Vec<EntityName>;

    /// Field names defined on one entity.
    ///
    /// `Ok(None)` means the entity is not present in this file.
    fn field_names(&self, kind: EntityKind, name: &str) -> Result<Option<Vec<String>>, MeshDbError>;

    /// Assemblies in reporting order.
    fn assemblies(&self) -> Vec<AssemblyRecord> {
        Vec::new()
    }

    /// Close underlying descriptors while keeping metadata.
    fn release_handles(&mut self) {}
}

/// The "open database" primitive.
pub trait RegionSource {
    type Region: Region;

    fn open(&self, request: &OpenRequest) -> Result<Self::Region, MeshDbError>;
}

impl<S: RegionSource + ?Sized> RegionSource for &S {
    type Region = S::Region;

    fn open(&self, request: &OpenRequest) -> Result<Self::Region, MeshDbError> {
        (**self).open(request)
    }
}
