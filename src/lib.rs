#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-dbreader
//!
//! mesh-dbreader is the parallel reader layer for multi-file scientific mesh
//! databases. It discovers which physical files form one logical database
//! (spatial partitions `<base>.<processCount>.<rank>`, restarts `-s.<n>`),
//! decides which files each rank opens for a given timestep, keeps the
//! block/set/field schema identical on every rank, and caches derived
//! per-entity artifacts across timesteps.
//!
//! ## Features
//! - Filename classification, rank subsets and contiguous file assignment
//! - Restart timelines merged into one global time axis, with a
//!   "later restart wins" rule for overlapping states
//! - Schema synchronization by all-gather, so blocks present on only some
//!   partitions are still visible everywhere
//! - Mark-and-sweep artifact cache keyed by stable entity paths
//! - Assembly trees rebuilt from flat format-level groupings
//! - Pluggable communication backends (serial, in-process, MPI)
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-dbreader = "0.1"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! File decoding is delegated to a [`io::RegionSource`]. The crate ships an
//! in-memory source and a JSON source; real formats plug in by implementing
//! [`io::Region`].
//!
//! ## Collectives
//! [`reader::MeshDbReader::update_information`] and
//! [`reader::MeshDbReader::read_pass`] are collective: every rank must call
//! them in the same order. Failures on one rank are reported on all ranks.

pub mod algs;
pub mod assembly;
pub mod cache;
pub mod config;
pub mod database;
pub mod io;
pub mod mesh_error;
pub mod metadata;
pub mod reader;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::collective::Collective;
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::assembly::DataAssembly;
    pub use crate::cache::{Artifact, ArtifactCache, EntityPath};
    pub use crate::config::ReaderOptions;
    pub use crate::database::{DatabaseHandle, DatabaseRegistry, FileSubset, Timeline};
    pub use crate::io::json::JsonRegionSource;
    pub use crate::io::memory::{EntityDescription, MemoryRegionSource, RegionDescription};
    pub use crate::io::{DatabaseFormat, EntityKind, EntityName, Region, RegionSource};
    pub use crate::mesh_error::MeshDbError;
    pub use crate::metadata::{EntitySchema, Selections};
    pub use crate::reader::{DatabaseSnapshot, EntityRequest, MeshDbReader, PassSummary};
}
