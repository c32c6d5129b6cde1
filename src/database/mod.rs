//! Discovery of logical databases and resolution of timesteps to files.

pub mod filename;
pub mod regions;
pub mod registry;
pub mod scanner;
pub mod timeline;

pub use regions::RegionMap;
pub use registry::{DatabaseHandle, DatabaseRegistry, FileSubset, PartitionInfo};
pub use timeline::Timeline;
