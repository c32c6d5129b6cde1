//! Global schema: entity and field names, selections and dataset indices.

pub mod schema;
pub mod selection;
pub mod sync;

pub use schema::{DatasetIndexMap, EntitySchema, KindSchema};
pub use selection::Selections;
pub use sync::{SyncedSchema, needs_schema_refresh, synchronize};
