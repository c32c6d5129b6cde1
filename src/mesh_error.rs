//! MeshDbError: Unified error type for mesh-dbreader public APIs
//!
//! Fatal conditions (unopenable databases, inconsistent naming, missing
//! timesteps, failed collectives) are returned as errors and unwind the whole
//! update. Per-entity problems are reported with [`MeshDbError::EntityRead`]
//! and are expected to be logged and skipped by the caller.

use crate::io::EntityKind;
use thiserror::Error;

/// Unified error type for mesh-dbreader operations.
#[derive(Debug, Error)]
pub enum MeshDbError {
    /// Two filenames share a base but disagree on the processor count.
    #[error(
        "Filenames specified use inconsistent naming schemes. '{file}' has incorrect processor-count ({found}), '{expected}' was expected."
    )]
    InconsistentProcessorCount {
        file: String,
        found: u32,
        expected: u32,
    },
    /// No filename was supplied (or the meta-file expanded to nothing).
    #[error("No filename specified.")]
    NoFileNames,
    /// Every database was filtered out by the rank subset.
    #[error("No databases left to read after applying file range {start}..{end} (stride {stride})")]
    NoDatabases { start: i32, end: i32, stride: i32 },
    /// A database name that is not part of the current registry.
    #[error("Unknown database '{0}'")]
    UnknownDatabase(String),
    /// A handle whose file index does not address a file of its database.
    #[error("bad database handle: '{database}' has no file index {file_index}")]
    BadDatabaseHandle { database: String, file_index: usize },
    /// The open primitive failed for a physical file.
    #[error("Failed to open database {file}: {reason}")]
    OpenFailed { file: String, reason: String },
    /// A region reported a format different from the one already detected.
    #[error("Format mismatch! expected {expected:?} but '{file}' reports {found:?}")]
    FormatMismatch {
        file: String,
        expected: crate::io::DatabaseFormat,
        found: crate::io::DatabaseFormat,
    },
    /// No database carries the time value selected by a timestep index.
    #[error("No database provides a state for time {time} (timestep {timestep})")]
    NoMatchingTimestep { timestep: usize, time: f64 },
    /// Timestep index outside the global time axis.
    #[error("Timestep {timestep} is out of range ({count} timesteps available)")]
    TimestepOutOfRange { timestep: i64, count: usize },
    /// A single block or set could not be read; recoverable.
    #[error("Error reading {kind:?} '{entity}' from '{file}': {reason}")]
    EntityRead {
        kind: EntityKind,
        entity: String,
        file: String,
        reason: String,
    },
    /// None of the files of a database could be opened on any rank.
    #[error("Unable to open any file of database '{0}'")]
    DatabaseUnreadable(String),
    /// Point-to-point transport failure with a specific rank.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A received buffer did not have the announced length.
    #[error("Buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// A collective step failed on some participating rank.
    #[error("Collective operation rooted at rank {root} failed on at least one rank")]
    CollectiveFailed { root: usize },
    /// Ranks issued diverging collective call sequences.
    #[error(
        "Collective call mismatch with rank {neighbor}: expected {expected_kind}#{expected_seq}, got {found_kind}#{found_seq}"
    )]
    CollectiveMismatch {
        neighbor: usize,
        expected_kind: u16,
        expected_seq: u32,
        found_kind: u16,
        found_seq: u32,
    },
    /// Payload (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A malformed meta-file or region description.
    #[error("Parse error in '{file}': {reason}")]
    Parse { file: String, reason: String },
    /// MPI could not be initialized.
    #[error("MPI initialization failed")]
    MpiInit,
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for MeshDbError {
    fn from(e: bincode::Error) -> Self {
        MeshDbError::Serialization(e.to_string())
    }
}

impl MeshDbError {
    /// `true` for errors that only affect one entity and may be skipped.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MeshDbError::EntityRead { .. })
    }
}
