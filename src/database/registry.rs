//! Registry of logical databases discovered from file names.
//!
//! A logical database is either one unpartitioned file (`process_count == 0`)
//! or a set of spatial partitions `<base>.<processCount>.<rank>`. Restarts are
//! separate databases whose time axes are merged by the timeline.

use crate::algs::partition;
use crate::database::filename::{self, classify, decode_filename, short_name};
use crate::mesh_error::MeshDbError;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Partitioning of one logical database.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Number of writer ranks; `0` for a single unpartitioned file.
    pub process_count: u32,
    /// Ranks actually present (possibly filtered by a subset).
    pub ranks: BTreeSet<u32>,
}

impl PartitionInfo {
    pub fn is_partitioned(&self) -> bool {
        self.process_count > 0
    }

    /// Number of physical files addressable by file index.
    pub fn file_count(&self) -> usize {
        if self.is_partitioned() {
            self.ranks.len()
        } else {
            1
        }
    }

    /// Rank of the file at position `file_index`; `0` for unpartitioned.
    pub fn rank_at(&self, file_index: usize) -> Option<u32> {
        if self.is_partitioned() {
            self.ranks.iter().nth(file_index).copied()
        } else if file_index == 0 {
            Some(0)
        } else {
            None
        }
    }
}

/// Reference to one physical file of one database.
///
/// `file_index` is a position into the database's sorted rank set, not a rank.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseHandle {
    pub database: String,
    pub file_index: usize,
}

impl DatabaseHandle {
    pub fn new(database: impl Into<String>, file_index: usize) -> Self {
        Self {
            database: database.into(),
            file_index,
        }
    }
}

/// User-requested rank subset: keep `r` iff `start <= r < end` and
/// `(r - start) % stride == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSubset {
    pub start: i32,
    pub end: i32,
    pub stride: i32,
}

impl FileSubset {
    pub fn new(start: i32, end: i32, stride: i32) -> Self {
        Self { start, end, stride }
    }

    /// Degenerate subsets (empty range, stride < 1) disable filtering.
    pub fn is_active(&self) -> bool {
        self.start < self.end && self.stride >= 1
    }

    pub fn keeps(&self, rank: u32) -> bool {
        let r = rank as i64;
        let (start, end, stride) = (self.start as i64, self.end as i64, self.stride as i64);
        r >= start && r < end && (r - start) % stride == 0
    }
}

/// Database name → partition info, ordered by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRegistry {
    databases: BTreeMap<String, PartitionInfo>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every file name into a database.
    ///
    /// Fails when two names with the same base disagree on the processor count.
    pub fn from_file_names<I, S>(names: I) -> Result<Self, MeshDbError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.insert_file(name.as_ref())?;
        }
        Ok(registry)
    }

    /// Record one physical file name.
    pub fn insert_file(&mut self, name: &str) -> Result<(), MeshDbError> {
        let classified = classify(name);
        match classified.partition {
            Some((count, rank)) => {
                let info = self.databases.entry(classified.base).or_default();
                if info.process_count == 0 || info.process_count == count {
                    info.process_count = count;
                    info.ranks.insert(rank);
                    Ok(())
                } else {
                    Err(MeshDbError::InconsistentProcessorCount {
                        file: short_name(name).to_string(),
                        found: count,
                        expected: info.process_count,
                    })
                }
            }
            None => {
                self.databases.entry(classified.base).or_default();
                Ok(())
            }
        }
    }

    /// Apply a rank subset; partitioned databases left without ranks are dropped.
    pub fn subset(&self, subset: &FileSubset) -> Self {
        if !subset.is_active() || self.databases.is_empty() {
            return self.clone();
        }
        let databases = self
            .databases
            .iter()
            .filter_map(|(name, info)| {
                if !info.is_partitioned() {
                    return Some((name.clone(), info.clone()));
                }
                let ranks: BTreeSet<u32> =
                    info.ranks.iter().copied().filter(|&r| subset.keeps(r)).collect();
                (!ranks.is_empty()).then(|| {
                    (
                        name.clone(),
                        PartitionInfo {
                            process_count: info.process_count,
                            ranks,
                        },
                    )
                })
            })
            .collect();
        Self { databases }
    }

    pub fn get(&self, database: &str) -> Option<&PartitionInfo> {
        self.databases.get(database)
    }

    pub fn contains(&self, database: &str) -> bool {
        self.databases.contains_key(database)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PartitionInfo)> {
        self.databases.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    /// Lexicographically first database.
    pub fn first_database(&self) -> Option<&str> {
        self.names().next()
    }

    /// File indices of `database` read by `reader` out of `num_readers`.
    pub fn file_ids(&self, database: &str, reader: usize, num_readers: usize) -> Vec<usize> {
        let Some(info) = self.databases.get(database) else {
            return Vec::new();
        };
        if (!info.is_partitioned() && reader != 0)
            || (info.is_partitioned() && reader >= info.process_count as usize)
        {
            return Vec::new();
        }
        partition::assign(info.file_count(), reader, num_readers)
    }

    /// Handles of `database` read by `piece` out of `num_pieces`.
    pub fn handles_for(&self, database: &str, piece: usize, num_pieces: usize) -> Vec<DatabaseHandle> {
        self.file_ids(database, piece, num_pieces)
            .into_iter()
            .map(|id| DatabaseHandle::new(database, id))
            .collect()
    }

    fn resolve(&self, handle: &DatabaseHandle) -> Result<(&PartitionInfo, u32), MeshDbError> {
        let info = self
            .databases
            .get(&handle.database)
            .ok_or_else(|| MeshDbError::UnknownDatabase(handle.database.clone()))?;
        let rank = info
            .rank_at(handle.file_index)
            .ok_or_else(|| MeshDbError::BadDatabaseHandle {
                database: handle.database.clone(),
                file_index: handle.file_index,
            })?;
        Ok((info, rank))
    }

    /// Physical file name behind a handle; `short` drops directories.
    pub fn raw_file_name(&self, handle: &DatabaseHandle, short: bool) -> Result<String, MeshDbError> {
        let (info, rank) = self.resolve(handle)?;
        let base = if short {
            short_name(&handle.database)
        } else {
            handle.database.as_str()
        };
        if info.is_partitioned() {
            Ok(decode_filename(base, info.process_count, rank))
        } else {
            Ok(base.to_string())
        }
    }

    /// Partition rank of the file behind a handle (`0` when unpartitioned).
    pub fn file_rank(&self, handle: &DatabaseHandle) -> Result<u32, MeshDbError> {
        self.resolve(handle).map(|(_, rank)| rank)
    }

    /// Restart number encoded in a database name, if any.
    pub fn restart_number(database: &str) -> Option<u32> {
        filename::split_restart(database).1
    }

    /// Trace-level dump of the registry.
    pub fn log_summary(&self) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        log::trace!("Found databases ({})", self.len());
        for (name, info) in self.iter() {
            if info.is_partitioned() {
                log::trace!(
                    "'{}' [processor_count = {}][ranks = {}]",
                    short_name(name),
                    info.process_count,
                    info.ranks.iter().join(" ")
                );
            } else {
                log::trace!("'{}'", short_name(name));
            }
        }
    }
}
