//! Global time axis and `(piece, timestep)` → handle resolution.
//!
//! Each database's time axis is read once, by the elected rank, from the
//! first file of that database, and broadcast to everyone. The global axis is
//! the sorted, deduplicated union of every database's time values.

use crate::algs::collective::{Collective, ELECTED_RANK};
use crate::algs::communicator::Communicator;
use crate::database::regions::RegionMap;
use crate::database::registry::{DatabaseHandle, DatabaseRegistry};
use crate::io::{Region, RegionSource};
use crate::mesh_error::MeshDbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-database time axes plus the merged global axis.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    database_times: BTreeMap<String, Vec<(i32, f64)>>,
    timestep_values: Vec<f64>,
}

impl Timeline {
    /// Build from per-database `(state index, time)` sequences.
    pub fn from_database_times(database_times: BTreeMap<String, Vec<(i32, f64)>>) -> Self {
        let mut timestep_values: Vec<f64> = database_times
            .values()
            .flat_map(|steps| steps.iter().map(|&(_, t)| t))
            .collect();
        timestep_values.sort_by(f64::total_cmp);
        timestep_values.dedup();
        Self {
            database_times,
            timestep_values,
        }
    }

    /// Read every database's time axis on the elected rank and broadcast it.
    ///
    /// A failure on the elected rank is fatal on every rank.
    pub fn gather<S, C>(
        registry: &DatabaseRegistry,
        regions: &mut RegionMap<S>,
        coll: &mut Collective<C>,
    ) -> Result<Self, MeshDbError>
    where
        S: RegionSource,
        C: Communicator,
    {
        let local = if coll.rank() == ELECTED_RANK {
            read_times(registry, regions)
        } else {
            Err(MeshDbError::CollectiveFailed { root: ELECTED_RANK })
        };
        let database_times = coll.broadcast(ELECTED_RANK, local)?;
        let timeline = Self::from_database_times(database_times);
        log::trace!("timesteps: {:?}", timeline.timestep_values);
        Ok(timeline)
    }

    /// Sorted, duplicate-free global time values.
    pub fn timestep_values(&self) -> &[f64] {
        &self.timestep_values
    }

    pub fn timestep_count(&self) -> usize {
        self.timestep_values.len()
    }

    /// Time axis of one database.
    pub fn database_times(&self, database: &str) -> Option<&[(i32, f64)]> {
        self.database_times.get(database).map(Vec::as_slice)
    }

    /// Database that serves global `timestep`.
    ///
    /// With overlapping restarts, candidates are folded left in name order
    /// and a later candidate wins only if its final time is strictly larger.
    pub fn database_for_timestep(
        &self,
        registry: &DatabaseRegistry,
        timestep: i64,
    ) -> Result<String, MeshDbError> {
        if self.timestep_values.is_empty() && timestep <= 0 {
            return registry
                .first_database()
                .map(str::to_string)
                .ok_or(MeshDbError::NoFileNames);
        }
        let index = usize::try_from(timestep)
            .ok()
            .filter(|&i| i < self.timestep_values.len())
            .ok_or(MeshDbError::TimestepOutOfRange {
                timestep,
                count: self.timestep_values.len(),
            })?;
        let time = self.timestep_values[index];

        let final_time = |steps: &[(i32, f64)]| steps.last().map_or(f64::NEG_INFINITY, |s| s.1);
        self.database_times
            .iter()
            .filter(|(name, _)| registry.contains(name))
            .filter(|(_, steps)| steps.iter().any(|&(_, t)| t == time))
            .fold(None::<(&String, &Vec<(i32, f64)>)>, |best, cand| match best {
                Some(b) if final_time(cand.1) > final_time(b.1) => Some(cand),
                Some(b) => Some(b),
                None => Some(cand),
            })
            .map(|(name, _)| name.clone())
            .ok_or(MeshDbError::NoMatchingTimestep {
                timestep: index,
                time,
            })
    }

    /// Local state index of global `timestep` inside `database`.
    pub fn state_index(&self, database: &str, timestep: i64) -> Option<i32> {
        let time = *self.timestep_values.get(usize::try_from(timestep).ok()?)?;
        self.database_times
            .get(database)?
            .iter()
            .find(|&&(_, t)| t == time)
            .map(|&(state, _)| state)
    }

    /// Handles `piece` out of `num_pieces` must read for `timestep`.
    pub fn resolve_handles(
        &self,
        registry: &DatabaseRegistry,
        piece: usize,
        num_pieces: usize,
        timestep: i64,
    ) -> Result<Vec<DatabaseHandle>, MeshDbError> {
        let database = self.database_for_timestep(registry, timestep)?;
        Ok(registry.handles_for(&database, piece, num_pieces))
    }
}

fn read_times<S: RegionSource>(
    registry: &DatabaseRegistry,
    regions: &mut RegionMap<S>,
) -> Result<BTreeMap<String, Vec<(i32, f64)>>, MeshDbError> {
    let mut times = BTreeMap::new();
    for database in registry.names() {
        let handle = DatabaseHandle::new(database, 0);
        let steps = regions.region(registry, &handle)?.timeline()?;
        times.insert(database.to_string(), steps);
    }
    regions.release_handles();
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::io::DatabaseFormat;
    use crate::io::memory::{MemoryRegionSource, RegionDescription};

    fn steps(times: &[f64]) -> Vec<(i32, f64)> {
        times.iter().enumerate().map(|(i, &t)| (i as i32 + 1, t)).collect()
    }

    fn timeline(dbs: &[(&str, &[f64])]) -> (DatabaseRegistry, Timeline) {
        let registry = DatabaseRegistry::from_file_names(dbs.iter().map(|(n, _)| *n)).unwrap();
        let map = dbs.iter().map(|(n, t)| (n.to_string(), steps(t))).collect();
        (registry, Timeline::from_database_times(map))
    }

    #[test]
    fn global_axis_is_sorted_union() {
        let (_, tl) = timeline(&[("a.e", &[0.0, 1.0, 2.0]), ("b.e", &[2.0, 3.0, 4.0])]);
        assert_eq!(tl.timestep_values(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn later_restart_wins_shared_time() {
        let (reg, tl) = timeline(&[("a.e", &[0.0, 1.0, 2.0]), ("b.e", &[2.0, 3.0, 4.0])]);
        assert_eq!(tl.database_for_timestep(&reg, 2).unwrap(), "b.e");
        assert_eq!(tl.database_for_timestep(&reg, 1).unwrap(), "a.e");
        assert_eq!(tl.state_index("b.e", 2), Some(1));
        assert_eq!(tl.state_index("a.e", 2), Some(3));
    }

    #[test]
    fn ties_on_final_time_keep_first_candidate() {
        let (reg, tl) = timeline(&[
            ("a.e", &[1.0, 5.0]),
            ("b.e", &[1.0, 5.0]),
            ("c.e", &[1.0, 3.0]),
        ]);
        assert_eq!(tl.database_for_timestep(&reg, 0).unwrap(), "a.e");
    }

    #[test]
    fn static_datasets_resolve_to_first_database() {
        let (reg, tl) = timeline(&[("z.e", &[]), ("m.e", &[])]);
        assert_eq!(tl.timestep_count(), 0);
        let handles = tl.resolve_handles(&reg, 0, 1, 0).unwrap();
        assert_eq!(handles, vec![DatabaseHandle::new("m.e", 0)]);
        assert!(matches!(
            tl.resolve_handles(&reg, 0, 1, 1),
            Err(MeshDbError::TimestepOutOfRange { .. })
        ));
    }

    #[test]
    fn missing_time_is_fatal() {
        let (_, tl) = timeline(&[("a.e", &[0.0, 1.0]), ("b.e", &[2.0])]);
        // b.e has been filtered out of the registry
        let reg = DatabaseRegistry::from_file_names(["a.e"]).unwrap();
        assert!(matches!(
            tl.database_for_timestep(&reg, 2),
            Err(MeshDbError::NoMatchingTimestep { timestep: 2, .. })
        ));
    }

    #[test]
    fn handles_cover_this_piece_only() {
        let names = ["p.e.4.0", "p.e.4.1", "p.e.4.2", "p.e.4.3"];
        let reg = DatabaseRegistry::from_file_names(names).unwrap();
        let mut map = BTreeMap::new();
        map.insert("p.e".to_string(), steps(&[0.5]));
        let tl = Timeline::from_database_times(map);
        let handles = tl.resolve_handles(&reg, 1, 2, 0).unwrap();
        assert_eq!(
            handles,
            vec![DatabaseHandle::new("p.e", 2), DatabaseHandle::new("p.e", 3)]
        );
    }

    #[test]
    fn serial_gather_reads_first_file_of_each_database() {
        let source = MemoryRegionSource::new()
            .with_file(
                "out.e.2.0",
                RegionDescription::new(DatabaseFormat::Exodus).with_times(&[0.0, 0.5]),
            )
            .with_file("out.e.2.1", RegionDescription::new(DatabaseFormat::Exodus))
            .with_file(
                "out.e-s.0002",
                RegionDescription::new(DatabaseFormat::Exodus).with_times(&[0.5, 1.0]),
            );
        let reg = DatabaseRegistry::from_file_names(source.file_names()).unwrap();
        let mut regions = RegionMap::new(&source);
        let mut coll = Collective::new(NoComm);
        let tl = Timeline::gather(&reg, &mut regions, &mut coll).unwrap();
        assert_eq!(tl.timestep_values(), &[0.0, 0.5, 1.0]);
        assert_eq!(source.open_count(), 2);
        assert_eq!(tl.database_for_timestep(&reg, 1).unwrap(), "out.e-s.0002");
    }
}
