//! The user-facing reader: file list in, synchronized database view out.
//!
//! [`MeshDbReader::update_information`] discovers databases, gathers the
//! timeline, synchronizes the schema and builds the assembly. The result is
//! an immutable [`DatabaseSnapshot`] that replaces the previous one only when
//! every step succeeded on every rank. All ranks must call the collective
//! entry points (`update_information`, `read_pass`) in the same order.

use crate::algs::collective::{Collective, ELECTED_RANK};
use crate::algs::communicator::Communicator;
use crate::assembly::{TaggedAssembly, update_assembly};
use crate::cache::{ArtifactCache, EntityPath};
use crate::config::ReaderOptions;
use crate::database::filename::short_name;
use crate::database::regions::RegionMap;
use crate::database::registry::{DatabaseHandle, DatabaseRegistry};
use crate::database::scanner;
use crate::database::timeline::Timeline;
use crate::io::{DatabaseFormat, EntityKind, RegionSource};
use crate::mesh_error::MeshDbError;
use crate::metadata::{DatasetIndexMap, EntitySchema, Selections, needs_schema_refresh, synchronize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything derived from one file list, identical on every rank.
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseSnapshot {
    /// Increases with every successful rebuild.
    pub version: u64,
    /// File names after meta-file and related-file expansion.
    pub file_names: BTreeSet<String>,
    pub registry: DatabaseRegistry,
    pub timeline: Timeline,
    pub schema: EntitySchema,
    pub format: DatabaseFormat,
    pub dataset_indices: DatasetIndexMap,
    pub assembly: TaggedAssembly,
}

/// One entity to materialize during a read pass.
#[derive(Debug)]
pub struct EntityRequest<'a> {
    pub kind: EntityKind,
    pub name: &'a str,
    pub handle: &'a DatabaseHandle,
    /// Physical file behind `handle`.
    pub file: &'a str,
    /// Local state index of the requested timestep, if the database is transient.
    pub state: Option<i32>,
    /// Cache identity of this entity.
    pub path: EntityPath,
    /// Enabled fields for `kind`.
    pub fields: &'a [String],
}

/// Counts reported by [`MeshDbReader::read_pass`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub files: usize,
    pub entities_read: usize,
    pub entities_skipped: usize,
}

/// Parallel reader for one multi-file mesh database.
pub struct MeshDbReader<S: RegionSource, C: Communicator> {
    coll: Collective<C>,
    regions: RegionMap<S>,
    options: ReaderOptions,
    file_names: BTreeSet<String>,
    /// Bumped whenever the inputs of the snapshot change.
    structure_version: u64,
    built_for: Option<u64>,
    snapshot: Option<Arc<DatabaseSnapshot>>,
    next_snapshot_version: u64,
    selections: Selections,
    cache: ArtifactCache,
}

impl<S: RegionSource, C: Communicator> MeshDbReader<S, C> {
    pub fn new(source: S, comm: C) -> Self {
        Self::with_options(source, comm, ReaderOptions::default())
    }

    pub fn with_options(source: S, comm: C, options: ReaderOptions) -> Self {
        Self {
            coll: Collective::new(comm),
            regions: RegionMap::new(source),
            options,
            file_names: BTreeSet::new(),
            structure_version: 0,
            built_for: None,
            snapshot: None,
            next_snapshot_version: 1,
            selections: Selections::new(),
            cache: ArtifactCache::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.coll.rank()
    }

    pub fn size(&self) -> usize {
        self.coll.size()
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Replace the options. Only changes that affect discovery or schema
    /// trigger a rebuild.
    pub fn set_options(&mut self, options: ReaderOptions) {
        let structural = ReaderOptions {
            caching: self.options.caching,
            ..options.clone()
        } != self.options;
        if structural {
            self.structure_version += 1;
        }
        self.options = options;
    }

    pub fn file_names(&self) -> &BTreeSet<String> {
        &self.file_names
    }

    /// Replace the file list; a rebuild happens only if it actually changed.
    pub fn set_file_names<I, T>(&mut self, names: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names != self.file_names {
            self.file_names = names;
            self.structure_version += 1;
        }
    }

    pub fn add_file_name(&mut self, name: impl Into<String>) {
        if self.file_names.insert(name.into()) {
            self.structure_version += 1;
        }
    }

    pub fn clear_file_names(&mut self) {
        if !self.file_names.is_empty() {
            self.file_names.clear();
            self.structure_version += 1;
        }
    }

    /// Force the next [`update_information`](Self::update_information) to rebuild.
    pub fn invalidate(&mut self) {
        self.structure_version += 1;
    }

    /// Latest successfully built snapshot, if any.
    pub fn snapshot(&self) -> Option<&Arc<DatabaseSnapshot>> {
        self.snapshot.as_ref()
    }

    pub fn selections(&self) -> &Selections {
        &self.selections
    }

    pub fn selections_mut(&mut self) -> &mut Selections {
        &mut self.selections
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ArtifactCache {
        &mut self.cache
    }

    /// Rebuild the snapshot if its inputs changed. Collective.
    ///
    /// On failure the previous snapshot stays in place and the error (which
    /// every rank observes) is returned.
    pub fn update_information(&mut self) -> Result<Arc<DatabaseSnapshot>, MeshDbError> {
        if let (Some(snapshot), Some(built)) = (&self.snapshot, self.built_for) {
            if built == self.structure_version {
                return Ok(Arc::clone(snapshot));
            }
        }
        let previous_format = self
            .snapshot
            .as_ref()
            .map_or(DatabaseFormat::Unknown, |s| s.format);
        self.regions.release_regions();
        self.regions.set_format(DatabaseFormat::Unknown);
        self.regions.configure(
            self.options.database_type_override.clone(),
            self.options.database_properties.clone(),
        );
        self.cache.clear();

        match self.build_snapshot() {
            Ok(snapshot) => {
                self.selections.update_from_schema(&snapshot.schema);
                let snapshot = Arc::new(snapshot);
                self.snapshot = Some(Arc::clone(&snapshot));
                self.built_for = Some(self.structure_version);
                self.next_snapshot_version += 1;
                Ok(snapshot)
            }
            Err(e) => {
                log::error!("{e}");
                self.regions.release_regions();
                self.regions.set_format(previous_format);
                Err(e)
            }
        }
    }

    fn build_snapshot(&mut self) -> Result<DatabaseSnapshot, MeshDbError> {
        // only the elected rank's list matters; the others take the broadcast
        let local = if self.coll.rank() != ELECTED_RANK {
            Err(MeshDbError::CollectiveFailed { root: ELECTED_RANK })
        } else if self.file_names.is_empty() {
            Err(MeshDbError::NoFileNames)
        } else {
            scanner::expand_file_names(
                &self.file_names,
                self.coll.size(),
                self.options.scan_for_related_files,
            )
        };
        let file_names: BTreeSet<String> = self.coll.broadcast(ELECTED_RANK, local)?;
        if file_names.is_empty() {
            return Err(MeshDbError::NoFileNames);
        }

        let mut registry = DatabaseRegistry::from_file_names(&file_names)?;
        if let Some(subset) = self.options.file_subset() {
            registry = registry.subset(&subset);
            if registry.is_empty() {
                return Err(MeshDbError::NoDatabases {
                    start: subset.start,
                    end: subset.end,
                    stride: subset.stride,
                });
            }
        }
        registry.log_summary();

        let timeline = Timeline::gather(&registry, &mut self.regions, &mut self.coll)?;
        let synced = synchronize(
            &registry,
            &mut self.regions,
            &mut self.coll,
            self.options.read_all_files_to_determine_structure,
        )?;
        let dataset_indices = DatasetIndexMap::build(&synced.schema);
        let version = self.next_snapshot_version;
        let assembly = update_assembly(
            &registry,
            &timeline,
            &mut self.regions,
            &mut self.coll,
            &dataset_indices,
            version,
        )?;

        Ok(DatabaseSnapshot {
            version,
            file_names,
            registry,
            timeline,
            schema: synced.schema,
            format: synced.format,
            dataset_indices,
            assembly,
        })
    }

    fn current(&self) -> Result<&Arc<DatabaseSnapshot>, MeshDbError> {
        self.snapshot.as_ref().ok_or(MeshDbError::NoFileNames)
    }

    /// Handles `piece` must read for `timestep`. Collective when the
    /// snapshot is stale.
    pub fn resolve_handles(
        &mut self,
        piece: usize,
        num_pieces: usize,
        timestep: i64,
    ) -> Result<Vec<DatabaseHandle>, MeshDbError> {
        let snapshot = self.update_information()?;
        snapshot
            .timeline
            .resolve_handles(&snapshot.registry, piece, num_pieces, timestep)
    }

    /// Physical file name behind a handle.
    pub fn raw_file_name(&self, handle: &DatabaseHandle, short: bool) -> Result<String, MeshDbError> {
        self.current()?.registry.raw_file_name(handle, short)
    }

    /// Partition rank of the file behind a handle.
    pub fn file_rank(&self, handle: &DatabaseHandle) -> Result<u32, MeshDbError> {
        self.current()?.registry.file_rank(handle)
    }

    /// Open region behind a handle.
    pub fn region(&mut self, handle: &DatabaseHandle) -> Result<&mut S::Region, MeshDbError> {
        let snapshot = Arc::clone(self.current()?);
        self.regions.region(&snapshot.registry, handle)
    }

    /// Close file descriptors but keep region metadata.
    pub fn release_handles(&mut self) {
        self.regions.release_handles();
    }

    /// Drop every open region.
    pub fn release_regions(&mut self) {
        self.regions.release_regions();
    }

    /// Whether the files behind `handles` hold entities the current schema
    /// does not know. Local to this rank.
    pub fn needs_schema_refresh(&mut self, handles: &[DatabaseHandle]) -> Result<bool, MeshDbError> {
        let snapshot = Arc::clone(self.current()?);
        needs_schema_refresh(&snapshot.schema, &snapshot.registry, &mut self.regions, handles)
    }

    /// Materialize every enabled entity this piece owns at `timestep`.
    ///
    /// `materialize` is called once per (file, enabled entity). Recoverable
    /// errors it returns are logged and the entity is skipped; any other
    /// error aborts the pass. Cache entries not touched by the pass are
    /// evicted at the end (or everything, with caching disabled).
    pub fn read_pass<F>(
        &mut self,
        piece: usize,
        num_pieces: usize,
        timestep: i64,
        mut materialize: F,
    ) -> Result<PassSummary, MeshDbError>
    where
        F: FnMut(&EntityRequest<'_>, &mut S::Region, &mut ArtifactCache) -> Result<(), MeshDbError>,
    {
        let snapshot = self.update_information()?;
        let handles = snapshot
            .timeline
            .resolve_handles(&snapshot.registry, piece, num_pieces, timestep)?;
        if self.options.caching {
            self.cache.reset_access_counts();
        }

        let mut summary = PassSummary::default();
        let enabled: Vec<(EntityKind, Vec<String>, Vec<String>)> = EntityKind::ALL
            .iter()
            .map(|&k| {
                (
                    k,
                    self.selections.enabled_entities(k),
                    self.selections.enabled_fields(k),
                )
            })
            .filter(|(_, entities, _)| !entities.is_empty())
            .collect();

        let outcome = self.read_files(
            &snapshot,
            &handles,
            timestep,
            &enabled,
            &mut summary,
            &mut materialize,
        );
        self.regions.release_handles();
        if let Err(e) = outcome {
            if !self.options.caching {
                self.cache.clear();
            }
            return Err(e);
        }

        if self.options.caching {
            self.cache.clear_unused();
        } else {
            self.cache.clear();
        }
        Ok(summary)
    }

    fn read_files<F>(
        &mut self,
        snapshot: &DatabaseSnapshot,
        handles: &[DatabaseHandle],
        timestep: i64,
        enabled: &[(EntityKind, Vec<String>, Vec<String>)],
        summary: &mut PassSummary,
        materialize: &mut F,
    ) -> Result<(), MeshDbError>
    where
        F: FnMut(&EntityRequest<'_>, &mut S::Region, &mut ArtifactCache) -> Result<(), MeshDbError>,
    {
        for handle in handles {
            let file = snapshot.registry.raw_file_name(handle, false)?;
            let state = snapshot.timeline.state_index(&handle.database, timestep);
            let region = match self.regions.region(&snapshot.registry, handle) {
                Ok(region) => region,
                Err(e) => {
                    log::error!("Failed to read '{}': {e}", short_name(&file));
                    return Err(e);
                }
            };
            summary.files += 1;
            for (kind, entities, fields) in enabled {
                for name in entities {
                    let request = EntityRequest {
                        kind: *kind,
                        name,
                        handle,
                        file: &file,
                        state,
                        path: EntityPath::new(&file, *kind, name),
                        fields,
                    };
                    match materialize(&request, &mut *region, &mut self.cache) {
                        Ok(()) => summary.entities_read += 1,
                        Err(e) if e.is_recoverable() => {
                            log::warn!(
                                "Error reading entity block (or set) named '{name}' from '{}'; skipping: {e}",
                                short_name(&file)
                            );
                            summary.entities_skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            self.regions.release_handles();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::io::Region;
    use crate::io::memory::{EntityDescription, MemoryRegionSource, RegionDescription};

    fn source() -> MemoryRegionSource {
        let file = |times: &[f64], blocks: &[&str]| {
            blocks.iter().enumerate().fold(
                RegionDescription::new(DatabaseFormat::Exodus).with_times(times),
                |d, (i, b)| {
                    d.with_entity(
                        EntityKind::ElementBlock,
                        EntityDescription::new(i as u64 + 1, *b).with_fields(["temp"]),
                    )
                },
            )
        };
        MemoryRegionSource::new()
            .with_file("run.e.2.0", file(&[0.0, 1.0, 2.0], &["block_1"]))
            .with_file("run.e.2.1", file(&[0.0, 1.0, 2.0], &["block_1", "block_2"]))
            .with_file("run.e-s.0002.2.0", file(&[2.0, 3.0], &["block_1"]))
            .with_file("run.e-s.0002.2.1", file(&[2.0, 3.0], &["block_1", "block_2"]))
    }

    fn reader(src: &MemoryRegionSource) -> MeshDbReader<&MemoryRegionSource, NoComm> {
        let mut r = MeshDbReader::new(src, NoComm);
        r.set_file_names(src.file_names());
        r
    }

    #[test]
    fn snapshot_is_cached_until_inputs_change() {
        let src = source();
        let mut r = reader(&src);
        let a = r.update_information().unwrap();
        assert_eq!(a.version, 1);
        assert_eq!(a.registry.len(), 2);
        assert_eq!(a.timeline.timestep_values(), &[0.0, 1.0, 2.0, 3.0]);
        let b = r.update_information().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let mut opts = r.options().clone();
        opts.caching = false;
        r.set_options(opts);
        assert!(Arc::ptr_eq(&a, &r.update_information().unwrap()));

        r.invalidate();
        assert_eq!(r.update_information().unwrap().version, 2);
    }

    #[test]
    fn failed_rebuild_keeps_previous_snapshot() {
        let src = source();
        let mut r = reader(&src);
        let good = r.update_information().unwrap();
        r.set_file_names(["run.e.2.0", "run.e.3.1"]);
        assert!(matches!(
            r.update_information(),
            Err(MeshDbError::InconsistentProcessorCount { .. })
        ));
        assert!(Arc::ptr_eq(&good, r.snapshot().unwrap()));
    }

    #[test]
    fn empty_file_list_is_an_error() {
        let src = source();
        let mut r = MeshDbReader::new(&src, NoComm);
        assert!(matches!(r.update_information(), Err(MeshDbError::NoFileNames)));
    }

    #[test]
    fn subset_that_removes_everything_is_fatal() {
        let src = source();
        let mut r = reader(&src);
        r.set_options(ReaderOptions {
            file_range: Some((5, 9)),
            ..Default::default()
        });
        assert!(matches!(r.update_information(), Err(MeshDbError::NoDatabases { .. })));
    }

    #[test]
    fn handles_follow_restart_tie_break() {
        let src = source();
        let mut r = reader(&src);
        let handles = r.resolve_handles(0, 1, 2).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(r.raw_file_name(&handles[1], true).unwrap(), "run.e-s.0002.2.1");
        assert_eq!(r.file_rank(&handles[1]).unwrap(), 1);
        let early = r.resolve_handles(0, 1, 1).unwrap();
        assert_eq!(early[0].database, "run.e");
    }

    #[test]
    fn read_pass_visits_enabled_entities_and_sweeps_cache() {
        let src = source();
        let mut r = reader(&src);
        let summary = r
            .read_pass(0, 1, 0, |req, region, cache| {
                if region.field_names(req.kind, req.name)?.is_none() {
                    return Ok(());
                }
                if cache.find(&req.path, "fields").is_none() {
                    cache.insert(req.path.clone(), "fields", Arc::new(req.fields.to_vec()) as _);
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.entities_read, 4);
        assert_eq!(r.cache().len(), 3);

        r.selections_mut()
            .set_entity_enabled(EntityKind::ElementBlock, "block_2", false);
        r.read_pass(0, 1, 0, |req, _, cache| {
            cache.find(&req.path, "fields");
            Ok(())
        })
        .unwrap();
        assert_eq!(r.cache().len(), 2);
    }

    #[test]
    fn recoverable_errors_skip_one_entity() {
        let src = source();
        let mut r = reader(&src);
        let summary = r
            .read_pass(0, 1, 3, |req, _, _| {
                if req.name == "block_2" {
                    Err(MeshDbError::EntityRead {
                        kind: req.kind,
                        entity: req.name.to_string(),
                        file: req.file.to_string(),
                        reason: "bad connectivity".into(),
                    })
                } else {
                    assert_eq!(req.state, Some(2));
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(summary.entities_skipped, 2);
        assert_eq!(summary.entities_read, 2);
    }

    #[test]
    fn fatal_errors_abort_the_pass() {
        let src = source();
        let mut r = reader(&src);
        let err = r
            .read_pass(0, 1, 0, |_, _, _| Err(MeshDbError::Serialization("boom".into())))
            .unwrap_err();
        assert!(matches!(err, MeshDbError::Serialization(_)));
    }

    #[test]
    fn refresh_check_uses_current_schema() {
        let src = source();
        let mut r = reader(&src);
        let handles = r.resolve_handles(0, 1, 0).unwrap();
        assert!(!r.needs_schema_refresh(&handles).unwrap());
    }

    #[test]
    fn fatal_errors_still_release_handles() {
        let src = source();
        let mut r = reader(&src);
        let handles = r.resolve_handles(0, 1, 0).unwrap();
        r.release_regions();
        r.read_pass(0, 1, 0, |_, region, _| {
            assert!(region.is_open());
            Err(MeshDbError::Serialization("boom".into()))
        })
        .unwrap_err();
        assert!(!r.region(&handles[0]).unwrap().is_open());
    }

    #[test]
    fn disabled_caching_reuses_within_a_pass_only() {
        let src = source();
        let mut r = reader(&src);
        r.set_options(ReaderOptions {
            caching: false,
            ..Default::default()
        });
        let shared = EntityPath::new("run.e", EntityKind::ElementBlock, "all");
        for _ in 0..2 {
            let mut misses = 0;
            r.read_pass(0, 1, 0, |_, _, cache| {
                if cache.find(&shared, "ids").is_none() {
                    misses += 1;
                    cache.insert(shared.clone(), "ids", Arc::new(7u32) as _);
                }
                Ok(())
            })
            .unwrap();
            assert_eq!(misses, 1);
            assert!(r.cache().is_empty());
        }
    }

    #[test]
    fn rebuilding_the_registry_clears_the_cache() {
        let src = source();
        let mut r = reader(&src);
        r.read_pass(0, 1, 0, |req, _, cache| {
            cache.insert(req.path.clone(), "fields", Arc::new(0u8) as _);
            Ok(())
        })
        .unwrap();
        assert!(!r.cache().is_empty());

        r.set_file_names(["run.e.2.0", "run.e.2.1"]);
        let snapshot = r.update_information().unwrap();
        assert_eq!(snapshot.registry.len(), 1);
        assert!(r.cache().is_empty());
    }
}
