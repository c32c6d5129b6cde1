//! Cross-rank schema synchronization.
//!
//! Every rank scans the files it owns, then the local schemas are all-gathered
//! and unioned so that a block present on only some partitions still shows up
//! everywhere. The detected format is broadcast from the elected rank last,
//! since ranks that opened nothing cannot know it.

use crate::algs::collective::{Collective, ELECTED_RANK};
use crate::algs::communicator::Communicator;
use crate::database::regions::RegionMap;
use crate::database::registry::{DatabaseHandle, DatabaseRegistry};
use crate::io::{DatabaseFormat, EntityKind, Region, RegionSource};
use crate::mesh_error::MeshDbError;
use crate::metadata::schema::EntitySchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Files attempted and opened for one database on one rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCounts {
    pub attempted: u32,
    pub opened: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalScan {
    schema: EntitySchema,
    counts: BTreeMap<String, OpenCounts>,
}

/// Result of a synchronization pass, identical on every rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncedSchema {
    pub schema: EntitySchema,
    pub format: DatabaseFormat,
}

/// Add the entities and fields of one region to `schema`.
///
/// Entities whose fields cannot be read are logged and skipped.
pub fn scan_region<R: Region>(region: &R, file: &str, schema: &mut EntitySchema) {
    for kind in EntityKind::ALL {
        for entity in region.entity_names(kind) {
            match region.field_names(kind, &entity.name) {
                Ok(Some(fields)) => schema.insert_fields(kind, fields),
                Ok(None) => {}
                Err(e) => {
                    log::warn!(
                        "Error reading entity {} named '{}' from '{file}'; skipping: {e}",
                        kind_noun(kind),
                        entity.name
                    );
                    continue;
                }
            }
            schema.insert_entity(kind, entity);
        }
    }
}

fn kind_noun(kind: EntityKind) -> &'static str {
    if kind.is_block() { "block" } else { "set" }
}

fn scan_handles<S: RegionSource>(
    registry: &DatabaseRegistry,
    regions: &mut RegionMap<S>,
    handles: &[DatabaseHandle],
    counts: Option<&mut BTreeMap<String, OpenCounts>>,
) -> Result<EntitySchema, MeshDbError> {
    let mut schema = EntitySchema::new();
    let mut local_counts = BTreeMap::new();
    for handle in handles {
        let entry: &mut OpenCounts = local_counts.entry(handle.database.clone()).or_default();
        entry.attempted += 1;
        let file = registry.raw_file_name(handle, true)?;
        match regions.region(registry, handle) {
            Ok(region) => {
                entry.opened += 1;
                log::trace!("scanning '{file}'");
                scan_region(&*region, &file, &mut schema);
            }
            Err(e @ MeshDbError::FormatMismatch { .. }) => return Err(e),
            Err(e) => log::warn!("{e}"),
        }
        // keep the number of simultaneously open files bounded
        regions.release_handles();
    }
    if let Some(counts) = counts {
        *counts = local_counts;
    }
    Ok(schema)
}

fn local_scan<S: RegionSource>(
    registry: &DatabaseRegistry,
    regions: &mut RegionMap<S>,
    rank: usize,
    size: usize,
    read_all_files: bool,
) -> Result<LocalScan, MeshDbError> {
    let mut handles = Vec::new();
    for database in registry.names() {
        let mut mine = registry.handles_for(database, rank, size);
        if !read_all_files {
            mine.truncate(if rank == ELECTED_RANK { 1 } else { 0 });
        }
        handles.extend(mine);
    }
    let mut counts = BTreeMap::new();
    let schema = scan_handles(registry, regions, &handles, Some(&mut counts))?;
    Ok(LocalScan { schema, counts })
}

/// Scan this rank's files and union the result across all ranks.
///
/// With `read_all_files == false` only the elected rank reads, and only the
/// first file of each database. Fails with
/// [`MeshDbError::DatabaseUnreadable`] on every rank when no rank managed to
/// open any file of some database.
pub fn synchronize<S, C>(
    registry: &DatabaseRegistry,
    regions: &mut RegionMap<S>,
    coll: &mut Collective<C>,
    read_all_files: bool,
) -> Result<SyncedSchema, MeshDbError>
where
    S: RegionSource,
    C: Communicator,
{
    let rank = coll.rank();
    let size = coll.size();

    let local = local_scan(registry, regions, rank, size, read_all_files);
    let scans = coll.all_gather(local)?;
    let mut schema = EntitySchema::new();
    let mut totals: BTreeMap<String, OpenCounts> = BTreeMap::new();
    for scan in scans {
        schema.merge(scan.schema);
        for (database, c) in scan.counts {
            let total = totals.entry(database).or_default();
            total.attempted += c.attempted;
            total.opened += c.opened;
        }
    }
    // every rank sees the same totals, so every rank fails the same way
    if let Some((database, _)) = totals.iter().find(|(_, c)| c.attempted > 0 && c.opened == 0) {
        return Err(MeshDbError::DatabaseUnreadable(database.clone()));
    }

    let format = coll.broadcast_scalar(ELECTED_RANK, regions.format().to_wire())?;
    let format = DatabaseFormat::from_wire(format);
    regions.set_format(format);
    schema.log_summary();
    Ok(SyncedSchema { schema, format })
}

/// Rescan the files behind `handles` and report whether any entity is
/// missing from `known`. Purely local.
pub fn needs_schema_refresh<S: RegionSource>(
    known: &EntitySchema,
    registry: &DatabaseRegistry,
    regions: &mut RegionMap<S>,
    handles: &[DatabaseHandle],
) -> Result<bool, MeshDbError> {
    let seen = scan_handles(registry, regions, handles, None)?;
    Ok(!seen.entities_subset_of(known))
}
