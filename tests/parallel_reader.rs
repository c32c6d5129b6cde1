mod util;
use util::*;

use mesh_dbreader::io::memory::MemoryRegionSource;
use mesh_dbreader::io::{AssemblyMember, AssemblyRecord, EntityKind};
use mesh_dbreader::mesh_error::MeshDbError;
use mesh_dbreader::prelude::*;
use std::sync::Arc;

#[test]
fn schema_union_across_shards() {
    let results = run_world(2, |comm| {
        let src = uneven_partitions();
        let mut reader = MeshDbReader::new(&src, comm);
        reader.set_file_names(src.file_names());
        let snap = reader.update_information().unwrap();
        (
            snap.schema.contains_entity(EntityKind::ElementBlock, "block_2"),
            src.opened_files(),
        )
    });
    assert!(results.iter().all(|(has_block_2, _)| *has_block_2));
    assert_eq!(results[0].1, vec!["can.e.2.0".to_string()]);
    assert_eq!(results[1].1, vec!["can.e.2.1".to_string()]);
}

#[test]
fn trusting_first_file_misses_uneven_blocks() {
    let results = run_world(2, |comm| {
        let src = uneven_partitions();
        let options = ReaderOptions {
            read_all_files_to_determine_structure: false,
            ..Default::default()
        };
        let mut reader = MeshDbReader::with_options(&src, comm, options);
        reader.set_file_names(src.file_names());
        let snap = reader.update_information().unwrap();
        (
            snap.schema.contains_entity(EntityKind::ElementBlock, "block_2"),
            src.open_count(),
        )
    });
    assert_eq!(results, vec![(false, 1), (false, 0)]);
}

#[test]
fn every_rank_builds_the_same_snapshot() {
    let src = restarted_run();
    let snaps = run_world(3, |comm| {
        let mut reader = MeshDbReader::new(&src, comm);
        reader.set_file_names(src.file_names());
        reader.update_information().unwrap()
    });
    let first = Arc::clone(&snaps[0]);
    assert_eq!(first.registry.len(), 2);
    assert_eq!(first.timeline.timestep_values(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
    for snap in &snaps[1..] {
        assert_eq!(**snap, *first);
    }
}

#[test]
fn read_pass_splits_files_contiguously() {
    let src = restarted_run();
    let passes = run_world(3, |comm| {
        let mut reader = MeshDbReader::new(&src, comm);
        reader.set_file_names(src.file_names());
        let rank = reader.rank();
        let size = reader.size();
        let mut files = Vec::new();
        let summary = reader
            .read_pass(rank, size, 0, |req, _, _| {
                if !files.contains(&req.file.to_string()) {
                    files.push(req.file.to_string());
                }
                Ok(())
            })
            .unwrap();
        (summary.files, files)
    });
    assert_eq!(passes[0], (2, vec!["run.e.4.0".to_string(), "run.e.4.1".to_string()]));
    assert_eq!(passes[1], (1, vec!["run.e.4.2".to_string()]));
    assert_eq!(passes[2], (1, vec!["run.e.4.3".to_string()]));
}

#[test]
fn overlapping_restart_serves_shared_time() {
    let src = restarted_run();
    let handles = run_world(2, |comm| {
        let mut reader = MeshDbReader::new(&src, comm);
        reader.set_file_names(src.file_names());
        let rank = reader.rank();
        let handles = reader.resolve_handles(rank, 2, 2).unwrap();
        handles
            .iter()
            .map(|h| reader.raw_file_name(h, true).unwrap())
            .collect::<Vec<_>>()
    });
    assert_eq!(handles[0], vec!["run.e-s.0002.4.0", "run.e-s.0002.4.1"]);
    assert_eq!(handles[1], vec!["run.e-s.0002.4.2", "run.e-s.0002.4.3"]);
}

#[test]
fn assembly_is_broadcast_from_the_elected_rank() {
    let trees = run_world(2, |comm| {
        let mut src = uneven_partitions();
        if comm.rank() == 0 {
            let first = blocks(&[0.0, 0.1], &[(1, "block_1")]).with_assembly(AssemblyRecord {
                name: "solids".into(),
                members: vec![AssemblyMember::Entity(EntityKind::ElementBlock, "block_2".into())],
            });
            src.insert("can.e.2.0", first);
        }
        let mut reader = MeshDbReader::new(&src, comm);
        reader.set_file_names(src.file_names());
        reader.update_information().unwrap().assembly.clone()
    });
    assert_eq!(trees[0], trees[1]);
    let tree = trees[0].assembly.as_ref().unwrap();
    let solids = tree.find_path(&["solids"]).unwrap();
    assert_eq!(tree.dataset_indices_below(solids), vec![1]);
    assert_ne!(trees[0].tag, 0);
}

#[test]
fn failure_on_the_elected_rank_fails_everyone() {
    let errors = run_world(2, |comm| {
        let src = uneven_partitions();
        let mut reader = MeshDbReader::new(&src, comm);
        reader.set_file_names(["can.e.2.0", "can.e.2.1", "lost.e"]);
        let err = reader.update_information().unwrap_err();
        (err, reader.snapshot().is_none())
    });
    assert!(matches!(&errors[0].0, MeshDbError::OpenFailed { file, .. } if file == "lost.e"));
    assert!(matches!(errors[1].0, MeshDbError::CollectiveFailed { root: 0 }));
    assert!(errors.iter().all(|(_, none)| *none));
}

#[test]
fn inconsistent_names_fail_identically() {
    let errors = run_world(3, |comm| {
        let mut reader = MeshDbReader::new(MemoryRegionSource::new(), comm);
        reader.set_file_names(["a.e.4.0", "a.e.8.1"]);
        reader.update_information().unwrap_err().to_string()
    });
    assert!(errors[0].contains("'a.e.8.1' has incorrect processor-count (8)"));
    assert!(errors.iter().all(|e| *e == errors[0]));
}

#[test]
fn catalyst_name_expands_per_rank() {
    let snaps = run_world(2, |comm| {
        let src = MemoryRegionSource::new()
            .with_file("catalyst.bin.2.0", blocks(&[], &[(1, "grid")]))
            .with_file("catalyst.bin.2.1", blocks(&[], &[(1, "grid")]));
        let mut reader = MeshDbReader::new(&src, comm);
        reader.set_file_names(["catalyst.bin"]);
        reader.update_information().unwrap()
    });
    let info = snaps[1].registry.get("catalyst.bin").unwrap();
    assert_eq!(info.process_count, 2);
    assert_eq!(snaps[0].file_names.len(), 2);
}

#[test]
fn only_the_elected_rank_needs_file_names() {
    let src = restarted_run();
    let snaps = run_world(2, |comm| {
        let rank = comm.rank();
        let mut reader = MeshDbReader::new(&src, comm);
        if rank == 0 {
            reader.set_file_names(src.file_names());
        }
        reader.update_information().map(|s| s.registry.len())
    });
    assert!(snaps.iter().all(|s| matches!(s, Ok(2))));
}

#[test]
fn empty_list_on_the_elected_rank_fails_everyone() {
    let src = restarted_run();
    let errors = run_world(2, |comm| {
        let rank = comm.rank();
        let mut reader = MeshDbReader::new(&src, comm);
        if rank == 1 {
            reader.set_file_names(src.file_names());
        }
        reader.update_information().unwrap_err()
    });
    assert!(matches!(errors[0], MeshDbError::NoFileNames));
    assert!(matches!(errors[1], MeshDbError::CollectiveFailed { root: 0 }));
}
