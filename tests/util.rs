#![allow(dead_code)]
use mesh_dbreader::algs::communicator::LocalComm;
use mesh_dbreader::io::memory::{EntityDescription, MemoryRegionSource, RegionDescription};
use mesh_dbreader::io::{DatabaseFormat, EntityKind};
use std::path::PathBuf;
use std::time::Duration;

/// Run `f` on every rank of an in-process world, one thread per rank.
///
/// Receives time out after a few seconds so a collective mismatch fails the
/// test instead of hanging it.
pub fn run_world<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let comms = LocalComm::world_with_timeout(size, Some(Duration::from_secs(10)));
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Element-block-only region with the given time axis.
pub fn blocks(times: &[f64], names: &[(u64, &str)]) -> RegionDescription {
    names.iter().fold(
        RegionDescription::new(DatabaseFormat::Exodus).with_times(times),
        |d, &(id, name)| {
            d.with_entity(
                EntityKind::ElementBlock,
                EntityDescription::new(id, name).with_fields(["temperature", "velocity_"]),
            )
        },
    )
}

/// Two spatial partitions where only the second one carries `block_2`.
pub fn uneven_partitions() -> MemoryRegionSource {
    MemoryRegionSource::new()
        .with_file("can.e.2.0", blocks(&[0.0, 0.1], &[(1, "block_1")]))
        .with_file("can.e.2.1", blocks(&[0.0, 0.1], &[(1, "block_1"), (2, "block_2")]))
}

/// Four partitions of one database plus a two-partition restart.
pub fn restarted_run() -> MemoryRegionSource {
    let mut src = MemoryRegionSource::new();
    for r in 0..4 {
        src.insert(
            format!("run.e.4.{r}"),
            blocks(&[0.0, 1.0, 2.0], &[(1, "block_1"), (2, "block_2")]),
        );
        src.insert(
            format!("run.e-s.0002.4.{r}"),
            blocks(&[2.0, 3.0, 4.0], &[(1, "block_1"), (2, "block_2")]),
        );
    }
    src
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mesh-dbreader-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}
