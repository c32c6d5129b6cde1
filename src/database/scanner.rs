//! Expansion of the user-supplied file list.
//!
//! Runs on the elected rank only; the result is broadcast.
//!
//! - a single `*.ex-timeseries` meta-file lists one file per line (relative
//!   paths resolve against the meta-file's directory, `#` starts a comment);
//! - a single `catalyst.bin` on more than one rank becomes one pseudo file per
//!   rank (`catalyst.bin.<n>.<i>`);
//! - related-file scanning adds every file in the same directory that shares
//!   the restart-family stem.

use crate::database::filename::{decode_filename, family_stem};
use crate::mesh_error::MeshDbError;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Extension of timeseries meta-files.
pub const META_FILE_EXTENSION: &str = "ex-timeseries";

/// Special name that requests in-situ data instead of files.
pub const CATALYST_FILE_NAME: &str = "catalyst.bin";

pub fn is_meta_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(META_FILE_EXTENSION))
}

/// Parse a meta-file's contents.
pub fn parse_meta_file(meta_path: &str, contents: &str) -> BTreeSet<String> {
    let dir = Path::new(meta_path).parent();
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            let p = Path::new(l);
            match dir {
                Some(d) if p.is_relative() && !d.as_os_str().is_empty() => {
                    d.join(p).to_string_lossy().into_owned()
                }
                _ => l.to_string(),
            }
        })
        .collect()
}

/// Read the files listed by a meta-file.
pub fn files_from_meta_file(meta_path: &str) -> Result<BTreeSet<String>, MeshDbError> {
    let contents = fs::read_to_string(meta_path).map_err(|e| MeshDbError::Parse {
        file: meta_path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(parse_meta_file(meta_path, &contents))
}

/// Add every file next to `names` that belongs to the same run.
///
/// Directories that cannot be listed are skipped with a warning.
pub fn related_files(names: &BTreeSet<String>) -> BTreeSet<String> {
    let mut result = names.clone();
    for name in names {
        let path = Path::new(name);
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };
        let Some(file) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        let stem = family_stem(file);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cannot scan '{}' for related files: {e}", dir.display());
                continue;
            }
        };
        for entry in entries.flatten() {
            let Some(candidate) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if candidate != file && family_stem(&candidate) == stem {
                let full = if path.parent().is_some_and(|d| !d.as_os_str().is_empty()) {
                    dir.join(&candidate).to_string_lossy().into_owned()
                } else {
                    candidate
                };
                result.insert(full);
            }
        }
    }
    result
}

/// One pseudo file per rank for in-situ reads.
pub fn catalyst_files(num_ranks: usize) -> BTreeSet<String> {
    (0..num_ranks as u32)
        .map(|i| decode_filename(CATALYST_FILE_NAME, num_ranks as u32, i))
        .collect()
}

/// Apply meta-file, catalyst and related-file expansion.
pub fn expand_file_names(
    names: &BTreeSet<String>,
    num_ranks: usize,
    scan_for_related_files: bool,
) -> Result<BTreeSet<String>, MeshDbError> {
    let single = if names.len() == 1 {
        names.iter().next().map(String::as_str)
    } else {
        None
    };
    match single {
        Some(meta) if is_meta_file(meta) => {
            let listed = files_from_meta_file(meta)?;
            Ok(if scan_for_related_files {
                related_files(&listed)
            } else {
                listed
            })
        }
        Some(CATALYST_FILE_NAME) if num_ranks > 1 => Ok(catalyst_files(num_ranks)),
        _ if scan_for_related_files => Ok(related_files(names)),
        _ => Ok(names.clone()),
    }
}
