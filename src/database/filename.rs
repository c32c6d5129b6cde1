//! File-name grammar for partitioned and restarted databases.
//!
//! - spatial partition suffix: `<base>.<processCount>.<rank>`
//! - restart suffix, inserted before the partition suffix: `<stem>-s.<n>`
//! - combined: `<stem>-s.<n>.<processCount>.<rank>`
//!
//! When formatting, the rank is zero-padded to the digit width of the
//! processor count (`can.e.64.03`) and restart numbers to four digits.

use std::path::Path;

/// A file name split into its database base and optional partition slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedName {
    pub base: String,
    /// `(process_count, rank)` when the name carries a partition suffix.
    pub partition: Option<(u32, u32)>,
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Split a trailing `.<processCount>.<rank>` suffix off `name`.
///
/// Names without the suffix (or with out-of-range numbers) are their own
/// base with no partition.
pub fn classify(name: &str) -> ClassifiedName {
    let unpartitioned = || ClassifiedName {
        base: name.to_string(),
        partition: None,
    };
    let Some((rest, rank)) = name.rsplit_once('.') else {
        return unpartitioned();
    };
    let Some((base, count)) = rest.rsplit_once('.') else {
        return unpartitioned();
    };
    if !all_digits(rank) || !all_digits(count) {
        return unpartitioned();
    }
    match (count.parse::<u32>(), rank.parse::<u32>()) {
        (Ok(count), Ok(rank)) => ClassifiedName {
            base: base.to_string(),
            partition: Some((count, rank)),
        },
        _ => unpartitioned(),
    }
}

fn number_width(n: u32) -> usize {
    n.to_string().len()
}

/// Physical file name of partition `rank` out of `process_count`.
pub fn decode_filename(base: &str, process_count: u32, rank: u32) -> String {
    let width = number_width(process_count);
    format!("{base}.{process_count}.{rank:0width$}")
}

/// Split a trailing `-s.<n>` restart suffix off a database base.
pub fn split_restart(base: &str) -> (&str, Option<u32>) {
    if let Some(idx) = base.rfind("-s.") {
        let digits = &base[idx + 3..];
        if all_digits(digits) {
            if let Ok(n) = digits.parse::<u32>() {
                return (&base[..idx], Some(n));
            }
        }
    }
    (base, None)
}

/// Database base of restart `restart` of `stem`.
pub fn format_restart(stem: &str, restart: u32) -> String {
    format!("{stem}-s.{restart:04}")
}

/// Stem shared by every partition and restart of one simulation run.
pub fn family_stem(name: &str) -> String {
    let classified = classify(name);
    let (stem, _) = split_restart(&classified.base);
    stem.to_string()
}

/// File-name component of a path, for short messages.
pub fn short_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(path)
}
