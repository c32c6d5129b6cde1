//! Contiguous, balanced assignment of files to readers.
//!
//! `n_files` files are split into `num_readers` runs of consecutive indices.
//! The first `n_files % num_readers` readers get one extra file. Adjacent
//! partition files usually live next to each other on disk, so contiguous
//! runs keep each reader's I/O local.

use std::ops::Range;

/// Half-open range of file indices owned by `reader`.
///
/// Empty when `reader >= num_readers` or when there are fewer files than
/// readers and this reader's share is zero.
pub fn file_range(n_files: usize, reader: usize, num_readers: usize) -> Range<usize> {
    if num_readers == 0 || reader >= num_readers {
        return 0..0;
    }
    let div = n_files / num_readers;
    let modulo = n_files % num_readers;

    let start = |r: usize| {
        if r < modulo {
            r * (div + 1)
        } else {
            modulo * (div + 1) + (r - modulo) * div
        }
    };
    start(reader)..start(reader + 1)
}

/// File indices owned by `reader`; see [`file_range`].
pub fn assign(n_files: usize, reader: usize, num_readers: usize) -> Vec<usize> {
    file_range(n_files, reader, num_readers).collect()
}

/// Reader that owns `file_index`, if any.
pub fn owner_of(file_index: usize, n_files: usize, num_readers: usize) -> Option<usize> {
    if num_readers == 0 || file_index >= n_files {
        return None;
    }
    let div = n_files / num_readers;
    let modulo = n_files % num_readers;
    let boundary = modulo * (div + 1);
    if file_index < boundary {
        Some(file_index / (div + 1))
    } else if div == 0 {
        None
    } else {
        Some(modulo + (file_index - boundary) / div)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn second_half_of_four_files() {
        assert_eq!(assign(4, 1, 2), vec![2, 3]);
        assert_eq!(assign(4, 0, 2), vec![0, 1]);
    }

    #[test]
    fn remainder_goes_to_low_ranks() {
        assert_eq!(assign(5, 0, 3), vec![0, 1]);
        assert_eq!(assign(5, 1, 3), vec![2, 3]);
        assert_eq!(assign(5, 2, 3), vec![4]);
    }

    #[test]
    fn more_readers_than_files() {
        assert_eq!(assign(2, 0, 4), vec![0]);
        assert_eq!(assign(2, 1, 4), vec![1]);
        assert!(assign(2, 2, 4).is_empty());
        assert!(assign(2, 3, 4).is_empty());
    }

    #[test]
    fn out_of_range_reader_gets_nothing() {
        assert!(assign(8, 4, 4).is_empty());
        assert!(assign(8, 0, 0).is_empty());
    }

    proptest! {
        #[test]
        fn assignment_is_a_contiguous_partition(n_files in 0usize..200, readers in 1usize..40) {
            let mut seen = vec![0u32; n_files];
            for r in 0..readers {
                let ids = assign(n_files, r, readers);
                for w in ids.windows(2) {
                    prop_assert_eq!(w[1], w[0] + 1);
                }
                let len = ids.len();
                prop_assert!(len == n_files / readers || len == n_files / readers + 1);
                for i in ids {
                    seen[i] += 1;
                    prop_assert_eq!(owner_of(i, n_files, readers), Some(r));
                }
            }
            prop_assert!(seen.iter().all(|&c| c == 1));
        }
    }
}
