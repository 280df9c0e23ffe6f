//! Volume ordering across a RAR set

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::{FormatError, FormatResult};

/// Resolve the final part number of each volume
///
/// `numbers[i]` holds the number found in volume `i`'s headers and the one
/// derived from its filename. When both are present for several volumes
/// they usually disagree by a constant offset; the most common offset is
/// applied to every header number so both sources land in filename space.
/// Volumes without a header number keep their filename number.
///
/// Returns one resolved number per input volume, in input order.
pub fn resolve_part_order(numbers: &[(Option<i32>, Option<i32>)]) -> FormatResult<Vec<i32>> {
    let mut votes: BTreeMap<i32, usize> = BTreeMap::new();
    for (header, filename) in numbers {
        if let (Some(h), Some(f)) = (header, filename) {
            *votes.entry(h - f).or_default() += 1;
        }
    }
    // ties go to the smallest offset
    let delta = votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map_or(0, |(delta, _)| *delta);
    if delta != 0 {
        debug!("Normalising RAR header volume numbers by {}", delta);
    }

    let mut seen = HashSet::with_capacity(numbers.len());
    numbers
        .iter()
        .enumerate()
        .map(|(index, pair)| {
            let resolved = match *pair {
                (Some(header), _) => header - delta,
                (None, Some(filename)) => filename,
                (None, None) => {
                    return Err(FormatError::MissingVolumeNumber(format!("volume #{index}")));
                }
            };
            if !seen.insert(resolved) {
                return Err(FormatError::DuplicateVolume(resolved));
            }
            Ok(resolved)
        })
        .collect()
}
