//! Interpolation search over ordered, contiguous ranges
//!
//! Given a target offset, a run of candidate indices and the byte range they
//! jointly cover, guess the index by linear interpolation, probe its range
//! and narrow both bounds. Volumes and segments are usually close to equal in
//! size, so the first guess is almost always right.
//!
//! An offset sitting exactly on the boundary between two ranges belongs to
//! the later one. Every probe shrinks the candidate indices, so a lookup that
//! reports ranges inconsistent with the bounds fails instead of looping.

use std::future::Future;
use std::ops::Range;

use crate::error::IndexError;
use crate::range::LongRange;

enum Step {
    Found(usize),
    Narrow(Range<usize>, LongRange),
}

fn guess(target: i64, indices: &Range<usize>, bytes: LongRange) -> Result<usize, IndexError> {
    if indices.is_empty() || !bytes.contains(target) {
        return Err(IndexError::OffsetOutOfRange {
            offset: target,
            range: bytes,
        });
    }
    let span = indices.len();
    let fraction = (target - bytes.start) as f64 / bytes.count() as f64;
    let offset = ((fraction * span as f64) as usize).min(span - 1);
    Ok(indices.start + offset)
}

fn narrow(
    target: i64,
    indices: &Range<usize>,
    bytes: LongRange,
    index: usize,
    probed: LongRange,
) -> Result<Step, IndexError> {
    if probed.end < probed.start || !bytes.contains_range(&probed) {
        return Err(IndexError::InconsistentRanges {
            index,
            reason: format!("range {probed} escapes search bounds {bytes}"),
        });
    }
    if probed.contains(target) {
        return Ok(Step::Found(index));
    }
    if target < probed.start {
        Ok(Step::Narrow(
            indices.start..index,
            LongRange {
                start: bytes.start,
                end: probed.start,
            },
        ))
    } else {
        Ok(Step::Narrow(
            index + 1..indices.end,
            LongRange {
                start: probed.end,
                end: bytes.end,
            },
        ))
    }
}

fn gap_error(target: i64, indices: &Range<usize>, bytes: LongRange) -> IndexError {
    IndexError::InconsistentRanges {
        index: indices.start,
        reason: format!("no candidate left for offset {target} in {bytes}"),
    }
}

/// Find the index in `indices` whose range contains `target`
///
/// `bytes` is the range covered by all of `indices` together and `lookup`
/// returns the range of a single index.
pub fn find<E, F>(
    target: i64,
    indices: Range<usize>,
    bytes: LongRange,
    mut lookup: F,
) -> Result<usize, E>
where
    E: From<IndexError>,
    F: FnMut(usize) -> Result<LongRange, E>,
{
    if indices.is_empty() || !bytes.contains(target) {
        return Err(IndexError::OffsetOutOfRange {
            offset: target,
            range: bytes,
        }
        .into());
    }

    let mut indices = indices;
    let mut bytes = bytes;
    loop {
        if indices.is_empty() {
            return Err(gap_error(target, &indices, bytes).into());
        }
        let index = guess(target, &indices, bytes)?;
        let probed = lookup(index)?;
        match narrow(target, &indices, bytes, index, probed)? {
            Step::Found(found) => return Ok(found),
            Step::Narrow(next_indices, next_bytes) => {
                indices = next_indices;
                bytes = next_bytes;
            }
        }
    }
}

/// Async variant of [`find`] for lookups that may fetch data
pub async fn find_async<E, F, Fut>(
    target: i64,
    indices: Range<usize>,
    bytes: LongRange,
    mut lookup: F,
) -> Result<usize, E>
where
    E: From<IndexError>,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<LongRange, E>>,
{
    if indices.is_empty() || !bytes.contains(target) {
        return Err(IndexError::OffsetOutOfRange {
            offset: target,
            range: bytes,
        }
        .into());
    }

    let mut indices = indices;
    let mut bytes = bytes;
    loop {
        if indices.is_empty() {
            return Err(gap_error(target, &indices, bytes).into());
        }
        let index = guess(target, &indices, bytes)?;
        let probed = lookup(index).await?;
        match narrow(target, &indices, bytes, index, probed)? {
            Step::Found(found) => return Ok(found),
            Step::Narrow(next_indices, next_bytes) => {
                indices = next_indices;
                bytes = next_bytes;
            }
        }
    }
}

/// Search a slice of contiguous ranges starting at `ranges[0].start`
pub fn find_in(ranges: &[LongRange], target: i64) -> Result<usize, IndexError> {
    let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
        return Err(IndexError::OffsetOutOfRange {
            offset: target,
            range: LongRange::default(),
        });
    };
    let bytes = LongRange {
        start: first.start,
        end: last.end,
    };
    find(target, 0..ranges.len(), bytes, |i| Ok(ranges[i]))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn contiguous(sizes: &[i64]) -> Vec<LongRange> {
        let mut start = 0;
        sizes
            .iter()
            .map(|&size| {
                let range = LongRange {
                    start,
                    end: start + size,
                };
                start = range.end;
                range
            })
            .collect()
    }

    #[test]
    fn test_uniform_sizes_hit_first_guess() {
        let ranges = contiguous(&[100; 10]);
        let mut probes = 0;
        let found = find::<IndexError, _>(555, 0..10, LongRange { start: 0, end: 1000 }, |i| {
            probes += 1;
            Ok(ranges[i])
        })
        .unwrap();
        assert_eq!(found, 5);
        assert_eq!(probes, 1);
    }

    #[test]
    fn test_boundary_selects_later_part() {
        let ranges = contiguous(&[10, 20, 30]);
        assert_eq!(find_in(&ranges, 0).unwrap(), 0);
        assert_eq!(find_in(&ranges, 9).unwrap(), 0);
        assert_eq!(find_in(&ranges, 10).unwrap(), 1);
        assert_eq!(find_in(&ranges, 30).unwrap(), 2);
        assert_eq!(find_in(&ranges, 59).unwrap(), 2);
    }

    #[test]
    fn test_empty_ranges_are_skipped() {
        let ranges = contiguous(&[10, 0, 0, 10]);
        assert_eq!(find_in(&ranges, 10).unwrap(), 3);
    }

    #[test]
    fn test_out_of_range() {
        let ranges = contiguous(&[10, 10]);
        assert!(matches!(
            find_in(&ranges, 20),
            Err(IndexError::OffsetOutOfRange { offset: 20, .. })
        ));
        assert!(matches!(
            find_in(&ranges, -1),
            Err(IndexError::OffsetOutOfRange { .. })
        ));
        assert!(find_in(&[], 0).is_err());
    }

    #[test]
    fn test_gap_is_reported_not_looped() {
        // Second range leaves a hole at [10, 15)
        let ranges = [
            LongRange { start: 0, end: 10 },
            LongRange { start: 15, end: 20 },
        ];
        let err = find_in(&ranges, 12).unwrap_err();
        assert!(matches!(err, IndexError::InconsistentRanges { .. }));
    }

    #[test]
    fn test_escaping_range_is_rejected() {
        let err = find::<IndexError, _>(5, 0..2, LongRange { start: 0, end: 10 }, |_| {
            Ok(LongRange { start: 0, end: 50 })
        })
        .unwrap_err();
        assert!(matches!(err, IndexError::InconsistentRanges { .. }));
    }

    #[tokio::test]
    async fn test_find_async_matches_sync() {
        let ranges = contiguous(&[700, 700, 700, 123]);
        let total = LongRange {
            start: 0,
            end: 2223,
        };
        for target in [0, 699, 700, 2100, 2222] {
            let expected = find_in(&ranges, target).unwrap();
            let found = find_async::<IndexError, _, _>(target, 0..4, total, |i| {
                let range = ranges[i];
                async move { Ok(range) }
            })
            .await
            .unwrap();
            assert_eq!(found, expected);
        }
    }

    proptest! {
        /// The returned range always contains the offset
        #[test]
        fn prop_found_range_contains_offset(
            sizes in prop::collection::vec(0i64..5_000, 1..64),
            pick in any::<prop::sample::Index>(),
        ) {
            let ranges = contiguous(&sizes);
            let total = ranges.last().map_or(0, |r| r.end);
            prop_assume!(total > 0);
            let target = pick.index(total as usize) as i64;

            let found = find_in(&ranges, target).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(ranges[found].contains(target));
        }

        /// Boundary offsets select the first non-empty range starting there
        #[test]
        fn prop_boundaries_pick_later_range(
            sizes in prop::collection::vec(1i64..5_000, 2..64),
        ) {
            let ranges = contiguous(&sizes);
            for (i, range) in ranges.iter().enumerate().skip(1) {
                let found = find_in(&ranges, range.start)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(found, i);
            }
        }
    }
}
