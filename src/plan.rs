//! Range planning: splitting a resource into fixed-size byte ranges.

use crate::error::DownloadError;
use crate::types::Range;

/// Number of ranges needed to cover `length` bytes, `ceil(length / range_size)`.
///
/// Fails when the count does not fit the platform's `usize`.
pub fn part_count(length: u64, range_size: u64) -> Result<usize, DownloadError> {
    if range_size == 0 {
        return Ok(0);
    }
    let parts = length.div_ceil(range_size);
    usize::try_from(parts).map_err(|_| {
        DownloadError::InvalidConfig(format!(
            "{} ranges of {} bytes do not fit this platform; use a larger range size",
            parts, range_size
        ))
    })
}

/// Builds `parts` contiguous ranges of `range_size` bytes over `[0, length)`.
///
/// The last range is stretched (or shortened) so it ends at `length - 1`.
/// Returns an empty plan for an empty resource.
pub fn plan_ranges(length: u64, range_size: u64, parts: usize) -> Vec<Range> {
    if length == 0 || parts == 0 {
        return Vec::new();
    }

    let mut ranges = Vec::with_capacity(parts);
    for i in 0..parts as u64 {
        let start = i * range_size;
        let end = if i == parts as u64 - 1 {
            length - 1
        } else {
            (i + 1) * range_size - 1
        };
        ranges.push(Range::bounded(start, end));
    }
    ranges
}

/// Plan for a resource of known length: `part_count` ranges of `range_size`.
pub fn plan(length: u64, range_size: u64) -> Result<Vec<Range>, DownloadError> {
    Ok(plan_ranges(length, range_size, part_count(length, range_size)?))
}

/// Drops exhausted ranges, keeping the order and bounds of the rest.
pub fn compact(ranges: &[Range]) -> Vec<Range> {
    ranges.iter().filter(|r| !r.is_exhausted()).copied().collect()
}
