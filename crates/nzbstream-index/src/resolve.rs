//! Logical offset to part coordinates

use crate::error::{IndexError, IndexResult};
use crate::model::{FileLayout, NodeId};
use crate::range::LongRange;
use crate::search;
use crate::store::IndexStore;

/// Where a logical offset lives physically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOffset {
    /// Index into the layout's parts
    pub part_index: usize,
    /// Offset within the concatenated raw bytes of that part's segments
    pub offset_in_part: i64,
    /// The part's position in the logical file
    pub logical_range: LongRange,
}

impl ResolvedOffset {
    /// Bytes of this part's content remaining from the offset
    pub fn remaining_in_part(&self, offset: i64) -> i64 {
        self.logical_range.end - offset
    }
}

/// Resolve `offset` within a file's layout
pub fn resolve_offset(layout: &FileLayout, offset: i64) -> IndexResult<ResolvedOffset> {
    let ranges = layout.logical_ranges();
    let total = LongRange {
        start: 0,
        end: ranges.last().map_or(0, |r| r.end),
    };
    let part_index = search::find(offset, 0..ranges.len(), total, |i| {
        Ok::<_, IndexError>(ranges[i])
    })?;

    let logical_range = ranges[part_index];
    let part = &layout.parts[part_index];
    Ok(ResolvedOffset {
        part_index,
        offset_in_part: part.content_range.start + (offset - logical_range.start),
        logical_range,
    })
}

/// Resolve `offset` within a stored node
pub async fn resolve_node_offset<S>(
    store: &S,
    node: NodeId,
    offset: i64,
) -> IndexResult<ResolvedOffset>
where
    S: IndexStore + ?Sized,
{
    let layout = store
        .layout(node)
        .await?
        .ok_or(IndexError::InvalidNode(node))?;
    resolve_offset(&layout, offset)
}
