//! Byte-range index for segmented content
//!
//! Logical files are exposed as [`LogicalNode`]s whose bytes are described by
//! a [`FileLayout`]: an ordered list of [`Part`]s, each pointing at a run of
//! segments and the slice of their concatenated bytes that belongs to the
//! file. [`resolve_offset`] turns a logical offset into part coordinates with
//! the interpolation search in [`search`].
//!
//! ```rust
//! use nzbstream_index::{FileLayout, LongRange, Part, resolve_offset};
//!
//! # fn main() -> Result<(), nzbstream_index::IndexError> {
//! let layout = FileLayout::new(vec![
//!     Part::new(vec!["a@news".into()], LongRange::new(0, 500)?, LongRange::new(20, 500)?)?,
//!     Part::whole(vec!["b@news".into()], 300)?,
//! ]);
//! let resolved = resolve_offset(&layout, 480)?;
//! assert_eq!(resolved.part_index, 1);
//! assert_eq!(resolved.offset_in_part, 0);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod model;
pub mod range;
pub mod resolve;
pub mod search;
pub mod store;

pub use error::{IndexError, IndexResult};
pub use model::{DecryptionParams, FileLayout, LogicalNode, NodeId, NodeKind, Part};
pub use range::LongRange;
pub use resolve::{ResolvedOffset, resolve_node_offset, resolve_offset};
pub use store::{IndexStore, MemoryIndexStore, PendingBatch, PendingEntry, find_path};
