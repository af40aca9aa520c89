// Per-document structural state: the block index and the dirty tracker.

pub mod block_index;
pub mod dirty;

pub use block_index::{block_annotation_map, BlockIndex, BlockIndexEntry, BlockInput};
pub use dirty::{DirtyRegion, DirtyRegionTracker, DirtyTrackerStats};
