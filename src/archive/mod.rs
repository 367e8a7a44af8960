//! Track compaction and archival.
//!
//! [`Compactor`] drives one snapshot report at a time through the live
//! tracks; [`ArchiveWriter`] persists the checkpoints it finds.

pub mod compactor;
pub mod writer;

pub use compactor::{Compactor, CycleStats};
pub use writer::{ArchiveOutcome, ArchiveWriter};
