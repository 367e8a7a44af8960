//! Compact report storage.
//!
//! A compact file holds the complete position set of one report in a
//! versioned fixed-width binary layout, independent of the relational stores.
//! Files are written once and only removed by retention.
//!
//! ```ignore
//! use trackfeed::compact::CompactStorage;
//!
//! let storage = CompactStorage::open(&root, Network::Vatsim)?;
//! storage.save(&report, &samples)?;
//! let loaded = storage.load(&report)?;
//! ```

mod saver;
mod storage;
pub mod v1;

pub use saver::{pending_report, save_next};
pub use storage::CompactStorage;
pub use v1::RECORD_LEN;
