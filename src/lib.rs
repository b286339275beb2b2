#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// The error type for fallible allocation.
pub mod error;

/// A key-value map over the open-addressing table.
///
/// This module provides a `HashMap` that wraps the `HashTable` and provides
/// a key-value interface with configurable hashers, first-wins insertion and
/// generation-checked slot handles.
pub mod hash_map;

/// The open-addressing table with SwissTable-style control bytes.
///
/// The table is generic over its stored item and is driven by caller-supplied
/// hashes and equality predicates, so it can back maps, sets or intrusive
/// indexes alike.
pub mod hash_table;

pub mod raw_slots;

pub use error::TryReserveError;
pub use hash_map::Entry;
pub use hash_map::HashMap;
pub use hash_map::InsertOutcome;
pub use hash_map::Slot;
pub use hash_table::Handle;
pub use hash_table::HashTable;
pub use raw_slots::RawSlots;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used by [`HashMap::new`]: foldhash's randomly
        /// seeded fast hasher.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used by [`HashMap::new`]: the standard library's
        /// randomly seeded SipHash.
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// Placeholder for the default hasher builder when neither the
        /// `foldhash` nor the `std` feature is enabled. It cannot be
        /// constructed; supply a hasher with [`HashMap::with_hasher`].
        pub enum DefaultHashBuilder {}
    }
}
