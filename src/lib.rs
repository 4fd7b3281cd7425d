#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// Construction-time settings and compile-time layout constants.
///
/// `BAG_SIZE` and the default `FILL_PERCENT` are picked by Cargo features;
/// the rest of [`Config`] is chosen per table.
pub mod config;

/// A hash table keyed by caller-supplied 64-bit hashes.
///
/// This module provides the [`HashTable`] itself along with its iterators
/// and statistics types.
pub mod hash_table;

mod mix;

pub mod salt;

pub use config::Config;
pub use config::ConfigError;
pub use hash_table::HashTable;
pub use hash_table::Probe;
pub use hash_table::TableStats;
