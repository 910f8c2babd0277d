//! mds-core — key codec and configuration shared by the mds crates.

pub mod config;
pub mod keys;

pub use config::{ErrorPolicy, MdsConfig};
pub use keys::{EntityKind, ItemKey, RangeKey};
