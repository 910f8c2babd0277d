//! mds-state — single-table store for the mds catalog.
//!
//! Backed by [redb](https://docs.rs/redb). Services, companies, tag
//! definitions and rules share one physical table keyed by `(PK, SK)`;
//! every committed write also lands in a change log that feeds the tagger.
//!
//! # Architecture
//!
//! Items are attribute-value maps (see [`item`]) serialized as JSON into
//! redb's `&[u8]` value column. A uuid index gives surrogate-id lookups, and
//! range-key prefixes (`TG#<key>#`) give cheap `begins_with` scans.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod catalog;
pub mod error;
pub mod item;
pub mod store;
pub mod stream;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use item::{AttributeValue, Item};
pub use store::StateStore;
pub use stream::{EventKind, StreamBatch, StreamRecord};
pub use types::*;
