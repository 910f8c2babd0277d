//! redb table definitions for the mds state store.
//!
//! `ITEMS` is the single physical table; every entity kind lives in it under
//! a `{PK}|{SK}` key (see `mds_core::keys`). The other tables are the
//! surrogate-id secondary index and the change log.

use redb::TableDefinition;

/// All items keyed by `{PK}|{SK}`, values are JSON attribute-value maps.
pub const ITEMS: TableDefinition<&str, &[u8]> = TableDefinition::new("items");

/// Secondary index `uuid` → `{PK}|{SK}`.
pub const UUID_INDEX: TableDefinition<&str, &str> = TableDefinition::new("uuid_index");

/// Change records keyed by sequence number, values are JSON `StreamRecord`s.
pub const CHANGES: TableDefinition<u64, &[u8]> = TableDefinition::new("changes");

/// Counters (`change_seq`).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const CHANGE_SEQ: &str = "change_seq";
