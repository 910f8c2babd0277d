//! Change-data-capture records.
//!
//! The store appends one [`StreamRecord`] per write to its change log with
//! both the old and the new image (NEW_AND_OLD_IMAGES). The JSON shape
//! follows the DynamoDB Streams event envelope, so batches captured from
//! a real table can be replayed through the same dispatcher.

use serde::{Deserialize, Serialize};

use mds_core::keys::ItemKey;

use crate::item::{self, Item};

/// What happened to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Modify,
    Remove,
    /// Event names outside INSERT/MODIFY/REMOVE.
    #[serde(other)]
    Unknown,
}

/// A batch as delivered by the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

/// One change of one physical item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventID", default)]
    pub event_id: String,
    #[serde(rename = "eventName")]
    pub event_kind: EventKind,
    #[serde(rename = "dynamodb")]
    pub change: StreamChange,
}

/// Keys plus before/after images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChange {
    #[serde(rename = "Keys", default)]
    pub keys: Item,
    #[serde(rename = "NewImage", default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Item>,
    #[serde(rename = "OldImage", default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Item>,
    #[serde(rename = "SequenceNumber", default)]
    pub sequence_number: String,
}

impl StreamRecord {
    /// Build the record for a write of `key` going from `old` to `new`.
    pub fn new(seq: u64, key: &ItemKey, old: Option<Item>, new: Option<Item>) -> Self {
        let event_kind = match (&old, &new) {
            (None, Some(_)) => EventKind::Insert,
            (Some(_), Some(_)) => EventKind::Modify,
            (_, None) => EventKind::Remove,
        };
        Self {
            event_id: format!("{seq:020}"),
            event_kind,
            change: StreamChange {
                keys: item::key_item(key),
                new_image: new,
                old_image: old,
                sequence_number: seq.to_string(),
            },
        }
    }

    /// Physical key of the changed item, from `Keys` or, failing that, an image.
    pub fn item_key(&self) -> Option<ItemKey> {
        item::item_key(&self.change.keys)
            .or_else(|| self.change.new_image.as_ref().and_then(item::item_key))
            .or_else(|| self.change.old_image.as_ref().and_then(item::item_key))
    }
}
