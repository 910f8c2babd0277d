//! Tag registry and rule catalog.
//!
//! Tags live under `TG#<key>#<value>` so one prefix scan returns every value
//! registered for a key. Rules live under `RL#<uuid>`; the tag a rule
//! assigns must already be registered, and no two rules may share the same
//! structure.

use std::collections::BTreeMap;

use redb::WriteTransaction;
use tracing::debug;

use mds_core::keys::{self, EntityKind, RangeKey};

use crate::error::{StateError, StateResult};
use crate::item;
use crate::store::{self, StateStore};
use crate::types::*;

impl StateStore {
    // ── Tags ───────────────────────────────────────────────────────

    /// Register a `(key, value)` tag.
    pub fn create_tag(&self, mut tag: TagDefinition) -> StateResult<TagDefinition> {
        if tag.key.trim().is_empty() || tag.value.trim().is_empty() {
            return Err(StateError::invalid("tag", "key and value are required"));
        }
        let key = tag.range_key().item_key();
        let txn = self.begin_write()?;
        if store::exists_in(&txn, &key)? {
            return Err(StateError::Conflict(format!("tag {}", tag.pair())));
        }
        let now = store::epoch_secs();
        tag.created_at = now;
        tag.updated_at = now;
        store::put_in(&txn, &key, item::to_item(&tag)?)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tag = %tag.pair(), "tag registered");
        Ok(tag)
    }

    /// Tag definitions for `key`; all of its values, or exactly `value` when given.
    pub fn get_tag(&self, key: &str, value: Option<&str>) -> StateResult<Vec<TagDefinition>> {
        match value.filter(|v| !v.is_empty()) {
            Some(value) => Ok(self
                .get_item(&RangeKey::tag(key, value).item_key())?
                .map(|item| item::from_item(&item))
                .transpose()?
                .into_iter()
                .collect()),
            None => self
                .query(tag_partition(), &keys::tag_key_prefix(key))?
                .iter()
                .map(item::from_item)
                .collect(),
        }
    }

    /// Whether the pair is registered.
    pub fn tag_exists(&self, tag: &TagPair) -> StateResult<bool> {
        Ok(self
            .get_item(&RangeKey::tag(&tag.key, &tag.value).item_key())?
            .is_some())
    }

    /// All registered tags grouped by key, in key order.
    pub fn list_tags(&self) -> StateResult<Vec<TagGroup>> {
        let definitions: Vec<TagDefinition> = self
            .query(tag_partition(), "")?
            .iter()
            .map(item::from_item)
            .collect::<StateResult<_>>()?;
        Ok(group_tags(definitions))
    }

    /// Remove one tag definition. Services that already carry the pair keep it.
    pub fn delete_tag(&self, key: &str, value: &str) -> StateResult<bool> {
        self.remove(&RangeKey::tag(key, value).item_key())
    }

    // ── Rules ──────────────────────────────────────────────────────

    /// Create a rule after shape, target-tag and uniqueness checks.
    pub fn create_rule(&self, mut rule: Rule) -> StateResult<Rule> {
        rule.validate().map_err(|reason| StateError::invalid("rule", reason))?;
        rule.uuid = store::new_uuid();
        self.insert_record(rule, |txn, rule| check_rule(txn, rule))
    }

    pub fn get_rule(&self, uuid: &str) -> StateResult<Option<Rule>> {
        self.get_record(&RangeKey::rule(uuid))
    }

    /// Every stored rule, including ones that would no longer validate.
    pub fn list_rules(&self) -> StateResult<Vec<Rule>> {
        self.list_records()
    }

    pub fn update_rule(&self, uuid: &str, rule: Rule) -> StateResult<Rule> {
        rule.validate().map_err(|reason| StateError::invalid("rule", reason))?;
        self.replace_record(uuid, rule, |txn, rule| check_rule(txn, rule))
    }

    pub fn delete_rule(&self, uuid: &str) -> StateResult<bool> {
        self.remove(&RangeKey::rule(uuid).item_key())
    }
}

fn tag_partition() -> &'static str {
    keys::partition_key(EntityKind::Tag).unwrap_or("TG")
}

fn check_rule(txn: &WriteTransaction, rule: &Rule) -> StateResult<()> {
    let target = rule.target_tag();
    if !store::exists_in(txn, &RangeKey::tag(&target.key, &target.value).item_key())? {
        return Err(StateError::invalid("rule", format!("unregistered tag {target}")));
    }
    let pk = keys::partition_key(EntityKind::Rule).unwrap_or("RL");
    for existing in store::scan_in(txn, pk, "")? {
        let existing: Rule = item::from_item(&existing)?;
        if existing.uuid != rule.uuid && existing.same_structure(rule) {
            return Err(StateError::Conflict(format!("rule {} has the same structure", existing.uuid)));
        }
    }
    Ok(())
}

fn group_tags(definitions: Vec<TagDefinition>) -> Vec<TagGroup> {
    let mut groups: BTreeMap<String, TagGroup> = BTreeMap::new();
    for def in definitions {
        let group = groups.entry(def.key.clone()).or_insert_with(|| TagGroup {
            key: def.key.clone(),
            values: Vec::new(),
            created_at: def.created_at,
            updated_at: def.updated_at,
        });
        group.created_at = group.created_at.min(def.created_at);
        group.updated_at = group.updated_at.max(def.updated_at);
        group.values.push(def.value);
    }
    groups.into_values().collect()
}
