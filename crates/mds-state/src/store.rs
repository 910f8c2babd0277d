//! StateStore — redb-backed single-table persistence for mds.
//!
//! Every entity kind lives in the `ITEMS` table under its `{PK}|{SK}` key.
//! Each write transaction also maintains the uuid secondary index and
//! appends a change record (old and new image) to the change log, so the
//! tagger sees exactly one CDC record per committed write.
//!
//! redb serialises write transactions. Read-check-write sequences such as
//! the conditional tag append therefore cannot interleave with another
//! writer touching the same item.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use mds_core::keys::{EntityKind, ItemKey, RangeKey};

use crate::error::{StateError, StateResult};
use crate::item::{self, AttributeValue, Item};
use crate::stream::StreamRecord;
use crate::tables::*;
use crate::types::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// A uuid-addressed record kind (service, company, rule).
pub(crate) trait Stored: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn range_key(&self) -> RangeKey;
    fn uuid(&self) -> &str;
    fn set_uuid(&mut self, uuid: String);
    fn created_at(&self) -> u64;
    fn set_timestamps(&mut self, created_at: u64, updated_at: u64);
}

impl Stored for Service {
    const KIND: EntityKind = EntityKind::Service;

    fn range_key(&self) -> RangeKey {
        Service::range_key(self)
    }
    fn uuid(&self) -> &str {
        &self.uuid
    }
    fn set_uuid(&mut self, uuid: String) {
        self.uuid = uuid;
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
    fn set_timestamps(&mut self, created_at: u64, updated_at: u64) {
        self.created_at = created_at;
        self.updated_at = updated_at;
    }
}

impl Stored for Company {
    const KIND: EntityKind = EntityKind::Company;

    fn range_key(&self) -> RangeKey {
        Company::range_key(self)
    }
    fn uuid(&self) -> &str {
        &self.uuid
    }
    fn set_uuid(&mut self, uuid: String) {
        self.uuid = uuid;
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
    fn set_timestamps(&mut self, created_at: u64, updated_at: u64) {
        self.created_at = created_at;
        self.updated_at = updated_at;
    }
}

impl Stored for Rule {
    const KIND: EntityKind = EntityKind::Rule;

    fn range_key(&self) -> RangeKey {
        Rule::range_key(self)
    }
    fn uuid(&self) -> &str {
        &self.uuid
    }
    fn set_uuid(&mut self, uuid: String) {
        self.uuid = uuid;
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
    fn set_timestamps(&mut self, created_at: u64, updated_at: u64) {
        self.created_at = created_at;
        self.updated_at = updated_at;
    }
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ITEMS).map_err(map_err!(Table))?;
        txn.open_table(UUID_INDEX).map_err(map_err!(Table))?;
        txn.open_table(CHANGES).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub(crate) fn begin_write(&self) -> StateResult<WriteTransaction> {
        self.db.begin_write().map_err(map_err!(Transaction))
    }

    // ── Items ──────────────────────────────────────────────────────

    /// Raw item by physical key.
    pub fn get_item(&self, key: &ItemKey) -> StateResult<Option<Item>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
        read_item(&table, &key.storage_key())
    }

    /// Raw item by surrogate id, via the uuid index.
    pub fn get_item_by_uuid(&self, uuid: &str) -> StateResult<Option<(ItemKey, Item)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let storage_key = {
            let index = txn.open_table(UUID_INDEX).map_err(map_err!(Table))?;
            match index.get(uuid).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(None),
            }
        };
        let table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
        let Some(item) = read_item(&table, &storage_key)? else {
            return Ok(None);
        };
        let key = ItemKey::from_storage_key(&storage_key)
            .ok_or_else(|| StateError::Read(format!("malformed index entry {storage_key}")))?;
        Ok(Some((key, item)))
    }

    /// All items of one partition (`SR`, `CM`, `TG`, `RL`), optionally
    /// narrowed by a range-key prefix.
    pub fn query(&self, pk: &str, sk_prefix: &str) -> StateResult<Vec<Item>> {
        let prefix = format!("{}{}", ItemKey::partition_prefix(pk), sk_prefix);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
        scan_prefix(&table, &prefix)
    }

    pub(crate) fn get_record<T: Stored>(&self, key: &RangeKey) -> StateResult<Option<T>> {
        self.get_item(&key.item_key())?
            .map(|item| item::from_item(&item))
            .transpose()
    }

    pub(crate) fn get_record_by_uuid<T: Stored>(&self, uuid: &str) -> StateResult<Option<T>> {
        match self.get_item_by_uuid(uuid)? {
            Some((key, item)) if key.kind() == T::KIND => Ok(Some(item::from_item(&item)?)),
            _ => Ok(None),
        }
    }

    pub(crate) fn list_records<T: Stored>(&self) -> StateResult<Vec<T>> {
        let Some(pk) = T::KIND.prefix() else {
            return Ok(Vec::new());
        };
        self.query(pk, "")?.iter().map(item::from_item).collect()
    }

    /// Insert a new record, assigning uuid and timestamps.
    ///
    /// `check` runs inside the write transaction before anything is written.
    pub(crate) fn insert_record<T, F>(&self, mut record: T, check: F) -> StateResult<T>
    where
        T: Stored,
        F: FnOnce(&WriteTransaction, &T) -> StateResult<()>,
    {
        if record.uuid().is_empty() {
            record.set_uuid(new_uuid());
        }
        let key = record.range_key().item_key();
        let txn = self.begin_write()?;
        if exists_in(&txn, &key)? {
            return Err(StateError::Conflict(format!("{} {}", T::KIND, key)));
        }
        if lookup_uuid_in(&txn, record.uuid())?.is_some() {
            return Err(StateError::Conflict(format!("uuid {}", record.uuid())));
        }
        check(&txn, &record)?;

        let now = epoch_secs();
        record.set_timestamps(now, now);
        put_in(&txn, &key, item::to_item(&record)?)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = %T::KIND, %key, uuid = record.uuid(), "record created");
        Ok(record)
    }

    /// Replace the record with surrogate id `uuid`.
    ///
    /// When the natural key changes (rename) the old item is deleted and the
    /// new one inserted in the same transaction; uuid and `created_at` carry
    /// over.
    pub(crate) fn replace_record<T, F>(&self, uuid: &str, mut record: T, check: F) -> StateResult<T>
    where
        T: Stored,
        F: FnOnce(&WriteTransaction, &T) -> StateResult<()>,
    {
        record.set_uuid(uuid.to_string());
        let txn = self.begin_write()?;
        let (old_key, old_item) = match lookup_uuid_in(&txn, uuid)? {
            Some((key, item)) if key.kind() == T::KIND => (key, item),
            _ => return Err(StateError::NotFound(format!("{} {uuid}", T::KIND))),
        };
        let old: T = item::from_item(&old_item)?;
        let new_key = record.range_key().item_key();
        if new_key != old_key {
            if exists_in(&txn, &new_key)? {
                return Err(StateError::Conflict(format!("{} {}", T::KIND, new_key)));
            }
            delete_in(&txn, &old_key)?;
        }
        check(&txn, &record)?;

        record.set_timestamps(old.created_at(), epoch_secs());
        put_in(&txn, &new_key, item::to_item(&record)?)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = %T::KIND, from = %old_key, to = %new_key, "record updated");
        Ok(record)
    }

    /// Delete by physical key. Returns true if it existed.
    pub(crate) fn remove(&self, key: &ItemKey) -> StateResult<bool> {
        let txn = self.begin_write()?;
        let existed = delete_in(&txn, key)?.is_some();
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "item deleted");
        Ok(existed)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Create a service. The name must be unique and every attached tag
    /// registered.
    pub fn create_service(&self, service: Service) -> StateResult<Service> {
        require_name("service", &service.service_name)?;
        self.insert_record(service, |txn, svc| check_service_tags(txn, &svc.category))
    }

    /// Get a service by name.
    pub fn get_service(&self, name: &str) -> StateResult<Option<Service>> {
        self.get_record(&RangeKey::service(name))
    }

    pub fn get_service_by_uuid(&self, uuid: &str) -> StateResult<Option<Service>> {
        self.get_record_by_uuid(uuid)
    }

    pub fn list_services(&self) -> StateResult<Vec<Service>> {
        self.list_records()
    }

    /// Update the service with surrogate id `uuid`, renaming if needed.
    pub fn update_service(&self, uuid: &str, service: Service) -> StateResult<Service> {
        require_name("service", &service.service_name)?;
        self.replace_record(uuid, service, |txn, svc| check_service_tags(txn, &svc.category))
    }

    /// Delete a service by name. Returns true if it existed.
    pub fn delete_service(&self, name: &str) -> StateResult<bool> {
        self.remove(&RangeKey::service(name).item_key())
    }

    /// Append `tag` to the service's tag list unless the pair is already
    /// there. Only the `category` attribute of the current item changes.
    ///
    /// Returns true if the tag was appended.
    pub fn append_service_tag(&self, key: &ItemKey, tag: &TagPair) -> StateResult<bool> {
        let txn = self.begin_write()?;
        let current = {
            let table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
            read_item(&table, &key.storage_key())?
        };
        let Some(mut current) = current else {
            return Err(StateError::NotFound(format!("service {key}")));
        };

        let mut tags: Vec<TagPair> = match current.get("category") {
            None | Some(AttributeValue::Null(_)) => Vec::new(),
            Some(value) => serde_json::from_value(value.to_json()).map_err(map_err!(Deserialize))?,
        };
        if tags.contains(tag) {
            txn.abort().map_err(map_err!(Transaction))?;
            debug!(%key, %tag, "tag already present");
            return Ok(false);
        }
        tags.push(tag.clone());
        let list = serde_json::to_value(&tags).map_err(map_err!(Serialize))?;
        current.insert("category".to_string(), AttributeValue::from_json(&list));

        put_in(&txn, key, current)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %tag, "tag appended");
        Ok(true)
    }

    // ── Companies ──────────────────────────────────────────────────

    pub fn create_company(&self, company: Company) -> StateResult<Company> {
        require_name("company", &company.company_name)?;
        self.insert_record(company, |_, _| Ok(()))
    }

    /// Get a company by name.
    pub fn get_company(&self, name: &str) -> StateResult<Option<Company>> {
        self.get_record(&RangeKey::company(name))
    }

    pub fn get_company_by_uuid(&self, uuid: &str) -> StateResult<Option<Company>> {
        self.get_record_by_uuid(uuid)
    }

    pub fn list_companies(&self) -> StateResult<Vec<Company>> {
        self.list_records()
    }

    /// Update the company with surrogate id `uuid`, renaming if needed.
    pub fn update_company(&self, uuid: &str, company: Company) -> StateResult<Company> {
        require_name("company", &company.company_name)?;
        self.replace_record(uuid, company, |_, _| Ok(()))
    }

    pub fn delete_company(&self, name: &str) -> StateResult<bool> {
        self.remove(&RangeKey::company(name).item_key())
    }

    /// Number of companies whose service list references `service_id`.
    pub fn count_companies_referencing(&self, service_id: &str) -> StateResult<usize> {
        Ok(self
            .list_companies()?
            .iter()
            .filter(|company| company.references(service_id))
            .count())
    }

    // ── Change log ─────────────────────────────────────────────────

    /// Oldest unacknowledged change records, at most `limit`.
    pub fn read_changes(&self, limit: usize) -> StateResult<Vec<(u64, StreamRecord)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CHANGES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            if results.len() >= limit {
                break;
            }
            let (seq, value) = entry.map_err(map_err!(Read))?;
            let record: StreamRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((seq.value(), record));
        }
        Ok(results)
    }

    /// Drop change records up to and including `up_to`. Returns number removed.
    pub fn ack_changes(&self, up_to: u64) -> StateResult<usize> {
        let txn = self.begin_write()?;
        let count;
        {
            let mut table = txn.open_table(CHANGES).map_err(map_err!(Table))?;
            let mut seqs = Vec::new();
            for entry in table.range(..=up_to).map_err(map_err!(Read))? {
                let (seq, _) = entry.map_err(map_err!(Read))?;
                seqs.push(seq.value());
            }
            count = seqs.len();
            for seq in seqs {
                table.remove(seq).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(up_to, count, "changes acknowledged");
        Ok(count)
    }

    /// Number of change records not yet acknowledged.
    pub fn pending_changes(&self) -> StateResult<usize> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CHANGES).map_err(map_err!(Table))?;
        Ok(table.iter().map_err(map_err!(Read))?.count())
    }
}

// ── Transaction helpers ────────────────────────────────────────────

pub(crate) fn read_item(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    storage_key: &str,
) -> StateResult<Option<Item>> {
    match table.get(storage_key).map_err(map_err!(Read))? {
        Some(guard) => {
            let item: Item = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(item))
        }
        None => Ok(None),
    }
}

/// Items whose storage key starts with `prefix`, in key order.
pub(crate) fn scan_prefix(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<Item>> {
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        let item: Item = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push(item);
    }
    Ok(results)
}

pub(crate) fn exists_in(txn: &WriteTransaction, key: &ItemKey) -> StateResult<bool> {
    let table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
    let found = table
        .get(key.storage_key().as_str())
        .map_err(map_err!(Read))?
        .is_some();
    Ok(found)
}

pub(crate) fn scan_in(txn: &WriteTransaction, pk: &str, sk_prefix: &str) -> StateResult<Vec<Item>> {
    let table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
    scan_prefix(&table, &format!("{}{}", ItemKey::partition_prefix(pk), sk_prefix))
}

fn lookup_uuid_in(txn: &WriteTransaction, uuid: &str) -> StateResult<Option<(ItemKey, Item)>> {
    let storage_key = {
        let index = txn.open_table(UUID_INDEX).map_err(map_err!(Table))?;
        let entry = index.get(uuid).map_err(map_err!(Read))?;
        match entry {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        }
    };
    let table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
    let item = read_item(&table, &storage_key)?;
    Ok(item.and_then(|item| ItemKey::from_storage_key(&storage_key).map(|key| (key, item))))
}

/// Write `item` under `key`, keep the uuid index in step and log the change.
/// Returns the previous item.
pub(crate) fn put_in(txn: &WriteTransaction, key: &ItemKey, item: Item) -> StateResult<Option<Item>> {
    let storage_key = key.storage_key();
    let item = item::with_key(item, key);
    let value = serde_json::to_vec(&item).map_err(map_err!(Serialize))?;
    let old = {
        let mut table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
        let old = read_item(&table, &storage_key)?;
        table
            .insert(storage_key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        old
    };
    {
        let mut index = txn.open_table(UUID_INDEX).map_err(map_err!(Table))?;
        let new_uuid = item_uuid(&item);
        if let Some(old_uuid) = old.as_ref().and_then(item_uuid)
            && Some(old_uuid) != new_uuid
        {
            index.remove(old_uuid).map_err(map_err!(Write))?;
        }
        if let Some(uuid) = new_uuid {
            index
                .insert(uuid, storage_key.as_str())
                .map_err(map_err!(Write))?;
        }
    }
    append_change(txn, key, old.clone(), Some(item))?;
    Ok(old)
}

/// Delete `key`, drop its index entry and log the change. Returns the removed item.
pub(crate) fn delete_in(txn: &WriteTransaction, key: &ItemKey) -> StateResult<Option<Item>> {
    let storage_key = key.storage_key();
    let removed = {
        let mut table = txn.open_table(ITEMS).map_err(map_err!(Table))?;
        let old = read_item(&table, &storage_key)?;
        if old.is_some() {
            table.remove(storage_key.as_str()).map_err(map_err!(Write))?;
        }
        old
    };
    let Some(old) = removed else {
        return Ok(None);
    };
    if let Some(uuid) = item_uuid(&old) {
        let mut index = txn.open_table(UUID_INDEX).map_err(map_err!(Table))?;
        let points_here = index
            .get(uuid)
            .map_err(map_err!(Read))?
            .is_some_and(|guard| guard.value() == storage_key);
        if points_here {
            index.remove(uuid).map_err(map_err!(Write))?;
        }
    }
    append_change(txn, key, Some(old.clone()), None)?;
    Ok(Some(old))
}

fn append_change(
    txn: &WriteTransaction,
    key: &ItemKey,
    old: Option<Item>,
    new: Option<Item>,
) -> StateResult<()> {
    let seq = {
        let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
        let last = meta
            .get(CHANGE_SEQ)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        meta.insert(CHANGE_SEQ, last + 1).map_err(map_err!(Write))?;
        last + 1
    };
    let record = StreamRecord::new(seq, key, old, new);
    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
    let mut changes = txn.open_table(CHANGES).map_err(map_err!(Table))?;
    changes
        .insert(seq, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn item_uuid(item: &Item) -> Option<&str> {
    item.get("uuid")
        .and_then(AttributeValue::as_str)
        .filter(|uuid| !uuid.is_empty())
}

/// Tags attached by a direct write must be registered and unique.
fn check_service_tags(txn: &WriteTransaction, tags: &[TagPair]) -> StateResult<()> {
    for (i, tag) in tags.iter().enumerate() {
        if tags[..i].contains(tag) {
            return Err(StateError::invalid("service", format!("duplicate tag {tag}")));
        }
        if tag.key.is_empty() || tag.value.is_empty() {
            return Err(StateError::invalid("service", "tag key and value are required"));
        }
        if !exists_in(txn, &RangeKey::tag(&tag.key, &tag.value).item_key())? {
            return Err(StateError::invalid("service", format!("unregistered tag {tag}")));
        }
    }
    Ok(())
}

fn require_name(entity: &'static str, name: &str) -> StateResult<()> {
    if name.trim().is_empty() {
        return Err(StateError::invalid(entity, "name is required"));
    }
    Ok(())
}

pub(crate) fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventKind;

    fn store_with_tags(tags: &[(&str, &str)]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for (key, value) in tags {
            store.create_tag(TagDefinition::new(*key, *value)).unwrap();
        }
        store
    }

    fn test_service(name: &str) -> Service {
        Service {
            description: "cloud-native saas platform".to_string(),
            location: "Tokyo".to_string(),
            like: 12,
            ..Service::new(name)
        }
    }

    // ── Service CRUD ───────────────────────────────────────────────

    #[test]
    fn service_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_service(test_service("Acme Cloud")).unwrap();

        assert!(!created.uuid.is_empty());
        assert!(created.created_at > 0);
        assert_eq!(store.get_service("Acme Cloud").unwrap(), Some(created.clone()));
        assert_eq!(store.get_service_by_uuid(&created.uuid).unwrap(), Some(created));
    }

    #[test]
    fn service_names_are_unique() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_service(test_service("acme")).unwrap();
        let err = store.create_service(test_service("acme")).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn service_requires_a_name() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.create_service(test_service("  ")).unwrap_err();
        assert!(matches!(err, StateError::Invalid { .. }));
    }

    #[test]
    fn service_tags_must_be_registered() {
        let store = store_with_tags(&[("category", "SaaS")]);

        let mut svc = test_service("acme");
        svc.category = vec![TagPair::new("category", "PaaS")];
        assert!(matches!(
            store.create_service(svc.clone()).unwrap_err(),
            StateError::Invalid { .. }
        ));

        svc.category = vec![TagPair::new("category", "SaaS"), TagPair::new("category", "SaaS")];
        assert!(store.create_service(svc.clone()).is_err());

        svc.category = vec![TagPair::new("category", "SaaS")];
        assert!(store.create_service(svc).is_ok());
    }

    #[test]
    fn rename_keeps_uuid_and_created_at() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_service(test_service("old name")).unwrap();

        let mut renamed = created.clone();
        renamed.service_name = "new name".to_string();
        renamed.uuid.clear();
        let updated = store.update_service(&created.uuid, renamed).unwrap();

        assert_eq!(updated.uuid, created.uuid);
        assert_eq!(updated.created_at, created.created_at);
        assert!(store.get_service("old name").unwrap().is_none());
        assert_eq!(store.get_service("new name").unwrap(), Some(updated.clone()));
        assert_eq!(store.get_service_by_uuid(&created.uuid).unwrap(), Some(updated));
        assert_eq!(store.list_services().unwrap().len(), 1);
    }

    #[test]
    fn rename_onto_existing_name_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.create_service(test_service("a")).unwrap();
        store.create_service(test_service("b")).unwrap();

        let mut clash = a.clone();
        clash.service_name = "b".to_string();
        assert!(matches!(
            store.update_service(&a.uuid, clash).unwrap_err(),
            StateError::Conflict(_)
        ));
        // Nothing moved.
        assert!(store.get_service("a").unwrap().is_some());
    }

    #[test]
    fn update_unknown_uuid_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_service("missing", test_service("x")).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn uuid_lookup_is_kind_checked() {
        let store = StateStore::open_in_memory().unwrap();
        let company = store.create_company(Company::new("Initech")).unwrap();
        assert!(store.get_service_by_uuid(&company.uuid).unwrap().is_none());
        assert!(store.get_company_by_uuid(&company.uuid).unwrap().is_some());
    }

    #[test]
    fn service_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let svc = store.create_service(test_service("acme")).unwrap();

        assert!(store.delete_service("acme").unwrap());
        assert!(!store.delete_service("acme").unwrap());
        assert!(store.get_service_by_uuid(&svc.uuid).unwrap().is_none());
    }

    // ── Tag append ─────────────────────────────────────────────────

    #[test]
    fn append_tag_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        let svc = store.create_service(test_service("acme")).unwrap();
        let tag = TagPair::new("category", "SaaS");

        assert!(store.append_service_tag(&svc.item_key(), &tag).unwrap());
        assert!(!store.append_service_tag(&svc.item_key(), &tag).unwrap());

        let stored = store.get_service("acme").unwrap().unwrap();
        assert_eq!(stored.category, vec![tag]);
    }

    #[test]
    fn append_tag_preserves_other_fields() {
        let store = StateStore::open_in_memory().unwrap();
        let svc = store.create_service(test_service("acme")).unwrap();

        store
            .append_service_tag(&svc.item_key(), &TagPair::new("region", "APAC"))
            .unwrap();
        store
            .append_service_tag(&svc.item_key(), &TagPair::new("category", "SaaS"))
            .unwrap();

        let stored = store.get_service("acme").unwrap().unwrap();
        assert_eq!(stored.description, svc.description);
        assert_eq!(stored.like, 12);
        assert_eq!(stored.updated_at, svc.updated_at);
        assert_eq!(
            stored.category,
            vec![TagPair::new("region", "APAC"), TagPair::new("category", "SaaS")]
        );
    }

    #[test]
    fn append_tag_to_missing_service_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let key = RangeKey::service("ghost").item_key();
        let err = store
            .append_service_tag(&key, &TagPair::new("category", "SaaS"))
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    // ── Companies ──────────────────────────────────────────────────

    #[test]
    fn company_crud_and_subscriber_count() {
        let store = StateStore::open_in_memory().unwrap();
        let mut a = Company::new("A");
        a.service_list = vec!["svc-1".to_string(), "svc-2".to_string()];
        let mut b = Company::new("B");
        b.service_list = vec!["svc-1".to_string()];
        let a = store.create_company(a).unwrap();
        store.create_company(b).unwrap();

        assert_eq!(store.count_companies_referencing("svc-1").unwrap(), 2);
        assert_eq!(store.count_companies_referencing("svc-2").unwrap(), 1);
        assert_eq!(store.count_companies_referencing("svc-3").unwrap(), 0);

        let mut renamed = a.clone();
        renamed.company_name = "A Holdings".to_string();
        renamed.service_list.clear();
        store.update_company(&a.uuid, renamed).unwrap();
        assert!(store.get_company("A").unwrap().is_none());
        assert_eq!(store.count_companies_referencing("svc-2").unwrap(), 0);

        assert!(store.delete_company("B").unwrap());
        assert_eq!(store.list_companies().unwrap().len(), 1);
    }

    // ── Change log ─────────────────────────────────────────────────

    #[test]
    fn writes_are_logged_with_images() {
        let store = StateStore::open_in_memory().unwrap();
        let svc = store.create_service(test_service("acme")).unwrap();
        let mut renamed = svc.clone();
        renamed.service_name = "acme two".to_string();
        store.update_service(&svc.uuid, renamed).unwrap();
        store
            .append_service_tag(
                &RangeKey::service("acme two").item_key(),
                &TagPair::new("category", "SaaS"),
            )
            .unwrap();

        let changes = store.read_changes(10).unwrap();
        let kinds: Vec<EventKind> = changes.iter().map(|(_, r)| r.event_kind).collect();
        // insert, rename (remove + insert), tag append (modify)
        assert_eq!(
            kinds,
            vec![EventKind::Insert, EventKind::Remove, EventKind::Insert, EventKind::Modify]
        );

        let (_, append) = &changes[3];
        assert_eq!(append.item_key().unwrap().sk, "SR#acme%20two");
        assert!(append.change.old_image.is_some());
        assert!(append.change.new_image.is_some());
    }

    #[test]
    fn ack_removes_processed_changes() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_company(Company::new("A")).unwrap();
        store.create_company(Company::new("B")).unwrap();
        store.create_company(Company::new("C")).unwrap();

        let first_two = store.read_changes(2).unwrap();
        assert_eq!(first_two.len(), 2);
        let last_seq = first_two[1].0;

        assert_eq!(store.ack_changes(last_seq).unwrap(), 2);
        assert_eq!(store.pending_changes().unwrap(), 1);
        let rest = store.read_changes(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].0 > last_seq);

        // Re-acking an already trimmed range removes nothing.
        assert_eq!(store.ack_changes(last_seq).unwrap(), 0);
        assert_eq!(store.ack_changes(rest[0].0).unwrap(), 1);
        assert_eq!(store.pending_changes().unwrap(), 0);
    }

    #[test]
    fn failed_writes_are_not_logged() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_service(test_service("acme")).unwrap();
        let _ = store.create_service(test_service("acme"));
        assert_eq!(store.pending_changes().unwrap(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let uuid = {
            let store = StateStore::open(&db_path).unwrap();
            store.create_service(test_service("acme")).unwrap().uuid
        };

        let store = StateStore::open(&db_path).unwrap();
        let svc = store.get_service_by_uuid(&uuid).unwrap();
        assert_eq!(svc.unwrap().service_name, "acme");
        assert_eq!(store.pending_changes().unwrap(), 1);
    }
}
