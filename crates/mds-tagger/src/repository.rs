//! Store capabilities the tagger depends on.

use mds_core::keys::ItemKey;
use mds_state::{Company, Rule, Service, StateResult, StateStore, TagPair};

/// Typed read access plus the one write the tagger performs.
///
/// Calls are blocking; the dispatcher runs them on the blocking pool.
pub trait Repository: Send + Sync + 'static {
    fn get_all_rules(&self) -> StateResult<Vec<Rule>>;

    fn get_all_services(&self) -> StateResult<Vec<Service>>;

    fn get_all_companies(&self) -> StateResult<Vec<Company>>;

    fn get_service_by_uuid(&self, uuid: &str) -> StateResult<Option<Service>>;

    fn count_companies_referencing(&self, service_id: &str) -> StateResult<usize>;

    /// Append `tag` to the service at `key` unless already present.
    /// Returns true if it was appended.
    fn append_service_tag(&self, key: &ItemKey, tag: &TagPair) -> StateResult<bool>;
}

impl Repository for StateStore {
    fn get_all_rules(&self) -> StateResult<Vec<Rule>> {
        self.list_rules()
    }

    fn get_all_services(&self) -> StateResult<Vec<Service>> {
        self.list_services()
    }

    fn get_all_companies(&self) -> StateResult<Vec<Company>> {
        self.list_companies()
    }

    fn get_service_by_uuid(&self, uuid: &str) -> StateResult<Option<Service>> {
        StateStore::get_service_by_uuid(self, uuid)
    }

    fn count_companies_referencing(&self, service_id: &str) -> StateResult<usize> {
        StateStore::count_companies_referencing(self, service_id)
    }

    fn append_service_tag(&self, key: &ItemKey, tag: &TagPair) -> StateResult<bool> {
        StateStore::append_service_tag(self, key, tag)
    }
}
