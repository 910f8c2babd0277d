//! ChangeDispatcher — drives rule evaluation from a batch of change records.
//!
//! Records are handled strictly in batch order. Rules, services and
//! companies are read at most once per batch, on first need, and the
//! snapshot is reused for every later record; a snapshot that goes stale
//! mid-batch is tolerated because the tag append is conditional.
//!
//! Every store call runs on the blocking pool under `call_timeout`. A
//! failing record is reported in the [`BatchReport`]; whether the rest of
//! the batch still runs is the configured [`ErrorPolicy`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use mds_core::config::{DEFAULT_TRIGGER_FIELDS, MdsConfig};
use mds_core::ErrorPolicy;
use mds_state::{Company, EventKind, Rule, RuleOperation, Service, StreamRecord, TagPair};

use crate::change::{DecodedChange, TypedChange};
use crate::error::{TaggerError, TaggerResult};
use crate::propagate::TagPropagator;
use crate::repository::Repository;
use crate::rules::{self, RuleEngine};
use crate::subscription::SubscriptionCounter;

/// Default bound for one store call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records in the batch.
    pub records: usize,
    /// Records that ran to completion (including no-op branches).
    pub processed: usize,
    /// Records skipped because their kind or event is not handled.
    pub ignored: usize,
    /// Tags newly appended.
    pub tags_applied: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    /// A batch with failures must be redelivered.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A record that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Position in the batch.
    pub index: usize,
    pub event_id: String,
    pub reason: String,
}

enum Outcome {
    Processed { applied: usize },
    Ignored,
}

/// Lazily loaded, batch-scoped view of the store.
#[derive(Default)]
struct Snapshot {
    rules: Option<Vec<Rule>>,
    services: Option<Vec<Service>>,
    companies: Option<Vec<Company>>,
}

impl Snapshot {
    /// Keep loaded services in step with tags this batch has appended.
    fn note_tag(&mut self, service_id: &str, tag: &TagPair) {
        let Some(services) = self.services.as_mut() else {
            return;
        };
        if let Some(service) = services.iter_mut().find(|s| s.uuid == service_id)
            && !service.has_tag(tag)
        {
            service.category.push(tag.clone());
        }
    }
}

pub struct ChangeDispatcher<R> {
    repo: Arc<R>,
    counter: SubscriptionCounter<R>,
    propagator: TagPropagator<R>,
    trigger_fields: Vec<String>,
    on_record_error: ErrorPolicy,
    call_timeout: Duration,
}

impl<R: Repository> ChangeDispatcher<R> {
    /// Dispatcher with the default trigger fields, `continue` policy and a
    /// two-second call timeout.
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            counter: SubscriptionCounter::new(Arc::clone(&repo)),
            propagator: TagPropagator::new(Arc::clone(&repo)),
            repo,
            trigger_fields: DEFAULT_TRIGGER_FIELDS.iter().map(|f| f.to_string()).collect(),
            on_record_error: ErrorPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Dispatcher configured from `mds.toml`.
    pub fn from_config(repo: Arc<R>, config: &MdsConfig) -> TaggerResult<Self> {
        Ok(Self::new(repo)
            .with_trigger_fields(config.dispatch.trigger_fields.clone())
            .with_error_policy(config.dispatch.on_record_error)
            .with_call_timeout(config.store_call_timeout()?))
    }

    pub fn with_trigger_fields(mut self, fields: Vec<String>) -> Self {
        self.trigger_fields = fields;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_record_error = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Process one batch in order and report what happened.
    pub async fn dispatch(&self, records: &[StreamRecord]) -> BatchReport {
        let mut report = BatchReport {
            records: records.len(),
            ..BatchReport::default()
        };
        let mut snapshot = Snapshot::default();

        for (index, record) in records.iter().enumerate() {
            match self.process(record, &mut snapshot).await {
                Ok(Outcome::Processed { applied }) => {
                    report.processed += 1;
                    report.tags_applied += applied;
                }
                Ok(Outcome::Ignored) => report.ignored += 1,
                Err(e) => {
                    warn!(index, event_id = %record.event_id, error = %e, "record failed");
                    report.failures.push(RecordFailure {
                        index,
                        event_id: record.event_id.clone(),
                        reason: e.to_string(),
                    });
                    if self.on_record_error == ErrorPolicy::Abort {
                        warn!(index, "aborting batch after failed record");
                        break;
                    }
                }
            }
        }

        info!(
            records = report.records,
            processed = report.processed,
            ignored = report.ignored,
            tags_applied = report.tags_applied,
            failures = report.failures.len(),
            "batch dispatched"
        );
        report
    }

    async fn process(&self, record: &StreamRecord, snapshot: &mut Snapshot) -> TaggerResult<Outcome> {
        let event = match record.event_kind {
            EventKind::Unknown => {
                debug!(event_id = %record.event_id, "unhandled event kind");
                return Ok(Outcome::Ignored);
            }
            event => event,
        };
        let change = DecodedChange::decode(record)?;
        debug!(event_id = %record.event_id, kind = %change.kind(), ?event, "processing record");

        let applied = match change {
            DecodedChange::Unknown => return Ok(Outcome::Ignored),
            // Removals and tag-registry changes never re-tag anything.
            _ if event == EventKind::Remove => 0,
            DecodedChange::Tag(_) => 0,
            DecodedChange::Service(change) => self.on_service(change, snapshot).await?,
            DecodedChange::Rule(change) => match change.new {
                Some(rule) => self.on_rule(&rule, snapshot).await?,
                None => return Err(TaggerError::Decode("rule change without NewImage".to_string())),
            },
            DecodedChange::Company(change) => match change.new {
                Some(company) => self.on_company(&company, snapshot).await?,
                None => {
                    return Err(TaggerError::Decode("company change without NewImage".to_string()));
                }
            },
        };
        Ok(Outcome::Processed { applied })
    }

    // ── Branches ───────────────────────────────────────────────────

    async fn on_service(&self, change: TypedChange<Service>, snapshot: &mut Snapshot) -> TaggerResult<usize> {
        let Some(service) = change.new else {
            return Err(TaggerError::Decode("service change without NewImage".to_string()));
        };
        if change.event == EventKind::Modify
            && let Some(old) = &change.old
            && !self.trigger_changed(old, &service)
        {
            debug!(service = %service.service_name, "no trigger field changed");
            return Ok(0);
        }

        self.load_rules(snapshot).await?;
        let matched: Vec<TagPair> = snapshot
            .rules
            .as_deref()
            .map(|rules| {
                RuleEngine::field_rules(rules)
                    .filter(|rule| RuleEngine::evaluate(rule, &service))
                    .map(Rule::target_tag)
                    .collect()
            })
            .unwrap_or_default();

        let mut service = service;
        let mut applied = 0;
        for tag in matched {
            if self.apply(&service, &tag, snapshot).await? {
                applied += 1;
            }
            if !service.has_tag(&tag) {
                service.category.push(tag);
            }
        }
        Ok(applied)
    }

    async fn on_rule(&self, rule: &Rule, snapshot: &mut Snapshot) -> TaggerResult<usize> {
        let tag = rule.target_tag();
        match rule.operation {
            RuleOperation::Contain | RuleOperation::Relation => {
                self.load_services(snapshot).await?;
                let matched: Vec<Service> = snapshot
                    .services
                    .iter()
                    .flatten()
                    .filter(|service| RuleEngine::evaluate(rule, service))
                    .cloned()
                    .collect();
                let mut applied = 0;
                for service in &matched {
                    if self.apply(service, &tag, snapshot).await? {
                        applied += 1;
                    }
                }
                Ok(applied)
            }
            RuleOperation::SubscriptionCount => {
                self.load_companies(snapshot).await?;
                let referenced: BTreeSet<String> = snapshot
                    .companies
                    .iter()
                    .flatten()
                    .flat_map(|company| company.service_list.iter().cloned())
                    .collect();
                let mut applied = 0;
                for service_id in referenced {
                    if !self.subscription_matches(rule, &service_id).await? {
                        continue;
                    }
                    if self.apply_by_uuid(&service_id, &tag, snapshot).await? {
                        applied += 1;
                    }
                }
                Ok(applied)
            }
            RuleOperation::Unrecognized(ref raw) => {
                debug!(rule = %rule.uuid, operation = %raw, "unrecognised operation");
                Ok(0)
            }
        }
    }

    async fn on_company(&self, company: &Company, snapshot: &mut Snapshot) -> TaggerResult<usize> {
        self.load_rules(snapshot).await?;
        let rules: Vec<Rule> = snapshot
            .rules
            .as_deref()
            .map(|rules| RuleEngine::subscription_rules(rules).cloned().collect())
            .unwrap_or_default();
        if rules.is_empty() {
            return Ok(0);
        }

        let mut seen = BTreeSet::new();
        let mut applied = 0;
        for service_id in &company.service_list {
            if !seen.insert(service_id.as_str()) {
                continue;
            }
            let count = self.count_subscribers(service_id).await?;
            for rule in &rules {
                if !SubscriptionCounter::<R>::exceeds(rule, count) {
                    continue;
                }
                if self.apply_by_uuid(service_id, &rule.target_tag(), snapshot).await? {
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    fn trigger_changed(&self, old: &Service, new: &Service) -> bool {
        self.trigger_fields
            .iter()
            .any(|field| rules::field_text(old, field) != rules::field_text(new, field))
    }

    // ── Store calls ────────────────────────────────────────────────

    /// Run a blocking store call on the blocking pool, bounded by the call timeout.
    async fn call<T, F>(&self, op: &'static str, f: F) -> TaggerResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> TaggerResult<T> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(TaggerError::Join(e.to_string())),
            Err(_) => Err(TaggerError::Timeout {
                op,
                after: self.call_timeout,
            }),
        }
    }

    async fn load_rules(&self, snapshot: &mut Snapshot) -> TaggerResult<()> {
        if snapshot.rules.is_none() {
            let repo = Arc::clone(&self.repo);
            let rules = self.call("get_all_rules", move || Ok(repo.get_all_rules()?)).await?;
            debug!(count = rules.len(), "rules loaded");
            snapshot.rules = Some(rules);
        }
        Ok(())
    }

    async fn load_services(&self, snapshot: &mut Snapshot) -> TaggerResult<()> {
        if snapshot.services.is_none() {
            let repo = Arc::clone(&self.repo);
            let services = self
                .call("get_all_services", move || Ok(repo.get_all_services()?))
                .await?;
            debug!(count = services.len(), "services loaded");
            snapshot.services = Some(services);
        }
        Ok(())
    }

    async fn load_companies(&self, snapshot: &mut Snapshot) -> TaggerResult<()> {
        if snapshot.companies.is_none() {
            let repo = Arc::clone(&self.repo);
            let companies = self
                .call("get_all_companies", move || Ok(repo.get_all_companies()?))
                .await?;
            debug!(count = companies.len(), "companies loaded");
            snapshot.companies = Some(companies);
        }
        Ok(())
    }

    async fn count_subscribers(&self, service_id: &str) -> TaggerResult<usize> {
        let counter = self.counter.clone();
        let service_id = service_id.to_string();
        self.call("count_subscribers", move || counter.count_subscribers(&service_id))
            .await
    }

    async fn subscription_matches(&self, rule: &Rule, service_id: &str) -> TaggerResult<bool> {
        let counter = self.counter.clone();
        let rule = rule.clone();
        let service_id = service_id.to_string();
        self.call("count_subscribers", move || counter.evaluate(&rule, &service_id))
            .await
    }

    async fn apply(&self, service: &Service, tag: &TagPair, snapshot: &mut Snapshot) -> TaggerResult<bool> {
        let propagator = self.propagator.clone();
        let (owned_service, owned_tag) = (service.clone(), tag.clone());
        let appended = self
            .call("append_service_tag", move || propagator.apply(&owned_service, &owned_tag))
            .await?;
        snapshot.note_tag(&service.uuid, tag);
        Ok(appended)
    }

    /// Resolve a referenced service id and apply. A dangling reference is
    /// skipped with a warning.
    async fn apply_by_uuid(&self, service_id: &str, tag: &TagPair, snapshot: &mut Snapshot) -> TaggerResult<bool> {
        let repo = Arc::clone(&self.repo);
        let id = service_id.to_string();
        let service = self
            .call("get_service_by_uuid", move || Ok(repo.get_service_by_uuid(&id)?))
            .await?;
        match service {
            Some(service) => self.apply(&service, tag, snapshot).await,
            None => {
                warn!(service_id, "referenced service not found, skipping");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_state::{
        KeywordOperator, RelationalOperator, StateResult, StateStore, TagDefinition,
    };
    use mds_core::keys::ItemKey;

    fn store() -> Arc<StateStore> {
        let store = StateStore::open_in_memory().unwrap();
        for (key, value) in [("category", "SaaS"), ("tier", "popular"), ("reach", "wide")] {
            store.create_tag(TagDefinition::new(key, value)).unwrap();
        }
        Arc::new(store)
    }

    fn contain(keyword: &str) -> Rule {
        Rule {
            operation: RuleOperation::Contain,
            tag_key: "category".to_string(),
            tag_value: "SaaS".to_string(),
            metadata_field: "description".to_string(),
            keyword: keyword.to_string(),
            ..Rule::default()
        }
    }

    fn subscription(threshold: i64) -> Rule {
        Rule {
            operation: RuleOperation::SubscriptionCount,
            tag_key: "reach".to_string(),
            tag_value: "wide".to_string(),
            subscription_count: threshold,
            ..Rule::default()
        }
    }

    /// Drain the change log and dispatch it.
    async fn pump(store: &Arc<StateStore>, dispatcher: &ChangeDispatcher<StateStore>) -> BatchReport {
        let changes = store.read_changes(usize::MAX).unwrap();
        if let Some((last, _)) = changes.last() {
            store.ack_changes(*last).unwrap();
        }
        let records: Vec<StreamRecord> = changes.into_iter().map(|(_, r)| r).collect();
        dispatcher.dispatch(&records).await
    }

    #[tokio::test]
    async fn service_insert_applies_matching_rules() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        store.create_rule(contain("saas")).unwrap();
        pump(&store, &dispatcher).await;

        let svc = Service {
            description: "A SaaS for invoices".to_string(),
            ..Service::new("Billy")
        };
        store.create_service(svc).unwrap();
        let report = pump(&store, &dispatcher).await;

        assert!(report.is_success());
        assert_eq!(report.tags_applied, 1);
        let stored = store.get_service("Billy").unwrap().unwrap();
        assert_eq!(stored.category, vec![TagPair::new("category", "SaaS")]);

        // The append itself is a MODIFY touching only `category`.
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.records, 1);
        assert_eq!(report.tags_applied, 0);
    }

    #[tokio::test]
    async fn rule_insert_tags_existing_services() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        for (name, description) in [("a", "saas crm"), ("b", "on-prem erp"), ("c", "SaaS mail")] {
            store
                .create_service(Service {
                    description: description.to_string(),
                    ..Service::new(name)
                })
                .unwrap();
        }
        store.create_rule(contain("saas")).unwrap();

        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 2);
        assert!(store.get_service("b").unwrap().unwrap().category.is_empty());
    }

    #[tokio::test]
    async fn modify_without_trigger_change_is_skipped() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        let svc = store.create_service(Service::new("acme")).unwrap();
        pump(&store, &dispatcher).await;
        store.create_rule(contain("saas")).unwrap();
        store
            .append_service_tag(&svc.item_key(), &TagPair::new("tier", "popular"))
            .unwrap();

        // Rule insert sees no match; the tag append changes only `category`.
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 0);

        let mut changed = store.get_service("acme").unwrap().unwrap();
        changed.description = "now a saas".to_string();
        store.update_service(&svc.uuid, changed).unwrap();
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 1);
    }

    #[tokio::test]
    async fn trigger_fields_are_configurable() {
        let store = store();
        let mut rule = contain("");
        rule.operation = RuleOperation::Relation;
        rule.metadata_field = "like".to_string();
        rule.relational_operator = RelationalOperator::GreaterThanEqual;
        rule.relational_operand = 10;
        rule.tag_key = "tier".to_string();
        rule.tag_value = "popular".to_string();
        store.create_rule(rule).unwrap();
        let svc = store.create_service(Service::new("acme")).unwrap();

        let dispatcher = ChangeDispatcher::new(Arc::clone(&store))
            .with_trigger_fields(vec!["description".to_string()]);
        pump(&store, &dispatcher).await;

        let mut liked = svc.clone();
        liked.like = 12;
        store.update_service(&svc.uuid, liked).unwrap();
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 0);

        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        let mut liked = store.get_service("acme").unwrap().unwrap();
        liked.like = 13;
        store.update_service(&svc.uuid, liked).unwrap();
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 1);
    }

    #[tokio::test]
    async fn company_change_evaluates_subscription_rules() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        let svc = store.create_service(Service::new("acme")).unwrap();
        store.create_rule(subscription(1)).unwrap();
        pump(&store, &dispatcher).await;

        let mut first = Company::new("one");
        first.service_list = vec![svc.uuid.clone()];
        store.create_company(first).unwrap();
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 0);

        let mut second = Company::new("two");
        second.service_list = vec![svc.uuid.clone(), svc.uuid.clone()];
        store.create_company(second).unwrap();
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 1);
        assert!(store.get_service("acme").unwrap().unwrap().has_tag(&TagPair::new("reach", "wide")));
    }

    #[tokio::test]
    async fn subscription_rule_insert_scans_referenced_services() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        let hot = store.create_service(Service::new("hot")).unwrap();
        let cold = store.create_service(Service::new("cold")).unwrap();
        for i in 0..3 {
            let mut company = Company::new(format!("c{i}"));
            company.service_list = vec![hot.uuid.clone(), "dangling".to_string()];
            if i == 0 {
                company.service_list.push(cold.uuid.clone());
            }
            store.create_company(company).unwrap();
        }
        pump(&store, &dispatcher).await;

        store.create_rule(subscription(2)).unwrap();
        let report = pump(&store, &dispatcher).await;
        assert!(report.is_success());
        assert_eq!(report.tags_applied, 1);
        assert!(store.get_service("cold").unwrap().unwrap().category.is_empty());
    }

    #[tokio::test]
    async fn removes_and_tags_are_no_ops() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        store.create_rule(contain("saas")).unwrap();
        store.create_service(Service::new("gone")).unwrap();
        store.create_tag(TagDefinition::new("category", "PaaS")).unwrap();
        pump(&store, &dispatcher).await;

        store.delete_service("gone").unwrap();
        store.delete_tag("category", "PaaS").unwrap();
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.records, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.tags_applied, 0);
    }

    #[tokio::test]
    async fn unknown_keys_and_events_are_ignored() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        let key = ItemKey {
            pk: "ZZ".to_string(),
            sk: "ZZ#1".to_string(),
        };
        let unknown_kind = StreamRecord::new(1, &key, None, Some(mds_state::item::key_item(&key)));
        let mut unknown_event = StreamRecord::new(
            2,
            &mds_core::RangeKey::tag("k", "v").item_key(),
            None,
            None,
        );
        unknown_event.event_kind = EventKind::Unknown;

        let report = dispatcher.dispatch(&[unknown_kind, unknown_event]).await;
        assert_eq!(report.ignored, 2);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn secondary_condition_is_honoured() {
        let store = store();
        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        let mut rule = contain("saas");
        rule.keyword_operator = KeywordOperator::And;
        rule.corule_metadata_field = "location".to_string();
        rule.corule_keyword = "tokyo".to_string();
        store.create_rule(rule).unwrap();
        for (name, location) in [("jp", "Tokyo"), ("us", "Austin")] {
            store
                .create_service(Service {
                    description: "saas".to_string(),
                    location: location.to_string(),
                    ..Service::new(name)
                })
                .unwrap();
        }
        let report = pump(&store, &dispatcher).await;
        assert_eq!(report.tags_applied, 1);
        assert!(store.get_service("us").unwrap().unwrap().category.is_empty());
    }

    // ── Failure handling ───────────────────────────────────────────

    /// Store wrapper whose appends stall past any reasonable timeout.
    struct SlowAppends(StateStore);

    impl Repository for SlowAppends {
        fn get_all_rules(&self) -> StateResult<Vec<Rule>> {
            self.0.list_rules()
        }
        fn get_all_services(&self) -> StateResult<Vec<Service>> {
            self.0.list_services()
        }
        fn get_all_companies(&self) -> StateResult<Vec<Company>> {
            self.0.list_companies()
        }
        fn get_service_by_uuid(&self, uuid: &str) -> StateResult<Option<Service>> {
            self.0.get_service_by_uuid(uuid)
        }
        fn count_companies_referencing(&self, service_id: &str) -> StateResult<usize> {
            self.0.count_companies_referencing(service_id)
        }
        fn append_service_tag(&self, key: &ItemKey, tag: &TagPair) -> StateResult<bool> {
            std::thread::sleep(Duration::from_millis(500));
            self.0.append_service_tag(key, tag)
        }
    }

    #[tokio::test]
    async fn slow_store_call_times_out() {
        let inner = StateStore::open_in_memory().unwrap();
        inner.create_tag(TagDefinition::new("category", "SaaS")).unwrap();
        inner.create_rule(contain("saas")).unwrap();
        inner
            .create_service(Service {
                description: "saas".to_string(),
                ..Service::new("acme")
            })
            .unwrap();
        let records: Vec<StreamRecord> = inner
            .read_changes(usize::MAX)
            .unwrap()
            .into_iter()
            .map(|(_, r)| r)
            .collect();

        let dispatcher = ChangeDispatcher::new(Arc::new(SlowAppends(inner)))
            .with_call_timeout(Duration::from_millis(100));
        let report = dispatcher.dispatch(&records).await;

        assert!(!report.is_success());
        assert!(report.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn error_policy_continue_vs_abort() {
        let store = store();
        store.create_rule(contain("saas")).unwrap();
        let good = store
            .create_service(Service {
                description: "saas".to_string(),
                ..Service::new("good")
            })
            .unwrap();
        let mut records: Vec<StreamRecord> = store
            .read_changes(usize::MAX)
            .unwrap()
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        let service_insert = records.pop().unwrap();
        let mut broken = service_insert.clone();
        broken.change.keys.clear();
        broken.change.new_image = None;
        let batch = vec![broken, service_insert];

        let dispatcher = ChangeDispatcher::new(Arc::clone(&store)).with_error_policy(ErrorPolicy::Abort);
        let report = dispatcher.dispatch(&batch).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.processed, 0);
        assert!(store.get_service("good").unwrap().unwrap().category.is_empty());

        let dispatcher = ChangeDispatcher::new(Arc::clone(&store));
        let report = dispatcher.dispatch(&batch).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.processed, 1);
        assert_eq!(report.tags_applied, 1);
        assert!(store.get_service_by_uuid(&good.uuid).unwrap().unwrap().has_tag(&TagPair::new("category", "SaaS")));
    }

    #[test]
    fn from_config_reads_dispatch_section() {
        let mut config = MdsConfig::default();
        config.dispatch.on_record_error = ErrorPolicy::Abort;
        config.store.call_timeout = "250ms".to_string();
        let dispatcher =
            ChangeDispatcher::from_config(Arc::new(StateStore::open_in_memory().unwrap()), &config)
                .unwrap();
        assert_eq!(dispatcher.on_record_error, ErrorPolicy::Abort);
        assert_eq!(dispatcher.call_timeout, Duration::from_millis(250));

        config.store.call_timeout = "whenever".to_string();
        assert!(ChangeDispatcher::from_config(Arc::new(StateStore::open_in_memory().unwrap()), &config).is_err());
    }
}
