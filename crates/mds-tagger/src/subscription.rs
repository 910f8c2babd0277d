//! SubscriptionCounter — evaluates SUBSCRIPTION_COUNT rules.

use std::sync::Arc;

use mds_state::Rule;

use crate::error::TaggerResult;
use crate::repository::Repository;

/// Counts the companies subscribed to a service.
pub struct SubscriptionCounter<R> {
    repo: Arc<R>,
}

impl<R> Clone for SubscriptionCounter<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: Repository> SubscriptionCounter<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Number of companies whose service list contains `service_id`.
    pub fn count_subscribers(&self, service_id: &str) -> TaggerResult<usize> {
        Ok(self.repo.count_companies_referencing(service_id)?)
    }

    /// True iff the subscriber count is strictly above the rule's threshold.
    pub fn evaluate(&self, rule: &Rule, service_id: &str) -> TaggerResult<bool> {
        let count = self.count_subscribers(service_id)?;
        Ok(Self::exceeds(rule, count))
    }

    /// Threshold check for an already known count.
    pub fn exceeds(rule: &Rule, count: usize) -> bool {
        i64::try_from(count).unwrap_or(i64::MAX) > rule.subscription_count
    }
}
