//! TagPropagator — attaches a matched tag to a service exactly once.

use std::sync::Arc;

use tracing::{debug, warn};

use mds_state::{Service, StateError, TagPair};

use crate::error::TaggerResult;
use crate::repository::Repository;

pub struct TagPropagator<R> {
    repo: Arc<R>,
}

impl<R> Clone for TagPropagator<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: Repository> TagPropagator<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Attach `tag` to `service` unless it already carries it.
    ///
    /// The snapshot check saves a write; the store's conditional append
    /// absorbs anything the snapshot missed (redelivery, racing appends).
    /// Only the tag list is touched. Returns true if the tag was appended.
    ///
    /// A service deleted or renamed since the snapshot was taken is skipped:
    /// its later REMOVE and INSERT records describe where it lives now.
    pub fn apply(&self, service: &Service, tag: &TagPair) -> TaggerResult<bool> {
        if service.has_tag(tag) {
            debug!(service = %service.service_name, %tag, "tag already in snapshot");
            return Ok(false);
        }
        match self.repo.append_service_tag(&service.item_key(), tag) {
            Ok(appended) => {
                debug!(service = %service.service_name, %tag, appended, "tag propagated");
                Ok(appended)
            }
            Err(StateError::NotFound(_)) => {
                warn!(service = %service.service_name, %tag, "service no longer at its key, skipping");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
