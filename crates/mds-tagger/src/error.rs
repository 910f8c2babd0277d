//! Error types for the tagger.

use std::time::Duration;

use thiserror::Error;

use mds_core::config::ConfigError;
use mds_state::StateError;

pub type TaggerResult<T> = Result<T, TaggerError>;

#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("store error: {0}")]
    Store(#[from] StateError),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error("malformed change record: {0}")]
    Decode(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
