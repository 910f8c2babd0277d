//! mds-tagger — rule-driven auto-tagging over the change feed.
//!
//! Consumes batches of change records from the single-table store, decodes
//! each one into a typed subject and re-evaluates the rules it can affect.
//! Matching rules attach their `(tag_key, tag_value)` pair to the service
//! with one conditional append, so redelivered batches are harmless.
//!
//! # Dispatch table
//!
//! ```text
//! entity    INSERT / MODIFY                                  REMOVE
//! SERVICE   field rules vs the service (MODIFY: only if a    -
//!           trigger field changed)
//! RULE      field rule vs every service, or subscription     -
//!           rule vs every service some company references
//! COMPANY   subscription rules vs each referenced service    -
//! TAG       -                                                -
//! ```

pub mod change;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod propagate;
pub mod repository;
pub mod rules;
pub mod subscription;

pub use change::{DecodedChange, TypedChange};
pub use dispatch::{BatchReport, ChangeDispatcher, RecordFailure};
pub use error::{TaggerError, TaggerResult};
pub use feed::ChangeFeed;
pub use propagate::TagPropagator;
pub use repository::Repository;
pub use rules::RuleEngine;
pub use subscription::SubscriptionCounter;
