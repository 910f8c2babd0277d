//! Typed decoding of change records.

use serde::de::DeserializeOwned;

use mds_core::keys::EntityKind;
use mds_state::item::{self, Item};
use mds_state::{Company, EventKind, Rule, Service, StreamRecord, TagDefinition};

use crate::error::{TaggerError, TaggerResult};

/// Before/after images of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedChange<T> {
    pub event: EventKind,
    pub old: Option<T>,
    pub new: Option<T>,
}

/// A change record resolved to its entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedChange {
    Service(TypedChange<Service>),
    Company(TypedChange<Company>),
    Tag(TypedChange<TagDefinition>),
    Rule(TypedChange<Rule>),
    /// Key outside the codec's prefixes.
    Unknown,
}

impl DecodedChange {
    /// Decode a record. Fails if it carries no key or an image does not
    /// decode into the kind its key names.
    pub fn decode(record: &StreamRecord) -> TaggerResult<Self> {
        let key = record
            .item_key()
            .ok_or_else(|| TaggerError::Decode("record carries no PK/SK".to_string()))?;
        let change = match key.kind() {
            EntityKind::Service => DecodedChange::Service(typed(record)?),
            EntityKind::Company => DecodedChange::Company(typed(record)?),
            EntityKind::Tag => DecodedChange::Tag(typed(record)?),
            EntityKind::Rule => DecodedChange::Rule(typed(record)?),
            EntityKind::Unknown => DecodedChange::Unknown,
        };
        Ok(change)
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            DecodedChange::Service(_) => EntityKind::Service,
            DecodedChange::Company(_) => EntityKind::Company,
            DecodedChange::Tag(_) => EntityKind::Tag,
            DecodedChange::Rule(_) => EntityKind::Rule,
            DecodedChange::Unknown => EntityKind::Unknown,
        }
    }
}

fn typed<T: DeserializeOwned>(record: &StreamRecord) -> TaggerResult<TypedChange<T>> {
    Ok(TypedChange {
        event: record.event_kind,
        old: image(record.change.old_image.as_ref(), "OldImage")?,
        new: image(record.change.new_image.as_ref(), "NewImage")?,
    })
}

fn image<T: DeserializeOwned>(image: Option<&Item>, which: &str) -> TaggerResult<Option<T>> {
    image
        .map(|item| {
            item::from_item(item).map_err(|e| TaggerError::Decode(format!("{which}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_core::keys::RangeKey;
    use mds_state::{AttributeValue, StreamBatch};

    #[test]
    fn decodes_service_images() {
        let svc = Service {
            description: "saas".to_string(),
            like: 4,
            ..Service::new("acme")
        };
        let key = svc.item_key();
        let image = item::with_key(item::to_item(&svc).unwrap(), &key);
        let record = StreamRecord::new(1, &key, None, Some(image));

        match DecodedChange::decode(&record).unwrap() {
            DecodedChange::Service(change) => {
                assert_eq!(change.event, EventKind::Insert);
                assert!(change.old.is_none());
                assert_eq!(change.new, Some(svc));
            }
            other => panic!("expected a service change, got {other:?}"),
        }
    }

    #[test]
    fn wire_records_decode_leniently() {
        let raw = r#"{"Records": [{
            "eventName": "MODIFY",
            "dynamodb": {
                "Keys": {"PK": {"S": "RL"}, "SK": {"S": "RL#r1"}},
                "NewImage": {
                    "uuid": {"S": "r1"},
                    "operation": {"S": "RELATION"},
                    "relational_operator": {"S": "NEARLY"},
                    "relational_operand": {"S": "ten"},
                    "subscription_count": {"N": "2"}
                }
            }
        }]}"#;
        let batch: StreamBatch = serde_json::from_str(raw).unwrap();
        let DecodedChange::Rule(change) = DecodedChange::decode(&batch.records[0]).unwrap() else {
            panic!("expected a rule change");
        };
        let rule = change.new.unwrap();
        assert_eq!(rule.relational_operand, 0);
        assert_eq!(rule.subscription_count, 2);
        assert_eq!(rule.relational_operator.as_str(), "NEARLY");
    }

    #[test]
    fn unknown_prefix_is_unknown() {
        let key = mds_core::ItemKey {
            pk: "ZZ".to_string(),
            sk: "ZZ#x".to_string(),
        };
        let record = StreamRecord::new(1, &key, None, Some(item::key_item(&key)));
        assert_eq!(DecodedChange::decode(&record).unwrap(), DecodedChange::Unknown);
    }

    #[test]
    fn keyless_or_mistyped_records_fail() {
        let mut record = StreamRecord::new(1, &RangeKey::company("c").item_key(), None, None);
        record.change.keys.clear();
        assert!(matches!(DecodedChange::decode(&record), Err(TaggerError::Decode(_))));

        let key = RangeKey::company("c").item_key();
        let mut image = item::key_item(&key);
        image.insert("service_list".to_string(), AttributeValue::S("not a list".to_string()));
        let record = StreamRecord::new(2, &key, None, Some(image));
        assert!(matches!(DecodedChange::decode(&record), Err(TaggerError::Decode(_))));
    }
}
