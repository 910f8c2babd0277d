//! Key codec for the single-table layout.
//!
//! Every item lives in one physical table under a `(PK, SK)` pair:
//!
//! ```text
//! PK   SK
//! SR   SR#<service_name>
//! CM   CM#<company_name>
//! TG   TG#<key>            (key only)
//! TG   TG#<key>#<value>
//! RL   RL#<uuid>
//! ```
//!
//! Natural identifiers are escaped before they are joined with `#`, so a
//! `begins_with` query for "all tags with key `cloud`" (`TG#cloud#`) can
//! never match a key such as `cloud native`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Field separator inside a range key.
pub const SEPARATOR: char = '#';

/// Attribute names of the physical key pair.
pub const PARTITION_KEY_NAME: &str = "PK";
pub const RANGE_KEY_NAME: &str = "SK";

/// Logical entity kind multiplexed into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Service,
    Company,
    Tag,
    Rule,
    /// Key prefix not produced by this codec. Callers ignore such records.
    Unknown,
}

impl EntityKind {
    /// The four kinds that own a key prefix.
    pub const KNOWN: [EntityKind; 4] = [
        EntityKind::Service,
        EntityKind::Company,
        EntityKind::Tag,
        EntityKind::Rule,
    ];

    /// Two-character key prefix, `None` for [`EntityKind::Unknown`].
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            EntityKind::Service => Some("SR"),
            EntityKind::Company => Some("CM"),
            EntityKind::Tag => Some("TG"),
            EntityKind::Rule => Some("RL"),
            EntityKind::Unknown => None,
        }
    }

    fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "SR" => EntityKind::Service,
            "CM" => EntityKind::Company,
            "TG" => EntityKind::Tag,
            "RL" => EntityKind::Rule,
            _ => EntityKind::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Service => "SERVICE",
            EntityKind::Company => "COMPANY",
            EntityKind::Tag => "TAG",
            EntityKind::Rule => "RULE",
            EntityKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Partition key for an entity kind.
pub fn partition_key(kind: EntityKind) -> Option<&'static str> {
    kind.prefix()
}

/// Build a range key from loosely typed parts.
///
/// `name` is the service/company name or the tag key, `value` the tag value
/// (empty for "key only"), `uuid` the rule id. Unused parts are ignored.
pub fn range_key(kind: EntityKind, name: &str, value: &str, uuid: &str) -> Option<String> {
    let key = match kind {
        EntityKind::Service => RangeKey::service(name),
        EntityKind::Company => RangeKey::company(name),
        EntityKind::Tag => RangeKey::tag(name, value),
        EntityKind::Rule => RangeKey::rule(uuid),
        EntityKind::Unknown => return None,
    };
    Some(key.encode())
}

/// Recover the entity kind from a partition key (`SR`) or range key (`SR#x`).
pub fn decode_entity_kind(key: &str) -> EntityKind {
    let prefix = key.split(SEPARATOR).next().unwrap_or_default();
    EntityKind::from_prefix(prefix)
}

/// Typed natural identifiers of a range key, `None` if malformed.
pub fn decode_range_key(sk: &str) -> Option<RangeKey> {
    RangeKey::decode(sk)
}

/// `begins_with` prefix selecting every tag definition registered under `key`.
pub fn tag_key_prefix(key: &str) -> String {
    format!("TG{SEPARATOR}{}{SEPARATOR}", escape(key))
}

/// Typed natural identifiers of one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RangeKey {
    Service { name: String },
    Company { name: String },
    Tag { key: String, value: Option<String> },
    Rule { uuid: String },
}

impl RangeKey {
    pub fn service(name: &str) -> Self {
        RangeKey::Service {
            name: name.to_string(),
        }
    }

    pub fn company(name: &str) -> Self {
        RangeKey::Company {
            name: name.to_string(),
        }
    }

    /// An empty `value` addresses the key only.
    pub fn tag(key: &str, value: &str) -> Self {
        RangeKey::Tag {
            key: key.to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
        }
    }

    pub fn rule(uuid: &str) -> Self {
        RangeKey::Rule {
            uuid: uuid.to_string(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            RangeKey::Service { .. } => EntityKind::Service,
            RangeKey::Company { .. } => EntityKind::Company,
            RangeKey::Tag { .. } => EntityKind::Tag,
            RangeKey::Rule { .. } => EntityKind::Rule,
        }
    }

    pub fn partition_key(&self) -> &'static str {
        match self {
            RangeKey::Service { .. } => "SR",
            RangeKey::Company { .. } => "CM",
            RangeKey::Tag { .. } => "TG",
            RangeKey::Rule { .. } => "RL",
        }
    }

    /// Encode into the `SK` string.
    pub fn encode(&self) -> String {
        let prefix = self.partition_key();
        match self {
            RangeKey::Service { name } | RangeKey::Company { name } => {
                format!("{prefix}{SEPARATOR}{}", escape(name))
            }
            RangeKey::Tag { key, value: None } => format!("{prefix}{SEPARATOR}{}", escape(key)),
            RangeKey::Tag {
                key,
                value: Some(value),
            } => format!(
                "{prefix}{SEPARATOR}{}{SEPARATOR}{}",
                escape(key),
                escape(value)
            ),
            RangeKey::Rule { uuid } => format!("{prefix}{SEPARATOR}{}", escape(uuid)),
        }
    }

    /// Decode an `SK` string. Returns `None` for unknown prefixes or bad escapes.
    pub fn decode(sk: &str) -> Option<Self> {
        let (prefix, rest) = sk.split_once(SEPARATOR)?;
        match EntityKind::from_prefix(prefix) {
            EntityKind::Service => Some(RangeKey::Service {
                name: unescape(rest)?,
            }),
            EntityKind::Company => Some(RangeKey::Company {
                name: unescape(rest)?,
            }),
            EntityKind::Tag => match rest.split_once(SEPARATOR) {
                Some((key, value)) => Some(RangeKey::Tag {
                    key: unescape(key)?,
                    value: Some(unescape(value)?),
                }),
                None => Some(RangeKey::Tag {
                    key: unescape(rest)?,
                    value: None,
                }),
            },
            EntityKind::Rule => Some(RangeKey::Rule {
                uuid: unescape(rest)?,
            }),
            EntityKind::Unknown => None,
        }
    }

    /// Full physical key of this item.
    pub fn item_key(&self) -> ItemKey {
        ItemKey {
            pk: self.partition_key().to_string(),
            sk: self.encode(),
        }
    }
}

/// Physical `(PK, SK)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
}

impl ItemKey {
    /// Single-string form used as the redb table key: `{PK}|{SK}`.
    ///
    /// Partition keys never contain `|`, so splitting at the first one is
    /// unambiguous.
    pub fn storage_key(&self) -> String {
        format!("{}|{}", self.pk, self.sk)
    }

    pub fn from_storage_key(raw: &str) -> Option<Self> {
        let (pk, sk) = raw.split_once('|')?;
        Some(Self {
            pk: pk.to_string(),
            sk: sk.to_string(),
        })
    }

    /// Storage-key prefix selecting a whole partition.
    pub fn partition_prefix(pk: &str) -> String {
        format!("{pk}|")
    }

    pub fn kind(&self) -> EntityKind {
        match decode_entity_kind(&self.pk) {
            EntityKind::Unknown => decode_entity_kind(&self.sk),
            kind => kind,
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            SEPARATOR => out.push_str("%23"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(encoded: &str) -> Option<String> {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "20" => out.push(' '),
            "23" => out.push(SEPARATOR),
            _ => return None,
        }
    }
    Some(out)
}
