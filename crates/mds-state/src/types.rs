//! Domain types for the mds state store.
//!
//! Services, companies, tag definitions and rules share one physical table.
//! Each type knows its own [`RangeKey`]; the store derives the physical key
//! from it on every write.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use mds_core::keys::{ItemKey, RangeKey};

// ── Tags ──────────────────────────────────────────────────────────

/// A `(key, value)` pair as attached to a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagPair {
    pub key: String,
    pub value: String,
}

impl TagPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for TagPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A registered tag. Only registered pairs may be attached to services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagDefinition {
    pub key: String,
    pub value: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl TagDefinition {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn pair(&self) -> TagPair {
        TagPair::new(&self.key, &self.value)
    }

    pub fn range_key(&self) -> RangeKey {
        RangeKey::tag(&self.key, &self.value)
    }
}

/// All registered values of one tag key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroup {
    pub key: String,
    pub values: Vec<String>,
    /// Oldest `created_at` in the group.
    pub created_at: u64,
    /// Newest `updated_at` in the group.
    pub updated_at: u64,
}

// ── Service ───────────────────────────────────────────────────────

/// A catalogued service. `category` is the tag list maintained by rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub uuid: String,
    pub service_name: String,
    pub description: String,
    pub more_about: String,
    pub category: Vec<TagPair>,
    #[serde(deserialize_with = "lenient_int")]
    pub like: i64,
    pub stage: String,
    pub target_segment: String,
    pub deployment: String,
    pub business_model: String,
    pub pricing: String,
    pub location: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    pub fn range_key(&self) -> RangeKey {
        RangeKey::service(&self.service_name)
    }

    pub fn item_key(&self) -> ItemKey {
        self.range_key().item_key()
    }

    pub fn has_tag(&self, tag: &TagPair) -> bool {
        self.category.contains(tag)
    }
}

// ── Company ───────────────────────────────────────────────────────

/// A company and the services it subscribes to (by service uuid).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Company {
    pub uuid: String,
    pub company_name: String,
    pub description: String,
    /// Referenced service uuids.
    pub service_list: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Company {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            company_name: name.into(),
            ..Self::default()
        }
    }

    pub fn range_key(&self) -> RangeKey {
        RangeKey::company(&self.company_name)
    }

    pub fn references(&self, service_id: &str) -> bool {
        self.service_list.iter().any(|id| id == service_id)
    }
}

// ── Rule ──────────────────────────────────────────────────────────

/// Rule operation. Values outside the fixed vocabulary are kept verbatim
/// and never match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleOperation {
    Contain,
    Relation,
    SubscriptionCount,
    Unrecognized(String),
}

impl RuleOperation {
    pub fn as_str(&self) -> &str {
        match self {
            RuleOperation::Contain => "CONTAIN",
            RuleOperation::Relation => "RELATION",
            RuleOperation::SubscriptionCount => "SUBSCRIPTION_COUNT",
            RuleOperation::Unrecognized(raw) => raw,
        }
    }

    /// CONTAIN and RELATION share the field-matching mechanics.
    pub fn is_field_match(&self) -> bool {
        matches!(self, RuleOperation::Contain | RuleOperation::Relation)
    }
}

impl Default for RuleOperation {
    fn default() -> Self {
        RuleOperation::Unrecognized(String::new())
    }
}

impl From<String> for RuleOperation {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "CONTAIN" => RuleOperation::Contain,
            "RELATION" => RuleOperation::Relation,
            "SUBSCRIPTION_COUNT" => RuleOperation::SubscriptionCount,
            _ => RuleOperation::Unrecognized(raw),
        }
    }
}

impl From<RuleOperation> for String {
    fn from(op: RuleOperation) -> Self {
        op.as_str().to_string()
    }
}

/// How the secondary condition combines with the primary one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeywordOperator {
    /// Empty string: no secondary condition.
    #[default]
    None,
    And,
    Or,
    Unrecognized(String),
}

impl KeywordOperator {
    pub fn as_str(&self) -> &str {
        match self {
            KeywordOperator::None => "",
            KeywordOperator::And => "AND",
            KeywordOperator::Or => "OR",
            KeywordOperator::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for KeywordOperator {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "" => KeywordOperator::None,
            "AND" => KeywordOperator::And,
            "OR" => KeywordOperator::Or,
            _ => KeywordOperator::Unrecognized(raw),
        }
    }
}

impl From<KeywordOperator> for String {
    fn from(op: KeywordOperator) -> Self {
        op.as_str().to_string()
    }
}

/// Numeric comparison applied to the `like` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationalOperator {
    #[default]
    None,
    GreaterThan,
    LesserThan,
    Equal,
    GreaterThanEqual,
    LesserThanEqual,
    Unrecognized(String),
}

impl RelationalOperator {
    pub fn as_str(&self) -> &str {
        match self {
            RelationalOperator::None => "",
            RelationalOperator::GreaterThan => "GREATER_THAN",
            RelationalOperator::LesserThan => "LESSER_THAN",
            RelationalOperator::Equal => "EQUAL",
            RelationalOperator::GreaterThanEqual => "GREATER_THAN_EQUAL",
            RelationalOperator::LesserThanEqual => "LESSER_THAN_EQUAL",
            RelationalOperator::Unrecognized(raw) => raw,
        }
    }

    /// `lhs <op> rhs`. Unset or unrecognised operators never hold.
    pub fn compare(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            RelationalOperator::GreaterThan => lhs > rhs,
            RelationalOperator::LesserThan => lhs < rhs,
            RelationalOperator::Equal => lhs == rhs,
            RelationalOperator::GreaterThanEqual => lhs >= rhs,
            RelationalOperator::LesserThanEqual => lhs <= rhs,
            RelationalOperator::None | RelationalOperator::Unrecognized(_) => false,
        }
    }
}

impl From<String> for RelationalOperator {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "" => RelationalOperator::None,
            "GREATER_THAN" => RelationalOperator::GreaterThan,
            "LESSER_THAN" => RelationalOperator::LesserThan,
            "EQUAL" => RelationalOperator::Equal,
            "GREATER_THAN_EQUAL" => RelationalOperator::GreaterThanEqual,
            "LESSER_THAN_EQUAL" => RelationalOperator::LesserThanEqual,
            _ => RelationalOperator::Unrecognized(raw),
        }
    }
}

impl From<RelationalOperator> for String {
    fn from(op: RelationalOperator) -> Self {
        op.as_str().to_string()
    }
}

/// A tagging rule: when its condition matches a service, the service gets
/// `(tag_key, tag_value)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub uuid: String,
    pub operation: RuleOperation,
    pub tag_key: String,
    pub tag_value: String,
    pub metadata_field: String,
    pub keyword: String,
    pub keyword_operator: KeywordOperator,
    pub relational_operator: RelationalOperator,
    #[serde(deserialize_with = "lenient_int")]
    pub relational_operand: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub subscription_count: i64,
    pub corule_metadata_field: String,
    pub corule_keyword: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Rule {
    pub fn range_key(&self) -> RangeKey {
        RangeKey::rule(&self.uuid)
    }

    pub fn target_tag(&self) -> TagPair {
        TagPair::new(&self.tag_key, &self.tag_value)
    }

    pub fn has_secondary(&self) -> bool {
        !self.corule_metadata_field.is_empty()
    }

    /// Two rules with the same structure are duplicates regardless of id
    /// and timestamps.
    pub fn same_structure(&self, other: &Rule) -> bool {
        self.operation == other.operation
            && self.tag_key == other.tag_key
            && self.tag_value == other.tag_value
            && self.metadata_field == other.metadata_field
            && self.keyword == other.keyword
            && self.keyword_operator == other.keyword_operator
            && self.relational_operator == other.relational_operator
            && self.subscription_count == other.subscription_count
            && self.relational_operand == other.relational_operand
            && self.corule_metadata_field == other.corule_metadata_field
            && self.corule_keyword == other.corule_keyword
    }

    /// Shape checks applied on create/update. Stored rules are not
    /// re-validated on read.
    pub fn validate(&self) -> Result<(), String> {
        if let RuleOperation::Unrecognized(raw) = &self.operation {
            return Err(format!("unknown operation {raw:?}"));
        }
        if self.tag_key.is_empty() || self.tag_value.is_empty() {
            return Err("tag_key and tag_value are required".to_string());
        }
        if let KeywordOperator::Unrecognized(raw) = &self.keyword_operator {
            return Err(format!("unknown keyword_operator {raw:?}"));
        }
        if let RelationalOperator::Unrecognized(raw) = &self.relational_operator {
            return Err(format!("unknown relational_operator {raw:?}"));
        }
        if self.operation.is_field_match() && self.metadata_field.trim().is_empty() {
            return Err("metadata_field is required".to_string());
        }
        if self.has_secondary() && self.keyword_operator == KeywordOperator::None {
            return Err("corule_metadata_field requires keyword_operator AND or OR".to_string());
        }
        if self.operation.is_field_match() {
            // An empty keyword never matches a text field.
            if !is_like_field(&self.metadata_field) && self.keyword.is_empty() {
                return Err(format!("keyword is required for field {:?}", self.metadata_field));
            }
            if self.has_secondary()
                && !is_like_field(&self.corule_metadata_field)
                && self.corule_keyword.is_empty()
            {
                return Err(format!(
                    "corule_keyword is required for field {:?}",
                    self.corule_metadata_field
                ));
            }
        }
        if self.operation == RuleOperation::SubscriptionCount && self.subscription_count < 0 {
            return Err("subscription_count must not be negative".to_string());
        }
        Ok(())
    }
}

/// `like` is compared numerically and takes no keyword. Field names ignore
/// case, whitespace and underscores.
fn is_like_field(name: &str) -> bool {
    let normalised: String = name
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    normalised == "like"
}

/// Accept an integer, a float (truncated), a numeric string or null.
/// Anything unparseable reads as 0.
fn lenient_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(i) => i,
        Raw::Float(f) => f as i64,
        Raw::Text(s) => s.trim().parse().unwrap_or(0),
        Raw::Other(_) => 0,
    })
}
