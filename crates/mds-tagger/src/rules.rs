//! RuleEngine — evaluates one field rule against one service.
//!
//! A rule has a primary condition (`metadata_field`, `keyword`) and an
//! optional secondary one (`corule_metadata_field`, `corule_keyword`)
//! combined through `keyword_operator`:
//!
//! ```text
//! no secondary  → primary
//! AND           → primary && secondary
//! OR            → primary || secondary
//! anything else → false
//! ```
//!
//! The `like` field compares numerically against `relational_operand`;
//! every other field is a case-insensitive substring match.

use std::borrow::Cow;

use mds_state::{KeywordOperator, Rule, RuleOperation, Service};

/// Rule-visible service fields, by normalised name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceField {
    ServiceName,
    Description,
    MoreAbout,
    Location,
    TargetSegment,
    Pricing,
    BusinessModel,
    Deployment,
    Stage,
    Like,
}

impl ServiceField {
    /// Resolve a field name. Case, spaces and underscores are ignored, so
    /// `"Target Segment"`, `"target_segment"` and `"targetsegment"` agree.
    pub fn resolve(name: &str) -> Option<Self> {
        let normalised: String = name
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        let field = match normalised.as_str() {
            "servicename" => ServiceField::ServiceName,
            "description" => ServiceField::Description,
            "moreabout" => ServiceField::MoreAbout,
            "location" => ServiceField::Location,
            "targetsegment" => ServiceField::TargetSegment,
            "pricing" => ServiceField::Pricing,
            "businessmodel" => ServiceField::BusinessModel,
            "deployment" => ServiceField::Deployment,
            "stage" => ServiceField::Stage,
            "like" => ServiceField::Like,
            _ => return None,
        };
        Some(field)
    }

    /// The field's value as text. `like` renders its count.
    pub fn text<'a>(self, service: &'a Service) -> Cow<'a, str> {
        let text = match self {
            ServiceField::ServiceName => &service.service_name,
            ServiceField::Description => &service.description,
            ServiceField::MoreAbout => &service.more_about,
            ServiceField::Location => &service.location,
            ServiceField::TargetSegment => &service.target_segment,
            ServiceField::Pricing => &service.pricing,
            ServiceField::BusinessModel => &service.business_model,
            ServiceField::Deployment => &service.deployment,
            ServiceField::Stage => &service.stage,
            ServiceField::Like => return Cow::Owned(service.like.to_string()),
        };
        Cow::Borrowed(text)
    }
}

/// Text of a field by name; unknown names read as empty.
pub fn field_text<'a>(service: &'a Service, name: &str) -> Cow<'a, str> {
    ServiceField::resolve(name)
        .map(|field| field.text(service))
        .unwrap_or(Cow::Borrowed(""))
}

/// Stateless evaluator for CONTAIN / RELATION rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    /// Whether `rule` matches `service`. SUBSCRIPTION_COUNT and unrecognised
    /// operations never match here.
    pub fn evaluate(rule: &Rule, service: &Service) -> bool {
        if !rule.operation.is_field_match() {
            return false;
        }
        let primary = || Self::condition(rule, &rule.metadata_field, &rule.keyword, service);
        if !rule.has_secondary() {
            return primary();
        }
        let secondary =
            || Self::condition(rule, &rule.corule_metadata_field, &rule.corule_keyword, service);
        match rule.keyword_operator {
            KeywordOperator::And => primary() && secondary(),
            KeywordOperator::Or => primary() || secondary(),
            KeywordOperator::None | KeywordOperator::Unrecognized(_) => false,
        }
    }

    fn condition(rule: &Rule, field: &str, keyword: &str, service: &Service) -> bool {
        match ServiceField::resolve(field) {
            Some(ServiceField::Like) => rule
                .relational_operator
                .compare(service.like, rule.relational_operand),
            Some(field) => contains_keyword(&field.text(service), keyword),
            // Unknown fields read as "", which contains no keyword.
            None => false,
        }
    }

    /// Field-match rules from a rule set, the ones a service change can hit.
    pub fn field_rules(rules: &[Rule]) -> impl Iterator<Item = &Rule> {
        rules.iter().filter(|rule| rule.operation.is_field_match())
    }

    pub fn subscription_rules(rules: &[Rule]) -> impl Iterator<Item = &Rule> {
        rules
            .iter()
            .filter(|rule| rule.operation == RuleOperation::SubscriptionCount)
    }
}

fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    !keyword.is_empty() && haystack.to_lowercase().contains(&keyword.to_lowercase())
}
