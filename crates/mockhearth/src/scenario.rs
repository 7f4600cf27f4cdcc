//! Declarative scenario model: the shape scenario YAML files deserialize into,
//! before the compiler (`crate::compiler`) lowers them to executable predicates
//! and response producers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One declarative rule pairing a request-match clause with a response and policy.
///
/// Immutable once loaded; the loader never mutates a `Scenario` after parsing it
/// out of YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub priority: i64,
    pub when: WhenClause,
    pub response: ResponseSpec,
    #[serde(default)]
    pub policy: Option<PolicySpec>,
}

impl Scenario {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// The predicate tree identifying which requests a scenario applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<BodyClause>,
}

/// Exact or regex comparison applied to an extracted string. A matcher string
/// starting with `=` is exact (minus the leading `=`); otherwise it is a regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringMatcher {
    Exact(String),
    Pattern(String),
}

impl StringMatcher {
    /// Parses the `"=literal"` / `"regex"` surface syntax into the tagged variant.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('=') {
            Some(literal) => StringMatcher::Exact(literal.to_string()),
            None => StringMatcher::Pattern(raw.to_string()),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            StringMatcher::Exact(s) | StringMatcher::Pattern(s) => s,
        }
    }
}

/// Content-type dialect selecting which extractor language a body clause uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyContentType {
    Json,
    Xml,
}

/// An `(extractor, matcher)` pair: a location expression paired with the string
/// comparison applied to whatever it extracts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub extractor: String,
    pub matcher: String,
}

/// Recursive tagged variant over body clauses. Exactly one of
/// `{conditions, all, any, not}` is populated on any given node (invariant 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyClause {
    #[serde(default)]
    pub content_type: Option<BodyContentType>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub all: Option<Vec<BodyClause>>,
    #[serde(default)]
    pub any: Option<Vec<BodyClause>>,
    #[serde(default)]
    pub not: Option<Box<BodyClause>>,
}

impl BodyClause {
    /// The single populated variant, or `None` if the clause is malformed
    /// (zero or more than one branch set).
    pub fn variant(&self) -> Option<BodyClauseVariant<'_>> {
        let mut found = None;
        let mut count = 0;

        if let Some(conditions) = &self.conditions {
            found = Some(BodyClauseVariant::Conditions(conditions));
            count += 1;
        }
        if let Some(all) = &self.all {
            found = Some(BodyClauseVariant::All(all));
            count += 1;
        }
        if let Some(any) = &self.any {
            found = Some(BodyClauseVariant::Any(any));
            count += 1;
        }
        if let Some(not) = &self.not {
            found = Some(BodyClauseVariant::Not(not));
            count += 1;
        }

        if count == 1 {
            found
        } else {
            None
        }
    }
}

pub enum BodyClauseVariant<'a> {
    Conditions(&'a [Condition]),
    All(&'a [BodyClause]),
    Any(&'a [BodyClause]),
    Not(&'a BodyClause),
}

/// The declarative response: status, headers, and one body source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_file: Option<String>,
}

fn default_status() -> u16 {
    200
}

/// Optional per-scenario policy: rate limiting, latency injection, pagination.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
    #[serde(default)]
    pub latency: Option<LatencySpec>,
    #[serde(default)]
    pub pagination: Option<PaginationSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub rate: f64,
    pub burst: u32,
    #[serde(default = "default_rate_limit_key")]
    pub key: String,
}

fn default_rate_limit_key() -> String {
    "global".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySpec {
    #[serde(default)]
    pub fixed_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStyle {
    PageSize,
    OffsetLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationSpec {
    pub style: PaginationStyle,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default = "default_size_param")]
    pub size_param: String,
    #[serde(default = "default_offset_param")]
    pub offset_param: String,
    #[serde(default = "default_limit_param")]
    pub limit_param: String,
    #[serde(default = "default_page_size")]
    pub default_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_data_path")]
    pub data_path: String,
    #[serde(default)]
    pub envelope: EnvelopeFields,
}

fn default_page_param() -> String {
    "page".to_string()
}
fn default_size_param() -> String {
    "size".to_string()
}
fn default_offset_param() -> String {
    "offset".to_string()
}
fn default_limit_param() -> String {
    "limit".to_string()
}
fn default_page_size() -> usize {
    20
}
fn default_max_size() -> usize {
    100
}
fn default_data_path() -> String {
    "$".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeFields {
    #[serde(default = "field_data")]
    pub data_field: String,
    #[serde(default = "field_page")]
    pub page_field: String,
    #[serde(default = "field_size")]
    pub size_field: String,
    #[serde(default = "field_total_items")]
    pub total_items_field: String,
    #[serde(default = "field_total_pages")]
    pub total_pages_field: String,
    #[serde(default = "field_has_next")]
    pub has_next_field: String,
    #[serde(default = "field_has_previous")]
    pub has_previous_field: String,
}

impl Default for EnvelopeFields {
    fn default() -> Self {
        EnvelopeFields {
            data_field: field_data(),
            page_field: field_page(),
            size_field: field_size(),
            total_items_field: field_total_items(),
            total_pages_field: field_total_pages(),
            has_next_field: field_has_next(),
            has_previous_field: field_has_previous(),
        }
    }
}

fn field_data() -> String {
    "data".to_string()
}
fn field_page() -> String {
    "page".to_string()
}
fn field_size() -> String {
    "size".to_string()
}
fn field_total_items() -> String {
    "total_items".to_string()
}
fn field_total_pages() -> String {
    "total_pages".to_string()
}
fn field_has_next() -> String {
    "has_next".to_string()
}
fn field_has_previous() -> String {
    "has_previous".to_string()
}

/// A scenario file's top level is either one scenario or a sequence of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioFile {
    One(Scenario),
    Many(Vec<Scenario>),
}

impl ScenarioFile {
    pub fn into_vec(self) -> Vec<Scenario> {
        match self {
            ScenarioFile::One(s) => vec![s],
            ScenarioFile::Many(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_matcher_parses_exact_prefix() {
        assert_eq!(
            StringMatcher::parse("=application/json"),
            StringMatcher::Exact("application/json".to_string())
        );
        assert_eq!(
            StringMatcher::parse("application/json.*"),
            StringMatcher::Pattern("application/json.*".to_string())
        );
    }

    #[test]
    fn body_clause_variant_requires_exactly_one_branch() {
        let empty = BodyClause {
            content_type: None,
            conditions: None,
            all: None,
            any: None,
            not: None,
        };
        assert!(empty.variant().is_none());

        let conditions = BodyClause {
            content_type: None,
            conditions: Some(vec![Condition {
                extractor: "$.a".into(),
                matcher: "=1".into(),
            }]),
            all: None,
            any: None,
            not: None,
        };
        assert!(matches!(
            conditions.variant(),
            Some(BodyClauseVariant::Conditions(_))
        ));

        let ambiguous = BodyClause {
            content_type: None,
            conditions: Some(vec![]),
            all: Some(vec![]),
            any: None,
            not: None,
        };
        assert!(ambiguous.variant().is_none());
    }

    #[test]
    fn scenario_file_accepts_one_or_many() {
        let one: ScenarioFile = serde_yaml::from_str(
            "id: a\nwhen: { method: GET, path: /x }\nresponse: { body: hi }\n",
        )
        .unwrap();
        assert_eq!(one.into_vec().len(), 1);

        let many: ScenarioFile = serde_yaml::from_str(
            "- id: a\n  when: { method: GET, path: /x }\n  response: { body: hi }\n- id: b\n  when: { method: GET, path: /y }\n  response: { body: bye }\n",
        )
        .unwrap();
        assert_eq!(many.into_vec().len(), 2);
    }

    #[test]
    fn scenario_defaults_priority_and_status() {
        let s: Scenario = serde_yaml::from_str(
            "id: a\nwhen: { method: GET, path: /x }\nresponse: { body: hi }\n",
        )
        .unwrap();
        assert_eq!(s.priority, 0);
        assert_eq!(s.response.status, 200);
    }
}
