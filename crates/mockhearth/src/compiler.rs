//! Lowers declarative [`Scenario`]s into [`CompiledScenario`]s: precompiled
//! field-predicates plus a compiled response, ready for the evaluator and
//! response pipeline to consume without touching YAML or regex compilation
//! again.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;

use crate::error::CompileError;
use crate::extractor::{self, infer_content_type};
use crate::scenario::{
    BodyClause, BodyClauseVariant, BodyContentType, PaginationSpec, RateLimitSpec, LatencySpec,
    Scenario, StringMatcher,
};
use crate::template::{BodyRenderer, TemplateRegistry};

/// Method + path-template pair used to bucket compiled scenarios (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: String,
    pub path_template: String,
}

impl RouteKey {
    pub fn new(method: &str, path_template: &str) -> Self {
        RouteKey {
            method: method.to_ascii_uppercase(),
            path_template: path_template.to_string(),
        }
    }
}

/// A precompiled exact/regex comparison.
#[derive(Debug, Clone)]
pub enum CompiledStringMatcher {
    Exact(String),
    Pattern(Regex),
}

impl CompiledStringMatcher {
    fn compile(matcher: &StringMatcher, scenario_id: &str) -> Result<Self, CompileError> {
        match matcher {
            StringMatcher::Exact(s) => Ok(CompiledStringMatcher::Exact(s.clone())),
            StringMatcher::Pattern(p) => {
                let regex = Regex::new(p).map_err(|source| CompileError::InvalidRegex {
                    id: scenario_id.to_string(),
                    pattern: p.clone(),
                    source,
                })?;
                Ok(CompiledStringMatcher::Pattern(regex))
            }
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            CompiledStringMatcher::Exact(expected) => value == expected,
            CompiledStringMatcher::Pattern(re) => re.is_match(value),
        }
    }
}

/// Recursive compiled body predicate, mirroring [`BodyClause`]'s shape after
/// the conditions/all/any/not transform described in §4.1.
#[derive(Debug, Clone)]
pub enum CompiledBodyPredicate {
    Condition {
        content_type: Option<BodyContentType>,
        extractor: String,
        matcher: CompiledStringMatcher,
    },
    All(Vec<CompiledBodyPredicate>),
    Any(Vec<CompiledBodyPredicate>),
    Not(Box<CompiledBodyPredicate>),
}

impl CompiledBodyPredicate {
    pub fn evaluate(&self, body: &[u8]) -> PredicateOutcome {
        match self {
            CompiledBodyPredicate::Condition {
                content_type,
                extractor,
                matcher,
            } => {
                let resolved_type = content_type.or_else(|| infer_content_type(body));
                let Some(ct) = resolved_type else {
                    return PredicateOutcome::fail(format!(
                        "could not infer content type to evaluate extractor {extractor}"
                    ));
                };
                match extractor::extract(body, ct, extractor) {
                    Some(value) => PredicateOutcome {
                        matched: matcher.is_match(&value),
                        reason: format!("{extractor} extracted {value:?}"),
                    },
                    None => PredicateOutcome::fail(format!("{extractor} did not resolve")),
                }
            }
            CompiledBodyPredicate::All(children) => {
                for child in children {
                    let outcome = child.evaluate(body);
                    if !outcome.matched {
                        return outcome;
                    }
                }
                PredicateOutcome::pass()
            }
            CompiledBodyPredicate::Any(children) => {
                let mut last = PredicateOutcome::fail("empty `any` clause".to_string());
                for child in children {
                    let outcome = child.evaluate(body);
                    if outcome.matched {
                        return outcome;
                    }
                    last = outcome;
                }
                last
            }
            CompiledBodyPredicate::Not(child) => {
                let outcome = child.evaluate(body);
                PredicateOutcome {
                    matched: !outcome.matched,
                    reason: format!("not({})", outcome.reason),
                }
            }
        }
    }
}

/// Result of evaluating one predicate: whether it matched, and a human
/// readable reason (the failed field's value under test, per §4.3).
#[derive(Debug, Clone)]
pub struct PredicateOutcome {
    pub matched: bool,
    pub reason: String,
}

impl PredicateOutcome {
    fn pass() -> Self {
        PredicateOutcome {
            matched: true,
            reason: String::new(),
        }
    }

    fn fail(reason: String) -> Self {
        PredicateOutcome {
            matched: false,
            reason,
        }
    }
}

/// One compiled `when` leaf: a named field bound to a pure predicate.
#[derive(Debug, Clone)]
pub struct FieldPredicate {
    pub field: String,
    pub kind: PredicateKind,
}

#[derive(Debug, Clone)]
pub enum PredicateKind {
    Method(CompiledStringMatcher),
    Header {
        name: String,
        matcher: CompiledStringMatcher,
    },
    Body(CompiledBodyPredicate),
}

/// Literal bytes or a renderer capability producing bytes on demand. Exactly
/// one variant is ever constructed (invariant 4).
pub enum BodySource {
    Literal(Vec<u8>),
    Rendered(Box<dyn BodyRenderer>),
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodySource::Literal(bytes) => f.debug_tuple("Literal").field(&bytes.len()).finish(),
            BodySource::Rendered(_) => f.debug_tuple("Rendered").finish(),
        }
    }
}

/// Status, headers, and one body source, with a content-type resolved at
/// compile time when possible.
#[derive(Debug)]
pub struct CompiledResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: BodySource,
    pub content_type: Option<String>,
}

/// Compiled rate-limit/latency/pagination policy. The declarative shapes are
/// already plain data; compiling mainly means validating them once up front.
#[derive(Debug, Clone, Default)]
pub struct CompiledPolicy {
    pub rate_limit: Option<RateLimitSpec>,
    pub latency: Option<LatencySpec>,
    pub pagination: Option<PaginationSpec>,
}

/// Immutable after build: everything the evaluator and response pipeline need
/// for one scenario.
#[derive(Debug)]
pub struct CompiledScenario {
    pub id: String,
    pub name: String,
    pub priority: i64,
    pub route_key: RouteKey,
    pub predicates: Vec<FieldPredicate>,
    pub response: CompiledResponse,
    pub policy: Option<CompiledPolicy>,
}

/// Compiles every scenario in `scenarios`, returning the full batch of
/// failures rather than stopping at the first one (§4.1 Failures).
pub fn compile_all(
    scenarios: &[Scenario],
    registry: &dyn TemplateRegistry,
    default_engine: Option<&str>,
    root: &Path,
) -> Result<Vec<CompiledScenario>, Vec<CompileError>> {
    let mut compiled = Vec::with_capacity(scenarios.len());
    let mut errors = Vec::new();

    for scenario in scenarios {
        match compile_scenario(scenario, registry, default_engine, root) {
            Ok(c) => compiled.push(c),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(compiled)
    } else {
        Err(errors)
    }
}

fn compile_scenario(
    scenario: &Scenario,
    registry: &dyn TemplateRegistry,
    default_engine: Option<&str>,
    root: &Path,
) -> Result<CompiledScenario, CompileError> {
    let mut predicates = Vec::new();

    predicates.push(FieldPredicate {
        field: "method".to_string(),
        kind: PredicateKind::Method(CompiledStringMatcher::Exact(
            scenario.when.method.to_ascii_uppercase(),
        )),
    });

    for (name, raw_matcher) in &scenario.when.headers {
        let matcher = CompiledStringMatcher::compile(&StringMatcher::parse(raw_matcher), &scenario.id)?;
        predicates.push(FieldPredicate {
            field: format!("header:{name}"),
            kind: PredicateKind::Header {
                name: name.clone(),
                matcher,
            },
        });
    }

    if let Some(body_clause) = &scenario.when.body {
        let compiled_body = compile_body_clause(body_clause, &scenario.id)?;
        predicates.push(FieldPredicate {
            field: "body".to_string(),
            kind: PredicateKind::Body(compiled_body),
        });
    }

    let response = compile_response(scenario, registry, default_engine, root)?;
    let policy = scenario.policy.clone().map(|p| CompiledPolicy {
        rate_limit: p.rate_limit,
        latency: p.latency,
        pagination: p.pagination,
    });

    Ok(CompiledScenario {
        id: scenario.id.clone(),
        name: scenario.display_name().to_string(),
        priority: scenario.priority,
        route_key: RouteKey::new(&scenario.when.method, &scenario.when.path),
        predicates,
        response,
        policy,
    })
}

/// Recursively lowers a `conditions`/`all`/`any`/`not` node, per the
/// conjunction/disjunction/negation transform in §4.1.
fn compile_body_clause(
    clause: &BodyClause,
    scenario_id: &str,
) -> Result<CompiledBodyPredicate, CompileError> {
    match clause.variant() {
        Some(BodyClauseVariant::Conditions(conditions)) => {
            let mut compiled_conditions = Vec::with_capacity(conditions.len());
            for condition in conditions {
                let matcher = CompiledStringMatcher::compile(
                    &StringMatcher::parse(&condition.matcher),
                    scenario_id,
                )?;
                compiled_conditions.push(CompiledBodyPredicate::Condition {
                    content_type: clause.content_type,
                    extractor: condition.extractor.clone(),
                    matcher,
                });
            }
            Ok(CompiledBodyPredicate::All(compiled_conditions))
        }
        Some(BodyClauseVariant::All(children)) => {
            let compiled = children
                .iter()
                .map(|c| compile_body_clause(c, scenario_id))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CompiledBodyPredicate::All(compiled))
        }
        Some(BodyClauseVariant::Any(children)) => {
            let compiled = children
                .iter()
                .map(|c| compile_body_clause(c, scenario_id))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CompiledBodyPredicate::Any(compiled))
        }
        Some(BodyClauseVariant::Not(child)) => {
            Ok(CompiledBodyPredicate::Not(Box::new(compile_body_clause(
                child,
                scenario_id,
            )?)))
        }
        None => Err(CompileError::MalformedExtractor {
            id: scenario_id.to_string(),
            extractor: "body clause must have exactly one of conditions/all/any/not".to_string(),
        }),
    }
}

fn compile_response(
    scenario: &Scenario,
    registry: &dyn TemplateRegistry,
    default_engine: Option<&str>,
    root: &Path,
) -> Result<CompiledResponse, CompileError> {
    let spec = &scenario.response;

    let raw_source: Vec<u8> = if let Some(path) = &spec.body_file {
        read_body_file(&scenario.id, path, root)?
    } else if let Some(body) = &spec.body {
        body.clone().into_bytes()
    } else {
        Vec::new()
    };

    let engine = spec.engine.as_deref().filter(|e| !e.is_empty()).or(default_engine);

    let body = if let Some(engine) = engine {
        let source = String::from_utf8_lossy(&raw_source).into_owned();
        let renderer = registry
            .compile(engine, &source)
            .map_err(|_| CompileError::UnknownEngine {
                id: scenario.id.clone(),
                engine: engine.to_string(),
            })?;
        BodySource::Rendered(renderer)
    } else {
        BodySource::Literal(raw_source.clone())
    };

    let content_type = spec.content_type.clone().or_else(|| {
        spec.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone())
            .or_else(|| infer_content_type(&raw_source).map(|ct| match ct {
                BodyContentType::Json => "application/json".to_string(),
                BodyContentType::Xml => "application/xml".to_string(),
            }))
    });

    Ok(CompiledResponse {
        status: spec.status,
        headers: spec.headers.clone(),
        body,
        content_type,
    })
}

fn read_body_file(scenario_id: &str, relative: &str, root: &Path) -> Result<Vec<u8>, CompileError> {
    let candidate = root.join(relative);
    let canonical = std::fs::canonicalize(&candidate).map_err(|source| {
        CompileError::BodyFileUnreadable {
            id: scenario_id.to_string(),
            path: candidate.clone(),
            source,
        }
    })?;
    if !canonical.starts_with(root) {
        return Err(CompileError::BodyFileUnreadable {
            id: scenario_id.to_string(),
            path: canonical,
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "path escapes root"),
        });
    }
    std::fs::read(&canonical).map_err(|source| CompileError::BodyFileUnreadable {
        id: scenario_id.to_string(),
        path: canonical,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Condition, PolicySpec, ResponseSpec, WhenClause};
    use crate::template::DefaultTemplateRegistry;
    use tempfile::tempdir;

    fn scenario(id: &str, priority: i64, method: &str, path: &str, body: &str) -> Scenario {
        Scenario {
            id: id.to_string(),
            name: None,
            priority,
            when: WhenClause {
                method: method.to_string(),
                path: path.to_string(),
                headers: HashMap::new(),
                body: None,
            },
            response: ResponseSpec {
                status: 200,
                headers: HashMap::new(),
                content_type: None,
                engine: None,
                body: Some(body.to_string()),
                body_file: None,
            },
            policy: None,
        }
    }

    #[test]
    fn compiles_method_and_literal_body() {
        let dir = tempdir().unwrap();
        let s = scenario("a", 0, "GET", "/x", "hello");
        let registry = DefaultTemplateRegistry;
        let compiled = compile_scenario(&s, &registry, None, dir.path()).unwrap();
        assert_eq!(compiled.route_key, RouteKey::new("GET", "/x"));
        assert!(matches!(compiled.response.body, BodySource::Literal(ref b) if b == b"hello"));
    }

    #[test]
    fn body_all_clause_requires_every_condition() {
        let mut s = scenario("a", 0, "POST", "/x", "ok");
        s.when.body = Some(BodyClause {
            content_type: Some(BodyContentType::Json),
            conditions: None,
            all: Some(vec![
                BodyClause {
                    content_type: None,
                    conditions: Some(vec![Condition {
                        extractor: "$.a".into(),
                        matcher: "=1".into(),
                    }]),
                    all: None,
                    any: None,
                    not: None,
                },
                BodyClause {
                    content_type: None,
                    conditions: Some(vec![Condition {
                        extractor: "$.b".into(),
                        matcher: "=2".into(),
                    }]),
                    all: None,
                    any: None,
                    not: None,
                },
            ]),
            any: None,
            not: None,
        });

        let dir = tempdir().unwrap();
        let registry = DefaultTemplateRegistry;
        let compiled = compile_scenario(&s, &registry, None, dir.path()).unwrap();
        let body_predicate = compiled
            .predicates
            .iter()
            .find_map(|p| match &p.kind {
                PredicateKind::Body(b) => Some(b),
                _ => None,
            })
            .unwrap();

        assert!(body_predicate.evaluate(br#"{"a":1,"b":2}"#).matched);
        assert!(!body_predicate.evaluate(br#"{"a":1,"b":3}"#).matched);
    }

    #[test]
    fn unknown_engine_fails_compile() {
        let mut s = scenario("a", 0, "GET", "/x", "whatever");
        s.response.engine = Some("jinja2".to_string());
        let dir = tempdir().unwrap();
        let registry = DefaultTemplateRegistry;
        let err = compile_scenario(&s, &registry, None, dir.path()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownEngine { .. }));
    }

    #[test]
    fn invalid_regex_is_a_batched_failure() {
        let mut s1 = scenario("a", 0, "GET", "/x", "ok");
        s1.when.headers.insert("X-Test".to_string(), "(unclosed".to_string());
        let s2 = scenario("b", 0, "GET", "/y", "ok");

        let dir = tempdir().unwrap();
        let registry = DefaultTemplateRegistry;
        let result = compile_all(&[s1, s2], &registry, None, dir.path());
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().len(), 1);
    }

    #[test]
    fn rate_limit_and_pagination_policy_carried_through() {
        let mut s = scenario("a", 0, "GET", "/x", "ok");
        s.policy = Some(PolicySpec {
            rate_limit: Some(RateLimitSpec {
                rate: 1.0,
                burst: 2,
                key: "global".to_string(),
            }),
            latency: None,
            pagination: None,
        });
        let dir = tempdir().unwrap();
        let registry = DefaultTemplateRegistry;
        let compiled = compile_scenario(&s, &registry, None, dir.path()).unwrap();
        assert!(compiled.policy.unwrap().rate_limit.is_some());
    }
}
