//! Selects the first matching scenario among an ordered candidate bucket for
//! one request. Pure: mutates no shared state (§4.3).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::compiler::{CompiledScenario, PredicateKind};

/// An incoming HTTP request in the shape the evaluator and pipeline need:
/// headers already normalised to a case-insensitive map (§9 Case-insensitive
/// headers).
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// The connecting peer, used to resolve request-derived rate-limit keys
    /// such as `client_ip` (spec.md §4.4 step 1: "literal or request-derived
    /// — e.g. client IP").
    pub peer: SocketAddr,
}

impl IncomingRequest {
    /// Case-insensitive header lookup; header names are normalised to
    /// lowercase at construction time.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Per-candidate trace detail: whether it matched, and — for non-matchers —
/// the first failed field and a reason string naming the value under test.
#[derive(Debug, Clone)]
pub struct CandidateResult {
    pub id: String,
    pub name: String,
    pub matched: bool,
    pub failed_field: Option<String>,
    pub failed_reason: Option<String>,
}

/// Evaluates every candidate in declaration order, returning the first full
/// match (if any) along with a trace-ready result for every candidate tried.
pub fn evaluate(
    request: &IncomingRequest,
    candidates: &[Arc<CompiledScenario>],
) -> (Option<Arc<CompiledScenario>>, Vec<CandidateResult>) {
    let mut results = Vec::with_capacity(candidates.len());
    let mut matched = None;

    for candidate in candidates {
        let outcome = evaluate_candidate(request, candidate);
        let is_match = outcome.failed_field.is_none();
        results.push(outcome);

        if is_match && matched.is_none() {
            matched = Some(Arc::clone(candidate));
            break;
        }
    }

    (matched, results)
}

fn evaluate_candidate(request: &IncomingRequest, candidate: &CompiledScenario) -> CandidateResult {
    for predicate in &candidate.predicates {
        let outcome = match &predicate.kind {
            PredicateKind::Method(matcher) => {
                let value = request.method.to_ascii_uppercase();
                let matched = matcher.is_match(&value);
                (matched, format!("method was {value:?}"))
            }
            PredicateKind::Header { name, matcher } => match request.header(name) {
                Some(value) => (matcher.is_match(value), format!("{name} was {value:?}")),
                None => (false, format!("{name} header was absent")),
            },
            PredicateKind::Body(body_predicate) => {
                let outcome = body_predicate.evaluate(&request.body);
                (outcome.matched, outcome.reason)
            }
        };

        if !outcome.0 {
            return CandidateResult {
                id: candidate.id.clone(),
                name: candidate.name.clone(),
                matched: false,
                failed_field: Some(predicate.field.clone()),
                failed_reason: Some(outcome.1),
            };
        }
    }

    CandidateResult {
        id: candidate.id.clone(),
        name: candidate.name.clone(),
        matched: true,
        failed_field: None,
        failed_reason: None,
    }
}
