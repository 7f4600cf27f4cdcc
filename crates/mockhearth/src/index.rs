//! Groups compiled scenarios by route key and orders each bucket by priority,
//! producing the immutable structure the evaluator consults per request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::{CompiledScenario, RouteKey};

/// One complete, immutable snapshot of compiled scenarios (a "generation").
/// Built once, never mutated; hot-reload publishes a brand new `ScenarioIndex`
/// rather than editing this one in place (invariant 2).
#[derive(Debug, Default)]
pub struct ScenarioIndex {
    buckets: HashMap<RouteKey, Vec<Arc<CompiledScenario>>>,
}

impl ScenarioIndex {
    /// Groups by `(method, path-template)`, then sorts each bucket by
    /// priority descending, id ascending (invariant 3).
    pub fn build(scenarios: Vec<CompiledScenario>) -> Self {
        let mut buckets: HashMap<RouteKey, Vec<Arc<CompiledScenario>>> = HashMap::new();

        for scenario in scenarios {
            buckets
                .entry(scenario.route_key.clone())
                .or_default()
                .push(Arc::new(scenario));
        }

        for bucket in buckets.values_mut() {
            bucket.sort_by(|a, b| (-a.priority, &a.id).cmp(&(-b.priority, &b.id)));
        }

        ScenarioIndex { buckets }
    }

    /// The ordered candidate bucket for an exact route key, if any scenario
    /// registered that `(method, path-template)` pair.
    pub fn candidates(&self, key: &RouteKey) -> Option<&[Arc<CompiledScenario>]> {
        self.buckets.get(key).map(|v| v.as_slice())
    }

    /// All distinct route keys, in no particular order — used to build the
    /// HTTP router's route table (§4.2 step 3).
    pub fn route_keys(&self) -> impl Iterator<Item = &RouteKey> {
        self.buckets.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{BodySource, CompiledResponse};
    use std::collections::HashMap as Map;

    fn scenario(id: &str, priority: i64) -> CompiledScenario {
        CompiledScenario {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            route_key: RouteKey::new("GET", "/x"),
            predicates: vec![],
            response: CompiledResponse {
                status: 200,
                headers: Map::new(),
                body: BodySource::Literal(id.as_bytes().to_vec()),
                content_type: None,
            },
            policy: None,
        }
    }

    #[test]
    fn orders_by_priority_desc_then_id_asc() {
        let index = ScenarioIndex::build(vec![
            scenario("b", 10),
            scenario("a", 10),
            scenario("c", 20),
        ]);
        let candidates = index.candidates(&RouteKey::new("GET", "/x")).unwrap();
        let ids: Vec<&str> = candidates.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn missing_route_key_returns_none() {
        let index = ScenarioIndex::build(vec![scenario("a", 0)]);
        assert!(index.candidates(&RouteKey::new("POST", "/other")).is_none());
    }
}
