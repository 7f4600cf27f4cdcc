//! One complete, immutable snapshot of compiled scenarios (a "generation"):
//! the scenario index plus the route table built over it, and the cell that
//! publishes successive generations atomically (§4.2, §4.7, §9 Concurrent swap).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::compiler::{self, RouteKey};
use crate::error::{GenerationError, MockError};
use crate::index::ScenarioIndex;
use crate::loader;
use crate::template::TemplateRegistry;

/// Maps `(method, path-template)` to the route pattern the router matched,
/// so the evaluator can look the bucket up by the template the router
/// resolved rather than the raw request path (§4.2 step 4).
#[derive(Debug, Default)]
pub struct RouteTable {
    routers: HashMap<String, matchit::Router<RouteKey>>,
}

impl RouteTable {
    /// Builds one `matchit::Router` per HTTP method, registering every
    /// distinct `(method, path-template)` pair the index groups scenarios
    /// under (§4.2 step 3).
    pub fn build(index: &ScenarioIndex) -> Self {
        let mut routers: HashMap<String, matchit::Router<RouteKey>> = HashMap::new();

        for key in index.route_keys() {
            let router = routers
                .entry(key.method.clone())
                .or_insert_with(matchit::Router::new);
            // Route keys are unique per `(method, path-template)` by construction
            // (the index groups into a HashMap keyed on exactly that pair), so
            // this insert can only fail on a template matchit itself rejects.
            let _ = router.insert(key.path_template.clone(), key.clone());
        }

        RouteTable { routers }
    }

    /// Resolves `method` + the raw request `path` to the route key the
    /// request belongs to, plus the path parameters extracted along the way.
    pub fn resolve(&self, method: &str, path: &str) -> Option<(RouteKey, HashMap<String, String>)> {
        let router = self.routers.get(&method.to_ascii_uppercase())?;
        let matched = router.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some((matched.value.clone(), params))
    }
}

/// The index and route table for one generation, built together so they are
/// always published and consulted as a matched pair (§4.2, invariant 2).
#[derive(Debug)]
pub struct Generation {
    pub index: ScenarioIndex,
    pub routes: RouteTable,
}

impl Generation {
    pub fn build(scenarios: Vec<compiler::CompiledScenario>) -> Self {
        let index = ScenarioIndex::build(scenarios);
        let routes = RouteTable::build(&index);
        Generation { index, routes }
    }
}

/// Recompiles every scenario under `root` into a fresh [`Generation`]. Aborts
/// atomically (returns every collected error) rather than a partial result,
/// per invariant 1 and §4.1 Failures.
pub fn build_generation(
    root: &Path,
    registry: &dyn TemplateRegistry,
    default_engine: Option<&str>,
) -> Result<Generation, GenerationError> {
    let sourced = loader::load_scenarios(root)
        .map_err(|e| GenerationError(vec![MockError::Load(e)]))?;

    loader::validate_unique_ids(&sourced)
        .map_err(|e| GenerationError(vec![MockError::Validation(e)]))?;

    let scenarios: Vec<_> = sourced.into_iter().map(|(_, s)| s).collect();
    let compiled = compiler::compile_all(&scenarios, registry, default_engine, root)
        .map_err(|errs| GenerationError(errs.into_iter().map(MockError::Compile).collect()))?;

    Ok(Generation::build(compiled))
}

/// Atomic reference cell publishing successive generations (§5, §9
/// Concurrent swap): readers clone the `Arc` under a short-held read lock and
/// release it before evaluating, so no lock is held across a request.
pub struct GenerationCell(RwLock<Arc<Generation>>);

impl GenerationCell {
    pub fn new(generation: Generation) -> Self {
        GenerationCell(RwLock::new(Arc::new(generation)))
    }

    /// Loads the currently live generation.
    pub fn load(&self) -> Arc<Generation> {
        self.0.read().clone()
    }

    /// Publishes a new generation, replacing the live one. Readers that
    /// already loaded the previous `Arc` keep it alive until they finish
    /// (§5 Hot-reload is asynchronous relative to in-flight requests).
    pub fn publish(&self, generation: Generation) {
        *self.0.write() = Arc::new(generation);
    }
}
