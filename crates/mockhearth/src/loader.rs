//! Walks the scenario root, resolves `!include` tags, and yields the flat list
//! of declarative [`Scenario`]s that the compiler lowers next.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::{LoadError, ValidationError};
use crate::scenario::{Scenario, ScenarioFile};

const MAX_INCLUDE_DEPTH: usize = 10;
const INCLUDE_TAG: &str = "!include";

/// Recursively loads every `*.yaml`/`*.yml` file under `root`, resolves
/// `!include` tags, and returns the flat scenario list paired with the file
/// each one was declared in (so duplicate-id failures can name both files).
///
/// Aborts atomically (returns the first error) rather than returning a partial
/// scenario set, per invariant 1.
pub fn load_scenarios(root: &Path) -> Result<Vec<(PathBuf, Scenario)>, LoadError> {
    let canonical_root = canonicalize_root(root)?;
    let mut scenarios = Vec::new();

    for path in collect_scenario_files(&canonical_root)? {
        let resolved = resolve_file(&path, &canonical_root, &mut HashSet::new(), 0)?;
        for doc in resolved {
            let file: ScenarioFile =
                serde_yaml::from_value(doc).map_err(|source| LoadError::Parse {
                    path: path.clone(),
                    source,
                })?;
            scenarios.extend(file.into_vec().into_iter().map(|s| (path.clone(), s)));
        }
    }

    Ok(scenarios)
}

/// Separate entry point returning the precise [`ValidationError`] for duplicate
/// ids, used by the compiler's batch-failure reporting (§4.1).
pub fn validate_unique_ids(scenarios: &[(PathBuf, Scenario)]) -> Result<(), ValidationError> {
    let mut seen: std::collections::HashMap<&str, &Path> = std::collections::HashMap::new();
    for (path, scenario) in scenarios {
        if let Some(first) = seen.get(scenario.id.as_str()) {
            return Err(ValidationError::DuplicateId {
                id: scenario.id.clone(),
                first: first.to_path_buf(),
                second: path.clone(),
            });
        }
        seen.insert(&scenario.id, path.as_path());
    }
    Ok(())
}

fn canonicalize_root(root: &Path) -> Result<PathBuf, LoadError> {
    std::fs::canonicalize(root).map_err(|source| LoadError::Io {
        path: root.to_path_buf(),
        source,
    })
}

fn collect_scenario_files(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|source| LoadError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| LoadError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_scenario_file(&path) {
                out.push(path);
            }
        }
    }

    out.sort();
    Ok(out)
}

fn is_scenario_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parses `path` and recursively splices in any `!include` tags, honoring the
/// depth cap and cycle detection required by invariant 6.
fn resolve_file(
    path: &Path,
    root: &Path,
    visiting: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<Vec<Value>, LoadError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(LoadError::IncludeDepthExceeded {
            path: path.to_path_buf(),
        });
    }

    let canonical = ensure_under_root(path, root)?;
    if !visiting.insert(canonical.clone()) {
        return Err(LoadError::IncludeCycle { path: canonical });
    }

    let raw = std::fs::read_to_string(&canonical).map_err(|source| LoadError::Io {
        path: canonical.clone(),
        source,
    })?;
    let value: Value = serde_yaml::from_str(&raw).map_err(|source| LoadError::Parse {
        path: canonical.clone(),
        source,
    })?;

    let resolved = resolve_includes(value, root, visiting, depth + 1)?;
    visiting.remove(&canonical);

    // A resolved document is always one mapping/sequence; documents at the file
    // root never come back as a bare scalar.
    Ok(vec![resolved])
}

/// Walks a parsed YAML value, replacing any `!include <path>` tag with the
/// resolved content of the referenced file.
fn resolve_includes(
    value: Value,
    root: &Path,
    visiting: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<Value, LoadError> {
    match value {
        Value::Tagged(tagged) if tagged.tag == INCLUDE_TAG => {
            let rel = tagged
                .value
                .as_str()
                .ok_or_else(|| LoadError::Parse {
                    path: root.to_path_buf(),
                    source: <serde_yaml::Error as serde::de::Error>::custom(
                        "!include target must be a string path",
                    ),
                })?
                .to_string();
            let included_path = root.join(rel);
            let mut docs = resolve_file(&included_path, root, visiting, depth)?;
            Ok(docs.pop().unwrap_or(Value::Null))
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(k, resolve_includes(v, root, visiting, depth)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                out.push(resolve_includes(item, root, visiting, depth)?);
            }
            Ok(Value::Sequence(out))
        }
        other => Ok(other),
    }
}

/// Invariant 7: any referenced path must, after symlink resolution, remain
/// under the configured root.
fn ensure_under_root(path: &Path, root: &Path) -> Result<PathBuf, LoadError> {
    let canonical = std::fs::canonicalize(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if canonical.starts_with(root) {
        Ok(canonical)
    } else {
        Err(LoadError::PathEscape {
            path: canonical,
            root: root.to_path_buf(),
        })
    }
}
