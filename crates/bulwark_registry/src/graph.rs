//! Dependency graph over registered modules.

use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;

/// Module id → declared dependency ids, in registration order
pub type DependencyMap = IndexMap<String, Vec<String>>;

/// Order modules so that every module comes after its registered
/// dependencies (Kahn's algorithm, ties in registration order).
///
/// Dependencies on ids absent from `modules` are treated as satisfied.
///
/// # Errors
///
/// On a cycle, returns the modules that could not be ordered, in
/// registration order.
pub fn dependency_order(modules: &DependencyMap) -> Result<Vec<String>, Vec<String>> {
    let mut in_degree: IndexMap<&str, usize> = IndexMap::with_capacity(modules.len());
    let mut dependents: IndexMap<&str, Vec<&str>> = IndexMap::new();

    for (id, deps) in modules {
        let registered: IndexSet<&str> = deps
            .iter()
            .map(String::as_str)
            .filter(|dep| modules.contains_key(*dep))
            .collect();
        in_degree.insert(id.as_str(), registered.len());
        for dep in registered {
            dependents.entry(dep).or_default().push(id.as_str());
        }
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(modules.len());

    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(*dependent);
                }
            }
        }
    }

    if order.len() == modules.len() {
        Ok(order)
    } else {
        Err(in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect())
    }
}

/// Modules that declare a direct dependency on `module_id`
#[must_use]
pub fn dependents_of(modules: &DependencyMap, module_id: &str) -> Vec<String> {
    modules
        .iter()
        .filter(|(_, deps)| deps.iter().any(|d| d == module_id))
        .map(|(id, _)| id.clone())
        .collect()
}
