//! Relation resolution and foreign-key dependency ordering.
//!
//! Runs after every file of a namespace is loaded, since a foreign key may
//! point at a type declared in another file. Builds the forward relations,
//! records back-relations on the targets, and computes a creation order
//! using Kahn's algorithm with deterministic (alphabetical) tie-breaking.

use super::types::{BackRelation, ParsedType, Relation, TypeSourceInfo};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

/// Resolve every foreign key in `types` against the same namespace.
///
/// Existing relations are discarded first, so the pass can be re-run after a
/// reload. All broken references are reported, not just the first.
pub fn resolve_relations(
    types: &mut IndexMap<String, ParsedType>,
    sources: &IndexMap<String, TypeSourceInfo>,
) -> Result<()> {
    let mut errors = Vec::new();
    let mut forward: Vec<(String, Relation)> = Vec::new();

    for (name, ty) in types.iter() {
        for (field_name, field) in &ty.decl.fields {
            let Some(fk) = &field.foreign_key else {
                continue;
            };
            let source_path = || {
                sources
                    .get(name)
                    .map(|s| s.file_path.clone())
                    .unwrap_or_else(PathBuf::new)
            };
            let Some(target) = types.get(&fk.type_name) else {
                errors.push(Error::Relation {
                    type_name: name.clone(),
                    path: source_path(),
                    message: format!(
                        "field '{}' references unknown type '{}'",
                        field_name, fk.type_name
                    ),
                });
                continue;
            };
            if !target.decl.fields.contains_key(&fk.field) {
                errors.push(Error::Relation {
                    type_name: name.clone(),
                    path: source_path(),
                    message: format!(
                        "field '{}' references unknown field '{}.{}'",
                        field_name, fk.type_name, fk.field
                    ),
                });
                continue;
            }
            forward.push((
                name.clone(),
                Relation {
                    field: field_name.clone(),
                    target_type: fk.type_name.clone(),
                    target_field: fk.field.clone(),
                },
            ));
        }
    }
    Error::collect(errors)?;

    for ty in types.values_mut() {
        ty.relations.clear();
        ty.back_relations.clear();
    }
    for (source, relation) in forward {
        if let Some(target) = types.get_mut(&relation.target_type) {
            target.back_relations.push(BackRelation {
                source_type: source.clone(),
                source_field: relation.field.clone(),
            });
        }
        if let Some(ty) = types.get_mut(&source) {
            ty.relations.push(relation);
        }
    }
    Ok(())
}

/// Order types so every foreign-key target precedes the types referencing it.
///
/// Self references are ignored. When the remaining types form a cycle, the
/// alphabetically first type on a cycle is placed next and ordering resumes;
/// its references to later types must be added after creation.
pub fn build_type_order(types: &IndexMap<String, ParsedType>) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for name in types.keys() {
        in_degree.insert(name, 0);
        adjacency.insert(name, Vec::new());
    }

    for (name, ty) in types {
        let targets: HashSet<&str> = ty
            .relations
            .iter()
            .map(|r| r.target_type.as_str())
            .filter(|t| *t != name.as_str() && types.contains_key(*t))
            .collect();
        for target in targets {
            if let Some(edges) = adjacency.get_mut(target) {
                edges.push(name);
            }
            if let Some(degree) = in_degree.get_mut(name.as_str()) {
                *degree += 1;
            }
        }
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(name, _)| *name)
        .collect();
    zero_degree.sort();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut order = Vec::new();
    let mut broken = Vec::new();
    loop {
        while let Some(current) = queue.pop_front() {
            if !placed.insert(current) {
                continue;
            }
            order.push(current.to_string());

            let mut next_ready = Vec::new();
            if let Some(neighbors) = adjacency.get(current) {
                for neighbor in neighbors {
                    if let Some(degree) = in_degree.get_mut(neighbor) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 && !placed.contains(neighbor) {
                            next_ready.push(*neighbor);
                        }
                    }
                }
            }
            next_ready.sort();
            queue.extend(next_ready);
        }

        if order.len() == types.len() {
            break;
        }
        let mut remaining: Vec<&str> = types
            .keys()
            .map(String::as_str)
            .filter(|n| !placed.contains(n))
            .collect();
        remaining.sort();
        let forced = remaining
            .iter()
            .copied()
            .find(|n| on_cycle(n, &adjacency, &placed))
            .unwrap_or(remaining[0]);
        broken.push(forced);
        queue.push_back(forced);
    }

    if !broken.is_empty() {
        tracing::warn!(
            "foreign key cycle broken at: {}; their references to later types are deferred",
            broken.join(", ")
        );
    }
    order
}

/// True if `start` can reach itself through types not yet placed.
fn on_cycle(start: &str, adjacency: &HashMap<&str, Vec<&str>>, placed: &HashSet<&str>) -> bool {
    let mut stack: Vec<&str> = adjacency.get(start).cloned().unwrap_or_default();
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if placed.contains(node) || !seen.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}
