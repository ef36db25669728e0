//! Property-based tests for middleware flattening
//!
//! Random middleware graphs are built bottom-up so every nested list only
//! refers to middleware created earlier, mirroring how descriptors are
//! composed in practice.

use crate::{Middleware, MiddlewareId, create_middleware, flatten};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::HashSet;

/// A graph of middleware and the list handed to `flatten`.
#[derive(Debug)]
struct Graph {
    roots: Vec<Middleware>,
}

/// Strategy to generate a shared-dependency middleware graph
fn arb_graph() -> impl Strategy<Value = Graph> {
    (
        prop::collection::vec(prop::collection::vec(any::<Index>(), 0..4), 1..12),
        prop::collection::vec(any::<Index>(), 1..6),
    )
        .prop_map(|(deps, roots)| {
            let mut nodes: Vec<Middleware> = Vec::with_capacity(deps.len());
            for (i, node_deps) in deps.iter().enumerate() {
                let nested = if i == 0 {
                    Vec::new()
                } else {
                    node_deps.iter().map(|ix| nodes[ix.index(i)].clone()).collect()
                };
                nodes.push(create_middleware().middleware(nested).label(format!("n{}", i)));
            }
            let roots = roots.iter().map(|ix| nodes[ix.index(nodes.len())].clone()).collect();
            Graph { roots }
        })
}

fn reachable(roots: &[Middleware], out: &mut HashSet<MiddlewareId>) {
    for mw in roots {
        if out.insert(mw.id()) {
            reachable(mw.nested(), out);
        }
    }
}

fn ids(list: &[Middleware]) -> Vec<MiddlewareId> {
    list.iter().map(Middleware::id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every reachable middleware appears exactly once.
    #[test]
    fn prop_flatten_covers_graph_once(graph in arb_graph()) {
        let flat = flatten(&graph.roots).unwrap();

        let unique: HashSet<_> = ids(&flat).into_iter().collect();
        prop_assert_eq!(unique.len(), flat.len(), "flattened list must not repeat a middleware");

        let mut expected = HashSet::new();
        reachable(&graph.roots, &mut expected);
        prop_assert_eq!(unique, expected);
    }

    /// Nested middleware always precede the middleware that lists them.
    #[test]
    fn prop_flatten_dependencies_first(graph in arb_graph()) {
        let flat = flatten(&graph.roots).unwrap();
        let position = |id: MiddlewareId| flat.iter().position(|m| m.id() == id);

        for (i, mw) in flat.iter().enumerate() {
            for dep in mw.nested() {
                let at = position(dep.id());
                prop_assert!(
                    at.is_some_and(|at| at < i),
                    "{:?} must precede {:?}",
                    dep.name(),
                    mw.name()
                );
            }
        }
    }

    /// Flattening an already flat list changes nothing.
    #[test]
    fn prop_flatten_idempotent(graph in arb_graph()) {
        let once = flatten(&graph.roots).unwrap();
        let twice = flatten(&once).unwrap();
        prop_assert_eq!(ids(&once), ids(&twice));
    }

    /// Repeating the input list does not change the output.
    #[test]
    fn prop_flatten_ignores_repeats(graph in arb_graph()) {
        let mut doubled = graph.roots.clone();
        doubled.extend(graph.roots.iter().cloned());
        prop_assert_eq!(ids(&flatten(&doubled).unwrap()), ids(&flatten(&graph.roots).unwrap()));
    }
}

#[test]
fn test_diamond_dependency_runs_once() {
    let base = create_middleware().label("base");
    let left = create_middleware().middleware(vec![base.clone()]).label("left");
    let right = create_middleware().middleware(vec![base.clone()]).label("right");
    let top = create_middleware().middleware(vec![left.clone(), right.clone()]).label("top");

    let flat = flatten(&[top.clone()]).unwrap();
    let names: Vec<_> = flat.iter().filter_map(Middleware::name).collect();
    assert_eq!(names, vec!["base", "left", "right", "top"]);
}
