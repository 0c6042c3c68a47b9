//! Transitive closure over a set of directed `(from, to)` relations.
//!
//! Used independently for each of the five ontology relation families
//! (subclass, broader, part-of, equivalence, disjointness) — each gets its
//! own [`Closure`], computed once when the [`super::registry::KindRegistry`]
//! is built and never mutated afterwards.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

#[cfg(feature = "tracing")]
use tracing::trace;

/// A reflexive-free transitive closure: `map[a]` holds every `b` reachable
/// from `a` via one or more direct relations, but never `a` itself unless a
/// cycle actually makes `a` reach `a`.
#[derive(Debug, Clone, Default)]
pub struct Closure<T: Eq + Hash + Clone> {
    map: HashMap<T, HashSet<T>>,
}

impl<T: Eq + Hash + Clone> Closure<T> {
    /// Computes the closure by fixed-point expansion: seed with direct
    /// relations, then repeatedly extend `closure[a]` by `closure[b]` for
    /// every `b` already in `closure[a]`, until nothing grows. Duplicate
    /// input pairs collapse naturally since `closure[a]` is a set.
    pub fn compute(relations: impl IntoIterator<Item = (T, T)>) -> Self {
        let mut map: HashMap<T, HashSet<T>> = HashMap::new();
        for (from, to) in relations {
            map.entry(from).or_default().insert(to);
        }

        let mut changed = true;
        while changed {
            changed = false;
            let snapshot: Vec<(T, Vec<T>)> = map
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect();

            for (a, reachable_from_a) in &snapshot {
                let mut additions: Vec<T> = Vec::new();
                for b in reachable_from_a {
                    if let Some(reachable_from_b) = map.get(b) {
                        for c in reachable_from_b {
                            if !map[a].contains(c) {
                                additions.push(c.clone());
                            }
                        }
                    }
                }
                if !additions.is_empty() {
                    let entry = map.get_mut(a).expect("key present from snapshot");
                    for c in additions {
                        entry.insert(c);
                    }
                    changed = true;
                }
            }
        }

        #[cfg(feature = "tracing")]
        trace!(nodes = map.len(), "ontology closure reached fixed point");

        Self { map }
    }

    /// Everything reachable from `from`, empty set if `from` has no relations.
    pub fn reachable_from(&self, from: &T) -> HashSet<T> {
        self.map.get(from).cloned().unwrap_or_default()
    }

    pub fn is_reachable(&self, from: &T, to: &T) -> bool {
        self.map.get(from).is_some_and(|set| set.contains(to))
    }

    /// Swaps every `(a, b)` pair for `(b, a)`.
    pub fn invert(&self) -> Self {
        let mut pairs = Vec::new();
        for (from, tos) in &self.map {
            for to in tos {
                pairs.push((to.clone(), from.clone()));
            }
        }
        Self::compute(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(|s| s.is_empty())
    }

    /// All `(from, to)` pairs currently in the closure, for equality checks
    /// in tests and for symmetrizing disjointness/equivalence relations.
    pub fn pairs(&self) -> Vec<(T, T)> {
        let mut out = Vec::new();
        for (from, tos) in &self.map {
            for to in tos {
                out.push((from.clone(), to.clone()));
            }
        }
        out
    }
}

impl<T: Eq + Hash + Clone + Ord> Closure<T> {
    /// Sorted pairs, used where output must be deterministic (serialization,
    /// snapshot tests).
    pub fn sorted_pairs(&self) -> Vec<(T, T)> {
        let mut pairs = self.pairs();
        pairs.sort();
        pairs
    }
}
