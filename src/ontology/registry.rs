//! Kind registry: node/edge kind metadata plus the five ontology closures,
//! built once from a [`GraphDefinition`] and never mutated afterwards.

use std::collections::{HashMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::ontology::closure::Closure;

/// Cardinality of an edge kind's to-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// Delete behavior applied when a node with dependent edges is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum DeleteBehavior {
    #[default]
    Restrict,
    Cascade,
    SetNull,
}

/// Temporal handling default for queries that don't specify a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum DefaultTemporalMode {
    #[default]
    Current,
    IncludeEnded,
    IncludeTombstones,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefaults {
    #[serde(default)]
    pub delete_behavior: DeleteBehavior,
    #[serde(default)]
    pub temporal_mode: DefaultTemporalMode,
}

/// A uniqueness constraint on a node or edge kind: a set of property
/// pointers (as pointer strings, e.g. `"/email"`) that must be jointly
/// unique, optionally scoped by a `where` sub-predicate captured structurally
/// (never as an opaque closure — see [`crate::schema::diff`]).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UniqueConstraint {
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#where: Option<WherePredicate>,
}

/// Structural capture of a uniqueness constraint's conditional scope.
/// Deserialization rebuilds a functional predicate from this; the original
/// closure is never stored.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WherePredicate {
    pub field: String,
    pub op: WhereOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum WhereOp {
    IsNull,
    IsNotNull,
}

/// A node kind registration inside a [`GraphDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeKindRegistration {
    pub name: String,
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,
    #[serde(default)]
    pub index_hints: Vec<String>,
}

/// An edge kind registration inside a [`GraphDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeKindRegistration {
    pub name: String,
    pub from_kinds: Vec<String>,
    pub to_kinds: Vec<String>,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,
}

/// The ontology meta-edge a relation expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum MetaEdge {
    SubClassOf,
    Broader,
    Narrower,
    PartOf,
    HasPart,
    EquivalentTo,
    SameAs,
    DisjointWith,
    DifferentFrom,
    Implies,
    InverseOf,
    RelatedTo,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OntologyRelation {
    pub meta_edge: MetaEdge,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

/// The live, in-memory schema for one graph. Immutable after construction;
/// [`KindRegistry::build`] consumes a reference and precomputes closures.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefinition {
    pub graph_id: String,
    pub nodes: HashMap<String, NodeKindRegistration>,
    pub edges: HashMap<String, EdgeKindRegistration>,
    pub ontology: Vec<OntologyRelation>,
    #[serde(default)]
    pub defaults: GraphDefaults,
}

/// Desugars the three sugar relations (`narrower`, `hasPart`, `sameAs`) into
/// their canonical direct-relation form before closures are computed.
fn canonicalize(relation: &OntologyRelation) -> (MetaEdge, String, String) {
    match relation.meta_edge {
        MetaEdge::Narrower => (MetaEdge::Broader, relation.to.clone(), relation.from.clone()),
        MetaEdge::HasPart => (MetaEdge::PartOf, relation.to.clone(), relation.from.clone()),
        MetaEdge::SameAs => (
            MetaEdge::EquivalentTo,
            relation.from.clone(),
            relation.to.clone(),
        ),
        other => (other, relation.from.clone(), relation.to.clone()),
    }
}

/// Kind + ontology closures for a single graph. Built once, shared freely —
/// there is no interior mutability and no global state.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    node_kinds: HashMap<String, NodeKindRegistration>,
    edge_kinds: HashMap<String, EdgeKindRegistration>,
    relations: Vec<OntologyRelation>,
    /// `sub_class_ancestors[k]` = every kind `k` is (transitively) a subclass of.
    sub_class_ancestors: Closure<String>,
    /// `sub_class_descendants[k]` = every kind that is (transitively) a subclass of `k`.
    sub_class_descendants: Closure<String>,
    /// `broader[k]` = every kind `k` is (transitively) broader than.
    broader: Closure<String>,
    /// `part_of_wholes[k]` = every whole `k` is (transitively) a part of.
    part_of_wholes: Closure<String>,
    /// `part_of_parts[k]` = every part that (transitively) makes up `k`.
    part_of_parts: Closure<String>,
    equivalents: Closure<String>,
    disjoint: Closure<String>,
}

impl KindRegistry {
    pub fn build(graph: &GraphDefinition) -> CompileResult<Self> {
        let mut sub_class_direct = Vec::new();
        let mut broader_direct = Vec::new();
        let mut part_of_direct = Vec::new();
        let mut equivalent_direct = Vec::new();
        let mut disjoint_direct = Vec::new();

        for relation in &graph.ontology {
            let (meta, from, to) = canonicalize(relation);
            match meta {
                MetaEdge::SubClassOf => sub_class_direct.push((from, to)),
                MetaEdge::Broader => broader_direct.push((from, to)),
                MetaEdge::PartOf => part_of_direct.push((from, to)),
                MetaEdge::EquivalentTo => {
                    // Symmetrized before closure: equivalence is mutual.
                    equivalent_direct.push((from.clone(), to.clone()));
                    equivalent_direct.push((to, from));
                }
                MetaEdge::DisjointWith => {
                    disjoint_direct.push((from.clone(), to.clone()));
                    disjoint_direct.push((to, from));
                }
                // Implies / InverseOf / RelatedTo / DifferentFrom / Narrower /
                // HasPart / SameAs are either already desugared above or are
                // informational relations with no closure the core needs.
                _ => {}
            }
        }

        for (from, to) in &sub_class_direct {
            if from == to {
                return Err(CompileError::validation(format!(
                    "subClassOf relation from {from} to itself is not permitted"
                )));
            }
        }

        // Direct pairs are (subclass, superclass); the un-inverted closure
        // already answers "what is k a subclass of" (ancestors).
        let sub_class_ancestors = Closure::compute(sub_class_direct);
        let sub_class_descendants = sub_class_ancestors.invert();
        // Direct pairs are (broader, narrower); broader(A,B) transitively
        // composes without needing a separate inverse view.
        let broader = Closure::compute(broader_direct);
        // Direct pairs are (part, whole); the un-inverted closure answers
        // "what whole does k belong to" (wholes).
        let part_of_wholes = Closure::compute(part_of_direct);
        let part_of_parts = part_of_wholes.invert();
        let equivalents = Closure::compute(equivalent_direct);
        let disjoint = Closure::compute(disjoint_direct);

        Ok(Self {
            node_kinds: graph.nodes.clone(),
            edge_kinds: graph.edges.clone(),
            relations: graph.ontology.clone(),
            sub_class_ancestors,
            sub_class_descendants,
            broader,
            part_of_wholes,
            part_of_parts,
            equivalents,
            disjoint,
        })
    }

    pub fn node_kind(&self, name: &str) -> CompileResult<&NodeKindRegistration> {
        self.node_kinds
            .get(name)
            .ok_or_else(|| CompileError::KindNotFound(name.to_string()))
    }

    pub fn edge_kind(&self, name: &str) -> CompileResult<&EdgeKindRegistration> {
        self.edge_kinds
            .get(name)
            .ok_or_else(|| CompileError::EdgeNotFound(name.to_string()))
    }

    pub fn relations(&self) -> &[OntologyRelation] {
        &self.relations
    }

    /// `kind` itself plus every descendant under `subClassOf` — used for
    /// `includeSubClasses` traversal and scan expansion.
    pub fn expand_sub_classes(&self, kind: &str) -> HashSet<String> {
        let mut set = self.sub_class_descendants.reachable_from(&kind.to_string());
        set.insert(kind.to_string());
        set
    }

    pub fn is_sub_class_of(&self, a: &str, b: &str) -> bool {
        self.sub_class_ancestors
            .is_reachable(&a.to_string(), &b.to_string())
    }

    /// Reflexive over subclass: a kind is always assignable to itself.
    pub fn is_assignable_to(&self, a: &str, b: &str) -> bool {
        a == b || self.is_sub_class_of(a, b)
    }

    pub fn is_broader_than(&self, a: &str, b: &str) -> bool {
        self.broader.is_reachable(&a.to_string(), &b.to_string())
    }

    pub fn is_narrower_than(&self, a: &str, b: &str) -> bool {
        self.is_broader_than(b, a)
    }

    /// `equivalentTo` is independent of `subClassOf` — it is never combined
    /// with the subclass closure (see spec §4.B and the open question in §9).
    pub fn are_equivalent(&self, a: &str, b: &str) -> bool {
        a == b || self.equivalents.is_reachable(&a.to_string(), &b.to_string())
    }

    pub fn are_disjoint(&self, a: &str, b: &str) -> bool {
        self.disjoint.is_reachable(&a.to_string(), &b.to_string())
    }

    pub fn is_part_of(&self, a: &str, b: &str) -> bool {
        self.part_of_wholes
            .is_reachable(&a.to_string(), &b.to_string())
    }

    pub fn get_ancestors(&self, kind: &str) -> HashSet<String> {
        self.sub_class_ancestors.reachable_from(&kind.to_string())
    }

    pub fn get_descendants(&self, kind: &str) -> HashSet<String> {
        self.sub_class_descendants.reachable_from(&kind.to_string())
    }

    pub fn get_equivalents(&self, kind: &str) -> HashSet<String> {
        self.equivalents.reachable_from(&kind.to_string())
    }

    pub fn get_disjoint_kinds(&self, kind: &str) -> HashSet<String> {
        self.disjoint.reachable_from(&kind.to_string())
    }

    pub fn get_wholes(&self, kind: &str) -> HashSet<String> {
        self.part_of_wholes.reachable_from(&kind.to_string())
    }

    pub fn get_parts(&self, kind: &str) -> HashSet<String> {
        self.part_of_parts.reachable_from(&kind.to_string())
    }

    pub fn broader_closure(&self) -> &Closure<String> {
        &self.broader
    }

    pub fn validate_edge_endpoints(
        &self,
        edge_kind: &str,
        from_kind: &str,
        to_kind: &str,
    ) -> CompileResult<()> {
        let edge = self.edge_kind(edge_kind)?;
        let from_ok = edge
            .from_kinds
            .iter()
            .any(|k| self.is_assignable_to(from_kind, k));
        let to_ok = edge
            .to_kinds
            .iter()
            .any(|k| self.is_assignable_to(to_kind, k));
        if !from_ok || !to_ok {
            return Err(CompileError::Cardinality {
                edge_kind: edge_kind.to_string(),
                message: format!(
                    "endpoints ({from_kind} -> {to_kind}) not permitted by domain/range"
                ),
            });
        }
        Ok(())
    }
}
