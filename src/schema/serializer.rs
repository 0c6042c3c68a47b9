//! `serializeSchema` / `computeSchemaHash` (spec §4.J): a deterministic JSON
//! tree plus a content-only digest that identifies semantic equivalence
//! across versions, independent of `version`/`generatedAt`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::CompileResult;
use crate::ontology::{
    EdgeKindRegistration, GraphDefaults, GraphDefinition, KindRegistry, NodeKindRegistration,
    OntologyRelation,
};

/// The five closures spec.md §4.B names plus the symmetric equivalence and
/// disjointness maps — seven maps total, sorted by kind and by member so two
/// serializations of the same schema are byte-identical.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SerializedClosures {
    pub sub_class_ancestors: BTreeMap<String, Vec<String>>,
    pub sub_class_descendants: BTreeMap<String, Vec<String>>,
    pub broader_ancestors: BTreeMap<String, Vec<String>>,
    pub part_of_wholes: BTreeMap<String, Vec<String>>,
    pub part_of_parts: BTreeMap<String, Vec<String>>,
    pub equivalents: BTreeMap<String, Vec<String>>,
    pub disjoint: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SerializedOntology {
    pub relations: Vec<OntologyRelation>,
    pub closures: SerializedClosures,
}

/// The JSON tree `serializeSchema` produces. `schema_hash` covers everything
/// except `version` and `generated_at` — see [`compute_schema_hash`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SerializedSchema {
    pub graph_id: String,
    pub version: u64,
    pub generated_at: DateTime<Utc>,
    pub nodes: BTreeMap<String, NodeKindRegistration>,
    pub edges: BTreeMap<String, EdgeKindRegistration>,
    pub ontology: SerializedOntology,
    pub defaults: GraphDefaults,
    pub schema_hash: String,
}

/// The subset of [`SerializedSchema`] that feeds the content hash — omits
/// `version` and `generated_at` so the hash is stable across re-runs of the
/// same logical schema.
#[derive(Serialize)]
struct HashableContent<'a> {
    graph_id: &'a str,
    nodes: &'a BTreeMap<String, NodeKindRegistration>,
    edges: &'a BTreeMap<String, EdgeKindRegistration>,
    ontology: &'a SerializedOntology,
    defaults: &'a GraphDefaults,
}

fn insert_sorted(map: &mut BTreeMap<String, Vec<String>>, kind: &str, reachable: BTreeSet<String>) {
    if !reachable.is_empty() {
        map.insert(kind.to_string(), reachable.into_iter().collect());
    }
}

fn closures_for(registry: &KindRegistry, kind_names: &BTreeSet<String>) -> SerializedClosures {
    let mut closures = SerializedClosures::default();
    for kind in kind_names {
        insert_sorted(&mut closures.sub_class_ancestors, kind, registry.get_ancestors(kind).into_iter().collect());
        insert_sorted(
            &mut closures.sub_class_descendants,
            kind,
            registry.get_descendants(kind).into_iter().collect(),
        );
        insert_sorted(
            &mut closures.broader_ancestors,
            kind,
            registry.broader_closure().reachable_from(&kind.clone()).into_iter().collect(),
        );
        insert_sorted(&mut closures.part_of_wholes, kind, registry.get_wholes(kind).into_iter().collect());
        insert_sorted(&mut closures.part_of_parts, kind, registry.get_parts(kind).into_iter().collect());
        insert_sorted(&mut closures.equivalents, kind, registry.get_equivalents(kind).into_iter().collect());
        insert_sorted(
            &mut closures.disjoint,
            kind,
            registry.get_disjoint_kinds(kind).into_iter().collect(),
        );
    }
    closures
}

/// Produces the deterministic JSON tree for one graph at one version: nodes
/// and edges sorted by key, closure maps sorted, `where`-predicates captured
/// as their sub-AST rather than as opaque function references (the
/// [`crate::ontology::WherePredicate`] type already enforces this at the
/// registration boundary).
pub fn serialize_schema(
    graph: &GraphDefinition,
    version: u64,
    generated_at: DateTime<Utc>,
) -> CompileResult<SerializedSchema> {
    let registry = KindRegistry::build(graph)?;

    let nodes: BTreeMap<String, NodeKindRegistration> =
        graph.nodes.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let edges: BTreeMap<String, EdgeKindRegistration> =
        graph.edges.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let mut kind_names: BTreeSet<String> = nodes.keys().cloned().collect();
    kind_names.extend(edges.keys().cloned());

    let mut relations = graph.ontology.clone();
    relations.sort_by(|a, b| (a.from.as_str(), a.to.as_str()).cmp(&(b.from.as_str(), b.to.as_str())));

    let ontology = SerializedOntology {
        relations,
        closures: closures_for(&registry, &kind_names),
    };

    let content = HashableContent {
        graph_id: &graph.graph_id,
        nodes: &nodes,
        edges: &edges,
        ontology: &ontology,
        defaults: &graph.defaults,
    };
    let schema_hash = compute_schema_hash(&content)?;

    Ok(SerializedSchema {
        graph_id: graph.graph_id.clone(),
        version,
        generated_at,
        nodes,
        edges,
        ontology,
        defaults: graph.defaults.clone(),
        schema_hash,
    })
}

/// Content-only digest, excluding `version`/`generatedAt`, so `hash(serialize(G,
/// v1)) = hash(serialize(G, v2))` per spec §8's universal quantification.
/// Uses xxh3 (non-cryptographic, fast) since the goal is change detection,
/// not tamper resistance.
pub fn compute_schema_hash(content: &impl Serialize) -> CompileResult<String> {
    let bytes = serde_json::to_vec(content)
        .map_err(|e| crate::error::CompileError::validation(format!("schema not serializable: {e}")))?;
    Ok(format!("{:016x}", xxhash_rust::xxh3::xxh3_64(&bytes)))
}

/// Persisted schema-versions row shape (spec §6's `schema_versions` table),
/// reused by [`super::diff::ensure_schema`] in place of a real backend since
/// this crate does not own storage.
pub trait SchemaVersionStore {
    fn active_schema(&self, graph_id: &str) -> CompileResult<Option<SerializedSchema>>;
    fn schema_version(&self, graph_id: &str, version: u64) -> CompileResult<Option<SerializedSchema>>;
    fn insert_schema_version(&mut self, schema: SerializedSchema) -> CompileResult<()>;
    fn set_active_schema(&mut self, graph_id: &str, version: u64) -> CompileResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal_graph() -> GraphDefinition {
        let mut nodes = HashMap::new();
        nodes.insert(
            "Person".to_string(),
            NodeKindRegistration {
                name: "Person".into(),
                unique_constraints: vec![],
                index_hints: vec![],
            },
        );
        GraphDefinition {
            graph_id: "g1".into(),
            nodes,
            edges: HashMap::new(),
            ontology: vec![],
            defaults: GraphDefaults::default(),
        }
    }

    #[test]
    fn hash_is_stable_across_versions_and_timestamps() {
        let graph = minimal_graph();
        let v1 = serialize_schema(&graph, 1, Utc::now()).unwrap();
        let v2 = serialize_schema(&graph, 2, Utc::now()).unwrap();
        assert_eq!(v1.schema_hash, v2.schema_hash);
    }

    #[test]
    fn hash_changes_when_a_node_kind_is_added() {
        let graph = minimal_graph();
        let v1 = serialize_schema(&graph, 1, Utc::now()).unwrap();

        let mut graph2 = minimal_graph();
        graph2.nodes.insert(
            "Organization".to_string(),
            NodeKindRegistration {
                name: "Organization".into(),
                unique_constraints: vec![],
                index_hints: vec![],
            },
        );
        let v2 = serialize_schema(&graph2, 1, Utc::now()).unwrap();
        assert_ne!(v1.schema_hash, v2.schema_hash);
    }

    #[test]
    fn nodes_and_edges_serialize_sorted_by_key() {
        let mut graph = minimal_graph();
        graph.nodes.insert(
            "Animal".to_string(),
            NodeKindRegistration {
                name: "Animal".into(),
                unique_constraints: vec![],
                index_hints: vec![],
            },
        );
        let schema = serialize_schema(&graph, 1, Utc::now()).unwrap();
        let keys: Vec<&String> = schema.nodes.keys().collect();
        assert_eq!(keys, vec!["Animal", "Person"]);
    }
}
