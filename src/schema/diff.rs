//! `computeSchemaDiff` / `ensureSchema` / `isBackwardsCompatible` (spec §4.J).
//!
//! Diffing operates at the granularity [`crate::ontology::GraphDefinition`]
//! actually exposes — kind presence, unique constraints, edge domain/range/
//! cardinality, and ontology relations. A kind's property-level validator is
//! opaque per spec §3 ("validator (opaque; exposes JSON-Schema for
//! serialization)"), so property-level classifications from spec §4.J
//! (tightening a property, renaming a required property, adding a required
//! property with a default) are the caller's responsibility to report
//! through the same `SchemaChange` shape when it has validator access this
//! crate does not; see the Open Question decision recorded in DESIGN.md.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult, MigrationAction};
use crate::ontology::{EdgeKindRegistration, GraphDefinition, NodeKindRegistration, UniqueConstraint};
use crate::options::MigrationOptions;

use super::serializer::{serialize_schema, SchemaVersionStore, SerializedSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ChangeSeverity {
    Compatible,
    RequiresMigration,
    Breaking,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaChange {
    pub kind: ChangeKind,
    pub severity: ChangeSeverity,
    /// Dotted path into the schema, e.g. `"nodes.Person"` or `"ontology"`.
    pub path: String,
    pub description: String,
}

impl SchemaChange {
    fn new(kind: ChangeKind, severity: ChangeSeverity, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            path: path.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    pub changes: Vec<SchemaChange>,
}

impl SchemaDiff {
    pub fn has_breaking_changes(&self) -> bool {
        self.changes.iter().any(|c| c.severity == ChangeSeverity::Breaking)
    }

    pub fn requires_migration(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c.severity, ChangeSeverity::RequiresMigration | ChangeSeverity::Breaking))
    }
}

/// `true` iff no change in the diff is breaking.
pub fn is_backwards_compatible(diff: &SchemaDiff) -> bool {
    !diff.has_breaking_changes()
}

fn fields_are_superset(candidate: &UniqueConstraint, existing: &UniqueConstraint) -> bool {
    existing.fields.iter().all(|f| candidate.fields.contains(f))
}

fn diff_unique_constraints(path: &str, old: &[UniqueConstraint], new: &[UniqueConstraint], changes: &mut Vec<SchemaChange>) {
    for candidate in new {
        if old.iter().any(|o| o.fields == candidate.fields) {
            continue;
        }
        // A constraint whose fields are a superset of an existing one is
        // strictly less restrictive (more fields must collide to violate
        // it), so it can only newly accept rows the prior constraint
        // already rejected — compatible. Anything else needs validation
        // against existing rows before it can be enforced.
        let severity = if old.iter().any(|o| fields_are_superset(candidate, o)) {
            ChangeSeverity::Compatible
        } else {
            ChangeSeverity::RequiresMigration
        };
        changes.push(SchemaChange::new(
            ChangeKind::Added,
            severity,
            path,
            format!("added unique constraint over [{}]", candidate.fields.join(", ")),
        ));
    }
    for existing in old {
        if !new.iter().any(|n| n.fields == existing.fields) {
            changes.push(SchemaChange::new(
                ChangeKind::Removed,
                ChangeSeverity::Compatible,
                path,
                format!("removed unique constraint over [{}]", existing.fields.join(", ")),
            ));
        }
    }
}

fn diff_node_kind(name: &str, old: &NodeKindRegistration, new: &NodeKindRegistration, changes: &mut Vec<SchemaChange>) {
    let path = format!("nodes.{name}");
    diff_unique_constraints(&path, &old.unique_constraints, &new.unique_constraints, changes);
}

/// Domain/range kind lists only ever get a single diff entry per side: every
/// old kind still accepted is a widening (compatible), any old kind dropped
/// is a narrowing (breaking) since existing rows may no longer satisfy it.
fn diff_endpoint_kinds(path: &str, label: &str, old: &[String], new: &[String], changes: &mut Vec<SchemaChange>) {
    if old == new {
        return;
    }
    let narrowed = old.iter().any(|k| !new.contains(k));
    if narrowed {
        changes.push(SchemaChange::new(
            ChangeKind::Modified,
            ChangeSeverity::Breaking,
            path,
            format!("{label}-kinds narrowed: existing edges may no longer satisfy it"),
        ));
    } else {
        changes.push(SchemaChange::new(
            ChangeKind::Modified,
            ChangeSeverity::Compatible,
            path,
            format!("{label}-kinds widened"),
        ));
    }
}

fn diff_edge_kind(name: &str, old: &EdgeKindRegistration, new: &EdgeKindRegistration, changes: &mut Vec<SchemaChange>) {
    let path = format!("edges.{name}");
    diff_unique_constraints(&path, &old.unique_constraints, &new.unique_constraints, changes);
    diff_endpoint_kinds(&path, "from", &old.from_kinds, &new.from_kinds, changes);
    diff_endpoint_kinds(&path, "to", &old.to_kinds, &new.to_kinds, changes);

    if old.cardinality != new.cardinality {
        use crate::ontology::Cardinality;
        let severity = match (old.cardinality, new.cardinality) {
            (Cardinality::One, Cardinality::Many) => ChangeSeverity::Compatible,
            (Cardinality::Many, Cardinality::One) => ChangeSeverity::Breaking,
            _ => ChangeSeverity::Compatible,
        };
        changes.push(SchemaChange::new(
            ChangeKind::Modified,
            severity,
            &path,
            format!("cardinality changed from {:?} to {:?}", old.cardinality, new.cardinality),
        ));
    }
}

/// Classifies every change between two serialized schema snapshots as
/// `{added, removed, modified} x {compatible, requiresMigration, breaking}`
/// per spec §4.J's rules.
pub fn compute_schema_diff(old: &SerializedSchema, new: &SerializedSchema) -> SchemaDiff {
    let mut changes = Vec::new();

    for (name, new_kind) in &new.nodes {
        match old.nodes.get(name) {
            None => changes.push(SchemaChange::new(
                ChangeKind::Added,
                ChangeSeverity::Compatible,
                format!("nodes.{name}"),
                "added node kind",
            )),
            Some(old_kind) => diff_node_kind(name, old_kind, new_kind, &mut changes),
        }
    }
    for name in old.nodes.keys() {
        if !new.nodes.contains_key(name) {
            changes.push(SchemaChange::new(
                ChangeKind::Removed,
                ChangeSeverity::Breaking,
                format!("nodes.{name}"),
                "removed node kind: existing rows of this kind become unreachable",
            ));
        }
    }

    for (name, new_kind) in &new.edges {
        match old.edges.get(name) {
            None => changes.push(SchemaChange::new(
                ChangeKind::Added,
                ChangeSeverity::Compatible,
                format!("edges.{name}"),
                "added edge kind",
            )),
            Some(old_kind) => diff_edge_kind(name, old_kind, new_kind, &mut changes),
        }
    }
    for name in old.edges.keys() {
        if !new.edges.contains_key(name) {
            changes.push(SchemaChange::new(
                ChangeKind::Removed,
                ChangeSeverity::Breaking,
                format!("edges.{name}"),
                "removed edge kind: existing rows of this kind become unreachable",
            ));
        }
    }

    let old_relations: std::collections::HashSet<(String, String, String)> = old
        .ontology
        .relations
        .iter()
        .map(|r| (format!("{:?}", r.meta_edge), r.from.clone(), r.to.clone()))
        .collect();
    for relation in &new.ontology.relations {
        let key = (format!("{:?}", relation.meta_edge), relation.from.clone(), relation.to.clone());
        if !old_relations.contains(&key) {
            changes.push(SchemaChange::new(
                ChangeKind::Added,
                ChangeSeverity::Compatible,
                "ontology",
                format!("added relation {:?}({}, {})", relation.meta_edge, relation.from, relation.to),
            ));
        }
    }
    let new_relations: std::collections::HashSet<(String, String, String)> = new
        .ontology
        .relations
        .iter()
        .map(|r| (format!("{:?}", r.meta_edge), r.from.clone(), r.to.clone()))
        .collect();
    for relation in &old.ontology.relations {
        let key = (format!("{:?}", relation.meta_edge), relation.from.clone(), relation.to.clone());
        if !new_relations.contains(&key) {
            changes.push(SchemaChange::new(
                ChangeKind::Removed,
                ChangeSeverity::Breaking,
                "ontology",
                format!("removed relation {:?}({}, {})", relation.meta_edge, relation.from, relation.to),
            ));
        }
    }

    SchemaDiff { changes }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum EnsureOutcome {
    Initialized { version: u64 },
    Unchanged { version: u64 },
    Migrated { from_version: u64, to_version: u64 },
    PendingMigration { from_version: u64, to_version: u64, diff: SchemaDiff },
}

/// The umbrella operation spec §4.J describes: initializes on first run,
/// diffs on every subsequent run, and either auto-migrates, raises
/// [`CompileError::MigrationBreaking`], or reports a pending migration.
pub fn ensure_schema(
    store: &mut dyn SchemaVersionStore,
    graph: &GraphDefinition,
    options: &MigrationOptions,
) -> CompileResult<EnsureOutcome> {
    let now = Utc::now();
    match store.active_schema(&graph.graph_id)? {
        None => {
            let schema = serialize_schema(graph, 1, now)?;
            let version = schema.version;
            store.insert_schema_version(schema)?;
            store.set_active_schema(&graph.graph_id, version)?;
            Ok(EnsureOutcome::Initialized { version })
        }
        Some(active) => {
            let candidate = serialize_schema(graph, active.version + 1, now)?;
            if candidate.schema_hash == active.schema_hash {
                return Ok(EnsureOutcome::Unchanged { version: active.version });
            }

            let diff = compute_schema_diff(&active, &candidate);
            if diff.has_breaking_changes() && options.throw_on_breaking {
                let actions = diff
                    .changes
                    .iter()
                    .filter(|c| c.severity == ChangeSeverity::Breaking)
                    .map(|c| MigrationAction {
                        description: c.description.clone(),
                        kind_name: c.path.clone(),
                    })
                    .collect();
                return Err(CompileError::MigrationBreaking { actions });
            }

            if options.auto_migrate {
                let to_version = candidate.version;
                store.insert_schema_version(candidate)?;
                store.set_active_schema(&graph.graph_id, to_version)?;
                Ok(EnsureOutcome::Migrated {
                    from_version: active.version,
                    to_version,
                })
            } else {
                Ok(EnsureOutcome::PendingMigration {
                    from_version: active.version,
                    to_version: candidate.version,
                    diff,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Cardinality, GraphDefaults, MetaEdge, OntologyRelation};
    use std::collections::HashMap;

    struct InMemoryStore {
        versions: Vec<SerializedSchema>,
        active: HashMap<String, u64>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self {
                versions: Vec::new(),
                active: HashMap::new(),
            }
        }
    }

    impl SchemaVersionStore for InMemoryStore {
        fn active_schema(&self, graph_id: &str) -> CompileResult<Option<SerializedSchema>> {
            let Some(version) = self.active.get(graph_id) else {
                return Ok(None);
            };
            Ok(self
                .versions
                .iter()
                .find(|s| s.graph_id == graph_id && s.version == *version)
                .cloned())
        }

        fn schema_version(&self, graph_id: &str, version: u64) -> CompileResult<Option<SerializedSchema>> {
            Ok(self
                .versions
                .iter()
                .find(|s| s.graph_id == graph_id && s.version == version)
                .cloned())
        }

        fn insert_schema_version(&mut self, schema: SerializedSchema) -> CompileResult<()> {
            self.versions.push(schema);
            Ok(())
        }

        fn set_active_schema(&mut self, graph_id: &str, version: u64) -> CompileResult<()> {
            self.active.insert(graph_id.to_string(), version);
            Ok(())
        }
    }

    fn person_graph(with_email: bool) -> GraphDefinition {
        let mut nodes = HashMap::new();
        nodes.insert(
            "Person".to_string(),
            NodeKindRegistration {
                name: "Person".into(),
                unique_constraints: if with_email {
                    vec![UniqueConstraint {
                        fields: vec!["email".into()],
                        r#where: None,
                    }]
                } else {
                    vec![]
                },
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
    fn scenario_schema_auto_migrate_then_breaking_rename() {
        let mut store = InMemoryStore::new();
        let v1 = person_graph(false);
        let outcome = ensure_schema(&mut store, &v1, &MigrationOptions::default()).unwrap();
        assert!(matches!(outcome, EnsureOutcome::Initialized { version: 1 }));

        let v2 = person_graph(true);
        let outcome = ensure_schema(&mut store, &v2, &MigrationOptions::new(true, false)).unwrap();
        match outcome {
            EnsureOutcome::Migrated { from_version, to_version } => {
                assert_eq!(from_version, 1);
                assert_eq!(to_version, 2);
            }
            other => panic!("expected Migrated, got {other:?}"),
        }
        assert_eq!(store.active.get("g1"), Some(&2));

        // v3 removes the Person kind entirely: breaking, and throwOnBreaking aborts.
        let mut v3 = person_graph(true);
        v3.nodes.clear();
        let err = ensure_schema(&mut store, &v3, &MigrationOptions::new(true, true)).unwrap_err();
        assert!(matches!(err, CompileError::MigrationBreaking { .. }));
    }

    #[test]
    fn is_backwards_compatible_false_when_any_change_breaking() {
        let diff = SchemaDiff {
            changes: vec![SchemaChange::new(
                ChangeKind::Removed,
                ChangeSeverity::Breaking,
                "nodes.Person",
                "removed",
            )],
        };
        assert!(!is_backwards_compatible(&diff));
    }

    #[test]
    fn adding_node_kind_is_compatible() {
        let old = person_graph(false);
        let mut new = person_graph(false);
        new.nodes.insert(
            "Organization".to_string(),
            NodeKindRegistration {
                name: "Organization".into(),
                unique_constraints: vec![],
                index_hints: vec![],
            },
        );
        let old_s = serialize_schema(&old, 1, Utc::now()).unwrap();
        let new_s = serialize_schema(&new, 2, Utc::now()).unwrap();
        let diff = compute_schema_diff(&old_s, &new_s);
        assert!(is_backwards_compatible(&diff));
        assert!(diff
            .changes
            .iter()
            .any(|c| c.kind == ChangeKind::Added && c.path == "nodes.Organization"));
    }

    #[test]
    fn adding_ontology_relation_is_compatible() {
        let old = person_graph(false);
        let mut new = person_graph(false);
        new.nodes.insert(
            "Organization".to_string(),
            NodeKindRegistration {
                name: "Organization".into(),
                unique_constraints: vec![],
                index_hints: vec![],
            },
        );
        new.ontology.push(OntologyRelation {
            meta_edge: MetaEdge::SubClassOf,
            from: "Person".into(),
            to: "Organization".into(),
            properties: None,
        });
        let old_s = serialize_schema(&old, 1, Utc::now()).unwrap();
        let new_s = serialize_schema(&new, 2, Utc::now()).unwrap();
        let diff = compute_schema_diff(&old_s, &new_s);
        assert!(is_backwards_compatible(&diff));
        assert!(diff.changes.iter().any(|c| c.path == "ontology" && c.kind == ChangeKind::Added));
    }
}
