//! Ontology closures and the kind registry built on top of them.

pub mod closure;
pub mod registry;

pub use closure::Closure;
pub use registry::{
    Cardinality, DefaultTemporalMode, DeleteBehavior, EdgeKindRegistration, GraphDefaults,
    GraphDefinition, KindRegistry, MetaEdge, NodeKindRegistration, OntologyRelation,
    UniqueConstraint, WhereOp, WherePredicate,
};
