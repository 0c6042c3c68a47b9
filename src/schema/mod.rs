//! Schema serialization, diffing, and version migration (spec §4.J).
//!
//! A graph's schema is serialized to a deterministic JSON tree, content-hashed
//! for version-independent equality, diffed against a prior version to
//! classify every change by severity, and the diff result drives
//! [`ensure_schema`]'s auto-migrate/throw-on-breaking decision.

mod diff;
mod serializer;

pub use diff::{
    compute_schema_diff, ensure_schema, is_backwards_compatible, ChangeKind, ChangeSeverity, EnsureOutcome,
    SchemaChange, SchemaDiff,
};
pub use serializer::{
    compute_schema_hash, serialize_schema, SchemaVersionStore, SerializedClosures, SerializedOntology,
    SerializedSchema,
};
