//! Small typed option structs passed to entry points, following the
//! reference crate's `AnalysisOptions`/`AnalyzeRequest` pattern: `#[serde(default)]`
//! fields on a plain struct rather than a global mutable config object.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dialect::{DialectAdapter, DialectName, PostgresDialect, SqliteDialect};

/// Resolves a [`DialectName`] to its stateless adapter value. Both shipped
/// dialects are zero-sized, so this is a `'static` borrow, not an allocation.
pub fn resolve_dialect(name: DialectName) -> &'static dyn DialectAdapter {
    match name {
        DialectName::Sqlite => &SqliteDialect,
        DialectName::Postgres => &PostgresDialect,
    }
}

/// Options accepted by [`crate::compile`]: which dialect to target and, for
/// reproducible tests, a fixed "now" to use in place of the dialect's live
/// `current_timestamp()` when resolving `temporalMode: current`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    pub dialect: DialectName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_reference_now: Option<DateTime<Utc>>,
}

impl CompileOptions {
    pub fn new(dialect: DialectName) -> Self {
        Self {
            dialect,
            temporal_reference_now: None,
        }
    }

    pub fn with_temporal_reference_now(mut self, now: DateTime<Utc>) -> Self {
        self.temporal_reference_now = Some(now);
        self
    }
}

/// Options accepted by [`crate::schema::ensure_schema`]: whether a detected
/// schema change should be applied automatically and whether a breaking
/// change should abort instead of returning a pending-migration status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOptions {
    #[serde(default)]
    pub auto_migrate: bool,
    #[serde(default)]
    pub throw_on_breaking: bool,
}

impl MigrationOptions {
    pub fn new(auto_migrate: bool, throw_on_breaking: bool) -> Self {
        Self {
            auto_migrate,
            throw_on_breaking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_dialect_picks_matching_adapter() {
        assert_eq!(resolve_dialect(DialectName::Sqlite).name(), DialectName::Sqlite);
        assert_eq!(resolve_dialect(DialectName::Postgres).name(), DialectName::Postgres);
    }

    #[test]
    fn migration_options_default_is_conservative() {
        let options = MigrationOptions::default();
        assert!(!options.auto_migrate);
        assert!(!options.throw_on_breaking);
    }
}
