//! Backend contract (spec §6): the persisted row shapes and the trait
//! boundary a storage layer must implement. This crate never executes SQL —
//! it only defines what a conforming backend looks like and compiles the SQL
//! text/params a caller hands to one.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{CompileError, CompileResult};

/// A persisted node row. `props` is opaque JSON addressed by JSON Pointer;
/// the core never inspects it beyond what a query's predicates request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    pub graph_id: String,
    pub id: String,
    pub kind: String,
    pub props: serde_json::Value,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A persisted edge row; carries the same temporal/versioning columns as
/// [`NodeRow`] plus its endpoint kind/id pairs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRow {
    pub graph_id: String,
    pub id: String,
    pub kind: String,
    pub from_id: String,
    pub from_kind: String,
    pub to_id: String,
    pub to_kind: String,
    pub props: serde_json::Value,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An embedding row backing vector search, per spec §6's `embeddings` table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRow {
    pub node_id: String,
    pub graph_id: String,
    pub field_path: String,
    pub embedding: Vec<f32>,
}

/// Direction a page of `findBy` results was fetched in, carried in the
/// opaque cursor so re-requesting the same cursor resumes consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorDirection {
    #[serde(rename = "f")]
    Forward,
    #[serde(rename = "b")]
    Backward,
}

#[derive(Serialize, Deserialize)]
struct CursorWire {
    v: u8,
    d: CursorDirection,
    vals: Vec<serde_json::Value>,
    cols: Vec<String>,
}

/// An opaque pagination token: URL-safe, unpadded base64 of `{v:1, d:"f"|"b",
/// vals:[…], cols:[…]}`. `vals`/`cols` are the sort-key values/column names
/// of the last row seen, in the same order `findBy`'s `orderBy` used.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub direction: CursorDirection,
    pub vals: Vec<serde_json::Value>,
    pub cols: Vec<String>,
}

const CURSOR_VERSION: u8 = 1;

impl Cursor {
    pub fn new(direction: CursorDirection, cols: Vec<String>, vals: Vec<serde_json::Value>) -> Self {
        Self { direction, vals, cols }
    }

    pub fn encode(&self) -> String {
        let wire = CursorWire {
            v: CURSOR_VERSION,
            d: self.direction,
            vals: self.vals.clone(),
            cols: self.cols.clone(),
        };
        let json = serde_json::to_vec(&wire).expect("cursor wire shape is always serializable");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Rejects unknown `v`, unknown `d`, or a `vals`/`cols` length mismatch.
    pub fn decode(token: &str) -> CompileResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| CompileError::validation(format!("invalid cursor encoding: {e}")))?;
        let wire: CursorWire = serde_json::from_slice(&bytes)
            .map_err(|e| CompileError::validation(format!("invalid cursor payload: {e}")))?;
        if wire.v != CURSOR_VERSION {
            return Err(CompileError::validation(format!("unsupported cursor version {}", wire.v)));
        }
        if wire.vals.len() != wire.cols.len() {
            return Err(CompileError::validation(
                "cursor vals/cols length mismatch",
            ));
        }
        Ok(Self {
            direction: wire.d,
            vals: wire.vals,
            cols: wire.cols,
        })
    }
}

/// A page of `findBy` results plus the cursor to fetch the next one, `None`
/// once there are no more rows in the requested direction.
#[derive(Debug, Clone)]
pub struct FindPage<Row> {
    pub rows: Vec<Row>,
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub cursor: Option<Cursor>,
    pub limit: Option<u64>,
}

/// Scoped acquisition guaranteeing release on all exit paths: commit on
/// normal return, rollback on failure (spec §5's transaction model).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    pub read_only: bool,
}

/// Per-kind CRUD + query surface a backend must expose for both node and
/// edge stores (spec §6's backend contract). `InsertParams`/`Patch`/`Filter`
/// are left to the implementor since their shape is backend-specific; this
/// crate only produces the SQL text/params a `find_by`/`count` call over a
/// compiled plan would need.
pub trait RowStore {
    type Row;
    type InsertParams;
    type Patch;
    type Filter;

    fn insert(&self, params: Self::InsertParams) -> CompileResult<Self::Row>;
    fn insert_no_return(&self, params: Self::InsertParams) -> CompileResult<()>;
    fn insert_batch(&self, params: Vec<Self::InsertParams>) -> CompileResult<Vec<Self::Row>>;

    fn get_by_id(&self, graph_id: &str, kind: &str, id: &str) -> CompileResult<Option<Self::Row>>;

    /// Falls back to one `get_by_id` per id unless the implementor provides
    /// a genuine batched lookup.
    fn get_by_ids(&self, ids: &[(String, String, String)]) -> CompileResult<Vec<Option<Self::Row>>> {
        ids.iter().map(|(graph_id, kind, id)| self.get_by_id(graph_id, kind, id)).collect()
    }

    fn update(&self, graph_id: &str, kind: &str, id: &str, patch: Self::Patch) -> CompileResult<Self::Row>;
    fn soft_delete(&self, graph_id: &str, kind: &str, id: &str) -> CompileResult<()>;

    fn find_by(&self, filter: &Self::Filter, options: &FindOptions) -> CompileResult<FindPage<Self::Row>>;
    fn count(&self, filter: &Self::Filter) -> CompileResult<u64>;
}

/// Raw query execution and transaction scoping, kept separate from
/// [`RowStore`] since it is not per-kind.
pub trait QueryExecutor {
    fn execute<T: serde::de::DeserializeOwned>(&self, sql: &str, params: &[serde_json::Value]) -> CompileResult<Vec<T>>;

    /// Runs `body` inside one transaction; bulk inserts are expected to
    /// group their endpoint-existence checks within a single call and reuse
    /// a per-transaction cache of confirmed endpoints.
    fn transaction<T>(&self, options: TransactionOptions, body: impl FnOnce(&Self) -> CompileResult<T>) -> CompileResult<T>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor::new(
            CursorDirection::Forward,
            vec!["created_at".into(), "id".into()],
            vec![serde_json::json!("2024-01-01T00:00:00Z"), serde_json::json!("abc")],
        );
        let token = cursor.encode();
        let decoded = Cursor::decode(&token).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn cursor_rejects_unknown_version() {
        let wire = serde_json::json!({"v": 2, "d": "f", "vals": [], "cols": []});
        let token = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&wire).unwrap());
        assert!(Cursor::decode(&token).is_err());
    }

    #[test]
    fn cursor_rejects_vals_cols_length_mismatch() {
        let wire = serde_json::json!({"v": 1, "d": "f", "vals": [1], "cols": []});
        let token = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&wire).unwrap());
        assert!(Cursor::decode(&token).is_err());
    }

    #[test]
    fn cursor_rejects_garbage_base64() {
        assert!(Cursor::decode("not valid base64!!").is_err());
    }
}
