// SPDX-License-Identifier: PMPL-1.0-or-later
//! Meaning Store Adapter
//!
//! The narrow interface the meaning dimension needs from an external
//! content-addressed object store: write a record once (idempotently, by
//! content hash), read a record back by id, and enumerate the objects that
//! reference a given id ("reverse map"). The store itself — persistence,
//! replication, compaction — is entirely the collaborator's concern; this
//! crate only defines the contract and, for tests, a reference in-memory
//! implementation of it.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors surfaced by a store adapter implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("store I/O error: {0}")]
    Io(String),
}

/// The recognized record type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Dimension,
    MeaningNode,
    MeaningDimensionValue,
    CubeObject,
}

impl RecordType {
    fn tag(self) -> &'static str {
        match self {
            RecordType::Dimension => "dimension",
            RecordType::MeaningNode => "meaning_node",
            RecordType::MeaningDimensionValue => "meaning_dimension_value",
            RecordType::CubeObject => "cube_object",
        }
    }
}

/// A record as stored: its type tag plus an opaque JSON payload. The
/// content hash is computed over both, so two records with the same fields
/// but different type tags never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_type: RecordType,
    pub payload: serde_json::Value,
}

/// Result of an idempotent write: the content-hash id, and whether this
/// call is what created the record (`false` if it already existed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub id: String,
    pub created: bool,
}

/// Compute the content-hash id for a `(record_type, payload)` pair.
///
/// Hex SHA-256 of the canonical JSON serialization, matching the hashing
/// style used for provenance records elsewhere in this codebase: hash the
/// content fields, never an externally supplied id.
pub fn content_hash(record_type: RecordType, payload: &serde_json::Value) -> String {
    let canonical = serde_json::json!({
        "type": record_type.tag(),
        "payload": payload,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)
}

/// Narrow interface to an external content-addressed object store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Idempotently write a record, keyed by its content hash.
    async fn put_unversioned(
        &self,
        record_type: RecordType,
        payload: serde_json::Value,
    ) -> Result<PutResult, StoreError>;

    /// Retrieve a record by id.
    async fn get(&self, id: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Enumerate the ids of all records of `target_type` that reference
    /// `source_id` (i.e. carry it as the value of one of their top-level
    /// fields), in the order the adapter found them.
    async fn reverse_map(
        &self,
        source_id: &str,
        target_type: RecordType,
    ) -> Result<Vec<String>, StoreError>;
}
