// SPDX-License-Identifier: PMPL-1.0-or-later
//! Meaning HNSW Index
//!
//! In-memory Hierarchical Navigable Small World graph for approximate
//! nearest-neighbor search over embedding vectors. Implements the
//! probabilistic layering, greedy layer traversal, and M-bounded neighbor
//! selection from Malkov & Yashunin, "Efficient and robust approximate
//! nearest neighbor search using Hierarchical Navigable Small World graphs".
//!
//! Every in-memory node here is expected to be backed by a persistent
//! record one layer up (in `meaning-dimension`); this crate knows nothing
//! about persistence and only holds what it needs for search.

mod index;

pub use index::HnswIndex;
pub use meaning_metric::DistanceMetric;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HNSW index errors.
#[derive(Error, Debug)]
pub enum HnswError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("corrupt serialized state: {0}")]
    CorruptSerializedState(String),
}

impl From<meaning_metric::MetricError> for HnswError {
    fn from(err: meaning_metric::MetricError) -> Self {
        match err {
            meaning_metric::MetricError::DimensionMismatch { expected, actual } => {
                HnswError::DimensionMismatch { expected, actual }
            }
            meaning_metric::MetricError::InvalidEmbedding(msg) => {
                HnswError::InvalidEmbedding(msg)
            }
        }
    }
}

/// Construction / search parameters. Defaults match the reference: `M:
/// 16, ef_construction: 200, ef_search: 50`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Target maximum out-degree per node per layer.
    pub m: usize,
    /// Size of the dynamic candidate list used during insertion.
    pub ef_construction: usize,
    /// Default size of the dynamic candidate list used during search.
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
        }
    }
}

/// The ceiling on a node's randomly drawn layer. Bounds memory for
/// pathological draws from the geometric distribution.
pub const MAX_LEVEL: usize = 16;

/// One search result: the object that owns the matched vector, the
/// persistent node it resolves to, and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub object_id: String,
    pub meaning_node_id: String,
    pub similarity: f32,
}

/// A self-describing, stable document carrying the full index state.
/// Deserializing this is the inverse of `HnswIndex::serialize` and must
/// round-trip every invariant in the data model: connection symmetry,
/// `entry_point == None ⇔ nodes.is_empty()`, and `max_level` agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub dimensions: usize,
    pub metric: DistanceMetric,
    pub config: HnswConfig,
    pub entry_point: Option<String>,
    pub max_level: usize,
    pub nodes: Vec<SerializedNode>,
}

/// One node as it appears in a snapshot: neighbors are referenced by
/// `object_id` (stable across a rebuild) rather than by the arena index
/// used internally at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedNode {
    pub object_id: String,
    pub meaning_node_id: String,
    pub embedding: Vec<f32>,
    pub level: usize,
    /// `connections[layer]` for `layer in 0..=level`.
    pub connections: Vec<Vec<String>>,
}
