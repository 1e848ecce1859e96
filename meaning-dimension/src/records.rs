// SPDX-License-Identifier: PMPL-1.0-or-later
//! Persisted record shapes.
//!
//! These are the only domain objects this crate writes to the store. Field
//! order here is the canonical order used for content hashing by
//! `meaning_store::content_hash` (via `serde_json::to_value`, which
//! preserves struct field declaration order).

use serde::{Deserialize, Serialize};

/// A point in semantic space: content-addressed, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeaningNode {
    pub embedding: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// The association between the meaning dimension and a `MeaningNode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeaningDimensionValue {
    pub dimension_id: String,
    pub meaning_node_id: String,
    /// Monotonic epoch milliseconds at creation.
    pub created: i64,
}

/// The singleton "meaning" dimension record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionRecord {
    pub name: String,
    pub data_type: String,
    pub standard: bool,
    pub shared: bool,
    pub package_name: String,
}

impl DimensionRecord {
    pub fn meaning() -> Self {
        Self {
            name: "meaning".to_string(),
            data_type: "object".to_string(),
            standard: true,
            shared: true,
            package_name: "meaning.core".to_string(),
        }
    }
}

/// Links an external object id to the `MeaningDimensionValue` it carries.
///
/// This crate has no contract with whatever owns cube-level object
/// orchestration, so `index_embedding` writes this record itself, purely so
/// `rebuild_index` can recover the `object_id ↔ MeaningDimensionValue`
/// association from store state alone after a restart. It is stored under
/// the `CubeObject` type tag, the same tag a real cube object reference
/// would use when a collaborator's reverse-map traversal walks from a
/// dimension value back to the objects that carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeObjectLink {
    pub object_id: String,
    pub dimension_value_id: String,
}
