// SPDX-License-Identifier: PMPL-1.0-or-later

use thiserror::Error;

/// Errors surfaced by the meaning dimension façade.
///
/// Validation errors surface to the caller unchanged. Store errors during
/// `index_embedding` are surfaced without attempting to roll back a partial
/// write: the content-addressed store is append-only, and an orphaned
/// `MeaningNode` left behind by a failed call is harmless. The rebuild path
/// never returns an error for a per-entry failure — it logs and continues.
#[derive(Error, Debug)]
pub enum DimensionError {
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("dimension is not initialized; call init() first")]
    NotInitialized,

    #[error("no embedding provider configured for this dimension")]
    NoEmbeddingProvider,

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model mismatch: {0}")]
    ModelMismatch(String),

    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("store error: {0}")]
    Store(#[from] meaning_store::StoreError),

    #[error("corrupt serialized state: {0}")]
    CorruptSerializedState(String),
}

impl From<meaning_hnsw::HnswError> for DimensionError {
    fn from(err: meaning_hnsw::HnswError) -> Self {
        match err {
            meaning_hnsw::HnswError::DimensionMismatch { expected, actual } => {
                DimensionError::DimensionMismatch { expected, actual }
            }
            meaning_hnsw::HnswError::InvalidEmbedding(msg) => DimensionError::InvalidEmbedding(msg),
            meaning_hnsw::HnswError::CorruptSerializedState(msg) => {
                DimensionError::CorruptSerializedState(msg)
            }
        }
    }
}

impl From<meaning_metric::MetricError> for DimensionError {
    fn from(err: meaning_metric::MetricError) -> Self {
        match err {
            meaning_metric::MetricError::DimensionMismatch { expected, actual } => {
                DimensionError::DimensionMismatch { expected, actual }
            }
            meaning_metric::MetricError::InvalidEmbedding(msg) => DimensionError::InvalidEmbedding(msg),
        }
    }
}

impl From<meaning_model::ModelError> for DimensionError {
    fn from(err: meaning_model::ModelError) -> Self {
        match err {
            meaning_model::ModelError::ConfigurationError(msg) => {
                DimensionError::ConfigurationError(msg)
            }
            meaning_model::ModelError::ModelMismatch { a, b } => {
                DimensionError::ModelMismatch(format!("{a:?} != {b:?}"))
            }
        }
    }
}
