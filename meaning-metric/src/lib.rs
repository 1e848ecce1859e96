// SPDX-License-Identifier: PMPL-1.0-or-later
//! Meaning Metric Kernel
//!
//! Pure vector arithmetic shared by the HNSW index and the dimension
//! façade: cosine similarity, Euclidean distance, dot product, and the
//! distance/similarity adapters that let a single HNSW implementation
//! operate under any of the three metrics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metric kernel errors.
#[derive(Error, Debug, PartialEq)]
pub enum MetricError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
}

/// Distance metric used by an index or façade instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector has zero magnitude, rather than dividing
/// by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, MetricError> {
    require_equal_len(a, b)?;
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        Ok(dot / denom)
    } else {
        Ok(0.0)
    }
}

/// Euclidean (L2) distance between two equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, MetricError> {
    require_equal_len(a, b)?;
    let sum_sq: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    Ok(sum_sq.sqrt())
}

/// Dot product of two equal-length vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32, MetricError> {
    require_equal_len(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

fn require_equal_len(a: &[f32], b: &[f32]) -> Result<(), MetricError> {
    if a.len() != b.len() {
        Err(MetricError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        })
    } else {
        Ok(())
    }
}

/// Validate an embedding: non-empty, all finite, and (if given) the right width.
pub fn validate_embedding(embedding: &[f32], expected: Option<usize>) -> Result<(), MetricError> {
    if embedding.is_empty() {
        return Err(MetricError::InvalidEmbedding("embedding is empty".into()));
    }
    if let Some(value) = embedding.iter().find(|v| !v.is_finite()) {
        return Err(MetricError::InvalidEmbedding(format!(
            "non-finite element: {value}"
        )));
    }
    if let Some(expected) = expected {
        if embedding.len() != expected {
            return Err(MetricError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
    }
    Ok(())
}

/// Convert a raw metric comparison between two vectors into the distance
/// space used internally by the HNSW graph, where smaller is closer.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> Result<f32, MetricError> {
    match metric {
        DistanceMetric::Cosine => Ok(1.0 - cosine_similarity(a, b)?),
        DistanceMetric::Euclidean => euclidean_distance(a, b),
        DistanceMetric::DotProduct => Ok(-dot_product(a, b)?),
    }
}

/// Convert an internal distance back into a reported similarity, preserving
/// "smaller distance ⇔ larger similarity" for the configured metric.
pub fn distance_to_similarity(metric: DistanceMetric, d: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - d,
        DistanceMetric::Euclidean => 1.0 / (1.0 + d),
        DistanceMetric::DotProduct => -d,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cosine_of_identical_unit_vectors_is_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_magnitude_returns_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn mismatched_lengths_reject() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(
            cosine_similarity(&a, &b).unwrap_err(),
            MetricError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn validate_embedding_rejects_empty() {
        assert!(validate_embedding(&[], None).is_err());
    }

    #[test]
    fn validate_embedding_rejects_non_finite() {
        assert!(validate_embedding(&[1.0, f32::NAN], None).is_err());
        assert!(validate_embedding(&[1.0, f32::INFINITY], None).is_err());
    }

    #[test]
    fn validate_embedding_rejects_wrong_width() {
        assert!(validate_embedding(&[1.0, 2.0], Some(3)).is_err());
        assert!(validate_embedding(&[1.0, 2.0, 3.0], Some(3)).is_ok());
    }

    #[test]
    fn euclidean_monotonicity_scenarios() {
        assert_eq!(distance_to_similarity(DistanceMetric::Euclidean, 0.0), 1.0);
        assert_eq!(distance_to_similarity(DistanceMetric::Euclidean, 1.0), 0.5);
        assert_eq!(distance_to_similarity(DistanceMetric::Euclidean, 3.0), 0.25);
    }

    proptest! {
        #[test]
        fn smaller_distance_means_larger_similarity(
            metric in prop_oneof![
                Just(DistanceMetric::Cosine),
                Just(DistanceMetric::Euclidean),
                Just(DistanceMetric::DotProduct),
            ],
            d1 in 0.0f32..100.0,
            delta in 0.001f32..100.0,
        ) {
            let d2 = d1 + delta;
            let s1 = distance_to_similarity(metric, d1);
            let s2 = distance_to_similarity(metric, d2);
            prop_assert!(s1 > s2, "expected sim({d1}) > sim({d2}) under {metric:?}, got {s1} <= {s2}");
        }
    }
}
