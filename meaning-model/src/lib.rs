// SPDX-License-Identifier: PMPL-1.0-or-later
//! Meaning Model Registry
//!
//! Closed enumeration of known embedding models, their dimensionality, and
//! their provider tag. `Custom` is the one open variant: its dimensionality
//! is supplied by the caller rather than looked up.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model registry errors.
#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("model mismatch: {a:?} != {b:?}")]
    ModelMismatch { a: EmbeddingModel, b: EmbeddingModel },
}

/// Provider tag associated with a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    OpenAi,
    HuggingFace,
    Local,
    Custom,
}

/// The closed set of known embedding models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingModel {
    TextEmbedding3Small,
    TextEmbedding3Large,
    TextEmbeddingAda002,
    AllMiniLmL6V2,
    AllMpnetBaseV2,
    BgeSmallEnV15,
    BgeBaseEnV15,
    BgeLargeEnV15,
    NomicEmbedText,
    NomicEmbedTextV15,
    /// Open variant: caller must supply `custom_dimensions > 0`.
    Custom,
}

/// Static facts about a model: its dimensionality, max input tokens, and provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub dimensions: usize,
    pub max_tokens: usize,
    pub provider: Provider,
}

impl EmbeddingModel {
    /// Look up the static registry entry for this model.
    ///
    /// `custom_dimensions` is only consulted for [`EmbeddingModel::Custom`];
    /// it is a [`ModelError::ConfigurationError`] for `Custom` to be used
    /// without it, and a no-op to pass it for any other model.
    pub fn info(self, custom_dimensions: Option<usize>) -> Result<ModelInfo, ModelError> {
        let info = match self {
            EmbeddingModel::TextEmbedding3Small => ModelInfo {
                name: "text-embedding-3-small",
                dimensions: 1536,
                max_tokens: 8191,
                provider: Provider::OpenAi,
            },
            EmbeddingModel::TextEmbedding3Large => ModelInfo {
                name: "text-embedding-3-large",
                dimensions: 3072,
                max_tokens: 8191,
                provider: Provider::OpenAi,
            },
            EmbeddingModel::TextEmbeddingAda002 => ModelInfo {
                name: "text-embedding-ada-002",
                dimensions: 1536,
                max_tokens: 8191,
                provider: Provider::OpenAi,
            },
            EmbeddingModel::AllMiniLmL6V2 => ModelInfo {
                name: "all-MiniLM-L6-v2",
                dimensions: 384,
                max_tokens: 512,
                provider: Provider::HuggingFace,
            },
            EmbeddingModel::AllMpnetBaseV2 => ModelInfo {
                name: "all-mpnet-base-v2",
                dimensions: 768,
                max_tokens: 512,
                provider: Provider::HuggingFace,
            },
            EmbeddingModel::BgeSmallEnV15 => ModelInfo {
                name: "bge-small-en-v1.5",
                dimensions: 384,
                max_tokens: 512,
                provider: Provider::HuggingFace,
            },
            EmbeddingModel::BgeBaseEnV15 => ModelInfo {
                name: "bge-base-en-v1.5",
                dimensions: 768,
                max_tokens: 512,
                provider: Provider::HuggingFace,
            },
            EmbeddingModel::BgeLargeEnV15 => ModelInfo {
                name: "bge-large-en-v1.5",
                dimensions: 1024,
                max_tokens: 512,
                provider: Provider::HuggingFace,
            },
            EmbeddingModel::NomicEmbedText => ModelInfo {
                name: "nomic-embed-text",
                dimensions: 768,
                max_tokens: 8192,
                provider: Provider::Local,
            },
            EmbeddingModel::NomicEmbedTextV15 => ModelInfo {
                name: "nomic-embed-text-v1.5",
                dimensions: 768,
                max_tokens: 8192,
                provider: Provider::HuggingFace,
            },
            EmbeddingModel::Custom => {
                let dimensions = custom_dimensions.ok_or_else(|| {
                    ModelError::ConfigurationError(
                        "custom model requires custom_dimensions > 0".into(),
                    )
                })?;
                if dimensions == 0 {
                    return Err(ModelError::ConfigurationError(
                        "custom_dimensions must be > 0".into(),
                    ));
                }
                ModelInfo {
                    name: "custom",
                    dimensions,
                    max_tokens: 0,
                    provider: Provider::Custom,
                }
            }
        };
        Ok(info)
    }
}

/// Fail with [`ModelError::ModelMismatch`] unless the two models are equal.
///
/// Used where two explicitly-compared models must agree (e.g. a façade
/// comparing its configured model against a caller-supplied one). The
/// rebuild path in the dimension façade deliberately does *not* use this —
/// it downgrades a mismatch to a logged skip instead of an error.
pub fn validate_model_compatibility(
    a: EmbeddingModel,
    b: EmbeddingModel,
) -> Result<(), ModelError> {
    if a == b {
        Ok(())
    } else {
        Err(ModelError::ModelMismatch { a, b })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_dimensions() {
        assert_eq!(
            EmbeddingModel::AllMiniLmL6V2.info(None).unwrap().dimensions,
            384
        );
        assert_eq!(
            EmbeddingModel::TextEmbedding3Large
                .info(None)
                .unwrap()
                .dimensions,
            3072
        );
    }

    #[test]
    fn custom_without_dimensions_is_configuration_error() {
        assert!(matches!(
            EmbeddingModel::Custom.info(None),
            Err(ModelError::ConfigurationError(_))
        ));
    }

    #[test]
    fn custom_with_zero_dimensions_is_configuration_error() {
        assert!(matches!(
            EmbeddingModel::Custom.info(Some(0)),
            Err(ModelError::ConfigurationError(_))
        ));
    }

    #[test]
    fn custom_with_dimensions_succeeds() {
        let info = EmbeddingModel::Custom.info(Some(2)).unwrap();
        assert_eq!(info.dimensions, 2);
        assert_eq!(info.provider, Provider::Custom);
    }

    #[test]
    fn compatibility_check() {
        assert!(validate_model_compatibility(
            EmbeddingModel::AllMiniLmL6V2,
            EmbeddingModel::AllMiniLmL6V2
        )
        .is_ok());
        assert!(validate_model_compatibility(
            EmbeddingModel::AllMiniLmL6V2,
            EmbeddingModel::BgeBaseEnV15
        )
        .is_err());
    }
}
