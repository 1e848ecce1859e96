// SPDX-License-Identifier: PMPL-1.0-or-later
//! The embedding provider capability.
//!
//! A provider is not a subclass of anything in this crate — it is an
//! optional capability supplied through configuration, a pair of
//! operations plus a readable `model`. Text-path operations on the façade
//! fail closed with `NoEmbeddingProvider` when one isn't configured.

use async_trait::async_trait;
use meaning_model::EmbeddingModel;
use thiserror::Error;

/// Errors a provider implementation may raise while generating embeddings.
#[derive(Error, Debug)]
#[error("embedding provider error: {0}")]
pub struct ProviderError(pub String);

/// Generates embeddings for text on behalf of the façade's text-path
/// operations (`index_text`, `query_by_text`).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The model this provider produces embeddings for.
    fn model(&self) -> EmbeddingModel;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed a batch of texts. The default implementation embeds one at a
    /// time; providers with a native batch API should override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
