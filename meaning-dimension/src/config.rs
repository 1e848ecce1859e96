// SPDX-License-Identifier: PMPL-1.0-or-later

use std::sync::Arc;

use meaning_hnsw::HnswConfig;
use meaning_metric::DistanceMetric;
use meaning_model::EmbeddingModel;

use crate::provider::EmbeddingProvider;

/// Partial override of [`HnswConfig`]; any field left `None` keeps the
/// default (`M: 16, ef_construction: 200, ef_search: 50`).
#[derive(Debug, Clone, Default)]
pub struct HnswConfigOverrides {
    pub m: Option<usize>,
    pub ef_construction: Option<usize>,
    pub ef_search: Option<usize>,
}

impl HnswConfigOverrides {
    pub fn resolve(&self) -> HnswConfig {
        let default = HnswConfig::default();
        HnswConfig {
            m: self.m.unwrap_or(default.m),
            ef_construction: self.ef_construction.unwrap_or(default.ef_construction),
            ef_search: self.ef_search.unwrap_or(default.ef_search),
        }
    }
}

/// Configuration for a [`crate::MeaningDimension`] instance.
#[derive(Clone)]
pub struct DimensionConfig {
    pub model: EmbeddingModel,
    pub custom_dimensions: Option<usize>,
    pub metric: DistanceMetric,
    pub hnsw_config: HnswConfigOverrides,
    pub embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl DimensionConfig {
    /// Build a config for one of the registered models, using defaults for
    /// metric and HNSW parameters.
    pub fn for_model(model: EmbeddingModel) -> Self {
        Self {
            model,
            custom_dimensions: None,
            metric: DistanceMetric::Cosine,
            hnsw_config: HnswConfigOverrides::default(),
            embedding_provider: None,
        }
    }

    pub fn with_custom_dimensions(mut self, dims: usize) -> Self {
        self.custom_dimensions = Some(dims);
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_hnsw_config(mut self, overrides: HnswConfigOverrides) -> Self {
        self.hnsw_config = overrides;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }
}
