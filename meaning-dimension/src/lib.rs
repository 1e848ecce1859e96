// SPDX-License-Identifier: PMPL-1.0-or-later
//! Meaning Dimension Façade
//!
//! Couples the in-memory HNSW index (`meaning-hnsw`) to a persistent,
//! content-addressed object store (`meaning-store`) so the index can be
//! rebuilt from truth on startup and mutated transactionally with storage.
//! This is the "meaning" axis of a larger datacube; the other axes (time,
//! space, identity) and the cube orchestration that composes them are
//! external collaborators this crate knows nothing about.

mod config;
mod error;
mod provider;
pub mod records;

pub use config::{DimensionConfig, HnswConfigOverrides};
pub use error::DimensionError;
pub use meaning_hnsw::{DistanceMetric, IndexSnapshot, SearchHit};
pub use meaning_model::EmbeddingModel;
pub use provider::{EmbeddingProvider, ProviderError};

use std::sync::{Arc, RwLock};

use chrono::Utc;
use meaning_hnsw::HnswIndex;
use meaning_metric::validate_embedding;
use meaning_model::ModelInfo;
use meaning_store::{RecordType, StoreAdapter};
use records::{CubeObjectLink, DimensionRecord, MeaningDimensionValue, MeaningNode};
use tracing::{instrument, warn};

/// Lifecycle state of a [`MeaningDimension`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Unborn,
    Initializing,
    Ready,
}

/// A similarity query: a query vector, how many results to return, and an
/// optional inclusive lower-bound on similarity.
#[derive(Debug, Clone)]
pub struct QueryCriterion {
    pub vector: Vec<f32>,
    pub k: usize,
    pub threshold: Option<f32>,
}

impl QueryCriterion {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            threshold: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// The meaning dimension: lifecycle, persistence, and the query surface
/// collaborators use to index and search embeddings.
pub struct MeaningDimension {
    config: DimensionConfig,
    model_info: ModelInfo,
    state: RwLock<LifecycleState>,
    dimension_id: RwLock<Option<String>>,
    index: RwLock<HnswIndex>,
    store: Arc<dyn StoreAdapter>,
}

impl std::fmt::Debug for MeaningDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeaningDimension").finish_non_exhaustive()
    }
}

impl MeaningDimension {
    /// Construct a façade over `store`. Fails eagerly with
    /// [`DimensionError::ConfigurationError`] if `config.model` is
    /// `EmbeddingModel::Custom` without `custom_dimensions`, matching the
    /// rest of this codebase's preference for rejecting a bad config at
    /// construction rather than at first use.
    pub fn new(config: DimensionConfig, store: Arc<dyn StoreAdapter>) -> Result<Self, DimensionError> {
        let model_info = config.model.info(config.custom_dimensions)?;
        let hnsw_config = config.hnsw_config.resolve();
        let index = HnswIndex::new(model_info.dimensions, config.metric, hnsw_config);

        Ok(Self {
            config,
            model_info,
            state: RwLock::new(LifecycleState::Unborn),
            dimension_id: RwLock::new(None),
            index: RwLock::new(index),
            store,
        })
    }

    fn require_ready(&self) -> Result<(), DimensionError> {
        if *self.state.read().unwrap() == LifecycleState::Ready {
            Ok(())
        } else {
            Err(DimensionError::NotInitialized)
        }
    }

    fn dimension_id(&self) -> Result<String, DimensionError> {
        self.dimension_id
            .read()
            .unwrap()
            .clone()
            .ok_or(DimensionError::NotInitialized)
    }

    /// Idempotent: persists the singleton Dimension record, then rebuilds
    /// the in-memory index from the store. Safe to call more than once —
    /// a second call while already `Ready` is a no-op.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), DimensionError> {
        if *self.state.read().unwrap() == LifecycleState::Ready {
            return Ok(());
        }
        *self.state.write().unwrap() = LifecycleState::Initializing;

        let payload = serde_json::to_value(DimensionRecord::meaning())
            .map_err(|e| DimensionError::ConfigurationError(e.to_string()))?;
        let result = self
            .store
            .put_unversioned(RecordType::Dimension, payload)
            .await?;
        *self.dimension_id.write().unwrap() = Some(result.id);

        self.rebuild_index().await;

        *self.state.write().unwrap() = LifecycleState::Ready;
        Ok(())
    }

    /// Replay every `MeaningDimensionValue` reachable from this dimension
    /// into the in-memory index. Any single broken chain — a value that
    /// fails to parse, a missing node, a dangling link — is logged and
    /// skipped; it never aborts the rebuild.
    #[instrument(skip(self))]
    async fn rebuild_index(&self) {
        let dimension_id = match self.dimension_id.read().unwrap().clone() {
            Some(id) => id,
            None => return,
        };

        let value_ids = match self
            .store
            .reverse_map(&dimension_id, RecordType::MeaningDimensionValue)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "rebuild: failed to enumerate meaning dimension values");
                return;
            }
        };

        for value_id in value_ids {
            let Some(value) = self.load::<MeaningDimensionValue>(&value_id).await else {
                warn!(value_id = %value_id, "rebuild: skipping unreadable MeaningDimensionValue");
                continue;
            };
            let Some(node) = self.load::<MeaningNode>(&value.meaning_node_id).await else {
                warn!(
                    value_id = %value_id,
                    node_id = %value.meaning_node_id,
                    "rebuild: skipping MeaningDimensionValue with unreadable MeaningNode"
                );
                continue;
            };
            if node.model != self.model_info.name {
                warn!(
                    expected_model = self.model_info.name,
                    actual_model = %node.model,
                    "rebuild: skipping MeaningNode with mismatched model"
                );
                continue;
            }

            let link_ids = match self.store.reverse_map(&value_id, RecordType::CubeObject).await {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(value_id = %value_id, error = %err, "rebuild: failed to enumerate referencing objects");
                    continue;
                }
            };

            for link_id in link_ids {
                let Some(link) = self.load::<CubeObjectLink>(&link_id).await else {
                    warn!(link_id = %link_id, "rebuild: skipping unreadable object link");
                    continue;
                };
                let mut index = self.index.write().unwrap();
                if let Err(err) = index.add(
                    link.object_id.clone(),
                    value.meaning_node_id.clone(),
                    node.embedding.clone(),
                ) {
                    warn!(object_id = %link.object_id, error = %err, "rebuild: failed to add node to index");
                }
            }
        }
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, id: &str) -> Option<T> {
        match self.store.get(id).await {
            Ok(Some(record)) => serde_json::from_value(record.payload).ok(),
            Ok(None) => None,
            Err(_) => None,
        }
    }

    /// Index an already-computed embedding for `object_id`. Returns the id
    /// of the persisted `MeaningDimensionValue`.
    ///
    /// Store writes happen before the in-memory index is touched: if a
    /// store write fails, no in-memory change is visible.
    #[instrument(skip(self, vector, source_text), fields(object_id = %object_id))]
    pub async fn index_embedding(
        &self,
        object_id: impl Into<String> + std::fmt::Display,
        vector: Vec<f32>,
        source_text: Option<String>,
    ) -> Result<String, DimensionError> {
        self.require_ready()?;
        validate_embedding(&vector, Some(self.model_info.dimensions))?;
        let object_id = object_id.into();
        let dimension_id = self.dimension_id()?;

        let node = MeaningNode {
            embedding: vector.clone(),
            model: self.model_info.name.to_string(),
            dimensions: vector.len(),
            source_text: source_text.clone(),
            content_type: Some("text".to_string()),
        };
        let node_payload = serde_json::to_value(&node)
            .map_err(|e| DimensionError::ConfigurationError(e.to_string()))?;
        let node_result = self
            .store
            .put_unversioned(RecordType::MeaningNode, node_payload)
            .await?;

        let value = MeaningDimensionValue {
            dimension_id,
            meaning_node_id: node_result.id.clone(),
            created: Utc::now().timestamp_millis(),
        };
        let value_payload = serde_json::to_value(&value)
            .map_err(|e| DimensionError::ConfigurationError(e.to_string()))?;
        let value_result = self
            .store
            .put_unversioned(RecordType::MeaningDimensionValue, value_payload)
            .await?;

        let link = CubeObjectLink {
            object_id: object_id.clone(),
            dimension_value_id: value_result.id.clone(),
        };
        let link_payload = serde_json::to_value(&link)
            .map_err(|e| DimensionError::ConfigurationError(e.to_string()))?;
        self.store
            .put_unversioned(RecordType::CubeObject, link_payload)
            .await?;

        self.index
            .write()
            .unwrap()
            .add(object_id, node_result.id, vector)?;

        Ok(value_result.id)
    }

    /// Embed `text` with the configured provider, then index it.
    pub async fn index_text(
        &self,
        object_id: impl Into<String> + std::fmt::Display,
        text: impl Into<String>,
    ) -> Result<String, DimensionError> {
        self.require_ready()?;
        let provider = self
            .config
            .embedding_provider
            .as_ref()
            .ok_or(DimensionError::NoEmbeddingProvider)?;
        let text = text.into();
        let vector = provider
            .embed(&text)
            .await
            .map_err(|e| DimensionError::Provider(e.0))?;
        self.index_embedding(object_id, vector, Some(text)).await
    }

    /// Search by vector, returning object ids ordered by descending similarity.
    pub async fn query(&self, criterion: QueryCriterion) -> Result<Vec<String>, DimensionError> {
        Ok(self
            .query_with_scores(criterion)
            .await?
            .into_iter()
            .map(|hit| hit.object_id)
            .collect())
    }

    /// Search by vector, returning full hits (object id, node id, similarity).
    pub async fn query_with_scores(
        &self,
        criterion: QueryCriterion,
    ) -> Result<Vec<SearchHit>, DimensionError> {
        self.require_ready()?;
        validate_embedding(&criterion.vector, Some(self.model_info.dimensions))?;
        let hits = self
            .index
            .read()
            .unwrap()
            .search(&criterion.vector, criterion.k, criterion.threshold)?;
        Ok(hits)
    }

    /// Embed `text` with the configured provider, then search.
    pub async fn query_by_text(
        &self,
        text: &str,
        k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>, DimensionError> {
        self.require_ready()?;
        let provider = self
            .config
            .embedding_provider
            .as_ref()
            .ok_or(DimensionError::NoEmbeddingProvider)?;
        let vector = provider
            .embed(text)
            .await
            .map_err(|e| DimensionError::Provider(e.0))?;
        let mut criterion = QueryCriterion::new(vector, k);
        criterion.threshold = threshold;
        self.query_with_scores(criterion).await
    }

    /// Persist a `MeaningNode`/`MeaningDimensionValue` pair for `vector`
    /// without touching the in-memory index, and return the value's id.
    /// Deterministic: calling this twice with the same vector returns the
    /// same id, since both records are content-addressed.
    ///
    /// Whether an orphaned value with no referencing object is ever
    /// garbage-collected is the store's concern, not this crate's: the store
    /// is append-only and content-addressed from here, and compaction of
    /// unreferenced records is entirely up to that implementation.
    pub async fn get_value_hash(&self, vector: Vec<f32>) -> Result<String, DimensionError> {
        self.require_ready()?;
        validate_embedding(&vector, Some(self.model_info.dimensions))?;
        let dimension_id = self.dimension_id()?;

        let node = MeaningNode {
            embedding: vector,
            model: self.model_info.name.to_string(),
            dimensions: self.model_info.dimensions,
            source_text: None,
            content_type: None,
        };
        let node_payload = serde_json::to_value(&node)
            .map_err(|e| DimensionError::ConfigurationError(e.to_string()))?;
        let node_result = self
            .store
            .put_unversioned(RecordType::MeaningNode, node_payload)
            .await?;

        let value = MeaningDimensionValue {
            dimension_id,
            meaning_node_id: node_result.id,
            created: Utc::now().timestamp_millis(),
        };
        let value_payload = serde_json::to_value(&value)
            .map_err(|e| DimensionError::ConfigurationError(e.to_string()))?;
        let value_result = self
            .store
            .put_unversioned(RecordType::MeaningDimensionValue, value_payload)
            .await?;

        Ok(value_result.id)
    }

    pub fn is_indexed(&self, object_id: &str) -> bool {
        self.index.read().unwrap().has(object_id)
    }

    pub fn size(&self) -> usize {
        self.index.read().unwrap().size()
    }

    pub fn model(&self) -> EmbeddingModel {
        self.config.model
    }

    pub fn dimensions(&self) -> usize {
        self.model_info.dimensions
    }

    pub fn serialize(&self) -> IndexSnapshot {
        self.index.read().unwrap().serialize()
    }

    pub fn deserialize(&self, snapshot: IndexSnapshot) -> Result<(), DimensionError> {
        let restored = HnswIndex::deserialize(snapshot)?;
        *self.index.write().unwrap() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meaning_store::memory::InMemoryStore;

    fn store() -> Arc<dyn StoreAdapter> {
        Arc::new(InMemoryStore::new())
    }

    /// A stub provider that embeds text into a fixed-width vector derived
    /// from its byte length, for tests that exercise the text path without
    /// a real embedding backend.
    struct StubProvider {
        model: EmbeddingModel,
        dimensions: usize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for StubProvider {
        fn model(&self) -> EmbeddingModel {
            self.model
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            if text.is_empty() {
                return Err(ProviderError("cannot embed empty text".to_string()));
            }
            let seed = text.len() as f32;
            Ok((0..self.dimensions).map(|i| seed + i as f32).collect())
        }
    }

    #[tokio::test]
    async fn not_initialized_rejects_query() {
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            store(),
        )
        .unwrap();
        let err = dim
            .query(QueryCriterion::new(vec![1.0, 0.0], 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DimensionError::NotInitialized));
    }

    #[tokio::test]
    async fn custom_model_without_dimensions_is_configuration_error() {
        let err = MeaningDimension::new(DimensionConfig::for_model(EmbeddingModel::Custom), store())
            .unwrap_err();
        assert!(matches!(err, DimensionError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_on_index_embedding() {
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(3),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();
        let err = dim
            .index_embedding("obj-1", vec![1.0, 2.0], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DimensionError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn basic_recall_scenario() {
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();

        dim.index_embedding("e", vec![1.0, 0.0], None).await.unwrap();
        dim.index_embedding("n", vec![0.0, 1.0], None).await.unwrap();
        dim.index_embedding("w", vec![-1.0, 0.0], None).await.unwrap();
        dim.index_embedding("s", vec![0.0, -1.0], None).await.unwrap();
        dim.index_embedding("ne", vec![0.9, 0.1], None).await.unwrap();

        let criterion = QueryCriterion::new(vec![1.0, 0.0], 2).with_threshold(0.8);
        let hits = dim.query_with_scores(criterion).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].object_id, "e");
        assert_eq!(hits[1].object_id, "ne");
    }

    #[tokio::test]
    async fn get_value_hash_is_deterministic_and_does_not_touch_index() {
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();

        let a = dim.get_value_hash(vec![1.0, 2.0]).await.unwrap();
        let b = dim.get_value_hash(vec![1.0, 2.0]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(dim.size(), 0);
    }

    #[tokio::test]
    async fn rebuild_across_restart_recovers_index() {
        let backing = store();

        {
            let dim = MeaningDimension::new(
                DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
                backing.clone(),
            )
            .unwrap();
            dim.init().await.unwrap();
            dim.index_embedding("a", vec![1.0, 0.0], None).await.unwrap();
            dim.index_embedding("b", vec![0.0, 1.0], None).await.unwrap();
            dim.index_embedding("c", vec![-1.0, 0.0], None).await.unwrap();
        }

        let restarted = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            backing,
        )
        .unwrap();
        restarted.init().await.unwrap();

        assert_eq!(restarted.size(), 3);
        assert!(restarted.is_indexed("a"));
        assert!(restarted.is_indexed("b"));
        assert!(restarted.is_indexed("c"));

        let hits = restarted
            .query(QueryCriterion::new(vec![1.0, 0.0], 1))
            .await
            .unwrap();
        assert_eq!(hits, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn model_skew_is_skipped_not_errored() {
        let backing = store();

        // Pre-seed the store with a MeaningDimensionValue under a different
        // model than the façade we're about to initialize.
        {
            let dim = MeaningDimension::new(
                DimensionConfig::for_model(EmbeddingModel::BgeBaseEnV15),
                backing.clone(),
            )
            .unwrap();
            dim.init().await.unwrap();
            dim.index_embedding("skewed", vec![0.1; 768], None)
                .await
                .unwrap();
        }

        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::AllMiniLmL6V2),
            backing.clone(),
        )
        .unwrap();
        dim.init().await.unwrap();
        dim.index_embedding("fresh", vec![0.2; 384], None)
            .await
            .unwrap();

        // A second façade over the same store, same model, sees only the
        // compatible vector after rebuild.
        let rebuilt = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::AllMiniLmL6V2),
            backing,
        )
        .unwrap();
        rebuilt.init().await.unwrap();
        assert_eq!(rebuilt.size(), 1);
        assert!(rebuilt.is_indexed("fresh"));
        assert!(!rebuilt.is_indexed("skewed"));
    }

    #[tokio::test]
    async fn serialize_deserialize_round_trip() {
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();
        dim.index_embedding("a", vec![1.0, 0.0], None).await.unwrap();
        dim.index_embedding("b", vec![0.0, 1.0], None).await.unwrap();

        let snapshot = dim.serialize();
        let other = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            store(),
        )
        .unwrap();
        // deserialize is permitted before init().
        other.deserialize(snapshot).unwrap();
        assert_eq!(other.size(), 2);
    }

    #[tokio::test]
    async fn index_text_without_provider_is_no_embedding_provider() {
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();
        let err = dim.index_text("obj-1", "hello").await.unwrap_err();
        assert!(matches!(err, DimensionError::NoEmbeddingProvider));
    }

    #[tokio::test]
    async fn query_by_text_without_provider_is_no_embedding_provider() {
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom).with_custom_dimensions(2),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();
        let err = dim.query_by_text("hello", 1, None).await.unwrap_err();
        assert!(matches!(err, DimensionError::NoEmbeddingProvider));
    }

    #[tokio::test]
    async fn index_text_and_query_by_text_round_trip_with_stub_provider() {
        let provider = Arc::new(StubProvider {
            model: EmbeddingModel::Custom,
            dimensions: 3,
        });
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom)
                .with_custom_dimensions(3)
                .with_provider(provider),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();

        dim.index_text("short", "hi").await.unwrap();
        dim.index_text("long", "a much longer piece of text").await.unwrap();

        let hits = dim.query_by_text("hi", 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object_id, "short");
    }

    #[tokio::test]
    async fn embed_batch_default_impl_embeds_sequentially() {
        let provider = StubProvider {
            model: EmbeddingModel::Custom,
            dimensions: 2,
        };
        let texts = vec!["ab".to_string(), "abc".to_string()];
        let batch = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], vec![2.0, 3.0]);
        assert_eq!(batch[1], vec![3.0, 4.0]);
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_dimension_error_provider() {
        let provider = Arc::new(StubProvider {
            model: EmbeddingModel::Custom,
            dimensions: 2,
        });
        let dim = MeaningDimension::new(
            DimensionConfig::for_model(EmbeddingModel::Custom)
                .with_custom_dimensions(2)
                .with_provider(provider),
            store(),
        )
        .unwrap();
        dim.init().await.unwrap();

        let err = dim.index_text("obj-1", "").await.unwrap_err();
        assert!(matches!(err, DimensionError::Provider(_)));
    }
}
