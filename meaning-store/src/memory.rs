// SPDX-License-Identifier: PMPL-1.0-or-later
//! In-memory reference implementation of [`StoreAdapter`].
//!
//! Suitable for tests and the end-to-end scenarios in the dimension façade's
//! test suite. All data is lost on drop; nothing here is meant to be a real
//! deployment target.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{content_hash, PutResult, RecordType, StoreAdapter, StoreError, StoredRecord};

/// An in-memory, content-addressed object store.
#[derive(Clone)]
pub struct InMemoryStore {
    records: Arc<RwLock<BTreeMap<String, StoredRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of records currently stored, across all types.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStore {
    async fn put_unversioned(
        &self,
        record_type: RecordType,
        payload: serde_json::Value,
    ) -> Result<PutResult, StoreError> {
        let id = content_hash(record_type, &payload);
        let mut records = self.records.write().await;
        let created = !records.contains_key(&id);
        if created {
            records.insert(id.clone(), StoredRecord { record_type, payload });
            debug!(id = %id, record_type = ?record_type, "stored new record");
        }
        Ok(PutResult { id, created })
    }

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn reverse_map(
        &self,
        source_id: &str,
        target_type: RecordType,
    ) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().await;
        let mut matches: Vec<String> = records
            .iter()
            .filter(|(_, record)| record.record_type == target_type)
            .filter(|(_, record)| references(&record.payload, source_id))
            .map(|(id, _)| id.clone())
            .collect();
        matches.sort();
        Ok(matches)
    }
}

/// Whether any top-level field of `payload` is the string `source_id`.
fn references(payload: &serde_json::Value, source_id: &str) -> bool {
    match payload.as_object() {
        Some(fields) => fields
            .values()
            .any(|v| v.as_str() == Some(source_id)),
        None => false,
    }
}
