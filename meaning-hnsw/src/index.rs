// SPDX-License-Identifier: PMPL-1.0-or-later
//! Graph storage and the insert/search/delete algorithms.
//!
//! Nodes live in an arena (`HashMap<usize, Node>`) keyed by a monotonically
//! assigned internal id; neighbor sets hold arena ids, not pointers, since
//! the connection graph is inherently cyclic. The external `object_id`
//! (a content hash, owned by the caller) is resolved to an arena id through
//! `object_to_arena` and is the only identity the snapshot format exposes.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use tracing::instrument;

use crate::{HnswConfig, HnswError, IndexSnapshot, SearchHit, SerializedNode, MAX_LEVEL};
use meaning_metric::{distance, distance_to_similarity, validate_embedding, DistanceMetric};

#[derive(Debug, Clone)]
struct Node {
    object_id: String,
    meaning_node_id: String,
    embedding: Vec<f32>,
    level: usize,
    /// `connections[layer]` for `layer in 0..=level`.
    connections: Vec<HashSet<usize>>,
}

/// Ascending-distance candidate, used as a min-heap via reversed `Ord`.
#[derive(Debug, Clone, PartialEq)]
struct Nearest {
    arena_id: usize,
    dist: f32,
}
impl Eq for Nearest {}
impl PartialOrd for Nearest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Nearest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
    }
}

/// Descending-distance candidate, used as a max-heap to track the current
/// furthest member of the bounded result set.
#[derive(Debug, Clone, PartialEq)]
struct Furthest {
    arena_id: usize,
    dist: f32,
}
impl Eq for Furthest {}
impl PartialOrd for Furthest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Furthest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(Ordering::Equal)
    }
}

/// In-memory HNSW approximate nearest-neighbor index.
///
/// `add`/`remove` require `&mut self`; `search` only needs `&self`. Callers
/// that want concurrent readers during writes should guard this type with a
/// reader-writer lock, as described in the dimension façade.
pub struct HnswIndex {
    dimensions: usize,
    metric: DistanceMetric,
    config: HnswConfig,
    nodes: HashMap<usize, Node>,
    object_to_arena: HashMap<String, usize>,
    next_arena_id: usize,
    entry_point: Option<usize>,
    max_level: usize,
}

impl HnswIndex {
    /// Create a new, empty index over `dimensions`-wide vectors.
    pub fn new(dimensions: usize, metric: DistanceMetric, config: HnswConfig) -> Self {
        Self {
            dimensions,
            metric,
            config,
            nodes: HashMap::new(),
            object_to_arena: HashMap::new(),
            next_arena_id: 0,
            entry_point: None,
            max_level: 0,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn has(&self, object_id: &str) -> bool {
        self.object_to_arena.contains_key(object_id)
    }

    pub fn all_object_ids(&self) -> Vec<String> {
        self.nodes.values().map(|n| n.object_id.clone()).collect()
    }

    fn dist(&self, a: &[f32], b: &[f32]) -> f32 {
        // Widths are validated at every public boundary before this is
        // called, so a mismatch here would be an internal bug.
        distance(self.metric, a, b).expect("internal vectors must share the index width")
    }

    fn draw_level(&self) -> usize {
        let m_l = 1.0 / (self.config.m.max(2) as f64).ln();
        let mut rng = rand::thread_rng();
        let mut level = 0usize;
        while rng.gen::<f64>() < (-(level as f64) / m_l).exp() && level < MAX_LEVEL {
            level += 1;
        }
        level
    }

    /// Insert `object_id` with the given persistent node id and embedding.
    /// A second insert of an already-present `object_id` is a no-op.
    #[instrument(skip(self, embedding), fields(object_id = %object_id))]
    pub fn add(
        &mut self,
        object_id: impl Into<String> + std::fmt::Display,
        meaning_node_id: impl Into<String> + std::fmt::Debug,
        embedding: Vec<f32>,
    ) -> Result<(), HnswError> {
        validate_embedding(&embedding, Some(self.dimensions))?;
        let object_id = object_id.into();
        if self.object_to_arena.contains_key(&object_id) {
            return Ok(());
        }

        let level = self.draw_level();
        let arena_id = self.next_arena_id;
        self.next_arena_id += 1;

        let node = Node {
            object_id: object_id.clone(),
            meaning_node_id: meaning_node_id.into(),
            embedding: embedding.clone(),
            level,
            connections: vec![HashSet::new(); level + 1],
        };
        self.nodes.insert(arena_id, node);
        self.object_to_arena.insert(object_id, arena_id);

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(arena_id);
            self.max_level = level;
            return Ok(());
        };

        // Zoom in: greedy descent from the top layer down to `level + 1`,
        // no edges added on the way.
        let mut current = entry_point;
        for layer in ((level + 1)..=self.max_level).rev() {
            let found = self.search_layer(&embedding, current, 1, layer);
            if let Some(best) = found.first() {
                current = best.arena_id;
            }
        }

        // From min(level, max_level) down to 0: search, connect both ways.
        let top = level.min(self.max_level);
        for layer in (0..=top).rev() {
            let candidates = self.search_layer(&embedding, current, self.config.ef_construction, layer);
            let neighbors = select_neighbors(&candidates, self.config.m);

            for neighbor_id in &neighbors {
                self.nodes
                    .get_mut(&arena_id)
                    .expect("node just inserted")
                    .connections[layer]
                    .insert(*neighbor_id);
                if let Some(n) = self.nodes.get_mut(neighbor_id) {
                    if layer < n.connections.len() {
                        n.connections[layer].insert(arena_id);
                    }
                }
            }

            if let Some(best) = candidates.first() {
                current = best.arena_id;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(arena_id);
        }

        Ok(())
    }

    /// Bidirectional best-first search of a single layer, returning up to
    /// `ef` results sorted by ascending distance.
    fn search_layer(&self, query: &[f32], entry: usize, ef: usize, layer: usize) -> Vec<Nearest> {
        let entry_dist = self.dist(query, &self.nodes[&entry].embedding);

        let mut visited: HashSet<usize> = HashSet::new();
        visited.insert(entry);

        let mut candidates: BinaryHeap<Nearest> = BinaryHeap::new();
        candidates.push(Nearest {
            arena_id: entry,
            dist: entry_dist,
        });

        let mut results: BinaryHeap<Furthest> = BinaryHeap::new();
        results.push(Furthest {
            arena_id: entry,
            dist: entry_dist,
        });

        while let Some(closest) = candidates.pop() {
            let furthest_dist = results.peek().map(|r| r.dist).unwrap_or(f32::MAX);
            if closest.dist > furthest_dist {
                break;
            }

            let neighbor_ids: Vec<usize> = self
                .nodes
                .get(&closest.arena_id)
                .filter(|n| layer < n.connections.len())
                .map(|n| n.connections[layer].iter().copied().collect())
                .unwrap_or_default();

            for neighbor_id in neighbor_ids {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let Some(neighbor) = self.nodes.get(&neighbor_id) else {
                    continue;
                };
                let d = self.dist(query, &neighbor.embedding);
                let furthest_dist = results.peek().map(|r| r.dist).unwrap_or(f32::MAX);
                if results.len() < ef || d < furthest_dist {
                    candidates.push(Nearest {
                        arena_id: neighbor_id,
                        dist: d,
                    });
                    results.push(Furthest {
                        arena_id: neighbor_id,
                        dist: d,
                    });
                    while results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Nearest> = results
            .into_iter()
            .map(|f| Nearest {
                arena_id: f.arena_id,
                dist: f.dist,
            })
            .collect();
        out.sort_by(|a, b| a.dist.partial_cmp(&b.dist).unwrap_or(Ordering::Equal));
        out
    }

    /// Search for the `k` nearest objects to `query`, optionally filtered by
    /// an inclusive similarity `threshold`. Results are ordered by
    /// descending similarity.
    #[instrument(skip(self, query))]
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>, HnswError> {
        validate_embedding(query, Some(self.dimensions))?;

        let Some(entry_point) = self.entry_point else {
            return Ok(Vec::new());
        };

        let mut current = entry_point;
        for layer in (1..=self.max_level).rev() {
            let found = self.search_layer(query, current, 1, layer);
            if let Some(best) = found.first() {
                current = best.arena_id;
            }
        }

        let ef = self.config.ef_search.max(k);
        let candidates = self.search_layer(query, current, ef, 0);

        let hits = candidates
            .into_iter()
            .take(k)
            .filter_map(|c| self.nodes.get(&c.arena_id).map(|n| (n, c.dist)))
            .map(|(n, d)| SearchHit {
                object_id: n.object_id.clone(),
                meaning_node_id: n.meaning_node_id.clone(),
                similarity: distance_to_similarity(self.metric, d),
            })
            .filter(|hit| threshold.map_or(true, |t| hit.similarity >= t))
            .collect();

        Ok(hits)
    }

    /// Remove `object_id` from the graph. Returns `true` iff it was present.
    /// No graph repair is performed afterward; recall degrades gracefully.
    #[instrument(skip(self))]
    pub fn remove(&mut self, object_id: &str) -> bool {
        let Some(arena_id) = self.object_to_arena.remove(object_id) else {
            return false;
        };
        let Some(node) = self.nodes.remove(&arena_id) else {
            return false;
        };

        for layer in 0..=node.level {
            for &neighbor_id in &node.connections[layer] {
                if let Some(neighbor) = self.nodes.get_mut(&neighbor_id) {
                    if layer < neighbor.connections.len() {
                        neighbor.connections[layer].remove(&arena_id);
                    }
                }
            }
        }

        if self.entry_point == Some(arena_id) {
            if self.nodes.is_empty() {
                self.entry_point = None;
                self.max_level = 0;
            } else {
                let (new_entry, new_level) = self
                    .nodes
                    .iter()
                    .map(|(&id, n)| (id, n.level))
                    .max_by_key(|&(_, level)| level)
                    .expect("nodes non-empty");
                self.entry_point = Some(new_entry);
                self.max_level = new_level;
            }
        }

        true
    }

    /// Produce a self-describing snapshot of the current graph state.
    pub fn serialize(&self) -> IndexSnapshot {
        let nodes = self
            .nodes
            .values()
            .map(|n| SerializedNode {
                object_id: n.object_id.clone(),
                meaning_node_id: n.meaning_node_id.clone(),
                embedding: n.embedding.clone(),
                level: n.level,
                connections: n
                    .connections
                    .iter()
                    .map(|layer| {
                        layer
                            .iter()
                            .filter_map(|arena_id| self.nodes.get(arena_id))
                            .map(|neighbor| neighbor.object_id.clone())
                            .collect()
                    })
                    .collect(),
            })
            .collect();

        IndexSnapshot {
            dimensions: self.dimensions,
            metric: self.metric,
            config: self.config.clone(),
            entry_point: self.entry_point.and_then(|id| self.nodes.get(&id)).map(|n| n.object_id.clone()),
            max_level: self.max_level,
            nodes,
        }
    }

    /// Reconstruct an index from a snapshot, validating every invariant in
    /// the data model. Any violation is a [`HnswError::CorruptSerializedState`].
    pub fn deserialize(snapshot: IndexSnapshot) -> Result<Self, HnswError> {
        let mut object_to_arena = HashMap::new();
        let mut arena_of = HashMap::new();
        for (arena_id, serialized) in snapshot.nodes.iter().enumerate() {
            if object_to_arena.contains_key(&serialized.object_id) {
                return Err(HnswError::CorruptSerializedState(format!(
                    "duplicate object_id {}",
                    serialized.object_id
                )));
            }
            object_to_arena.insert(serialized.object_id.clone(), arena_id);
            arena_of.insert(serialized.object_id.clone(), arena_id);
        }

        let mut nodes = HashMap::new();
        for (arena_id, serialized) in snapshot.nodes.into_iter().enumerate() {
            if serialized.embedding.len() != snapshot.dimensions {
                return Err(HnswError::CorruptSerializedState(format!(
                    "node {} has width {}, expected {}",
                    serialized.object_id,
                    serialized.embedding.len(),
                    snapshot.dimensions
                )));
            }
            if serialized.connections.len() != serialized.level + 1 {
                return Err(HnswError::CorruptSerializedState(format!(
                    "node {} connections cover {} layers, expected {}",
                    serialized.object_id,
                    serialized.connections.len(),
                    serialized.level + 1
                )));
            }

            let mut connections = Vec::with_capacity(serialized.connections.len());
            for layer_neighbors in &serialized.connections {
                let mut set = HashSet::new();
                for neighbor_object_id in layer_neighbors {
                    let neighbor_arena = arena_of.get(neighbor_object_id).ok_or_else(|| {
                        HnswError::CorruptSerializedState(format!(
                            "unknown neighbor {neighbor_object_id}"
                        ))
                    })?;
                    set.insert(*neighbor_arena);
                }
                connections.push(set);
            }

            nodes.insert(
                arena_id,
                Node {
                    object_id: serialized.object_id,
                    meaning_node_id: serialized.meaning_node_id,
                    embedding: serialized.embedding,
                    level: serialized.level,
                    connections,
                },
            );
        }

        // Connection symmetry: j in N_i.connections[L] <=> i in N_j.connections[L].
        for (&i, node) in &nodes {
            for (layer, neighbors) in node.connections.iter().enumerate() {
                for &j in neighbors {
                    let Some(other) = nodes.get(&j) else {
                        return Err(HnswError::CorruptSerializedState(format!(
                            "dangling neighbor reference from node {i}"
                        )));
                    };
                    if layer >= other.connections.len() || !other.connections[layer].contains(&i) {
                        return Err(HnswError::CorruptSerializedState(format!(
                            "asymmetric connection between arena nodes {i} and {j} at layer {layer}"
                        )));
                    }
                }
            }
        }

        let entry_point = match snapshot.entry_point {
            Some(object_id) => {
                let arena_id = *object_to_arena.get(&object_id).ok_or_else(|| {
                    HnswError::CorruptSerializedState(format!(
                        "entry_point {object_id} not present in node list"
                    ))
                })?;
                if nodes[&arena_id].level != snapshot.max_level {
                    return Err(HnswError::CorruptSerializedState(
                        "entry_point level does not match max_level".into(),
                    ));
                }
                Some(arena_id)
            }
            None => {
                if !nodes.is_empty() {
                    return Err(HnswError::CorruptSerializedState(
                        "entry_point is absent but nodes is non-empty".into(),
                    ));
                }
                None
            }
        };

        if let Some(max_observed) = nodes.values().map(|n| n.level).max() {
            if max_observed > snapshot.max_level {
                return Err(HnswError::CorruptSerializedState(
                    "a node's level exceeds max_level".into(),
                ));
            }
        }

        let next_arena_id = nodes.len();
        Ok(Self {
            dimensions: snapshot.dimensions,
            metric: snapshot.metric,
            config: snapshot.config,
            nodes,
            object_to_arena,
            next_arena_id,
            entry_point,
            max_level: snapshot.max_level,
        })
    }
}

/// First-M-by-ascending-distance neighbor selection heuristic.
///
/// Per the reference, this does not shrink neighbors' connection sets on
/// the other side, so a node's in-degree at a layer may exceed `m` over
/// time. Tests must not assume exact equality with an implementation that
/// chooses to add bounded shrinking instead.
fn select_neighbors(candidates: &[Nearest], m: usize) -> Vec<usize> {
    candidates.iter().take(m).map(|c| c.arena_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(dimensions: usize, metric: DistanceMetric) -> HnswIndex {
        HnswIndex::new(dimensions, metric, HnswConfig::default())
    }

    #[test]
    fn insert_idempotent_on_object_id() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("a", "node-a", vec![1.0, 0.0]).unwrap();
        assert_eq!(index.size(), 1);
        index.add("a", "node-a-again", vec![0.0, 1.0]).unwrap();
        assert_eq!(index.size(), 1);
        assert!(index.has("a"));
    }

    #[test]
    fn rejects_wrong_width() {
        let mut index = idx(3, DistanceMetric::Cosine);
        let err = index.add("a", "n", vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, HnswError::DimensionMismatch { .. }));
    }

    #[test]
    fn empty_index_search_is_empty() {
        let index = idx(2, DistanceMetric::Cosine);
        assert!(index.search(&[1.0, 0.0], 5, None).unwrap().is_empty());
        assert_eq!(index.size(), 0);
        assert!(!index.has("anything"));
    }

    #[test]
    fn basic_recall_scenario() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("e", "ne", vec![1.0, 0.0]).unwrap();
        index.add("n", "nn", vec![0.0, 1.0]).unwrap();
        index.add("w", "nw", vec![-1.0, 0.0]).unwrap();
        index.add("s", "ns", vec![0.0, -1.0]).unwrap();
        index.add("ne", "nne", vec![0.9, 0.1]).unwrap();

        let results = index.search(&[1.0, 0.0], 2, Some(0.8)).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].object_id, "e");
        assert!((results[0].similarity - 1.0).abs() < 1e-4);
        assert_eq!(results[1].object_id, "ne");
        assert!((results[1].similarity - 0.9939).abs() < 1e-3);
    }

    #[test]
    fn threshold_excludes_far_results() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("e", "ne", vec![1.0, 0.0]).unwrap();
        index.add("w", "nw", vec![-1.0, 0.0]).unwrap();
        let results = index.search(&[1.0, 0.0], 2, Some(0.5)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].object_id, "e");
    }

    #[test]
    fn k_exceeding_size_returns_all() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("a", "na", vec![1.0, 0.0]).unwrap();
        index.add("b", "nb", vec![0.0, 1.0]).unwrap();
        let results = index.search(&[1.0, 0.0], 50, None).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn single_element_remove_resets_entry_point() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("a", "na", vec![1.0, 0.0]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 1, None).unwrap().len(), 1);
        assert!(index.remove("a"));
        assert_eq!(index.size(), 0);
        assert!(index.search(&[1.0, 0.0], 1, None).unwrap().is_empty());
        assert!(!index.remove("a"));
    }

    #[test]
    fn insert_remove_insert_cycle_is_findable() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("a", "na", vec![1.0, 0.0]).unwrap();
        index.add("b", "nb", vec![0.0, 1.0]).unwrap();
        assert!(index.remove("a"));
        index.add("a", "na2", vec![1.0, 0.0]).unwrap();
        assert!(index.has("a"));
        let results = index.search(&[1.0, 0.0], 1, None).unwrap();
        assert_eq!(results[0].object_id, "a");
    }

    #[test]
    fn zero_magnitude_vector_is_indexable_under_cosine() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("zero", "nz", vec![0.0, 0.0]).unwrap();
        index.add("a", "na", vec![1.0, 0.0]).unwrap();
        let results = index.search(&[0.0, 0.0], 2, None).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn connection_symmetry_holds_after_inserts() {
        let mut index = idx(4, DistanceMetric::Euclidean);
        for i in 0..40 {
            let mut v = vec![0.0f32; 4];
            v[i % 4] = (i as f32) * 0.1 + 1.0;
            index.add(format!("o{i}"), format!("n{i}"), v).unwrap();
        }
        for node in index.nodes.values() {
            for (layer, neighbors) in node.connections.iter().enumerate() {
                for &neighbor_id in neighbors {
                    let neighbor = &index.nodes[&neighbor_id];
                    assert!(
                        layer < neighbor.connections.len()
                            && neighbor.connections[layer]
                                .contains(&index.object_to_arena[&node.object_id]),
                        "asymmetric connection at layer {layer}"
                    );
                }
            }
        }
    }

    #[test]
    fn serialize_deserialize_round_trips_search_results() {
        let mut index = idx(3, DistanceMetric::Cosine);
        for i in 0..30 {
            let mut v = vec![0.1f32; 3];
            v[i % 3] += i as f32;
            index.add(format!("o{i}"), format!("n{i}"), v).unwrap();
        }
        let query = vec![5.0, 0.1, 0.1];
        let before = index.search(&query, 5, None).unwrap();

        let snapshot = index.serialize();
        let restored = HnswIndex::deserialize(snapshot).unwrap();
        let after = restored.search(&query, 5, None).unwrap();

        assert_eq!(before, after);
        assert_eq!(index.size(), restored.size());
    }

    #[test]
    fn deserialize_rejects_asymmetric_connections() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("a", "na", vec![1.0, 0.0]).unwrap();
        index.add("b", "nb", vec![0.0, 1.0]).unwrap();
        let mut snapshot = index.serialize();
        for node in &mut snapshot.nodes {
            if node.object_id == "a" {
                node.connections[0].clear();
            }
        }
        assert!(matches!(
            HnswIndex::deserialize(snapshot),
            Err(HnswError::CorruptSerializedState(_))
        ));
    }

    #[test]
    fn deserialize_rejects_width_mismatch() {
        let mut index = idx(2, DistanceMetric::Cosine);
        index.add("a", "na", vec![1.0, 0.0]).unwrap();
        let mut snapshot = index.serialize();
        snapshot.nodes[0].embedding.push(9.0);
        assert!(matches!(
            HnswIndex::deserialize(snapshot),
            Err(HnswError::CorruptSerializedState(_))
        ));
    }
}
