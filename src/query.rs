//! Cosine-similarity search over embedded lore, subject to category and
//! confidence filters, registering survivors with the Session Tracker.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::{Category, Lore};
use crate::session::SessionTracker;
use crate::store::{LoreFilter, Store};

pub const DEFAULT_K: usize = 5;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub query_text: String,
    pub query_embedding: Option<Vec<f32>>,
    pub k: Option<usize>,
    /// `None` disables the confidence floor entirely; `Some(0.0)` is an
    /// explicit floor of zero. These are not the same thing (§4.3).
    pub min_confidence: Option<f64>,
    pub categories: Option<Vec<Category>>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub lore: Vec<Lore>,
    pub session_refs: HashMap<String, String>,
}

pub struct QueryEngine<'a> {
    store: &'a Store,
    session: &'a SessionTracker,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a Store, session: &'a SessionTracker) -> Self {
        QueryEngine { store, session }
    }

    pub fn query(&self, params: &QueryParams) -> Result<QueryResult> {
        let Some(query_embedding) = params.query_embedding.as_ref() else {
            return Ok(QueryResult {
                lore: Vec::new(),
                session_refs: HashMap::new(),
            });
        };

        let k = params.k.unwrap_or(DEFAULT_K);
        let min_confidence = params.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);

        let filter = LoreFilter {
            categories: params.categories.clone(),
            min_confidence: Some(min_confidence),
            max_results: None,
            require_embedding: true,
        };
        let candidates = self.store.query(&filter)?;

        let mut scored: Vec<(f64, Lore)> = candidates
            .into_iter()
            .filter_map(|lore| {
                let embedding = lore.embedding.as_ref()?;
                let vec = unpack_f32(embedding);
                let sim = cosine_similarity(query_embedding, &vec)?;
                Some((sim, lore))
            })
            .collect();

        scored.sort_by(|(sim_a, lore_a), (sim_b, lore_b)| {
            sim_b
                .partial_cmp(sim_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| lore_b.updated_at.cmp(&lore_a.updated_at))
                .then_with(|| lore_a.id.cmp(&lore_b.id))
        });
        scored.truncate(k);

        let mut session_refs = HashMap::new();
        let lore: Vec<Lore> = scored
            .into_iter()
            .map(|(_, lore)| {
                let alias = self.session.track(&lore.id);
                session_refs.insert(alias, lore.id.clone());
                lore
            })
            .collect();

        Ok(QueryResult { lore, session_refs })
    }
}

fn unpack_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn pack_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Cosine similarity between two vectors. `None` when dimensions mismatch
/// or either vector is all-zero: a dimensionality mismatch can only arise
/// from an embedding-model change, so the candidate is treated as a
/// non-match rather than an error.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_orders_by_closeness() {
        let query = vec![1.0, 0.0, 0.0];
        let high = cosine_similarity(&query, &[0.9, 0.1, 0.0]).unwrap();
        let mid = cosine_similarity(&query, &[0.5, 0.5, 0.0]).unwrap();
        let low = cosine_similarity(&query, &[0.0, 1.0, 0.0]).unwrap();
        assert!(high > mid);
        assert!(mid > low);
    }

    #[test]
    fn mismatched_dimensions_excluded_not_errored() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), None);
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let values = vec![0.25f32, -1.5, 3.0];
        let packed = pack_f32(&values);
        let unpacked = unpack_f32(&packed);
        assert_eq!(values, unpacked);
    }
}
