// SPDX-License-Identifier: MIT OR Apache-2.0

//! Brute-force cosine similarity search over stored embedding records.
//!
//! Every search embeds the query once, scores it against every stored vector
//! of the requested kind, ranks by descending score (ties keep storage order)
//! and enriches the hits with drawing and entity details by id.

use crate::embedding::EmbeddingProvider;
use crate::errors::{DimensionMismatch, SearchError};
use crate::model::{EmbeddingKind, EmbeddingRecord};
use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 100;

/// Read access to the stored corpus.
pub trait VectorStore {
    /// All records of `kind` (every kind for `None`) in storage order.
    fn embeddings(&self, kind: Option<EmbeddingKind>) -> Result<Vec<EmbeddingRecord>>;

    /// File names of the given drawings. Unknown ids are left out.
    fn drawing_filenames(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    /// Type, layer and text of the given entities. Unknown ids are left out.
    fn entity_details(&self, ids: &[String]) -> Result<HashMap<String, EntityDetails>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDetails {
    pub entity_type: String,
    pub layer: Option<String>,
    pub text: Option<String>,
}

/// How hits are selected after ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMode {
    /// Plain top-K
    #[default]
    TopK,
    /// Best record per drawing, top-K drawings
    PerDrawing,
}

impl std::fmt::Display for RankMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankMode::TopK => write!(f, "top_k"),
            RankMode::PerDrawing => write!(f, "per_drawing"),
        }
    }
}

/// Cosine similarity computed in f64. A zero-norm side scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> std::result::Result<f32, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if score.is_finite() {
        Ok(score as f32)
    } else {
        Ok(0.0)
    }
}

/// A stored record with its score.
#[derive(Debug, Clone, Copy)]
pub struct ScoredRecord<'a> {
    pub record: &'a EmbeddingRecord,
    pub score: f32,
}

/// Ranked hits plus the number of records skipped for a dimension mismatch.
#[derive(Debug, Clone)]
pub struct Ranking<'a> {
    pub hits: Vec<ScoredRecord<'a>>,
    pub mismatched: usize,
}

/// Scores `records` against `query` and keeps the best `limit`.
///
/// Scoring is data-parallel; the result does not depend on it.
pub fn rank<'a>(
    query: &[f32],
    records: &'a [EmbeddingRecord],
    limit: usize,
    mode: RankMode,
) -> Ranking<'a> {
    let scored: Vec<std::result::Result<ScoredRecord<'a>, DimensionMismatch>> = records
        .par_iter()
        .map(|record| {
            cosine_similarity(query, &record.vector).map(|score| ScoredRecord { record, score })
        })
        .collect();

    let mut mismatched = 0usize;
    let mut hits = Vec::with_capacity(scored.len());
    for item in scored {
        match item {
            Ok(hit) => hits.push(hit),
            Err(err) => {
                mismatched += 1;
                tracing::debug!("Skipping stored vector: {}", err);
            }
        }
    }

    // Stable: equal scores keep storage order.
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));

    let hits = match mode {
        RankMode::TopK => {
            hits.truncate(limit);
            hits
        }
        RankMode::PerDrawing => {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut unique = Vec::with_capacity(limit.min(hits.len()));
            for hit in hits {
                if unique.len() >= limit {
                    break;
                }
                if seen.insert(hit.record.drawing_id.as_str()) {
                    unique.push(hit);
                }
            }
            unique
        }
    };

    Ranking { hits, mismatched }
}

/// One search hit in response form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub drawing_id: String,
    pub entity_id: Option<String>,
    pub kind: EmbeddingKind,
    pub payload: String,
    pub score: f32,
    pub filename: Option<String>,
    pub entity_type: Option<String>,
    pub layer: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub count: usize,
}

/// A validated search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub mode: RankMode,
    /// Restrict the scan to one record kind
    pub kind: Option<EmbeddingKind>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> std::result::Result<Self, SearchError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(SearchError::InvalidLimit {
                got: limit,
                min: MIN_LIMIT,
                max: MAX_LIMIT,
            });
        }
        Ok(Self {
            query,
            limit,
            mode: RankMode::TopK,
            kind: None,
        })
    }

    pub fn with_mode(mut self, mode: RankMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_kind(mut self, kind: Option<EmbeddingKind>) -> Self {
        self.kind = kind;
        self
    }
}

/// Runs a search. Holds no state between calls.
pub fn search(
    request: &SearchRequest,
    provider: &mut dyn EmbeddingProvider,
    store: &dyn VectorStore,
) -> std::result::Result<SearchResponse, SearchError> {
    let query_vector = provider
        .embed_one(&request.query)
        .map_err(SearchError::EmbeddingService)?;

    let records = store
        .embeddings(request.kind)
        .map_err(SearchError::Persistence)?;

    let ranking = rank(&query_vector, &records, request.limit, request.mode);
    if ranking.mismatched > 0 {
        tracing::warn!(
            "Skipped {} stored vectors with a dimension other than {}",
            ranking.mismatched,
            query_vector.len()
        );
    }

    let drawing_ids: Vec<String> = ranking
        .hits
        .iter()
        .map(|h| h.record.drawing_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let entity_ids: Vec<String> = ranking
        .hits
        .iter()
        .filter_map(|h| h.record.entity_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let filenames = store
        .drawing_filenames(&drawing_ids)
        .map_err(SearchError::Persistence)?;
    let details = if entity_ids.is_empty() {
        HashMap::new()
    } else {
        store
            .entity_details(&entity_ids)
            .map_err(SearchError::Persistence)?
    };

    let results: Vec<SearchResult> = ranking
        .hits
        .iter()
        .map(|hit| {
            let record = hit.record;
            let entity = record.entity_id.as_ref().and_then(|id| details.get(id));
            SearchResult {
                drawing_id: record.drawing_id.clone(),
                entity_id: record.entity_id.clone(),
                kind: record.kind,
                payload: record.payload.clone(),
                score: hit.score,
                filename: filenames.get(&record.drawing_id).cloned(),
                entity_type: entity.map(|e| e.entity_type.clone()),
                layer: entity.and_then(|e| e.layer.clone()),
                text: entity.and_then(|e| e.text.clone()),
            }
        })
        .collect();

    Ok(SearchResponse {
        query: request.query.clone(),
        count: results.len(),
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn record(id: &str, drawing: &str, entity: Option<&str>, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: id.to_string(),
            drawing_id: drawing.to_string(),
            entity_id: entity.map(str::to_string),
            kind: if entity.is_some() {
                EmbeddingKind::Entity
            } else {
                EmbeddingKind::Drawing
            },
            payload: format!("payload-{}", id),
            vector,
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Vec<EmbeddingRecord>,
        filenames: HashMap<String, String>,
        entities: HashMap<String, EntityDetails>,
    }

    impl VectorStore for MemoryStore {
        fn embeddings(&self, kind: Option<EmbeddingKind>) -> Result<Vec<EmbeddingRecord>> {
            Ok(self
                .records
                .iter()
                .filter(|r| kind.map_or(true, |k| r.kind == k))
                .cloned()
                .collect())
        }

        fn drawing_filenames(&self, ids: &[String]) -> Result<HashMap<String, String>> {
            Ok(ids
                .iter()
                .filter_map(|id| self.filenames.get(id).map(|f| (id.clone(), f.clone())))
                .collect())
        }

        fn entity_details(&self, ids: &[String]) -> Result<HashMap<String, EntityDetails>> {
            Ok(ids
                .iter()
                .filter_map(|id| self.entities.get(id).map(|e| (id.clone(), e.clone())))
                .collect())
        }
    }

    struct FailingStore;

    impl VectorStore for FailingStore {
        fn embeddings(&self, _: Option<EmbeddingKind>) -> Result<Vec<EmbeddingRecord>> {
            anyhow::bail!("disk on fire")
        }

        fn drawing_filenames(&self, _: &[String]) -> Result<HashMap<String, String>> {
            Ok(HashMap::new())
        }

        fn entity_details(&self, _: &[String]) -> Result<HashMap<String, EntityDetails>> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn cosine_properties() {
        let v = [0.3f32, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
        assert_eq!(
            cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]),
            Err(DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn rank_orders_by_score_and_truncates() {
        let records = vec![
            record("a", "d1", None, vec![0.0, 1.0]),
            record("b", "d2", None, vec![1.0, 0.0]),
            record("c", "d3", None, vec![1.0, 1.0]),
        ];
        let ranking = rank(&[1.0, 0.0], &records, 2, RankMode::TopK);
        let ids: Vec<_> = ranking.hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(ranking.hits[0].score >= ranking.hits[1].score);
        assert!((ranking.hits[0].score - 1.0).abs() < 1e-6);

        let all = rank(&[1.0, 0.0], &records, 10, RankMode::TopK);
        assert_eq!(all.hits.len(), 3);
    }

    #[test]
    fn rank_ties_keep_storage_order() {
        let records: Vec<_> = (0..50)
            .map(|i| record(&format!("r{}", i), "d", None, vec![1.0, 1.0]))
            .collect();
        let ranking = rank(&[2.0, 2.0], &records, 50, RankMode::TopK);
        let ids: Vec<_> = ranking.hits.iter().map(|h| h.record.id.clone()).collect();
        let expected: Vec<_> = (0..50).map(|i| format!("r{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn rank_skips_mismatched_dimensions() {
        let records = vec![
            record("a", "d1", None, vec![1.0, 0.0, 0.0]),
            record("b", "d2", None, vec![1.0, 0.0]),
        ];
        let ranking = rank(&[1.0, 0.0], &records, 5, RankMode::TopK);
        assert_eq!(ranking.mismatched, 1);
        assert_eq!(ranking.hits.len(), 1);
        assert_eq!(ranking.hits[0].record.id, "b");
    }

    #[test]
    fn per_drawing_keeps_best_record_of_each() {
        let records = vec![
            record("a1", "A", Some("e1"), vec![1.0, 0.0]),
            record("a2", "A", Some("e2"), vec![0.9, 0.1]),
            record("b1", "B", Some("e3"), vec![0.8, 0.2]),
            record("c1", "C", Some("e4"), vec![0.0, 1.0]),
        ];
        let ranking = rank(&[1.0, 0.0], &records, 2, RankMode::PerDrawing);
        let ids: Vec<_> = ranking.hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1"]);

        let ranking = rank(&[1.0, 0.0], &records, 10, RankMode::PerDrawing);
        let drawings: HashSet<_> = ranking.hits.iter().map(|h| &h.record.drawing_id).collect();
        assert_eq!(drawings.len(), ranking.hits.len());
        assert_eq!(ranking.hits.len(), 3);
    }

    #[test]
    fn request_validation() {
        assert!(matches!(
            SearchRequest::new("bolt", 0),
            Err(SearchError::InvalidLimit { got: 0, .. })
        ));
        assert!(matches!(
            SearchRequest::new("bolt", 101),
            Err(SearchError::InvalidLimit { got: 101, .. })
        ));
        assert!(matches!(
            SearchRequest::new("   ", 10),
            Err(SearchError::EmptyQuery)
        ));
        assert!(SearchRequest::new("bolt", 100).is_ok());
    }

    #[test]
    fn search_enriches_hits() {
        let mut provider = HashEmbedder::new(64);
        let query = "type:CIRCLE layer:HOLES";
        let query_vector = provider.embed_one(query).unwrap();
        let other = provider.embed_one("type:TEXT text:TITLE").unwrap();

        let mut store = MemoryStore::default();
        store.records = vec![
            record("r1", "d1", Some("e1"), other.clone()),
            record("r2", "d2", Some("e2"), query_vector),
            record("r3", "missing", None, other),
        ];
        store.filenames.insert("d1".to_string(), "one.dxf".to_string());
        store.filenames.insert("d2".to_string(), "two.dxf".to_string());
        store.entities.insert(
            "e2".to_string(),
            EntityDetails {
                entity_type: "CIRCLE".to_string(),
                layer: Some("HOLES".to_string()),
                text: None,
            },
        );

        let request = SearchRequest::new(query, 3).unwrap();
        let response = search(&request, &mut provider, &store).unwrap();
        assert_eq!(response.query, query);
        assert_eq!(response.count, 3);

        let top = &response.results[0];
        assert_eq!(top.entity_id.as_deref(), Some("e2"));
        assert!((top.score - 1.0).abs() < 1e-5);
        assert_eq!(top.filename.as_deref(), Some("two.dxf"));
        assert_eq!(top.entity_type.as_deref(), Some("CIRCLE"));
        assert_eq!(top.layer.as_deref(), Some("HOLES"));

        let orphan = response
            .results
            .iter()
            .find(|r| r.drawing_id == "missing")
            .unwrap();
        assert_eq!(orphan.filename, None);
        assert_eq!(orphan.entity_type, None);

        let entity_hit = response.results.iter().find(|r| r.drawing_id == "d1").unwrap();
        assert_eq!(entity_hit.filename.as_deref(), Some("one.dxf"));
        assert_eq!(entity_hit.entity_type, None);
    }

    #[test]
    fn search_kind_filter() {
        let mut provider = HashEmbedder::new(16);
        let v = provider.embed_one("x").unwrap();
        let store = MemoryStore {
            records: vec![
                record("r1", "d1", Some("e1"), v.clone()),
                record("r2", "d1", None, v),
            ],
            ..Default::default()
        };
        let request = SearchRequest::new("x", 10)
            .unwrap()
            .with_kind(Some(EmbeddingKind::Drawing));
        let response = search(&request, &mut provider, &store).unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(response.results[0].kind, EmbeddingKind::Drawing);
    }

    #[test]
    fn store_failure_is_persistence_error() {
        let mut provider = HashEmbedder::new(8);
        let request = SearchRequest::new("x", 5).unwrap();
        let err = search(&request, &mut provider, &FailingStore).unwrap_err();
        assert!(matches!(err, SearchError::Persistence(_)));
    }
}
