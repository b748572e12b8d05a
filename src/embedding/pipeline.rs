// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding generation for stored drawings and entities.
//!
//! Payloads are built for records that have no vector yet (or all records
//! when forced), sent to the provider in provider-sized batches and written
//! back to the store. A failing batch is logged and counted; the run goes on.

use super::provider::EmbeddingProvider;
use crate::model::{EmbeddingKind, EmbeddingRecord};
use crate::payload::{drawing_payload, entity_payload};
use crate::storage::{embedding_id, DrawingStore};
use anyhow::{bail, Result};
use serde::Serialize;

/// What to embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    pub drawings: bool,
    pub entities: bool,
    /// Re-embed records that already have a vector
    pub force: bool,
    /// Cap on records per kind
    pub limit: Option<usize>,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            drawings: true,
            entities: true,
            force: false,
            limit: None,
        }
    }
}

/// Outcome of one embedding run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
    pub drawings_embedded: usize,
    pub entities_embedded: usize,
    pub failed_batches: usize,
    pub failed_records: usize,
}

impl EmbedReport {
    pub fn embedded(&self) -> usize {
        self.drawings_embedded + self.entities_embedded
    }
}

/// A record waiting for its vector.
struct Pending {
    drawing_id: String,
    entity_id: Option<String>,
    payload: String,
}

/// Drives a provider over the store.
pub struct EmbeddingPipeline<'a> {
    provider: &'a mut dyn EmbeddingProvider,
    options: EmbedOptions,
}

impl<'a> EmbeddingPipeline<'a> {
    pub fn new(provider: &'a mut dyn EmbeddingProvider, options: EmbedOptions) -> Self {
        Self { provider, options }
    }

    /// Number of records the run would embed.
    pub fn pending_count(&self, store: &DrawingStore) -> Result<usize> {
        Ok(self.collect_drawings(store)?.len() + self.collect_entities(store)?.len())
    }

    /// Embeds everything pending. `on_batch` receives the size of each
    /// finished batch, successful or not.
    pub fn run<F>(&mut self, store: &mut DrawingStore, mut on_batch: F) -> Result<EmbedReport>
    where
        F: FnMut(usize),
    {
        let mut report = EmbedReport::default();

        let drawings = self.collect_drawings(store)?;
        let embedded = self.embed_batches(
            store,
            EmbeddingKind::Drawing,
            &drawings,
            &mut report,
            &mut on_batch,
        );
        report.drawings_embedded = embedded;

        let entities = self.collect_entities(store)?;
        let embedded = self.embed_batches(
            store,
            EmbeddingKind::Entity,
            &entities,
            &mut report,
            &mut on_batch,
        );
        report.entities_embedded = embedded;

        tracing::info!(
            "Embedded {} drawings and {} entities ({} failed batches)",
            report.drawings_embedded,
            report.entities_embedded,
            report.failed_batches
        );
        Ok(report)
    }

    fn collect_drawings(&self, store: &DrawingStore) -> Result<Vec<Pending>> {
        if !self.options.drawings {
            return Ok(Vec::new());
        }
        Ok(store
            .drawings_to_embed(self.options.force, self.options.limit)?
            .into_iter()
            .map(|drawing| Pending {
                payload: drawing_payload(&drawing.meta),
                drawing_id: drawing.id,
                entity_id: None,
            })
            .collect())
    }

    fn collect_entities(&self, store: &DrawingStore) -> Result<Vec<Pending>> {
        if !self.options.entities {
            return Ok(Vec::new());
        }
        Ok(store
            .entities_to_embed(self.options.force, self.options.limit)?
            .into_iter()
            .map(|(entity, filename)| Pending {
                payload: entity_payload(&entity.record, &filename),
                drawing_id: entity.drawing_id,
                entity_id: Some(entity.id),
            })
            .collect())
    }

    fn embed_batches<F>(
        &mut self,
        store: &mut DrawingStore,
        kind: EmbeddingKind,
        pending: &[Pending],
        report: &mut EmbedReport,
        on_batch: &mut F,
    ) -> usize
    where
        F: FnMut(usize),
    {
        let batch_size = self.provider.batch_size().max(1);
        let mut embedded = 0usize;

        for batch in pending.chunks(batch_size) {
            match self.embed_batch(store, kind, batch) {
                Ok(written) => embedded += written,
                Err(err) => {
                    report.failed_batches += 1;
                    report.failed_records += batch.len();
                    tracing::warn!(
                        "Failed to embed a batch of {} {} records: {:#}",
                        batch.len(),
                        kind,
                        err
                    );
                }
            }
            on_batch(batch.len());
        }
        embedded
    }

    fn embed_batch(
        &mut self,
        store: &mut DrawingStore,
        kind: EmbeddingKind,
        batch: &[Pending],
    ) -> Result<usize> {
        let texts: Vec<String> = batch.iter().map(|p| p.payload.clone()).collect();
        let vectors = self.provider.embed_texts(&texts)?;
        if vectors.len() != batch.len() {
            bail!(
                "Provider returned {} vectors for {} payloads",
                vectors.len(),
                batch.len()
            );
        }

        let records: Vec<EmbeddingRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(pending, vector)| EmbeddingRecord {
                id: embedding_id(kind, &pending.drawing_id, pending.entity_id.as_deref()),
                drawing_id: pending.drawing_id.clone(),
                entity_id: pending.entity_id.clone(),
                kind,
                payload: pending.payload.clone(),
                vector,
            })
            .collect();
        store.insert_embeddings(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::model::{
        CircleData, DrawingMeta, EntityGeometry, EntityRecord, Point2, TextData,
    };
    use std::collections::BTreeMap;

    fn seed(store: &mut DrawingStore, path: &str) -> String {
        let mut counts = BTreeMap::new();
        counts.insert("CIRCLE".to_string(), 1);
        counts.insert("TEXT".to_string(), 1);
        let meta = DrawingMeta {
            filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            version: Some("R2018".to_string()),
            layer_count: 1,
            layers: vec!["0".to_string()],
            entity_counts: counts,
            entity_sampled: 2,
        };
        let entities = vec![
            EntityRecord {
                geometry: EntityGeometry::Circle(CircleData {
                    center: Point2(0.0, 0.0),
                    radius: 5.0,
                }),
                layer: Some("HOLES".to_string()),
                color: None,
                linetype: None,
                lineweight: None,
                bbox: None,
            },
            EntityRecord {
                geometry: EntityGeometry::Text(TextData {
                    text: "SUS304".to_string(),
                    position: None,
                    height: None,
                }),
                layer: Some("NOTES".to_string()),
                color: None,
                linetype: None,
                lineweight: None,
                bbox: None,
            },
        ];
        store.import_drawing(&meta, &entities, 100).unwrap()
    }

    struct FailingProvider;

    impl EmbeddingProvider for FailingProvider {
        fn model_id(&self) -> &str {
            "failing"
        }

        fn batch_size(&self) -> usize {
            1
        }

        fn embed_texts(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("service unavailable")
        }
    }

    #[test]
    fn embeds_pending_then_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DrawingStore::open(dir.path().join("db.sqlite")).unwrap();
        seed(&mut store, "/d/a.dxf");
        seed(&mut store, "/d/b.dxf");

        let mut provider = HashEmbedder::new(32).with_batch_size(3);
        let mut batches = Vec::new();
        let report = EmbeddingPipeline::new(&mut provider, EmbedOptions::default())
            .run(&mut store, |n| batches.push(n))
            .unwrap();
        assert_eq!(report.drawings_embedded, 2);
        assert_eq!(report.entities_embedded, 4);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(batches, vec![2, 3, 1]);

        let counts = store.counts().unwrap();
        assert_eq!(counts.drawing_embeddings, 2);
        assert_eq!(counts.entity_embeddings, 4);
        assert_eq!(counts.embedding_dim, Some(32));

        let again = EmbeddingPipeline::new(&mut provider, EmbedOptions::default())
            .run(&mut store, |_| {})
            .unwrap();
        assert_eq!(again.embedded(), 0);

        let forced = EmbeddingPipeline::new(
            &mut provider,
            EmbedOptions {
                force: true,
                ..Default::default()
            },
        )
        .run(&mut store, |_| {})
        .unwrap();
        assert_eq!(forced.embedded(), 6);
        assert_eq!(store.counts().unwrap().entity_embeddings, 4);
    }

    #[test]
    fn kind_selection_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DrawingStore::open(dir.path().join("db.sqlite")).unwrap();
        seed(&mut store, "/d/a.dxf");
        seed(&mut store, "/d/b.dxf");

        let mut provider = HashEmbedder::new(16);
        let options = EmbedOptions {
            drawings: false,
            entities: true,
            force: false,
            limit: Some(3),
        };
        let pipeline = EmbeddingPipeline::new(&mut provider, options);
        assert_eq!(pipeline.pending_count(&store).unwrap(), 3);

        let report = EmbeddingPipeline::new(&mut provider, options)
            .run(&mut store, |_| {})
            .unwrap();
        assert_eq!(report.drawings_embedded, 0);
        assert_eq!(report.entities_embedded, 3);
    }

    #[test]
    fn failing_batches_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DrawingStore::open(dir.path().join("db.sqlite")).unwrap();
        seed(&mut store, "/d/a.dxf");

        let mut provider = FailingProvider;
        let report = EmbeddingPipeline::new(&mut provider, EmbedOptions::default())
            .run(&mut store, |_| {})
            .unwrap();
        assert_eq!(report.embedded(), 0);
        assert_eq!(report.failed_batches, 3);
        assert_eq!(report.failed_records, 3);
        assert_eq!(store.counts().unwrap().entity_embeddings, 0);
    }
}
