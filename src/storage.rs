// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed drawing, entity and embedding store.
//!
//! The store lives in `.cadgrep/drawings.sqlite` by default. Entities and
//! embeddings reference their drawing with `ON DELETE CASCADE`, so replacing a
//! drawing drops everything extracted from it. The corpus-wide vector
//! dimension is recorded in `meta` on first insert and enforced afterwards.

use crate::errors::{DimensionMismatch, StoreNotFoundError};
use crate::model::{DrawingMeta, EmbeddingKind, EmbeddingRecord, EntityRecord};
use crate::similarity::{EntityDetails, VectorStore};
use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Directory holding the store, relative to the indexed root.
pub const STORE_DIR: &str = ".cadgrep";
/// Store file name inside [`STORE_DIR`].
pub const STORE_FILE: &str = "drawings.sqlite";
/// Default number of rows written per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 100;

const SCHEMA_VERSION: &str = "1";
/// SQLite's bound-parameter limit is 999 on old builds.
const MAX_VARS: usize = 900;

fn short_hash(input: &[u8]) -> String {
    blake3::hash(input).to_hex()[..32].to_string()
}

/// Drawing id: hash of the source path.
pub fn drawing_id(path: &str) -> String {
    short_hash(path.as_bytes())
}

/// Entity id: hash of the drawing id and extraction sequence number.
pub fn entity_id(drawing_id: &str, seq: usize) -> String {
    short_hash(format!("{}:{}", drawing_id, seq).as_bytes())
}

/// Embedding id: hash of kind, drawing id and entity id.
pub fn embedding_id(kind: EmbeddingKind, drawing_id: &str, entity_id: Option<&str>) -> String {
    short_hash(format!("{}:{}:{}", kind.as_str(), drawing_id, entity_id.unwrap_or("")).as_bytes())
}

/// A drawing row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDrawing {
    pub id: String,
    pub meta: DrawingMeta,
    pub created_at: i64,
}

/// An entity row with its owning drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub id: String,
    pub drawing_id: String,
    pub seq: usize,
    pub record: EntityRecord,
}

/// Row counts for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreCounts {
    pub drawings: u64,
    pub entities: u64,
    pub drawing_embeddings: u64,
    pub entity_embeddings: u64,
    pub embedding_dim: Option<usize>,
}

/// SQLite store for drawings, entities and embedding records.
pub struct DrawingStore {
    conn: Connection,
    path: PathBuf,
}

impl DrawingStore {
    /// Opens or creates a store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;

        let store = Self { conn, path };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens (creating if needed) the store under `root`.
    pub fn open_default<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open(Self::default_path(root))
    }

    /// Opens the store under `root`, failing if it has not been created.
    pub fn open_existing<P: AsRef<Path>>(root: P) -> Result<Self> {
        let path = Self::default_path(root);
        if !path.exists() {
            return Err(StoreNotFoundError { path }.into());
        }
        Self::open(path)
    }

    pub fn default_path<P: AsRef<Path>>(root: P) -> PathBuf {
        root.as_ref().join(STORE_DIR).join(STORE_FILE)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS drawings (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                version TEXT,
                layers TEXT NOT NULL,
                entity_counts TEXT NOT NULL,
                entity_sampled INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                drawing_id TEXT NOT NULL REFERENCES drawings(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                entity_type TEXT NOT NULL,
                layer TEXT,
                text TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entities_drawing
                ON entities(drawing_id, seq);

            CREATE TABLE IF NOT EXISTS embeddings (
                id TEXT PRIMARY KEY,
                drawing_id TEXT NOT NULL REFERENCES drawings(id) ON DELETE CASCADE,
                entity_id TEXT REFERENCES entities(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                vector BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_embeddings_kind ON embeddings(kind);
            CREATE INDEX IF NOT EXISTS idx_embeddings_entity ON embeddings(entity_id);
            "#,
            )
            .context("Failed to initialize database schema")?;

        if self.get_meta("schema_version")?.is_none() {
            self.set_meta("schema_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the store connection explicitly.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }

    /// Inserts a drawing, replacing any drawing with the same path together
    /// with its entities and embeddings. Returns the drawing id.
    pub fn upsert_drawing(&mut self, meta: &DrawingMeta) -> Result<String> {
        let id = drawing_id(&meta.path);
        let layers = serde_json::to_string(&meta.layers)?;
        let counts = serde_json::to_string(&meta.entity_counts)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM drawings WHERE id = ?1 OR path = ?2",
            params![id, meta.path],
        )?;
        tx.execute(
            r#"
            INSERT INTO drawings (
                id, filename, path, version, layers, entity_counts, entity_sampled, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id,
                meta.filename,
                meta.path,
                meta.version,
                layers,
                counts,
                meta.entity_sampled as i64,
                now_secs()
            ],
        )?;
        tx.commit()
            .with_context(|| format!("Failed to store drawing {}", meta.path))?;
        Ok(id)
    }

    /// Appends entities to a drawing in chunks of `batch_size`, one
    /// transaction per chunk. Sequence numbers continue from `first_seq`.
    pub fn insert_entities(
        &mut self,
        drawing_id: &str,
        first_seq: usize,
        entities: &[EntityRecord],
        batch_size: usize,
    ) -> Result<usize> {
        let batch_size = batch_size.max(1);
        let mut written = 0usize;

        for chunk in entities.chunks(batch_size) {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO entities (id, drawing_id, seq, entity_type, layer, text, data)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(id) DO UPDATE SET
                        entity_type = excluded.entity_type,
                        layer = excluded.layer,
                        text = excluded.text,
                        data = excluded.data
                    "#,
                )?;
                for record in chunk {
                    let seq = first_seq + written;
                    let data = serde_json::to_string(record)?;
                    stmt.execute(params![
                        entity_id(drawing_id, seq),
                        drawing_id,
                        seq as i64,
                        record.kind().as_str(),
                        record.layer,
                        record.text(),
                        data
                    ])?;
                    written += 1;
                }
            }
            tx.commit()
                .with_context(|| format!("Failed to store entities for drawing {}", drawing_id))?;
        }

        Ok(written)
    }

    /// Stores a drawing and all of its entities.
    ///
    /// Entities are committed in chunks of `batch_size`. If any chunk fails
    /// the drawing is removed again, so a drawing is either stored whole or
    /// not at all.
    pub fn import_drawing(
        &mut self,
        meta: &DrawingMeta,
        entities: &[EntityRecord],
        batch_size: usize,
    ) -> Result<String> {
        let id = self.upsert_drawing(meta)?;
        if let Err(err) = self.insert_entities(&id, 0, entities, batch_size) {
            if let Err(cleanup) = self.delete_drawing(&id) {
                tracing::warn!("Failed to remove partial drawing {}: {:#}", meta.path, cleanup);
            }
            return Err(err);
        }
        Ok(id)
    }

    /// Deletes a drawing with its entities and embeddings. Returns whether
    /// it existed.
    pub fn delete_drawing(&mut self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM drawings WHERE id = ?1", params![id])
            .with_context(|| format!("Failed to delete drawing {}", id))?;
        Ok(deleted > 0)
    }

    /// Fetches drawings by id; unknown ids are absent from the map.
    pub fn drawings_by_ids(&self, ids: &[String]) -> Result<HashMap<String, StoredDrawing>> {
        let mut found = HashMap::new();
        for chunk in ids.chunks(MAX_VARS) {
            let query = format!(
                "SELECT {} FROM drawings WHERE id IN ({})",
                DRAWING_COLUMNS,
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&query)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), drawing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Failed to query drawings")?;
            for drawing in rows {
                found.insert(drawing.id.clone(), drawing);
            }
        }
        Ok(found)
    }

    /// Fetches entities by id; unknown ids are absent from the map.
    pub fn entities_by_ids(&self, ids: &[String]) -> Result<HashMap<String, StoredEntity>> {
        let mut found = HashMap::new();
        for chunk in ids.chunks(MAX_VARS) {
            let query = format!(
                "SELECT {} FROM entities WHERE id IN ({})",
                ENTITY_COLUMNS,
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&query)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), entity_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Failed to query entities")?;
            for entity in rows {
                found.insert(entity.id.clone(), entity);
            }
        }
        Ok(found)
    }

    /// Entities of one drawing in extraction order.
    pub fn entities_for_drawing(&self, drawing_id: &str) -> Result<Vec<StoredEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM entities WHERE drawing_id = ?1 ORDER BY seq",
            ENTITY_COLUMNS
        ))?;
        let entities = stmt
            .query_map(params![drawing_id], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query entities")?;
        Ok(entities)
    }

    /// Drawings to embed: those without a drawing-level vector, or all of
    /// them when `force` is set.
    pub fn drawings_to_embed(&self, force: bool, limit: Option<usize>) -> Result<Vec<StoredDrawing>> {
        let filter = if force {
            ""
        } else {
            "WHERE NOT EXISTS (SELECT 1 FROM embeddings e WHERE e.drawing_id = d.id AND e.kind = 'drawing')"
        };
        let query = format!(
            "SELECT {} FROM drawings d {} ORDER BY d.path LIMIT ?1",
            prefixed(DRAWING_COLUMNS, "d"),
            filter
        );
        let mut stmt = self.conn.prepare(&query)?;
        let drawings = stmt
            .query_map(params![sql_limit(limit)], drawing_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query drawings to embed")?;
        Ok(drawings)
    }

    /// Entities to embed with their drawing's file name.
    pub fn entities_to_embed(
        &self,
        force: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(StoredEntity, String)>> {
        let filter = if force {
            ""
        } else {
            "WHERE NOT EXISTS (SELECT 1 FROM embeddings e WHERE e.entity_id = n.id)"
        };
        let query = format!(
            "SELECT {}, d.filename FROM entities n JOIN drawings d ON d.id = n.drawing_id {} \
             ORDER BY d.path, n.seq LIMIT ?1",
            prefixed(ENTITY_COLUMNS, "n"),
            filter
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], |row| {
                let entity = entity_from_row(row)?;
                let filename: String = row.get(5)?;
                Ok((entity, filename))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query entities to embed")?;
        Ok(rows)
    }

    /// Corpus-wide vector dimension, once the first vector is stored.
    pub fn embedding_dim(&self) -> Result<Option<usize>> {
        Ok(self
            .get_meta("embedding_dim")?
            .and_then(|v| v.parse::<usize>().ok()))
    }

    /// Upserts embedding records in one transaction.
    ///
    /// Every vector must match the corpus dimension; the first insert into an
    /// empty store fixes it.
    pub fn insert_embeddings(&mut self, records: &[EmbeddingRecord]) -> Result<usize> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let expected = match self.embedding_dim()? {
            Some(dim) => dim,
            None => first.vector.len(),
        };
        for record in records {
            if record.vector.is_empty() {
                anyhow::bail!("Embedding record {} has an empty vector", record.id);
            }
            if record.vector.len() != expected {
                return Err(DimensionMismatch {
                    expected,
                    actual: record.vector.len(),
                }
                .into());
            }
            if record.payload.is_empty() {
                anyhow::bail!("Embedding record {} has an empty payload", record.id);
            }
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO embeddings (id, drawing_id, entity_id, kind, payload, vector)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    payload = excluded.payload,
                    vector = excluded.vector
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.drawing_id,
                    record.entity_id,
                    record.kind.as_str(),
                    record.payload,
                    vector_to_blob(&record.vector)
                ])?;
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('embedding_dim', ?1)",
            params![expected.to_string()],
        )?;
        tx.commit().context("Failed to store embeddings")?;
        Ok(records.len())
    }

    /// All embedding records of `kind` (or every kind), in storage order.
    pub fn embeddings_by_kind(&self, kind: Option<EmbeddingKind>) -> Result<Vec<EmbeddingRecord>> {
        let (query, kind_param) = match kind {
            Some(kind) => (
                "SELECT id, drawing_id, entity_id, kind, payload, vector FROM embeddings \
                 WHERE kind = ?1 ORDER BY rowid",
                Some(kind.as_str()),
            ),
            None => (
                "SELECT id, drawing_id, entity_id, kind, payload, vector FROM embeddings \
                 ORDER BY rowid",
                None,
            ),
        };
        let mut stmt = self.conn.prepare(query)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<EmbeddingRecord> {
            let kind: String = row.get(3)?;
            let blob: Vec<u8> = row.get(5)?;
            Ok(EmbeddingRecord {
                id: row.get(0)?,
                drawing_id: row.get(1)?,
                entity_id: row.get(2)?,
                kind: kind.parse::<EmbeddingKind>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
                })?,
                payload: row.get(4)?,
                vector: blob_to_vector(&blob),
            })
        };
        let records = match kind_param {
            Some(kind) => stmt.query_map(params![kind], map_row)?.collect::<Vec<_>>(),
            None => stmt.query_map([], map_row)?.collect::<Vec<_>>(),
        };
        let records = records
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to load embeddings")?;
        Ok(records)
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(StoreCounts {
            drawings: count("SELECT COUNT(*) FROM drawings")?,
            entities: count("SELECT COUNT(*) FROM entities")?,
            drawing_embeddings: count("SELECT COUNT(*) FROM embeddings WHERE kind = 'drawing'")?,
            entity_embeddings: count("SELECT COUNT(*) FROM embeddings WHERE kind = 'entity'")?,
            embedding_dim: self.embedding_dim()?,
        })
    }

    /// Gets metadata value by key.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to get meta")?;
        Ok(value)
    }

    /// Sets metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO meta (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }
}

impl VectorStore for DrawingStore {
    fn embeddings(&self, kind: Option<EmbeddingKind>) -> Result<Vec<EmbeddingRecord>> {
        self.embeddings_by_kind(kind)
    }

    fn drawing_filenames(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        Ok(self
            .drawings_by_ids(ids)?
            .into_iter()
            .map(|(id, d)| (id, d.meta.filename))
            .collect())
    }

    fn entity_details(&self, ids: &[String]) -> Result<HashMap<String, EntityDetails>> {
        Ok(self
            .entities_by_ids(ids)?
            .into_iter()
            .map(|(id, e)| {
                let details = EntityDetails {
                    entity_type: e.record.kind().as_str().to_string(),
                    layer: e.record.layer.clone(),
                    text: e.record.text().map(str::to_string),
                };
                (id, details)
            })
            .collect())
    }
}

const DRAWING_COLUMNS: &str =
    "id, filename, path, version, layers, entity_counts, entity_sampled, created_at";
const ENTITY_COLUMNS: &str = "id, drawing_id, seq, data, entity_type";

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn drawing_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredDrawing> {
    let layers: Vec<String> = json_column(row, 4)?;
    let entity_counts: BTreeMap<String, usize> = json_column(row, 5)?;
    let sampled: i64 = row.get(6)?;
    Ok(StoredDrawing {
        id: row.get(0)?,
        meta: DrawingMeta {
            filename: row.get(1)?,
            path: row.get(2)?,
            version: row.get(3)?,
            layer_count: layers.len(),
            layers,
            entity_counts,
            entity_sampled: sampled.max(0) as usize,
        },
        created_at: row.get(7)?,
    })
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEntity> {
    let seq: i64 = row.get(2)?;
    Ok(StoredEntity {
        id: row.get(0)?,
        drawing_id: row.get(1)?,
        seq: seq.max(0) as usize,
        record: json_column(row, 3)?,
    })
}

/// Converts a vector to a compact little-endian blob.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to a vector.
fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
