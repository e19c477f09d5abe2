//! Vector index adapter over pgvector.
//!
//! Each [`Collection`] maps to one embeddings table. Queries use the cosine
//! distance operator (`<=>`) and report similarity as `1 - distance`, so a
//! perfect match scores 1.0.

use ndarray::Array2;
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

/// The two vector collections the service maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Conversation,
    Message,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Conversation => "conversation_embeddings",
            Collection::Message => "message_embeddings",
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Dimension mismatch: index holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A document to upsert into the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// A stored document read back from the index.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: Uuid,
    pub content: String,
    pub metadata: serde_json::Value,
    pub vector: Vec<f32>,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub id: Uuid,
    pub content: String,
    pub metadata: serde_json::Value,
    pub similarity: f32,
}

/// Handle to one embeddings table.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pool: PgPool,
    collection: Collection,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(pool: PgPool, collection: Collection, dimensions: usize) -> Self {
        Self {
            pool,
            collection,
            dimensions,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Upsert entries. An existing id has its vector, content and metadata
    /// replaced.
    pub async fn add(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        let sql = format!(
            "INSERT INTO {} (id, embedding, content, metadata)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET embedding = EXCLUDED.embedding,
                 content = EXCLUDED.content,
                 metadata = EXCLUDED.metadata",
            self.collection.table()
        );

        for entry in entries {
            self.check_dimensions(&entry.vector)?;
            sqlx::query(&sql)
                .bind(entry.id)
                .bind(Vector::from(entry.vector.clone()))
                .bind(&entry.content)
                .bind(&entry.metadata)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Nearest-neighbour query by cosine distance. `filter`, when present, is
    /// matched against metadata via JSONB containment.
    pub async fn query(
        &self,
        vector: &[f32],
        limit: i64,
        filter: Option<serde_json::Value>,
    ) -> Result<Vec<SimilarityResult>, IndexError> {
        self.check_dimensions(vector)?;

        let sql = format!(
            "SELECT id, content, metadata, 1 - (embedding <=> $1) AS similarity
             FROM {}
             WHERE ($2::jsonb IS NULL OR metadata @> $2)
             ORDER BY embedding <=> $1
             LIMIT $3",
            self.collection.table()
        );

        let rows = sqlx::query(&sql)
            .bind(Vector::from(vector.to_vec()))
            .bind(filter)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(SimilarityResult {
                id: row.try_get("id")?,
                content: row.try_get("content")?,
                metadata: row.try_get("metadata")?,
                similarity: row.try_get::<f64, _>("similarity")? as f32,
            });
        }
        Ok(results)
    }

    /// Fetch one stored entry. Returns `None` for an unknown id.
    pub async fn get(&self, id: Uuid) -> Result<Option<StoredEntry>, IndexError> {
        let sql = format!(
            "SELECT id, embedding, content, metadata FROM {} WHERE id = $1",
            self.collection.table()
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let embedding: Vector = row.try_get("embedding")?;
                Ok(Some(StoredEntry {
                    id: row.try_get("id")?,
                    content: row.try_get("content")?,
                    metadata: row.try_get("metadata")?,
                    vector: embedding.to_vec(),
                }))
            }
            None => Ok(None),
        }
    }

    /// Fetch just the vector for one id. Returns `None` for an unknown id.
    pub async fn get_vector(&self, id: Uuid) -> Result<Option<Vec<f32>>, IndexError> {
        let sql = format!(
            "SELECT embedding FROM {} WHERE id = $1",
            self.collection.table()
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|r| r.try_get::<Vector, _>("embedding"))
            .transpose()?
            .map(|v| v.to_vec()))
    }

    /// Delete entries by id. Unknown ids are ignored; returns the number of
    /// rows actually removed.
    pub async fn delete(&self, ids: &[Uuid]) -> Result<u64, IndexError> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ANY($1)",
            self.collection.table()
        );

        let result = sqlx::query(&sql)
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Build a pairwise cosine similarity matrix for the given ids.
    ///
    /// Ids with no stored vector are dropped; the returned id list names the
    /// rows (and columns) of the matrix in order.
    pub async fn similarity_matrix(
        &self,
        ids: &[Uuid],
    ) -> Result<(Vec<Uuid>, Array2<f32>), IndexError> {
        let sql = format!(
            "SELECT id, embedding FROM {} WHERE id = ANY($1)",
            self.collection.table()
        );

        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        let mut by_id = std::collections::HashMap::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let embedding: Vector = row.try_get("embedding")?;
            by_id.insert(id, embedding.to_vec());
        }

        // Preserve the caller's ordering for ids that are present.
        let mut present = Vec::with_capacity(by_id.len());
        let mut vectors = Vec::with_capacity(by_id.len());
        for id in ids {
            if let Some(v) = by_id.remove(id) {
                present.push(*id);
                vectors.push(v);
            }
        }

        Ok((present, cosine_matrix(&vectors)))
    }
}

/// Pairwise cosine similarities, clamped to `[0, 1]`.
pub fn cosine_matrix(vectors: &[Vec<f32>]) -> Array2<f32> {
    let n = vectors.len();
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);

    let mut normalized = Array2::<f32>::zeros((n, dims));
    for (i, v) in vectors.iter().enumerate() {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (j, x) in v.iter().enumerate() {
                normalized[(i, j)] = x / norm;
            }
        }
    }

    let mut sims = normalized.dot(&normalized.t());
    sims.mapv_inplace(|s| s.clamp(0.0, 1.0));
    sims
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_table_names() {
        assert_eq!(Collection::Conversation.table(), "conversation_embeddings");
        assert_eq!(Collection::Message.table(), "message_embeddings");
    }

    #[test]
    fn test_cosine_matrix_identical_vectors() {
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0]];
        let sims = cosine_matrix(&vectors);

        // Parallel vectors are fully similar regardless of magnitude.
        assert!((sims[(0, 1)] - 1.0).abs() < 1e-6);
        assert!((sims[(0, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matrix_orthogonal_vectors() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let sims = cosine_matrix(&vectors);

        assert!(sims[(0, 1)].abs() < 1e-6);
        assert!(sims[(1, 0)].abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matrix_clamps_opposed_vectors() {
        let vectors = vec![vec![1.0, 0.0], vec![-1.0, 0.0]];
        let sims = cosine_matrix(&vectors);

        // Raw cosine is -1; clamped to the [0, 1] similarity range.
        assert_eq!(sims[(0, 1)], 0.0);
    }

    #[test]
    fn test_cosine_matrix_zero_vector_is_dissimilar() {
        let vectors = vec![vec![0.0, 0.0], vec![1.0, 0.0]];
        let sims = cosine_matrix(&vectors);

        assert_eq!(sims[(0, 1)], 0.0);
        assert_eq!(sims[(0, 0)], 0.0);
    }

    #[test]
    fn test_cosine_matrix_empty() {
        let sims = cosine_matrix(&[]);
        assert_eq!(sims.shape(), &[0, 0]);
    }
}
