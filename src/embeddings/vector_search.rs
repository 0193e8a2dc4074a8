// Vector search over the chunks table with pgvector

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::ChunkRow;
use crate::models::ScoredChunk;
use crate::types::{AppError, AppResult};

/// Nearest-neighbour lookup by embedding. Results are ordered best first.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, embedding: &[f32], limit: usize) -> AppResult<Vec<ScoredChunk>>;
}

pub struct PgVectorIndex {
    pool: PgPool,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// pgvector text literal, e.g. `[0.1,0.2,0.3]`.
pub fn to_vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn search(&self, embedding: &[f32], limit: usize) -> AppResult<Vec<ScoredChunk>> {
        if embedding.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        // Cosine similarity; ties on distance break by id for a stable rank.
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT id, document_id, content, source_url,
                   1 - (embedding <=> $1::text::vector) AS score
            FROM chunks
            WHERE embedding IS NOT NULL
            ORDER BY embedding <=> $1::text::vector, id
            LIMIT $2
            "#,
        )
        .bind(to_vector_literal(embedding))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::RetrievalUnavailable(format!("Vector search failed: {}", e)))?;

        Ok(rows.into_iter().map(ScoredChunk::from).collect())
    }
}
