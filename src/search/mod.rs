//! Keyword search
//!
//! Full-text ranking over the chunks table. Queries go through
//! `websearch_to_tsquery`, so user input with quotes, `or` and `-term` is
//! accepted without escaping, and `ts_rank_cd` scores the matches.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::ChunkRow;
use crate::models::ScoredChunk;
use crate::types::{AppError, AppResult};

/// Lexical lookup by query text. Results are ordered best first.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> AppResult<Vec<ScoredChunk>>;
}

pub struct PgKeywordIndex {
    pool: PgPool,
    text_search_config: String,
}

impl PgKeywordIndex {
    pub fn new(pool: PgPool, text_search_config: impl Into<String>) -> Self {
        Self {
            pool,
            text_search_config: text_search_config.into(),
        }
    }
}

#[async_trait]
impl KeywordIndex for PgKeywordIndex {
    async fn search(&self, query: &str, limit: usize) -> AppResult<Vec<ScoredChunk>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT c.id, c.document_id, c.content, c.source_url,
                   ts_rank_cd(c.content_tsv, q.query)::float8 AS score
            FROM chunks c,
                 websearch_to_tsquery($1::text::regconfig, $2) AS q(query)
            WHERE c.content_tsv @@ q.query
            ORDER BY score DESC, c.id
            LIMIT $3
            "#,
        )
        .bind(&self.text_search_config)
        .bind(query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::RetrievalUnavailable(format!("Keyword search failed: {}", e)))?;

        Ok(rows.into_iter().map(ScoredChunk::from).collect())
    }
}
