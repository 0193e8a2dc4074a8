use crate::models::ScoredChunk;

/// Row shape shared by the vector and keyword chunk queries.
#[derive(Debug, sqlx::FromRow)]
pub struct ChunkRow {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub source_url: Option<String>,
    pub score: f64,
}

impl From<ChunkRow> for ScoredChunk {
    fn from(row: ChunkRow) -> Self {
        ScoredChunk {
            chunk_id: row.id,
            source_id: row.document_id,
            text: row.content,
            url: row.source_url,
            score: row.score,
        }
    }
}
