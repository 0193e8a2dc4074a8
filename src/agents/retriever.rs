//! Hybrid Retriever
//!
//! Runs semantic and keyword search concurrently and fuses the two rankings.
//! Either modality may fail or time out; retrieval only fails when both do.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::agents::fusion::reciprocal_rank_fusion;
use crate::config::RetrievalConfig;
use crate::embeddings::{Embedder, VectorIndex};
use crate::models::{RetrievedChunk, ScoredChunk};
use crate::search::KeywordIndex;
use crate::types::{AppError, AppResult};

pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    keyword_index: Arc<dyn KeywordIndex>,
    config: RetrievalConfig,
    timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        keyword_index: Arc<dyn KeywordIndex>,
        config: RetrievalConfig,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            embedder,
            vector_index,
            keyword_index,
            config,
            timeout,
        }
    }

    /// Per-modality deadline. Defaults to `RetrievalConfig::timeout_secs`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    pub async fn retrieve(&self, question: &str, top_k: usize) -> AppResult<Vec<RetrievedChunk>> {
        let (semantic, keyword) = tokio::join!(
            bounded(self.timeout, "semantic", self.semantic(question)),
            bounded(self.timeout, "keyword", self.keyword(question)),
        );

        let (semantic, keyword) = match (semantic, keyword) {
            (Err(semantic_err), Err(keyword_err)) => {
                return Err(AppError::RetrievalUnavailable(format!(
                    "semantic search: {}; keyword search: {}",
                    semantic_err, keyword_err
                )));
            }
            (Ok(semantic), Err(e)) => {
                warn!(error = %e, "Keyword search failed, using semantic results only");
                (semantic, Vec::new())
            }
            (Err(e), Ok(keyword)) => {
                warn!(error = %e, "Semantic search failed, using keyword results only");
                (Vec::new(), keyword)
            }
            (Ok(semantic), Ok(keyword)) => (semantic, keyword),
        };

        let fused = reciprocal_rank_fusion(&semantic, &keyword, self.config.rrf_k, top_k);

        info!(
            semantic_hits = semantic.len(),
            keyword_hits = keyword.len(),
            fused = fused.len(),
            "Hybrid retrieval complete"
        );

        Ok(fused)
    }

    async fn semantic(&self, question: &str) -> AppResult<Vec<ScoredChunk>> {
        let embedding = self.embedder.embed(question).await?;
        debug!(dimensions = embedding.len(), "Question embedded");
        self.vector_index
            .search(&embedding, self.config.top_k_semantic)
            .await
    }

    async fn keyword(&self, question: &str) -> AppResult<Vec<ScoredChunk>> {
        self.keyword_index
            .search(question, self.config.top_k_keyword)
            .await
    }
}

async fn bounded<F>(deadline: Duration, modality: &'static str, search: F) -> AppResult<Vec<ScoredChunk>>
where
    F: Future<Output = AppResult<Vec<ScoredChunk>>>,
{
    match tokio::time::timeout(deadline, search).await {
        Ok(result) => result,
        Err(_) => Err(AppError::RetrievalUnavailable(format!(
            "{} search timed out after {:?}",
            modality, deadline
        ))),
    }
}
