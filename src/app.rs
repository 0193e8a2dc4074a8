//! Service wiring
//!
//! Builds the concrete collaborators from configuration once at startup and
//! hands them out as trait objects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::agents::{AnswerGenerator, HybridRetriever};
use crate::config::Config;
use crate::db::{InMemoryJobStore, JobStore, PgJobStore};
use crate::embeddings::{OpenAIEmbedder, PgVectorIndex};
use crate::llm::LLM;
use crate::models::AppState;
use crate::queue::{InMemoryDispatcher, JobOrchestrator, RedisDispatcher, TaskDispatcher};
use crate::search::PgKeywordIndex;

/// Job store and dispatcher a process runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
}

impl Backends {
    /// Postgres job table and Redis queue.
    pub async fn durable(config: &Config, pool: PgPool) -> Result<Self> {
        let dispatcher = RedisDispatcher::connect(
            &config.redis.url,
            &config.redis.queue_name,
            config.queue.retry_policy().visibility_timeout,
        )
        .await
        .context("failed to connect to Redis")?
        .with_poll_interval(Duration::from_millis(config.queue.poll_interval_ms));

        info!(queue = %config.redis.queue_name, "Redis dispatcher ready");

        Ok(Self {
            store: Arc::new(PgJobStore::new(pool)),
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Process-local job store and queue. Jobs do not survive a restart.
    pub fn in_memory(config: &Config) -> Self {
        info!("Using in-memory job store and dispatcher");
        Self {
            store: Arc::new(InMemoryJobStore::new()),
            dispatcher: Arc::new(InMemoryDispatcher::new(
                config.queue.retry_policy().visibility_timeout,
            )),
        }
    }

    pub fn app_state(&self, config: &Config) -> AppState {
        AppState {
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            config: config.clone(),
        }
    }
}

/// Retrieval over the Postgres chunk table plus the configured LLM.
pub fn build_orchestrator(
    config: &Config,
    pool: PgPool,
    store: Arc<dyn JobStore>,
) -> Result<Arc<JobOrchestrator>> {
    let embedder = OpenAIEmbedder::new(&config.embedding).context("failed to build embedder")?;
    let retriever = HybridRetriever::new(
        Arc::new(embedder),
        Arc::new(PgVectorIndex::new(pool.clone())),
        Arc::new(PgKeywordIndex::new(pool, config.retrieval.text_search_config.clone())),
        config.retrieval.clone(),
    );

    let llm = LLM::from_config(&config.llm).context("failed to configure LLM provider")?;
    let generator = AnswerGenerator::new(Arc::new(llm), &config.llm);

    info!(
        model = %config.llm.model,
        embedding_model = %config.embedding.model,
        top_k = config.retrieval.top_k,
        "Answering pipeline ready"
    );

    Ok(Arc::new(JobOrchestrator::new(
        store,
        Arc::new(retriever),
        Arc::new(generator),
        config.queue.retry_policy(),
    )))
}
