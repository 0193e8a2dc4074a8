//! Answer Generator
//!
//! Builds a grounded prompt from the fused chunks, calls the LLM and returns
//! the answer with one citation per passage that made it into the prompt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::LLMConfig;
use crate::llm::LLMAdapter;
use crate::models::{Citation, RetrievedChunk};
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

const GROUNDED_INSTRUCTIONS: &str = "You are a specialized assistant answering technical questions. \
Answer the question based only on the provided context passages and do not use external knowledge. \
If the passages do not contain enough information to answer, say so clearly. \
When you use information from a passage, cite it as [Source: <source_id>, Chunk: <chunk_id>]. \
Be concise and factual.";

const GENERAL_KNOWLEDGE_INSTRUCTIONS: &str = "You are a helpful assistant answering technical questions. \
No reference documents were found for this question, so answer from general knowledge \
and say that no source documents were available.";

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// A prompt plus the chunks whose text it contains, in fused-rank order.
#[derive(Debug)]
pub struct Prompt<'a> {
    pub system: &'static str,
    pub user: String,
    pub included: &'a [RetrievedChunk],
}

pub struct AnswerGenerator {
    llm: Arc<dyn LLMAdapter>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    char_budget: usize,
    timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LLMAdapter>, config: &LLMConfig) -> Self {
        Self {
            llm,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            char_budget: config.context_char_budget,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_char_budget(mut self, char_budget: usize) -> Self {
        self.char_budget = char_budget;
        self
    }

    fn render_passage(chunk: &RetrievedChunk) -> String {
        format!(
            "[Context Passage - Source: {}, Chunk ID: {}]\n{}",
            chunk.source_id, chunk.chunk_id, chunk.text
        )
    }

    /// Passages are taken in order while the rendered context fits the
    /// character budget. The first one that does not fit ends the context.
    pub fn build_prompt<'a>(&self, question: &str, chunks: &'a [RetrievedChunk]) -> Prompt<'a> {
        let mut passages: Vec<String> = Vec::new();
        let mut used = 0usize;

        for chunk in chunks {
            let passage = Self::render_passage(chunk);
            let separator = if passages.is_empty() { 0 } else { 2 };
            let cost = passage.chars().count() + separator;
            if used + cost > self.char_budget {
                break;
            }
            used += cost;
            passages.push(passage);
        }

        let included = &chunks[..passages.len()];

        if included.is_empty() {
            return Prompt {
                system: GENERAL_KNOWLEDGE_INSTRUCTIONS,
                user: format!("QUESTION: {}", question),
                included,
            };
        }

        let user = format!(
            "--- CONTEXT PASSAGES START ---\n{}\n--- CONTEXT PASSAGES END ---\n\nQUESTION: {}",
            passages.join("\n\n"),
            question
        );

        Prompt {
            system: GROUNDED_INSTRUCTIONS,
            user,
            included,
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> AppResult<GeneratedAnswer> {
        let prompt = self.build_prompt(question, chunks);

        if prompt.included.len() < chunks.len() {
            warn!(
                dropped = chunks.len() - prompt.included.len(),
                char_budget = self.char_budget,
                "Context budget reached, dropping lower ranked passages"
            );
        }

        let request = LLMRequest {
            model: self.model.clone(),
            messages: vec![LLMMessage::user(prompt.user)],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            system_instruction: Some(prompt.system.to_string()),
        };

        let response = tokio::time::timeout(self.timeout, self.llm.create_chat_completion(&request))
            .await
            .map_err(|_| AppError::GenerationTimeout(self.timeout))??;

        let answer = response.content.trim();
        if answer.is_empty() {
            return Err(AppError::GenerationUnavailable(
                "LLM returned an empty completion".to_string(),
            ));
        }

        let citations: Vec<Citation> = prompt.included.iter().map(RetrievedChunk::to_citation).collect();

        info!(
            answer_len = answer.len(),
            citations = citations.len(),
            finish_reason = %response.finish_reason,
            "Answer generated"
        );

        Ok(GeneratedAnswer {
            answer: answer.to_string(),
            citations,
        })
    }
}
