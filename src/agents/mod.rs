//! Answering pipeline
//!
//! The stages a worker runs for one question:
//!
//! - **Hybrid Retriever**: semantic and keyword search, fused with RRF
//! - **Answer Generator**: grounded prompt, LLM call, citations
//!
//! ## Pipeline Overview
//!
//! ```text
//!   Question
//!      │
//!      ├──────────────┬──────────────┐
//!      ▼              ▼              │
//! ┌──────────┐  ┌──────────┐         │  (concurrent,
//! │ Semantic │  │ Keyword  │         │   each bounded
//! │  search  │  │  search  │         │   by a timeout)
//! └──────────┘  └──────────┘         │
//!      │              │              │
//!      └──────┬───────┘              │
//!             ▼                      │
//!      ┌─────────────┐               │
//!      │  RRF fusion │  → top_k chunks
//!      └─────────────┘
//!             │
//!             ▼
//!      ┌─────────────┐
//!      │  Generator  │  → answer + citations
//!      └─────────────┘
//! ```

pub mod fusion;
pub mod generator;
pub mod retriever;

pub use fusion::{reciprocal_rank_fusion, DEFAULT_RRF_K};
pub use generator::{AnswerGenerator, GeneratedAnswer};
pub use retriever::HybridRetriever;
