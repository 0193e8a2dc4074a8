//! Reciprocal Rank Fusion
//!
//! Each list contributes `1 / (k + rank)` for the chunks it contains, with
//! 1-based ranks. Lists a chunk is missing from contribute nothing.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{RetrievedChunk, ScoredChunk};

pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Clone, Copy)]
enum Modality {
    Semantic,
    Keyword,
}

/// Fuse the semantic and keyword rankings into one list of at most `top_k`.
///
/// Output order is total: fused score descending, then the better semantic
/// rank (chunks with no semantic rank last), then chunk id ascending. The same
/// inputs always produce the same output.
pub fn reciprocal_rank_fusion(
    semantic: &[ScoredChunk],
    keyword: &[ScoredChunk],
    k: f64,
    top_k: usize,
) -> Vec<RetrievedChunk> {
    let mut fused: Vec<RetrievedChunk> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    accumulate(&mut fused, &mut index, semantic, Modality::Semantic, k);
    accumulate(&mut fused, &mut index, keyword, Modality::Keyword, k);

    fused.sort_by(compare);
    fused.truncate(top_k);
    fused
}

fn accumulate(
    fused: &mut Vec<RetrievedChunk>,
    index: &mut HashMap<String, usize>,
    hits: &[ScoredChunk],
    modality: Modality,
    k: f64,
) {
    let mut seen: HashSet<&str> = HashSet::with_capacity(hits.len());

    for (position, hit) in hits.iter().enumerate() {
        // First occurrence within a list wins.
        if !seen.insert(hit.chunk_id.as_str()) {
            continue;
        }
        let rank = position + 1;

        let slot = *index.entry(hit.chunk_id.clone()).or_insert_with(|| {
            fused.push(RetrievedChunk {
                chunk_id: hit.chunk_id.clone(),
                source_id: hit.source_id.clone(),
                text: hit.text.clone(),
                url: hit.url.clone(),
                semantic_score: None,
                keyword_score: None,
                semantic_rank: None,
                keyword_rank: None,
                fused_score: 0.0,
            });
            fused.len() - 1
        });

        let chunk = &mut fused[slot];
        match modality {
            Modality::Semantic => {
                chunk.semantic_rank = Some(rank);
                chunk.semantic_score = Some(hit.score);
            }
            Modality::Keyword => {
                chunk.keyword_rank = Some(rank);
                chunk.keyword_score = Some(hit.score);
                if chunk.url.is_none() {
                    chunk.url = hit.url.clone();
                }
            }
        }
        chunk.fused_score += 1.0 / (k + rank as f64);
    }
}

fn compare(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| semantic_key(a).cmp(&semantic_key(b)))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn semantic_key(chunk: &RetrievedChunk) -> (bool, usize) {
    match chunk.semantic_rank {
        Some(rank) => (false, rank),
        None => (true, 0),
    }
}
