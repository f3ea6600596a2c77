use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use anyhow::Context;
use async_trait::async_trait;
use ordered_float::OrderedFloat;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Embedder, Retriever};
use crate::operation::OperationDescriptor;
use crate::registry::OperationRegistry;

/// Text embedded for an operation: `"<name, '_' as ' '> - <description>"`,
/// lower-cased.
pub fn embedding_text(descriptor: &OperationDescriptor) -> String {
    format!(
        "{} - {}",
        descriptor.name().replace('_', " "),
        descriptor.description()
    )
    .to_lowercase()
}

struct IndexedOperation {
    name: String,
    vector: Vec<f32>,
}

/// In-memory vector index over operation descriptions.
pub struct EmbeddingRetriever<E> {
    embedder: E,
    entries: RwLock<Vec<IndexedOperation>>,
}

impl<E: Embedder> EmbeddingRetriever<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Number of indexed operations
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<E: Embedder> Retriever for EmbeddingRetriever<E> {
    #[tracing::instrument(skip(self, registry), fields(operations = registry.len()))]
    async fn index(&self, registry: &OperationRegistry) -> anyhow::Result<()> {
        let names: Vec<String> = registry.names().map(str::to_string).collect();
        let texts: Vec<String> = registry.descriptors().map(embedding_text).collect();

        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed operation descriptions")?;
        if vectors.len() != names.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} operations",
                vectors.len(),
                names.len()
            );
        }

        let entries: Vec<IndexedOperation> = names
            .into_iter()
            .zip(vectors)
            .map(|(name, vector)| IndexedOperation { name, vector })
            .collect();

        // Swap in a complete index so concurrent searches never see a partial one
        *self.entries.write().await = entries;
        info!(operations = registry.len(), "indexed operations");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(candidates))]
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<String>> {
        if k == 0 || self.entries.read().await.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(&query.to_lowercase())
            .await
            .context("Failed to embed query")?;

        let entries = self.entries.read().await;
        let k = k.min(entries.len());
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for entry in entries.iter() {
            let score = cosine_similarity(&query_vector, &entry.vector)?;
            heap.push(Reverse(Ranked {
                score: OrderedFloat(score),
                name: &entry.name,
            }));
            // Keep the k best; the heap top is the current worst
            if heap.len() > k {
                heap.pop();
            }
        }

        let ranked: Vec<String> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| {
                debug!(operation = %r.name, score = r.score.0, "candidate");
                r.name.clone()
            })
            .collect();

        tracing::Span::current().record("candidates", ranked.len());
        Ok(ranked)
    }
}

/// Higher score wins; on equal scores the smaller name wins.
#[derive(PartialEq, Eq)]
struct Ranked<'a> {
    score: OrderedFloat<f32>,
    name: &'a String,
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.name.cmp(self.name))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> anyhow::Result<f32> {
    if a.len() != b.len() {
        anyhow::bail!(
            "Embedding dimension mismatch: query has {}, index has {}",
            a.len(),
            b.len()
        );
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}
