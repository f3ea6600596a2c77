//! Shortlisting operations by relevance to a user message.
//!
//! The dispatcher only sees the [`Retriever`] trait. [`EmbeddingRetriever`] is
//! the in-memory default, ranking operations by cosine similarity between
//! embeddings produced by any [`Embedder`].

mod memory;
mod token_hash;

pub use memory::{embedding_text, EmbeddingRetriever};
pub use token_hash::TokenHashEmbedder;

use async_trait::async_trait;
use tracing::warn;

use crate::registry::OperationRegistry;
use crate::types::FunctionSchema;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed several texts, in order. Override when the backend batches.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Searchable index over a registry's operations.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// (Re)build the index from `registry`. Calling it again on an unchanged
    /// registry must leave search results unchanged.
    async fn index(&self, registry: &OperationRegistry) -> anyhow::Result<()>;

    /// Up to `k` operation names, most relevant first. An unindexed store
    /// returns an empty list.
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<String>>;

    /// [`Retriever::search`], with each name resolved to its parameter schema.
    ///
    /// Names the registry no longer knows are dropped.
    async fn search_and_expand(
        &self,
        registry: &OperationRegistry,
        query: &str,
        k: usize,
    ) -> anyhow::Result<Vec<FunctionSchema>> {
        let names = self.search(query, k).await?;
        let mut schemas = Vec::with_capacity(names.len());
        for name in names {
            match registry.get(&name) {
                Some(descriptor) => schemas.push(descriptor.schema().clone()),
                None => warn!(operation = %name, "search returned an unregistered operation"),
            }
        }
        Ok(schemas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Operation, OperationDescriptor};
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct NoInput {}

    struct Named(&'static str);

    #[async_trait]
    impl Operation for Named {
        type Input = NoInput;
        type Output = ();

        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "Test operation."
        }

        async fn call(&self, _input: NoInput) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Returns a fixed list regardless of query
    struct Fixed(Vec<&'static str>);

    #[async_trait]
    impl Retriever for Fixed {
        async fn index(&self, _registry: &OperationRegistry) -> anyhow::Result<()> {
            Ok(())
        }

        async fn search(&self, _query: &str, k: usize) -> anyhow::Result<Vec<String>> {
            Ok(self.0.iter().take(k).map(|s| s.to_string()).collect())
        }
    }

    #[tokio::test]
    async fn test_search_and_expand_drops_stale_names() {
        let registry = OperationRegistry::from_operations(vec![
            OperationDescriptor::new(Named("alpha")).unwrap(),
            OperationDescriptor::new(Named("beta")).unwrap(),
        ])
        .unwrap();
        let retriever = Fixed(vec!["beta", "removed", "alpha"]);

        let schemas = retriever
            .search_and_expand(&registry, "anything", 3)
            .await
            .unwrap();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }
}
