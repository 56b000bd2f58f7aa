use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

const EMBED_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Narrow contract against the embedding provider: text in, fixed-dimension
/// vector out. All records in a collection must come from the same provider.
#[async_trait]
pub trait Embedder {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Same semantics as a sequence of `embed` calls.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for Box<dyn Embedder + Send + Sync> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        (**self).embed_batch(texts).await
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(EMBED_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            dimensions,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Response {
                provider: "embeddings".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        let vector = payload
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| ProviderError::Response {
                provider: "embeddings".to_string(),
                details: "response carried no embedding data".to_string(),
            })?;

        if vector.len() != self.dimensions {
            return Err(ProviderError::Response {
                provider: "embeddings".to_string(),
                details: format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dimensions
                ),
            });
        }

        Ok(vector)
    }
}

/// Offline embedder hashing character trigrams into a normalized bucket
/// vector. Deterministic across runs, so it doubles as the test embedder.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = (fnv1a(&token) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::{Embedder, HashEmbedder};

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("unpaid invoice from March").await.unwrap();
        let second = embedder.embed("unpaid invoice from March").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hash_embedder_outputs_configured_length() {
        let embedder = HashEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_the_zero_vector() {
        let embedder = HashEmbedder { dimensions: 16 };
        let vector = embedder.embed("").await.unwrap();
        assert!(vector.iter().all(|value| *value == 0.0));
    }

    #[tokio::test]
    async fn batch_matches_individual_calls() {
        let embedder = HashEmbedder { dimensions: 16 };
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(batch[1], embedder.embed("beta").await.unwrap());
    }
}
