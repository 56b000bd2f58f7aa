use crate::models::{ChunkRecord, SearchHit};
use crate::traits::{CollectionHandle, VectorStore};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const STORE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Adapter over the Chroma REST API. All writes persist server-side under
/// the deployment's single store location, partitioned by collection name.
pub struct ChromaStore {
    endpoint: String,
    client: Client,
}

impl ChromaStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SearchError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Url::parse(&endpoint)?;

        let client = Client::builder().timeout(STORE_REQUEST_TIMEOUT).build()?;
        Ok(Self { endpoint, client })
    }

    fn collections_url(&self) -> String {
        format!("{}/api/v1/collections", self.endpoint)
    }

    fn collection_url(&self, collection_id: &str, operation: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.endpoint, collection_id, operation
        )
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
    ) -> Result<CollectionHandle, SearchError> {
        let response = self
            .client
            .post(self.collections_url())
            .json(&json!({
                "name": name,
                "get_or_create": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let id = parsed
            .pointer("/id")
            .and_then(Value::as_str)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "chroma".to_string(),
                details: "collection response carried no id".to_string(),
            })?
            .to_string();

        Ok(CollectionHandle {
            name: name.to_string(),
            id,
        })
    }

    async fn upsert(
        &self,
        collection: &CollectionHandle,
        record: &ChunkRecord,
    ) -> Result<(), SearchError> {
        self.add_batch(collection, std::slice::from_ref(record))
            .await?;
        Ok(())
    }

    async fn add_batch(
        &self,
        collection: &CollectionHandle,
        records: &[ChunkRecord],
    ) -> Result<usize, SearchError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut documents = Vec::with_capacity(records.len());
        let mut metadatas = Vec::with_capacity(records.len());
        let mut embeddings = Vec::with_capacity(records.len());

        for record in records {
            ids.push(record.id.clone());
            documents.push(record.text.clone());
            metadatas.push(serde_json::to_value(&record.metadata)?);
            embeddings.push(record.embedding.clone());
        }

        let response = self
            .client
            .post(self.collection_url(&collection.id, "upsert"))
            .json(&json!({
                "ids": ids,
                "documents": documents,
                "metadatas": metadatas,
                "embeddings": embeddings,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(records.len())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .post(self.collection_url(&collection.id, "query"))
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": top_k,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        // Chroma nests one result list per query embedding; exactly one query
        // is ever sent, so row 0 is the whole answer.
        let ids = nested_row(&parsed, "/ids");
        let documents = nested_row(&parsed, "/documents");
        let metadatas = nested_row(&parsed, "/metadatas");
        let distances = nested_row(&parsed, "/distances");

        let mut hits = Vec::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            let id = id.as_str().unwrap_or_default().to_string();
            let text = documents
                .get(position)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let distance = distances
                .get(position)
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let metadata = metadatas
                .get(position)
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| SearchError::BackendResponse {
                    backend: "chroma".to_string(),
                    details: format!("hit {id} carried no metadata"),
                })?;

            hits.push(SearchHit {
                id,
                text,
                metadata,
                distance,
            });
        }

        Ok(hits)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize, SearchError> {
        let response = self
            .client
            .get(self.collection_url(&collection.id, "count"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(response.json().await?)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.collections_url(), name))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

fn nested_row(parsed: &Value, field: &str) -> Vec<Value> {
    parsed
        .pointer(field)
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
