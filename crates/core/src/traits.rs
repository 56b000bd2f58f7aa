use crate::error::SearchError;
use crate::models::{ChunkRecord, SearchHit};
use async_trait::async_trait;

/// Handle to a named partition of the vector store. Collections are created
/// lazily on first use and only ever deleted explicitly.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    pub name: String,
    pub id: String,
}

#[async_trait]
pub trait VectorStore {
    /// Idempotent: repeated calls with the same name return the same
    /// collection, never a duplicate.
    async fn get_or_create_collection(&self, name: &str)
        -> Result<CollectionHandle, SearchError>;

    /// Overwrite-by-id: exactly one record per id after the call.
    async fn upsert(
        &self,
        collection: &CollectionHandle,
        record: &ChunkRecord,
    ) -> Result<(), SearchError>;

    /// Writes a batch of records with upsert semantics and returns the
    /// number written. An empty batch is a no-op returning 0.
    async fn add_batch(
        &self,
        collection: &CollectionHandle,
        records: &[ChunkRecord],
    ) -> Result<usize, SearchError>;

    /// Nearest-neighbour search under the store's distance metric, ranked
    /// closest-first. Returns fewer than `top_k` hits when the collection is
    /// smaller; an empty collection yields an empty list, not an error.
    async fn query(
        &self,
        collection: &CollectionHandle,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError>;

    async fn count(&self, collection: &CollectionHandle) -> Result<usize, SearchError>;

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError>;
}
