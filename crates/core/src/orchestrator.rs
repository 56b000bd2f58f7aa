use crate::chunking::{chunk_text, truncate_chars};
use crate::embeddings::Embedder;
use crate::error::{IngestError, ProviderError, SearchError};
use crate::ingest::{
    discover_document_files, document_meta_for_path, read_document_text, FolderReport,
    SkippedFile,
};
use crate::models::{
    AddReport, ChunkMetadata, ChunkRecord, DocumentKind, DocumentMeta, PipelineOptions,
    SearchHit,
};
use crate::traits::VectorStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Composes chunking, embedding, and the vector store behind the two public
/// operations: `add_document` and `search`. Holds no mutable state; concurrent
/// calls interleave freely and last-writer-wins on id collisions.
pub struct DocumentPipeline<E, S>
where
    E: Embedder,
    S: VectorStore,
{
    embedder: E,
    store: S,
    options: PipelineOptions,
}

impl<E, S> DocumentPipeline<E, S>
where
    E: Embedder + Send + Sync,
    S: VectorStore + Send + Sync,
{
    pub fn new(embedder: E, store: S, options: PipelineOptions) -> Self {
        Self {
            embedder,
            store,
            options,
        }
    }

    /// Chunks `text`, embeds each chunk, and upserts the surviving records
    /// under ids `"{base_id}_{index}"`. A failed or timed-out embedding drops
    /// that chunk; zero surviving chunks is an error, never a silent empty
    /// batch.
    pub async fn add_document(
        &self,
        text: &str,
        meta: &DocumentMeta,
    ) -> Result<AddReport, IngestError> {
        meta.validate()?;
        if text.trim().is_empty() {
            return Err(IngestError::InvalidParameter(
                "document text is empty".to_string(),
            ));
        }

        let bounded = truncate_chars(text, self.options.max_text_chars);
        let mut chunks = chunk_text(
            bounded,
            self.options.chunk_chars,
            self.options.chunk_overlap_chars,
        )?;
        if chunks.len() > self.options.max_chunks_per_document {
            warn!(
                filename = %meta.filename,
                total = chunks.len(),
                cap = self.options.max_chunks_per_document,
                "capping chunk count"
            );
            chunks.truncate(self.options.max_chunks_per_document);
        }

        let base_id = derive_base_id(&meta.filename);
        let ingested_at = Utc::now();
        let embed_limit = Duration::from_secs(self.options.embed_timeout_secs);

        let mut records = Vec::with_capacity(chunks.len());
        let mut dropped = 0usize;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let embedded = tokio::time::timeout(embed_limit, self.embedder.embed(&chunk)).await;
            let embedding = match embedded {
                Ok(Ok(vector)) => vector,
                Ok(Err(error)) => {
                    warn!(
                        filename = %meta.filename,
                        chunk_index = index,
                        %error,
                        "embedding failed, dropping chunk"
                    );
                    dropped += 1;
                    continue;
                }
                Err(_) => {
                    warn!(
                        filename = %meta.filename,
                        chunk_index = index,
                        timeout_secs = self.options.embed_timeout_secs,
                        "embedding timed out, dropping chunk"
                    );
                    dropped += 1;
                    continue;
                }
            };

            records.push(ChunkRecord {
                id: format!("{base_id}_{index}"),
                text: chunk,
                metadata: ChunkMetadata {
                    filename: meta.filename.clone(),
                    doc_type: meta.kind.doc_type().to_string(),
                    base_id: base_id.clone(),
                    chunk_index: index,
                    ingested_at,
                },
                embedding,
            });
        }

        if records.is_empty() {
            return Err(IngestError::Provider(ProviderError::Response {
                provider: "embeddings".to_string(),
                details: format!("no chunks could be embedded for {}", meta.filename),
            }));
        }

        let collection = self
            .store
            .get_or_create_collection(meta.kind.collection_name())
            .await?;
        let chunks_added = self.store.add_batch(&collection, &records).await?;
        info!(
            filename = %meta.filename,
            collection = %collection.name,
            chunks_added,
            chunks_dropped = dropped,
            "document added"
        );

        Ok(AddReport {
            base_id,
            chunks_added,
            chunks_dropped: dropped,
        })
    }

    /// Embeds the query once and returns the store's ranked hits as a flat
    /// list.
    pub async fn search(
        &self,
        query: &str,
        kind: DocumentKind,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let vector = self.embedder.embed(query).await?;
        let collection = self
            .store
            .get_or_create_collection(kind.collection_name())
            .await?;
        self.store.query(&collection, &vector, top_k).await
    }

    /// Ingests every supported file under `folder`, best-effort: an
    /// unreadable file is reported and skipped, not fatal.
    pub async fn add_folder(
        &self,
        folder: &Path,
        kind: DocumentKind,
    ) -> Result<FolderReport, IngestError> {
        let files = discover_document_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidParameter(format!(
                "no ingestable files found in {}",
                folder.display()
            )));
        }

        let mut report = FolderReport {
            files_added: 0,
            chunks_added: 0,
            skipped: Vec::new(),
        };

        for path in files {
            let meta = document_meta_for_path(&path, kind);
            let added = match read_document_text(&path) {
                Ok(text) => self.add_document(&text, &meta).await,
                Err(error) => Err(error),
            };

            match added {
                Ok(add_report) => {
                    report.files_added += 1;
                    report.chunks_added += add_report.chunks_added;
                }
                Err(error) => report.skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(report)
    }

    pub async fn collection_status(
        &self,
        kind: DocumentKind,
    ) -> Result<(String, usize), SearchError> {
        let collection = self
            .store
            .get_or_create_collection(kind.collection_name())
            .await?;
        let records = self.store.count(&collection).await?;
        Ok((collection.name, records))
    }
}

fn derive_base_id(filename: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    format!("{:x}", hasher.finalize())
}
