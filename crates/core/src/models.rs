use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which store partition a document belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    General,
    Invoice,
}

impl DocumentKind {
    pub fn collection_name(&self) -> &'static str {
        match self {
            DocumentKind::General => "general",
            DocumentKind::Invoice => "invoices",
        }
    }

    pub fn doc_type(&self) -> &'static str {
        match self {
            DocumentKind::General => "general",
            DocumentKind::Invoice => "invoice",
        }
    }
}

/// Caller-supplied description of an input document, validated at the
/// ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub filename: String,
    pub kind: DocumentKind,
}

impl DocumentMeta {
    pub fn new(filename: impl Into<String>, kind: DocumentKind) -> Self {
        Self {
            filename: filename.into(),
            kind,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.filename.trim().is_empty() {
            return Err(IngestError::InvalidParameter(
                "filename must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-chunk metadata stored alongside the vector. Every field serializes to
/// a JSON primitive; vector backends reject nested values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub doc_type: String,
    pub base_id: String,
    pub chunk_index: usize,
    pub ingested_at: DateTime<Utc>,
}

/// The unit of storage: one embedded chunk, keyed by a collection-unique id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

/// Outcome of a successful `add_document`. `chunks_dropped > 0` marks a
/// degraded ingest where individual embedding calls failed.
#[derive(Debug, Clone, Serialize)]
pub struct AddReport {
    pub base_id: String,
    pub chunks_added: usize,
    pub chunks_dropped: usize,
}

/// Resource-protection limits applied around the chunker. These are caller
/// policy, not chunker invariants.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub chunk_chars: usize,
    pub chunk_overlap_chars: usize,
    pub max_text_chars: usize,
    pub max_chunks_per_document: usize,
    pub embed_timeout_secs: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_chars: 1_000,
            chunk_overlap_chars: 200,
            max_text_chars: 1_000_000,
            max_chunks_per_document: 50,
            embed_timeout_secs: 30,
        }
    }
}
