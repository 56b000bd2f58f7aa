pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod invoice;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_text, truncate_chars};
pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ExtractError, IngestError, ProviderError, SearchError};
pub use ingest::{
    decode_text_bytes, discover_document_files, document_meta_for_path, read_document_text,
    FolderReport, SkippedFile,
};
pub use invoice::{
    regex_fallback, ExtractionOutcome, FallbackInvoice, FallbackLine, InvoiceData,
    InvoiceExtractor, InvoiceTotals, ProductLine,
};
pub use llm::{ChatCompleter, OpenAiChatClient};
pub use models::{
    AddReport, ChunkMetadata, ChunkRecord, DocumentKind, DocumentMeta, PipelineOptions,
    SearchHit,
};
pub use ocr::{
    score_text, DocumentInput, EnginePick, OcrArbiter, OcrEngine, OcrOptions, OcrOutcome,
    TesseractOcr, VisionLlmOcr,
};
pub use orchestrator::DocumentPipeline;
pub use stores::ChromaStore;
pub use traits::{CollectionHandle, VectorStore};
