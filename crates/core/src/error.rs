use thiserror::Error;

/// Failure reaching an external provider (embedding model, LLM, vision OCR).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} call timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("unexpected response from {provider}: {details}")]
    Response { provider: String, details: String },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("ocr engine failed: {0}")]
    OcrFailed(String),

    #[error("ocr produced {chars} usable characters, below the minimum of {min_chars}")]
    OcrQuality { chars: usize, min_chars: usize },

    #[error("provider unavailable: {0}")]
    Provider(#[from] ProviderError),

    #[error("vector store error: {0}")]
    Store(#[from] SearchError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("provider unavailable: {0}")]
    Provider(#[from] ProviderError),
}

/// Why the primary LLM extraction path was abandoned for the regex fallback.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("provider unavailable: {0}")]
    Provider(#[from] ProviderError),

    #[error("response failed schema validation: {0}")]
    Schema(#[from] serde_json::Error),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
