use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use doc_rag_core::{
    ChatCompleter, ChromaStore, DocumentInput, DocumentKind, DocumentPipeline, Embedder,
    HashEmbedder, HttpEmbedder, InvoiceExtractor, OcrArbiter, OcrOptions, OpenAiChatClient,
    PipelineOptions, SearchHit, TesseractOcr, VisionLlmOcr,
};
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ANSWER_SYSTEM_PROMPT: &str = "Answer based on the documents. \
If the information is not in the documents, say that nothing was found in the documents.";

const ANSWER_SNIPPET_CHARS: usize = 400;

#[derive(Parser)]
#[command(name = "doc-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Chroma base URL
    #[arg(long, env = "CHROMA_URL", default_value = "http://localhost:8000")]
    chroma_url: String,

    /// OpenAI-compatible API base URL (embeddings, chat, vision)
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    api_url: String,

    /// API key; without one, embeddings fall back to the offline hash
    /// embedder and LLM-backed paths degrade.
    #[arg(long, env = "OPENAI_API_KEY")]
    api_key: Option<String>,

    /// Embedding model
    #[arg(long, default_value = "text-embedding-3-small")]
    embed_model: String,

    /// Embedding dimensions of the configured model
    #[arg(long, default_value = "1536")]
    embed_dimensions: usize,

    /// Chat model for invoice extraction and answers
    #[arg(long, default_value = "gpt-4.1")]
    llm_model: String,

    /// Vision model for the remote OCR engine
    #[arg(long, default_value = "gpt-4o-mini")]
    vision_model: String,

    /// Tesseract language packs for the local OCR engine
    #[arg(long, default_value = "ell+eng")]
    ocr_languages: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scope {
    General,
    Invoices,
}

impl From<Scope> for DocumentKind {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::General => DocumentKind::General,
            Scope::Invoices => DocumentKind::Invoice,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a text/PDF file, or a folder of them, into the general collection.
    Ingest {
        /// File or folder to ingest.
        #[arg(long)]
        path: String,
    },
    /// OCR an invoice (image or PDF), index it, and extract structured data.
    Invoice {
        /// Invoice file (pdf, jpg, jpeg, png).
        #[arg(long)]
        path: String,
    },
    /// Nearest-neighbour search over a collection.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        #[arg(long, value_enum, default_value = "general")]
        scope: Scope,
        /// Number of hits to return.
        #[arg(long, default_value = "3")]
        top_k: usize,
    },
    /// Answer a question grounded in retrieved documents.
    Ask {
        /// Question to answer
        #[arg(long)]
        query: String,
        #[arg(long, value_enum, default_value = "general")]
        scope: Scope,
        /// Number of context chunks to retrieve.
        #[arg(long, default_value = "3")]
        top_k: usize,
    },
    /// Show record counts for both collections.
    Status,
    /// Delete both collections.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = ChromaStore::new(&cli.chroma_url)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let embedder: Box<dyn Embedder + Send + Sync> = match &cli.api_key {
        Some(api_key) => Box::new(
            HttpEmbedder::new(
                &cli.api_url,
                Some(api_key.clone()),
                &cli.embed_model,
                cli.embed_dimensions,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?,
        ),
        None => {
            warn!("no api key configured, using the offline hash embedder");
            Box::new(HashEmbedder::default())
        }
    };

    let pipeline = DocumentPipeline::new(embedder, store, PipelineOptions::default());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "doc-rag boot"
    );

    match &cli.command {
        Command::Ingest { path } => ingest(&cli, &pipeline, path).await?,
        Command::Invoice { path } => invoice(&cli, &pipeline, path).await?,
        Command::Search {
            query,
            scope,
            top_k,
        } => {
            let hits = pipeline
                .search(query, (*scope).into(), *top_k)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            print_hits(&hits);
        }
        Command::Ask {
            query,
            scope,
            top_k,
        } => ask(&cli, &pipeline, query, (*scope).into(), *top_k).await?,
        Command::Status => {
            for kind in [DocumentKind::General, DocumentKind::Invoice] {
                let (name, records) = pipeline
                    .collection_status(kind)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                println!("{name}: {records} records");
            }
        }
        Command::Reset => {
            let store = ChromaStore::new(&cli.chroma_url)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            for kind in [DocumentKind::General, DocumentKind::Invoice] {
                use doc_rag_core::VectorStore;
                match store.delete_collection(kind.collection_name()).await {
                    Ok(()) => println!("deleted collection {}", kind.collection_name()),
                    Err(error) => {
                        println!("collection {} not deleted: {error}", kind.collection_name())
                    }
                }
            }
        }
    }

    Ok(())
}

async fn ingest(
    _cli: &Cli,
    pipeline: &DocumentPipeline<Box<dyn Embedder + Send + Sync>, ChromaStore>,
    path: &str,
) -> anyhow::Result<()> {
    let path = Path::new(path);

    if path.is_dir() {
        let report = pipeline
            .add_folder(path, DocumentKind::General)
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

        for skipped in &report.skipped {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
        }
        println!(
            "{} files ingested ({} chunks, {} skipped)",
            report.files_added,
            report.chunks_added,
            report.skipped.len()
        );
        return Ok(());
    }

    let text = doc_rag_core::read_document_text(path)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let meta = doc_rag_core::document_meta_for_path(path, DocumentKind::General);
    let report = pipeline
        .add_document(&text, &meta)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    println!(
        "{} ingested: {} chunks added, {} dropped",
        meta.filename, report.chunks_added, report.chunks_dropped
    );
    Ok(())
}

async fn invoice(
    cli: &Cli,
    pipeline: &DocumentPipeline<Box<dyn Embedder + Send + Sync>, ChromaStore>,
    path: &str,
) -> anyhow::Result<()> {
    let path = Path::new(path);
    let meta = doc_rag_core::document_meta_for_path(path, DocumentKind::Invoice);
    let bytes = tokio::fs::read(path).await?;
    let input = DocumentInput::from_filename(&meta.filename, bytes)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let ocr_options = OcrOptions::default();
    let local = TesseractOcr::new(&cli.ocr_languages, ocr_options.local_dpi);
    let remote = VisionLlmOcr::new(
        &cli.api_url,
        cli.api_key.clone(),
        &cli.vision_model,
        ocr_options.clone(),
    )
    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let arbiter = OcrArbiter::new(local, remote, ocr_options);

    let outcome = arbiter
        .recognize_usable(&input)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let report = pipeline
        .add_document(&outcome.text, &meta)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let llm = OpenAiChatClient::new(&cli.api_url, cli.api_key.clone())
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let extractor = InvoiceExtractor::new(llm, cli.llm_model.clone());
    let parsed = extractor.parse_invoice_text(&outcome.text).await;

    let preview: String = outcome.text.chars().take(2_000).collect();
    let summary = json!({
        "status": "ok",
        "filename": meta.filename,
        "ocr_engine": outcome.picked,
        "ocr_scores": { "local": outcome.local_score, "remote": outcome.remote_score },
        "chunks_added": report.chunks_added,
        "chunks_dropped": report.chunks_dropped,
        "ocr_preview": preview,
        "parsed_invoice": parsed,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn ask(
    cli: &Cli,
    pipeline: &DocumentPipeline<Box<dyn Embedder + Send + Sync>, ChromaStore>,
    query: &str,
    kind: DocumentKind,
    top_k: usize,
) -> anyhow::Result<()> {
    let hits = pipeline
        .search(query, kind, top_k)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    if hits.is_empty() {
        println!("no matching documents found");
        return Ok(());
    }

    let mut context_parts = Vec::with_capacity(hits.len());
    for (index, hit) in hits.iter().enumerate() {
        let snippet: String = hit.text.chars().take(ANSWER_SNIPPET_CHARS).collect();
        let ellipsis = if hit.text.chars().count() > ANSWER_SNIPPET_CHARS {
            "..."
        } else {
            ""
        };
        context_parts.push(format!(
            "[source {}] from {}:\n{snippet}{ellipsis}",
            index + 1,
            hit.metadata.filename
        ));
    }
    let context = context_parts.join("\n\n");

    let llm = OpenAiChatClient::new(&cli.api_url, cli.api_key.clone())
        .map_err(|error| anyhow::anyhow!(error.to_string()))?
        .with_max_tokens(800);
    let user_prompt = format!(
        "Documents:\n{context}\n\nQuestion: {query}\n\nAnswer based ONLY on the documents above:"
    );
    let answer = llm
        .complete(&cli.llm_model, ANSWER_SYSTEM_PROMPT, &user_prompt, 0.1)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    println!("{answer}");
    println!();
    println!("sources:");
    for hit in &hits {
        println!(
            "  {} (chunk {}, distance {:.4})",
            hit.metadata.filename, hit.metadata.chunk_index, hit.distance
        );
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("no results");
        return;
    }

    for hit in hits {
        println!(
            "[{}] distance={:.4} chunk={} file={}",
            hit.metadata.doc_type, hit.distance, hit.id, hit.metadata.filename
        );
        println!("{}", hit.text);
    }
}
