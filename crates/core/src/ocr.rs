use crate::error::{IngestError, ProviderError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

const VISION_PROMPT: &str = "Extract all text from this image:";
const VISION_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Input routed to the OCR engines, classified by file extension.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    Image(Vec<u8>),
    Pdf(Vec<u8>),
}

impl DocumentInput {
    /// Classifies uploaded bytes the way the upload surface does: jpg, jpeg,
    /// and png are images; pdf is a pdf; everything else is rejected.
    pub fn from_filename(filename: &str, bytes: Vec<u8>) -> Result<Self, IngestError> {
        let lowered = filename.to_lowercase();
        if lowered.ends_with(".jpg") || lowered.ends_with(".jpeg") || lowered.ends_with(".png") {
            Ok(DocumentInput::Image(bytes))
        } else if lowered.ends_with(".pdf") {
            Ok(DocumentInput::Pdf(bytes))
        } else {
            Err(IngestError::InvalidParameter(format!(
                "unsupported document type: {filename}"
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrOptions {
    /// Rasterization resolution for the local engine.
    pub local_dpi: u32,
    /// Reduced resolution for pages sent to the remote engine.
    pub remote_dpi: u32,
    /// Page cap for the remote engine; pages beyond it are not sent.
    pub remote_max_pages: usize,
    /// The remote engine sleeps for `page_pacing` after every
    /// `pacing_interval_pages` pages.
    pub pacing_interval_pages: usize,
    pub page_pacing: Duration,
    /// Per-engine wall-clock limit; a timed-out engine counts as failed.
    pub engine_timeout: Duration,
    /// Trimmed character count below which arbitration output is unusable.
    pub min_usable_chars: usize,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            local_dpi: 200,
            remote_dpi: 120,
            remote_max_pages: 20,
            pacing_interval_pages: 3,
            page_pacing: Duration::from_millis(500),
            engine_timeout: Duration::from_secs(120),
            min_usable_chars: 20,
        }
    }
}

/// Plausibility score for OCR output: the share of alphabetic characters,
/// dampened for blocks shorter than 30 chars.
pub fn score_text(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let length = text.chars().count();
    let alphabetic = text.chars().filter(|c| c.is_alphabetic()).count();
    let mut ratio = alphabetic as f64 / length.max(1) as f64;

    if length < 30 {
        ratio *= 0.3;
    }

    ratio
}

#[async_trait]
pub trait OcrEngine {
    fn name(&self) -> &'static str;

    async fn recognize(&self, input: &DocumentInput) -> Result<String, IngestError>;
}

/// Renders each PDF page to a PNG via poppler's pdftoppm.
async fn rasterize_pdf(pdf: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>, IngestError> {
    let workdir = tempfile::tempdir()?;
    let pdf_path = workdir.path().join("input.pdf");
    tokio::fs::write(&pdf_path, pdf).await?;

    let status = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(&pdf_path)
        .arg(workdir.path().join("page"))
        .status()
        .await?;

    if !status.success() {
        return Err(IngestError::PdfParse(format!(
            "pdftoppm exited with {status}"
        )));
    }

    let mut page_paths = Vec::new();
    let mut entries = tokio::fs::read_dir(workdir.path()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("page") && name.ends_with(".png") {
            page_paths.push(entry.path());
        }
    }
    // pdftoppm zero-pads page numbers to a uniform width per run, so
    // lexicographic order is page order.
    page_paths.sort_unstable();

    if page_paths.is_empty() {
        return Err(IngestError::PdfParse(
            "pdftoppm produced no pages".to_string(),
        ));
    }

    let mut pages = Vec::with_capacity(page_paths.len());
    for path in page_paths {
        pages.push(tokio::fs::read(&path).await?);
    }
    Ok(pages)
}

/// Local rasterize-and-recognize engine backed by the tesseract CLI.
/// Deterministic, offline, and free to re-run.
pub struct TesseractOcr {
    languages: String,
    dpi: u32,
}

impl TesseractOcr {
    pub fn new(languages: impl Into<String>, dpi: u32) -> Self {
        Self {
            languages: languages.into(),
            dpi,
        }
    }

    async fn recognize_image(&self, image: &[u8]) -> Result<String, IngestError> {
        let mut child = Command::new("tesseract")
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            // dropping stdin closes the pipe so tesseract sees EOF
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "tesseract exited with {}",
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("ell+eng", OcrOptions::default().local_dpi)
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, input: &DocumentInput) -> Result<String, IngestError> {
        match input {
            DocumentInput::Image(bytes) => self.recognize_image(bytes).await,
            DocumentInput::Pdf(bytes) => {
                let pages = rasterize_pdf(bytes, self.dpi).await?;
                let mut text = String::new();
                for page in &pages {
                    let page_text = self.recognize_image(page).await?;
                    text.push('\n');
                    text.push_str(&page_text);
                }
                Ok(text)
            }
        }
    }
}

/// Remote vision-LLM engine over an OpenAI-compatible chat endpoint. Pages
/// are rendered at reduced resolution, capped, and paced to bound cost and
/// respect rate limits.
pub struct VisionLlmOcr {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    options: OcrOptions,
}

#[derive(Debug, Clone, Serialize)]
struct VisionImageUrl {
    url: String,
}

impl VisionLlmOcr {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        options: OcrOptions,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(VISION_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            options,
        })
    }

    async fn recognize_image(&self, image: &[u8]) -> Result<String, IngestError> {
        let image_url = VisionImageUrl {
            url: format!("data:image/png;base64,{}", STANDARD.encode(image)),
        };
        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": VISION_PROMPT },
                    { "type": "image_url", "image_url": image_url },
                ],
            }],
            "temperature": 0,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(ProviderError::from)?;
        if !response.status().is_success() {
            return Err(ProviderError::Response {
                provider: "vision-ocr".to_string(),
                details: response.status().to_string(),
            }
            .into());
        }

        let parsed: Value = response.json().await.map_err(ProviderError::from)?;
        Ok(parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl OcrEngine for VisionLlmOcr {
    fn name(&self) -> &'static str {
        "vision-llm"
    }

    async fn recognize(&self, input: &DocumentInput) -> Result<String, IngestError> {
        match input {
            DocumentInput::Image(bytes) => self.recognize_image(bytes).await,
            DocumentInput::Pdf(bytes) => {
                let mut pages = rasterize_pdf(bytes, self.options.remote_dpi).await?;
                if pages.len() > self.options.remote_max_pages {
                    warn!(
                        total = pages.len(),
                        cap = self.options.remote_max_pages,
                        "capping pdf pages for remote ocr"
                    );
                    pages.truncate(self.options.remote_max_pages);
                }

                let mut text = String::new();
                for (index, page) in pages.iter().enumerate() {
                    if index > 0 && index % self.options.pacing_interval_pages == 0 {
                        tokio::time::sleep(self.options.page_pacing).await;
                    }
                    let page_text = self.recognize_image(page).await?;
                    text.push('\n');
                    text.push_str(&page_text);
                }
                Ok(text)
            }
        }
    }
}

/// Which engine's output won the arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePick {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub text: String,
    pub picked: EnginePick,
    pub local_score: f64,
    pub remote_score: f64,
}

/// Runs both engines over the same input, scores each output, and keeps the
/// better one. An engine failure or timeout degrades to an empty string for
/// that engine; one engine can never block the other's result.
pub struct OcrArbiter<A, B>
where
    A: OcrEngine,
    B: OcrEngine,
{
    local: A,
    remote: B,
    options: OcrOptions,
}

impl<A, B> OcrArbiter<A, B>
where
    A: OcrEngine + Send + Sync,
    B: OcrEngine + Send + Sync,
{
    pub fn new(local: A, remote: B, options: OcrOptions) -> Self {
        Self {
            local,
            remote,
            options,
        }
    }

    pub async fn recognize(&self, input: &DocumentInput) -> OcrOutcome {
        let (local_text, remote_text) = tokio::join!(
            run_isolated(&self.local, input, self.options.engine_timeout),
            run_isolated(&self.remote, input, self.options.engine_timeout),
        );

        let local_score = score_text(&local_text);
        let remote_score = score_text(&remote_text);
        info!(
            local_engine = self.local.name(),
            local_score,
            remote_engine = self.remote.name(),
            remote_score,
            "ocr arbitration"
        );

        // Strictly-greater comparison: ties keep the local result.
        if remote_score > local_score {
            OcrOutcome {
                text: remote_text,
                picked: EnginePick::Remote,
                local_score,
                remote_score,
            }
        } else {
            OcrOutcome {
                text: local_text,
                picked: EnginePick::Local,
                local_score,
                remote_score,
            }
        }
    }

    /// [`Self::recognize`], gated on the usable-length policy: when the
    /// winning output trims below `min_usable_chars`, both engines failed
    /// and the result must not be indexed as an empty document.
    pub async fn recognize_usable(
        &self,
        input: &DocumentInput,
    ) -> Result<OcrOutcome, IngestError> {
        let outcome = self.recognize(input).await;
        let chars = outcome.text.trim().chars().count();
        if chars < self.options.min_usable_chars {
            return Err(IngestError::OcrQuality {
                chars,
                min_chars: self.options.min_usable_chars,
            });
        }
        Ok(outcome)
    }
}

async fn run_isolated<E>(engine: &E, input: &DocumentInput, limit: Duration) -> String
where
    E: OcrEngine + Sync,
{
    match tokio::time::timeout(limit, engine.recognize(input)).await {
        Ok(Ok(text)) => text,
        Ok(Err(error)) => {
            warn!(engine = engine.name(), %error, "ocr engine failed");
            String::new()
        }
        Err(_) => {
            warn!(
                engine = engine.name(),
                timeout_secs = limit.as_secs(),
                "ocr engine timed out"
            );
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEngine {
        name: &'static str,
        output: Option<String>,
    }

    #[async_trait]
    impl OcrEngine for FixedEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn recognize(&self, _input: &DocumentInput) -> Result<String, IngestError> {
            match &self.output {
                Some(text) => Ok(text.clone()),
                None => Err(IngestError::OcrFailed("engine offline".to_string())),
            }
        }
    }

    fn arbiter(
        local: Option<&str>,
        remote: Option<&str>,
    ) -> OcrArbiter<FixedEngine, FixedEngine> {
        OcrArbiter::new(
            FixedEngine {
                name: "local",
                output: local.map(str::to_string),
            },
            FixedEngine {
                name: "remote",
                output: remote.map(str::to_string),
            },
            OcrOptions::default(),
        )
    }

    fn image() -> DocumentInput {
        DocumentInput::Image(Vec::new())
    }

    #[test]
    fn empty_text_scores_zero() {
        assert_eq!(score_text(""), 0.0);
    }

    #[test]
    fn higher_alphabetic_ratio_scores_higher() {
        let noisy = "abcde12345abcde12345abcde12345abcde12345";
        let clean = "abcdefghijabcdefghijabcdefghijabcdefghij";
        assert!(score_text(clean) > score_text(noisy));
    }

    #[test]
    fn short_text_is_penalized() {
        // same all-alphabetic content, below and above the 30-char cutoff
        let short = "abcdefghij";
        let long = "abcdefghij".repeat(3);
        assert!(score_text(short) <= 0.3);
        assert_eq!(score_text(&long), 1.0);
        assert!(score_text(short) < score_text(&long));
    }

    #[test]
    fn score_counts_chars_not_bytes() {
        let greek = "αβγδεζηθικλμνξοπρστυφχψωαβγδεζ";
        assert_eq!(score_text(greek), 1.0);
    }

    #[tokio::test]
    async fn equal_scores_pick_the_local_engine() {
        let same = "the same perfectly plausible output text";
        let arbiter = arbiter(Some(same), Some(same));

        let outcome = arbiter.recognize(&image()).await;
        assert_eq!(outcome.picked, EnginePick::Local);
        assert_eq!(outcome.local_score, outcome.remote_score);
    }

    #[tokio::test]
    async fn strictly_better_remote_output_wins() {
        let arbiter = arbiter(
            Some("0123456789 0123456789 0123456789"),
            Some("a legible sentence of recognized words here"),
        );

        let outcome = arbiter.recognize(&image()).await;
        assert_eq!(outcome.picked, EnginePick::Remote);
        assert_eq!(outcome.text, "a legible sentence of recognized words here");
    }

    #[tokio::test]
    async fn failed_engine_degrades_to_empty_and_the_other_wins() {
        let arbiter = arbiter(None, Some("readable text from the remote engine"));

        let outcome = arbiter.recognize(&image()).await;
        assert_eq!(outcome.picked, EnginePick::Remote);
        assert_eq!(outcome.local_score, 0.0);
        assert_eq!(outcome.text, "readable text from the remote engine");
    }

    #[tokio::test]
    async fn both_engines_failing_returns_the_empty_local_result() {
        let arbiter = arbiter(None, None);

        let outcome = arbiter.recognize(&image()).await;
        assert_eq!(outcome.picked, EnginePick::Local);
        assert!(outcome.text.is_empty());
    }

    #[tokio::test]
    async fn unusable_output_is_a_typed_failure() {
        let arbiter = arbiter(Some("  x  "), None);

        let result = arbiter.recognize_usable(&image()).await;
        assert!(matches!(result, Err(IngestError::OcrQuality { .. })));
    }

    #[tokio::test]
    async fn usable_output_passes_the_length_gate() {
        let arbiter = arbiter(Some("a perfectly usable stretch of recognized text"), None);

        let outcome = arbiter.recognize_usable(&image()).await.unwrap();
        assert_eq!(outcome.picked, EnginePick::Local);
    }

    #[test]
    fn filenames_classify_into_image_or_pdf() {
        assert!(matches!(
            DocumentInput::from_filename("scan.JPG", vec![1]),
            Ok(DocumentInput::Image(_))
        ));
        assert!(matches!(
            DocumentInput::from_filename("invoice.pdf", vec![1]),
            Ok(DocumentInput::Pdf(_))
        ));
        assert!(DocumentInput::from_filename("notes.docx", vec![1]).is_err());
    }
}
