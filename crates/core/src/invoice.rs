use crate::error::ExtractError;
use crate::llm::ChatCompleter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::warn;

/// Fixed instruction for the structured-extraction call. The model must
/// answer with bare JSON matching [`InvoiceData`].
const INVOICE_SYSTEM_PROMPT: &str = "\
You are an expert system for extracting structured data from OCR invoice text.
Return ONLY valid JSON. No explanations.

Extract:
- customer_name (string or null)
- vat_number (string or null)
- invoice_number (string or null)
- invoice_date (string or null)
- series (string or null)

- product_lines:
    - description (string)
    - quantity (number)
    - unit_price (number)
    - line_total (number)

- totals:
    - subtotal (number or null)
    - vat_amount (number or null)
    - grand_total (number or null)

If a field is missing set it to null.";

/// Invoice-number label patterns, tried in priority order; the first match
/// wins.
const INVOICE_NUMBER_PATTERNS: [&str; 4] = [
    r"(?i)ΤΙΜ(?:\.)?\s*№?\s*(\d+)",
    r"(?i)ΤΙΜΟΛΟΓΙΟ\s*№?\s*(\d+)",
    r"(?i)INV\s*(\d+)",
    r"(?i)Invoice\s*(\d+)",
];

/// Currency amount with '.' thousands groups and a ',' decimal part.
const PRICE_PATTERN: &str = r"\d{1,3}(?:\.\d{3})*,\d{2}";

/// description, quantity, unit price, line total
const PRODUCT_LINE_PATTERN: &str = r"(.*?)[ ]+(\d+)[ ]+(\d+(?:,\d{2})?)[ ]+(\d+(?:,\d{2})?)";

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceData {
    pub customer_name: Option<String>,
    pub vat_number: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub series: Option<String>,
    #[serde(default)]
    pub product_lines: Vec<ProductLine>,
    pub totals: Option<InvoiceTotals>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductLine {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub line_total: f64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Option<f64>,
    pub vat_amount: Option<f64>,
    pub grand_total: Option<f64>,
}

/// Best-effort extraction from raw text; more fields stay null than on the
/// primary path, and amounts keep their source notation.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackInvoice {
    pub supplier: Option<String>,
    pub invoice_number: Option<String>,
    pub total_amount: Option<String>,
    pub products: Vec<FallbackLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackLine {
    pub description: String,
    pub quantity: u32,
    pub unit_price: String,
    pub line_total: String,
}

/// Result of [`InvoiceExtractor::parse_invoice_text`], tagged by `source` so
/// callers can tell a schema-validated extraction from the degraded regex
/// path.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Llm { data: InvoiceData },
    FallbackRegex { error: String, data: FallbackInvoice },
}

pub struct InvoiceExtractor<L>
where
    L: ChatCompleter,
{
    llm: L,
    model: String,
}

impl<L> InvoiceExtractor<L>
where
    L: ChatCompleter + Send + Sync,
{
    pub fn new(llm: L, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Never fails: any error on the LLM path (network, non-JSON output,
    /// schema mismatch) degrades to the regex extractor, tagged with the
    /// trigger.
    pub async fn parse_invoice_text(&self, text: &str) -> ExtractionOutcome {
        match self.extract_with_llm(text).await {
            Ok(data) => ExtractionOutcome::Llm { data },
            Err(error) => {
                warn!(%error, "llm invoice extraction failed, using regex fallback");
                ExtractionOutcome::FallbackRegex {
                    error: error.to_string(),
                    data: regex_fallback(text),
                }
            }
        }
    }

    async fn extract_with_llm(&self, text: &str) -> Result<InvoiceData, ExtractError> {
        let user_prompt =
            format!("Extract the invoice data from the following OCR text:\n\n{text}");
        let raw = self
            .llm
            .complete(&self.model, INVOICE_SYSTEM_PROMPT, &user_prompt, 0.0)
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Deterministic extraction over raw OCR text. Pure and total; lines that do
/// not match the four-field product pattern are skipped.
pub fn regex_fallback(text: &str) -> FallbackInvoice {
    let cleaned = collapse_inline_whitespace(text);

    let supplier = cleaned
        .lines()
        .take(10)
        .map(str::trim)
        .find(|line| is_all_uppercase(line) && line.chars().count() > 3)
        .map(str::to_string);

    let mut invoice_number = None;
    for pattern in INVOICE_NUMBER_PATTERNS {
        let Ok(re) = Regex::new(pattern) else { continue };
        if let Some(captures) = re.captures(&cleaned) {
            invoice_number = captures.get(1).map(|m| m.as_str().to_string());
            break;
        }
    }

    // Amounts appear in reading order; the grand total is the last one.
    let total_amount = match Regex::new(PRICE_PATTERN) {
        Ok(re) => re
            .find_iter(&cleaned)
            .last()
            .map(|m| m.as_str().to_string()),
        Err(_) => None,
    };

    let mut products = Vec::new();
    if let Ok(re) = Regex::new(PRODUCT_LINE_PATTERN) {
        for line in cleaned.lines() {
            let Some(captures) = re.captures(line) else {
                continue;
            };
            let quantity = captures
                .get(2)
                .and_then(|m| m.as_str().parse::<u32>().ok());
            let (Some(description), Some(quantity), Some(unit_price), Some(line_total)) = (
                captures.get(1).map(|m| m.as_str().trim().to_string()),
                quantity,
                captures.get(3).map(|m| m.as_str().to_string()),
                captures.get(4).map(|m| m.as_str().to_string()),
            ) else {
                continue;
            };
            products.push(FallbackLine {
                description,
                quantity,
                unit_price,
                line_total,
            });
        }
    }

    FallbackInvoice {
        supplier,
        invoice_number,
        total_amount,
        products,
    }
}

fn collapse_inline_whitespace(text: &str) -> String {
    match Regex::new(r"[ \t]+") {
        Ok(re) => re.replace_all(text, " ").into_owned(),
        Err(_) => text.to_string(),
    }
}

// str::isupper semantics: at least one cased character and none lowercase.
fn is_all_uppercase(line: &str) -> bool {
    let mut has_cased = false;
    for c in line.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;

    struct ScriptedLlm {
        reply: Option<String>,
    }

    #[async_trait]
    impl ChatCompleter for ScriptedLlm {
        async fn complete(
            &self,
            _model: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _temperature: f32,
        ) -> Result<String, ProviderError> {
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(ProviderError::Response {
                    provider: "llm".to_string(),
                    details: "connection refused".to_string(),
                }),
            }
        }
    }

    fn extractor(reply: Option<&str>) -> InvoiceExtractor<ScriptedLlm> {
        InvoiceExtractor::new(
            ScriptedLlm {
                reply: reply.map(str::to_string),
            },
            "test-model",
        )
    }

    #[test]
    fn fallback_extracts_number_line_and_total() {
        let text = "INVOICE 42\nWidget 3 10,00 30,00\nTotal 30,00";
        let data = regex_fallback(text);

        assert_eq!(data.invoice_number.as_deref(), Some("42"));
        assert_eq!(data.total_amount.as_deref(), Some("30,00"));
        assert_eq!(data.products.len(), 1);

        let line = &data.products[0];
        assert_eq!(line.description, "Widget");
        assert_eq!(line.quantity, 3);
        assert_eq!(line.unit_price, "10,00");
        assert_eq!(line.line_total, "30,00");
    }

    #[test]
    fn fallback_on_empty_text_is_all_null() {
        let data = regex_fallback("");
        assert_eq!(data.supplier, None);
        assert_eq!(data.invoice_number, None);
        assert_eq!(data.total_amount, None);
        assert!(data.products.is_empty());
    }

    #[test]
    fn supplier_is_the_first_uppercase_line_in_the_header() {
        let text = "invoice preamble\nACME TRADING LTD\nSomething Else\nMORE CAPS";
        let data = regex_fallback(text);
        assert_eq!(data.supplier.as_deref(), Some("ACME TRADING LTD"));
    }

    #[test]
    fn supplier_is_only_searched_in_the_first_ten_lines() {
        let mut lines = vec!["lowercase header"; 10];
        lines.push("LATE SUPPLIER NAME");
        let data = regex_fallback(&lines.join("\n"));
        assert_eq!(data.supplier, None);
    }

    #[test]
    fn greek_invoice_labels_take_priority_over_english() {
        let text = "ΤΙΜΟΛΟΓΙΟ 7\nInvoice 9";
        let data = regex_fallback(text);
        assert_eq!(data.invoice_number.as_deref(), Some("7"));
    }

    #[test]
    fn grouped_amounts_parse_and_the_last_one_wins() {
        let text = "net 1.234,56\nvat 296,29\ngross 1.530,85";
        let data = regex_fallback(text);
        assert_eq!(data.total_amount.as_deref(), Some("1.530,85"));
    }

    #[test]
    fn lines_missing_a_field_are_skipped() {
        let text = "Widget 3 10,00 30,00\nOnly two 5 7,50\nGasket 2 1,25 2,50";
        let data = regex_fallback(text);
        let descriptions: Vec<&str> = data
            .products
            .iter()
            .map(|line| line.description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["Widget", "Gasket"]);
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_a_tagged_fallback() {
        let extractor = extractor(None);
        let outcome = extractor
            .parse_invoice_text("INVOICE 42\nTotal 30,00")
            .await;

        match outcome {
            ExtractionOutcome::FallbackRegex { error, data } => {
                assert!(error.contains("connection refused"));
                assert_eq!(data.invoice_number.as_deref(), Some("42"));
            }
            ExtractionOutcome::Llm { .. } => panic!("expected the fallback path"),
        }
    }

    #[tokio::test]
    async fn non_json_reply_degrades_to_the_fallback() {
        let extractor = extractor(Some("Sure! Here is the invoice data you asked for."));
        let outcome = extractor.parse_invoice_text("Invoice 9").await;
        assert!(matches!(
            outcome,
            ExtractionOutcome::FallbackRegex { .. }
        ));
    }

    #[tokio::test]
    async fn schema_matching_reply_is_the_primary_result() {
        let reply = r#"{
            "customer_name": "ACME",
            "vat_number": "EL123456789",
            "invoice_number": "42",
            "invoice_date": "2024-03-01",
            "series": null,
            "product_lines": [
                {"description": "Widget", "quantity": 3, "unit_price": 10.0, "line_total": 30.0}
            ],
            "totals": {"subtotal": 30.0, "vat_amount": 7.2, "grand_total": 37.2}
        }"#;
        let extractor = extractor(Some(reply));
        let outcome = extractor.parse_invoice_text("whatever ocr text").await;

        match outcome {
            ExtractionOutcome::Llm { data } => {
                assert_eq!(data.invoice_number.as_deref(), Some("42"));
                assert_eq!(data.product_lines.len(), 1);
                let totals = data.totals.expect("totals present");
                assert_eq!(totals.grand_total, Some(37.2));
            }
            ExtractionOutcome::FallbackRegex { error, .. } => {
                panic!("expected the llm path, fell back with: {error}")
            }
        }
    }

    #[tokio::test]
    async fn parse_never_fails_even_on_empty_input() {
        let extractor = extractor(None);
        let outcome = extractor.parse_invoice_text("").await;
        match outcome {
            ExtractionOutcome::FallbackRegex { data, .. } => {
                assert_eq!(data, regex_fallback(""));
            }
            ExtractionOutcome::Llm { .. } => panic!("expected the fallback path"),
        }
    }

    #[test]
    fn outcome_serializes_with_a_source_tag() {
        let outcome = ExtractionOutcome::FallbackRegex {
            error: "boom".to_string(),
            data: regex_fallback(""),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["source"], "fallback_regex");
        assert_eq!(value["error"], "boom");
    }
}
