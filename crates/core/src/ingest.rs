use crate::error::IngestError;
use crate::models::{DocumentKind, DocumentMeta};
use lopdf::Document;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

/// Recursively lists the files the folder ingester knows how to read
/// (`.txt` and text-layer `.pdf`), sorted for stable ingestion order.
pub fn discover_document_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("pdf")
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Reads a document's text: UTF-8 with a latin-1 degradation for text files,
/// text-layer extraction for PDFs. Scanned PDFs with no text layer belong to
/// the OCR path, not here.
pub fn read_document_text(path: &Path) -> Result<String, IngestError> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        extract_pdf_text(path)
    } else {
        let bytes = fs::read(path)?;
        Ok(decode_text_bytes(&bytes))
    }
}

pub fn decode_text_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // latin-1 maps bytes 1:1 onto the first 256 code points
        Err(_) => bytes.iter().map(|&byte| byte as char).collect(),
    }
}

pub fn extract_pdf_text(path: &Path) -> Result<String, IngestError> {
    let document =
        Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(text);
        }
    }

    if pages.is_empty() {
        return Err(IngestError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(pages.join("\n"))
}

/// Builds ingestion metadata from a path, falling back to an opaque unique
/// name when the path has no UTF-8 file name.
pub fn document_meta_for_path(path: &Path, kind: DocumentKind) -> DocumentMeta {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("document-{}", Uuid::new_v4()));

    DocumentMeta::new(filename, kind)
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderReport {
    pub files_added: usize,
    pub chunks_added: usize,
    pub skipped: Vec<SkippedFile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;

        File::create(dir.path().join("b.txt")).and_then(|mut file| file.write_all(b"beta"))?;
        File::create(nested.join("a.txt")).and_then(|mut file| file.write_all(b"alpha"))?;
        File::create(dir.path().join("skip.docx")).and_then(|mut file| file.write_all(b"x"))?;

        let files = discover_document_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|pair| pair[0] < pair[1]));
        Ok(())
    }

    #[test]
    fn utf8_text_reads_verbatim() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("doc.txt");
        fs::write(&path, "καλημέρα world")?;

        assert_eq!(read_document_text(&path)?, "καλημέρα world");
        Ok(())
    }

    #[test]
    fn non_utf8_bytes_degrade_to_latin1() {
        let bytes = [b'c', b'a', b'f', 0xE9];
        assert_eq!(decode_text_bytes(&bytes), "café");
    }

    #[test]
    fn unreadable_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        assert!(matches!(
            read_document_text(&path),
            Err(IngestError::PdfParse(_))
        ));
        Ok(())
    }

    #[test]
    fn meta_uses_the_file_name() {
        let meta =
            document_meta_for_path(Path::new("/tmp/uploads/invoice.pdf"), DocumentKind::Invoice);
        assert_eq!(meta.filename, "invoice.pdf");
        assert_eq!(meta.kind, DocumentKind::Invoice);
    }
}
