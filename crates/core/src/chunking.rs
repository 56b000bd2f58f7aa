use crate::error::IngestError;

/// Splits `text` into consecutive character windows of `chunk_size`,
/// advancing the window start by `chunk_size - overlap` each step. The final
/// window may be shorter than `chunk_size`; empty input yields no chunks.
///
/// Callers are expected to bound the input with [`truncate_chars`] and to cap
/// how many chunks they consume — both are resource policy, not chunker
/// invariants.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>, IngestError> {
    if overlap == 0 || overlap >= chunk_size {
        return Err(IngestError::InvalidParameter(format!(
            "chunking requires 0 < overlap < chunk_size, got chunk_size={chunk_size} overlap={overlap}"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += stride;
    }

    Ok(chunks)
}

/// Bounds `text` to at most `max_chars` characters, cutting on a char
/// boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
