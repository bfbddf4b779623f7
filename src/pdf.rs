//! Text-layer extraction for paginated documents.

use crate::error::{Error, Result};
use lopdf::Document;
use std::sync::Arc;
use tracing::debug;

/// Per-page text in page order. A document without pages yields an empty list.
pub fn page_texts(content: &[u8]) -> Result<Vec<String>> {
    let doc = Document::load_mem(content)
        .map_err(|e| Error::ExtractionFailure(format!("parsing PDF: {e}")))?;

    let pages = doc.get_pages();
    debug!("pdf page_count={}", pages.len());

    let mut texts = Vec::with_capacity(pages.len());
    for page_number in pages.keys() {
        let text = doc
            .extract_text(&[*page_number])
            .map_err(|e| Error::ExtractionFailure(format!("page {page_number}: {e}")))?;
        // The text layer terminates each text object with a line break; drop
        // the trailing ones so page boundaries are exactly one newline.
        texts.push(text.trim_end_matches(['\r', '\n']).to_string());
    }
    Ok(texts)
}

pub fn join_pages(pages: &[String]) -> String {
    pages.join("\n")
}

/// Parsing is CPU-bound, so it runs on the blocking pool.
pub async fn extract_text(content: Arc<[u8]>) -> Result<String> {
    let pages = tokio::task::spawn_blocking(move || page_texts(&content))
        .await
        .map_err(|e| Error::ExtractionFailure(format!("pdf worker failed: {e}")))??;
    Ok(join_pages(&pages))
}
