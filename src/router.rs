use crate::document::{Document, DocumentKind};
use crate::error::{Error, Result};
use crate::pdf;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DirectText,
    Recognition,
}

/// The single dispatch point from document kind to extraction strategy.
pub fn classify(document: &Document) -> Result<Strategy> {
    match &document.kind {
        DocumentKind::PaginatedText => Ok(Strategy::DirectText),
        DocumentKind::Image => Ok(Strategy::Recognition),
        DocumentKind::Other(mime) => Err(Error::UnsupportedKind(mime.clone())),
    }
}

pub async fn extract_direct(document: &Document) -> Result<String> {
    if classify(document)? != Strategy::DirectText {
        return Err(Error::UnsupportedKind(document.kind.to_string()));
    }
    pdf::extract_text(document.shared_content()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_kind() {
        let pdf = Document::with_kind("a.pdf", None, DocumentKind::PaginatedText, vec![]);
        let img = Document::with_kind("a.png", None, DocumentKind::Image, vec![]);
        let other = DocumentKind::Other("text/plain".into());
        let txt = Document::with_kind("a.txt", None, other, vec![]);
        assert_eq!(classify(&pdf).unwrap(), Strategy::DirectText);
        assert_eq!(classify(&img).unwrap(), Strategy::Recognition);
        assert!(matches!(classify(&txt), Err(Error::UnsupportedKind(m)) if m == "text/plain"));
    }

    #[tokio::test]
    async fn direct_extraction_rejects_images() {
        let img = Document::with_kind("a.png", None, DocumentKind::Image, vec![1, 2, 3]);
        let err = extract_direct(&img).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind(_)));
    }
}
