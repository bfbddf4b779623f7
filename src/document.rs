use crate::util::sha256_hex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Identity assigned by the registry at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(u64);

impl DocumentId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("doc-").unwrap_or(s);
        raw.parse::<u64>()
            .map(DocumentId)
            .map_err(|_| format!("invalid document id: {s}"))
    }
}

impl Serialize for DocumentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Image,
    PaginatedText,
    Other(String),
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.is_empty() || essence == "application/octet-stream" {
            return None;
        }
        if essence.starts_with("image/") {
            Some(DocumentKind::Image)
        } else if essence == "application/pdf" {
            Some(DocumentKind::PaginatedText)
        } else {
            Some(DocumentKind::Other(essence))
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::PaginatedText),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "pbm" | "pgm"
            | "ppm" => Some(DocumentKind::Image),
            _ => None,
        }
    }

    pub fn sniff(content: &[u8]) -> Option<Self> {
        if content.starts_with(PDF_MAGIC) {
            return Some(DocumentKind::PaginatedText);
        }
        image::guess_format(content).ok().map(|_| DocumentKind::Image)
    }

    /// Declared MIME type wins, then content sniffing, then the file extension.
    pub fn detect(mime: Option<&str>, name: &str, content: &[u8]) -> Self {
        if let Some(kind) = mime.and_then(Self::from_mime) {
            return kind;
        }
        if let Some(kind) = Self::sniff(content) {
            return kind;
        }
        if let Some(kind) = Self::from_extension(Path::new(name)) {
            return kind;
        }
        DocumentKind::Other(mime.unwrap_or("unknown").to_string())
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Image => f.write_str("image"),
            DocumentKind::PaginatedText => f.write_str("paginated_text"),
            DocumentKind::Other(mime) => write!(f, "other({mime})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub mime: Option<String>,
    pub kind: DocumentKind,
    pub digest: String,
    content: Arc<[u8]>,
}

impl Document {
    pub fn new(name: impl Into<String>, mime: Option<String>, content: Vec<u8>) -> Self {
        let name = name.into();
        let kind = DocumentKind::detect(mime.as_deref(), &name, &content);
        Self::with_kind(name, mime, kind, content)
    }

    pub fn with_kind(
        name: impl Into<String>,
        mime: Option<String>,
        kind: DocumentKind,
        content: Vec<u8>,
    ) -> Self {
        let digest = sha256_hex(&content);
        Self {
            name: name.into(),
            mime,
            kind,
            digest,
            content: content.into(),
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, None, content))
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn shared_content(&self) -> Arc<[u8]> {
        Arc::clone(&self.content)
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ExtractionState {
    Pending,
    Extracting,
    Done,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DocumentEntry {
    pub id: DocumentId,
    pub document: Document,
    pub state: ExtractionState,
}
