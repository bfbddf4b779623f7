//! Extraction results keyed by document identity, and their export encodings.

use crate::document::DocumentId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_SEPARATOR: &str = "\n\n--- Next File ---\n\n";

pub const PLAIN_TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: DocumentId,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    PlainText,
    RichDocument,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::PlainText => PLAIN_TEXT_CONTENT_TYPE,
            ExportFormat::RichDocument => DOCX_CONTENT_TYPE,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::PlainText => "txt",
            ExportFormat::RichDocument => "docx",
        }
    }
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: Vec<ExtractionResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites in place, so an updated result keeps its original position.
    pub fn put(&mut self, id: DocumentId, text: String) {
        match self.results.iter_mut().find(|r| r.id == id) {
            Some(existing) => existing.text = text,
            None => self.results.push(ExtractionResult { id, text }),
        }
    }

    pub fn remove(&mut self, id: DocumentId) -> Option<ExtractionResult> {
        let pos = self.results.iter().position(|r| r.id == id)?;
        Some(self.results.remove(pos))
    }

    pub fn get(&self, id: DocumentId) -> Option<&ExtractionResult> {
        self.results.iter().find(|r| r.id == id)
    }

    pub fn list(&self) -> Vec<ExtractionResult> {
        self.results.clone()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn export_all(&self, separator: &str) -> Result<Vec<u8>> {
        if self.results.is_empty() {
            return Err(Error::EmptyExport);
        }
        let joined = self
            .results
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(separator);
        Ok(joined.into_bytes())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedResults(Arc<Mutex<ResultAggregator>>);

impl SharedResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ResultAggregator> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, id: DocumentId, text: String) {
        self.lock().put(id, text)
    }

    pub fn remove(&self, id: DocumentId) -> Option<ExtractionResult> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: DocumentId) -> Option<ExtractionResult> {
        self.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ExtractionResult> {
        self.lock().list()
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn export_all(&self, separator: &str) -> Result<Vec<u8>> {
        self.lock().export_all(separator)
    }
}

pub fn export_one(text: &str, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::PlainText => Ok(text.as_bytes().to_vec()),
        ExportFormat::RichDocument => docx_bytes(text),
    }
}

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"</Types>"#
);

const PACKAGE_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    r#"</Relationships>"#
);

const DOCUMENT_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"/>"#
);

fn docx_bytes(text: &str) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", PACKAGE_RELS_XML.to_string()),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS_XML.to_string()),
        ("word/document.xml", document_xml(text)),
    ];
    for (name, body) in parts {
        zip.start_file(name, options)?;
        zip.write_all(body.as_bytes())?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// One paragraph, one run; line breaks inside the text become `<w:br/>`.
fn document_xml(text: &str) -> String {
    let mut run = String::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            run.push_str("<w:br/>");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        run.push_str(r#"<w:t xml:space="preserve">"#);
        run.push_str(&xml_escape(line));
        run.push_str("</w:t>");
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
            "<w:body><w:p><w:r>{}</w:r></w:p><w:sectPr/></w:body></w:document>"
        ),
        run
    )
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Control characters other than tab are not allowed in XML 1.0.
            c if (c as u32) < 0x20 && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}
