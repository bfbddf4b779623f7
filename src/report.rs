use crate::{
    aggregator::ExtractionResult,
    document::{DocumentEntry, DocumentId, DocumentKind, ExtractionState},
    orchestrator::RunSummary,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started: String,
    pub finished: String,
    pub summary: RunSummary,
    pub entries: Vec<EntryReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryReport {
    pub id: DocumentId,
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: usize,
    pub sha256: String,
    pub state: ExtractionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chars: Option<usize>,
}

impl EntryReport {
    pub fn new(entry: &DocumentEntry, result: Option<&ExtractionResult>) -> Self {
        Self {
            id: entry.id,
            name: entry.document.name.clone(),
            kind: entry.document.kind.clone(),
            bytes: entry.document.len(),
            sha256: entry.document.digest.clone(),
            state: entry.state.clone(),
            chars: result.map(|r| r.text.chars().count()),
        }
    }
}

pub fn entry_reports(entries: &[DocumentEntry], results: &[ExtractionResult]) -> Vec<EntryReport> {
    entries
        .iter()
        .map(|e| EntryReport::new(e, results.iter().find(|r| r.id == e.id)))
        .collect()
}
