#![allow(dead_code)]

use async_trait::async_trait;
use batch_scribe::{
    config::Config,
    document::{Document, DocumentKind},
    engine::{EngineDiag, EngineHandle, Progress, ProgressFn, RecognitionEngine},
    error::{Error, Result},
    orchestrator::BatchOrchestrator,
};
use lopdf::content::{Content, Operation};
use lopdf::{Object, Stream, dictionary};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore};

/// Shared view into a [`FakeEngine`] that outlives the boxed engine.
#[derive(Clone)]
pub struct EngineSpy {
    pub calls: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
    pub overlapped: Arc<AtomicBool>,
    pub terminated: Arc<AtomicBool>,
    pub started: Arc<Notify>,
    pub gate: Option<Arc<Semaphore>>,
}

impl EngineSpy {
    fn new(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            overlapped: Arc::new(AtomicBool::new(false)),
            terminated: Arc::new(AtomicBool::new(false)),
            started: Arc::new(Notify::new()),
            gate,
        }
    }

    pub fn release(&self, jobs: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(jobs);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// "Recognizes" an image by echoing its bytes; images starting with `FAIL`
/// fail. Emits a deliberately unordered progress sequence.
pub struct FakeEngine {
    spy: EngineSpy,
    fail_load: bool,
    loaded: bool,
    language: Option<String>,
}

impl FakeEngine {
    pub fn new() -> (Self, EngineSpy) {
        Self::build(None, false)
    }

    /// Each recognition waits for one permit released through the spy.
    pub fn gated() -> (Self, EngineSpy) {
        Self::build(Some(Arc::new(Semaphore::new(0))), false)
    }

    pub fn failing_load() -> (Self, EngineSpy) {
        Self::build(None, true)
    }

    fn build(gate: Option<Arc<Semaphore>>, fail_load: bool) -> (Self, EngineSpy) {
        let spy = EngineSpy::new(gate);
        (
            Self {
                spy: spy.clone(),
                fail_load,
                loaded: false,
                language: None,
            },
            spy,
        )
    }
}

#[async_trait]
impl RecognitionEngine for FakeEngine {
    async fn load(&mut self) -> Result<()> {
        if self.fail_load {
            return Err(Error::Engine("engine binary missing".into()));
        }
        self.loaded = true;
        Ok(())
    }

    async fn configure_language(&mut self, language: &str) -> Result<()> {
        if !self.loaded {
            return Err(Error::EngineNotReady);
        }
        self.language = Some(language.to_string());
        Ok(())
    }

    async fn recognize(&mut self, image: &[u8], progress: ProgressFn<'_>) -> Result<String> {
        if self.language.is_none() {
            return Err(Error::EngineNotReady);
        }
        self.spy.calls.fetch_add(1, Ordering::SeqCst);
        if self.spy.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.spy.overlapped.store(true, Ordering::SeqCst);
        }
        self.spy.started.notify_one();

        progress(Progress::new(0.6, "recognizing text"));
        if let Some(gate) = &self.spy.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        progress(Progress::new(0.3, "recognizing text"));

        self.spy.in_flight.fetch_sub(1, Ordering::SeqCst);
        if image.starts_with(b"FAIL") {
            return Err(Error::ExtractionFailure("unreadable image".into()));
        }
        Ok(String::from_utf8_lossy(image).into_owned())
    }

    async fn terminate(&mut self) -> Result<()> {
        self.spy.terminated.store(true, Ordering::SeqCst);
        self.loaded = false;
        self.language = None;
        Ok(())
    }

    async fn doctor(&self) -> Result<EngineDiag> {
        Ok(EngineDiag {
            executable: "fake".into(),
            version: Some("fake 1.0".into()),
            languages: vec!["eng".into()],
            ok: true,
            error: None,
        })
    }
}

pub fn orchestrator_with(engine: FakeEngine) -> BatchOrchestrator {
    BatchOrchestrator::new(&Config::default(), EngineHandle::new(Box::new(engine)))
        .expect("default config builds")
}

pub fn image(text: &str) -> Document {
    Document::with_kind(
        format!("{text}.png"),
        Some("image/png".into()),
        DocumentKind::Image,
        text.as_bytes().to_vec(),
    )
}

pub fn pdf(pages: &[&str]) -> Document {
    Document::with_kind(
        "doc.pdf",
        Some("application/pdf".into()),
        DocumentKind::PaginatedText,
        pdf_bytes(pages),
    )
}

/// Builds a PDF with one Courier text object per page.
pub fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("save pdf");
    buf
}
