pub mod tesseract;
pub mod types;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

pub use tesseract::TesseractEngine;
pub use types::{EngineDiag, Progress};

pub type ProgressFn<'a> = &'a (dyn Fn(Progress) + Send + Sync);

/// A stateful recognition backend. Not reentrant: callers serialize access.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    async fn load(&mut self) -> Result<()>;
    async fn configure_language(&mut self, language: &str) -> Result<()>;
    async fn recognize(&mut self, image: &[u8], progress: ProgressFn<'_>) -> Result<String>;
    async fn terminate(&mut self) -> Result<()>;
    async fn doctor(&self) -> Result<EngineDiag>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Unloaded,
    Loaded,
    Configured,
    Terminated,
}

/// Owns one backend and enforces the load → configure → recognize ordering.
pub struct EngineHandle {
    backend: Box<dyn RecognitionEngine>,
    phase: EnginePhase,
    language: Option<String>,
}

impl EngineHandle {
    pub fn new(backend: Box<dyn RecognitionEngine>) -> Self {
        Self {
            backend,
            phase: EnginePhase::Unloaded,
            language: None,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub async fn load(&mut self) -> Result<()> {
        if matches!(self.phase, EnginePhase::Loaded | EnginePhase::Configured) {
            return Ok(());
        }
        self.backend.load().await?;
        self.phase = EnginePhase::Loaded;
        self.language = None;
        info!("recognition engine loaded");
        Ok(())
    }

    pub async fn configure_language(&mut self, language: &str) -> Result<()> {
        match self.phase {
            EnginePhase::Unloaded | EnginePhase::Terminated => return Err(Error::EngineNotReady),
            EnginePhase::Configured if self.language.as_deref() == Some(language) => {
                return Ok(());
            }
            _ => {}
        }
        self.backend.configure_language(language).await?;
        self.phase = EnginePhase::Configured;
        self.language = Some(language.to_string());
        debug!(language, "recognition engine configured");
        Ok(())
    }

    /// Reported fractions are clamped to [0, 1] and never move backwards;
    /// a successful job always ends with a `1.0` signal.
    pub async fn recognize<F>(&mut self, image: &[u8], on_progress: F) -> Result<String>
    where
        F: Fn(Progress) + Send + Sync,
    {
        if self.phase != EnginePhase::Configured {
            return Err(Error::EngineNotReady);
        }

        let last = AtomicU32::new(0f32.to_bits());
        let emit = |p: Progress| {
            let prev = f32::from_bits(last.load(Ordering::Relaxed));
            let mut fraction = if p.fraction.is_nan() {
                prev
            } else {
                p.fraction.clamp(0.0, 1.0)
            };
            if fraction < prev {
                fraction = prev;
            }
            last.store(fraction.to_bits(), Ordering::Relaxed);
            let label = if fraction >= 1.0 {
                types::LABEL_DONE.to_string()
            } else {
                p.label
            };
            on_progress(Progress { fraction, label });
        };

        let text = self.backend.recognize(image, &emit).await?;

        if f32::from_bits(last.load(Ordering::Relaxed)) < 1.0 {
            emit(Progress::new(1.0, types::LABEL_DONE));
        }
        Ok(text)
    }

    /// Safe to call in any phase.
    pub async fn terminate(&mut self) -> Result<()> {
        if matches!(self.phase, EnginePhase::Loaded | EnginePhase::Configured) {
            self.backend.terminate().await?;
            info!("recognition engine terminated");
        }
        self.phase = EnginePhase::Terminated;
        self.language = None;
        Ok(())
    }

    pub async fn doctor(&self) -> Result<EngineDiag> {
        self.backend.doctor().await
    }
}
