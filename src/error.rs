use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported document kind: {0}")]
    UnsupportedKind(String),

    #[error("recognition engine is not loaded and configured")]
    EngineNotReady,

    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("nothing to export: no extraction results stored")]
    EmptyExport,

    #[error("a batch run is already in progress")]
    AlreadyRunning,

    #[error("recognition engine error: {0}")]
    Engine(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable name used in transport error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnsupportedKind(_) => "unsupported_kind",
            Error::EngineNotReady => "engine_not_ready",
            Error::ExtractionFailure(_) => "extraction_failure",
            Error::EmptyExport => "empty_export",
            Error::AlreadyRunning => "already_running",
            Error::Engine(_) => "engine_error",
            Error::Export(_) => "export_error",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Export(err.to_string())
    }
}
