use serde::{Deserialize, Serialize};

pub const LABEL_IDLE: &str = "idle";
pub const LABEL_STARTING: &str = "starting";
pub const LABEL_RECOGNIZING: &str = "recognizing text";
pub const LABEL_DONE: &str = "done";

/// Progress of the current recognition job only, never the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub fraction: f32,
    pub label: String,
}

impl Progress {
    pub fn new(fraction: f32, label: impl Into<String>) -> Self {
        Self {
            fraction,
            label: label.into(),
        }
    }

    pub fn idle() -> Self {
        Self::new(0.0, LABEL_IDLE)
    }

    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub executable: String,
    pub version: Option<String>,
    pub languages: Vec<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
