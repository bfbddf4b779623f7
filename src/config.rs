use crate::aggregator::DEFAULT_SEPARATOR;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub export: Export,
    #[serde(default)]
    pub cleanup: Cleanup,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub executable: String,
    pub language: String,
    /// 0 disables the limit; a stuck engine then stalls the batch.
    pub recognize_timeout_seconds: u64,
    pub extra_args: Vec<String>,
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            executable: "tesseract".into(),
            language: "eng".into(),
            recognize_timeout_seconds: 0,
            extra_args: Vec::new(),
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_document_bytes: usize,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_document_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub listen_addr: String,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Export {
    pub separator: String,
    pub combined_filename: String,
    pub single_basename: String,
}
impl Default for Export {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.into(),
            combined_filename: "ocr_results.txt".into(),
            single_basename: "extracted_text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Cleanup {
    /// Off by default: recognized text is stored exactly as the engine returns it.
    pub enabled: bool,
    pub normalize_unicode: bool,
    pub normalize_newlines: bool,
    pub trim_trailing_whitespace: bool,
    pub remove_by_regex: bool,
    pub patterns: Vec<String>,
}
impl Default for Cleanup {
    fn default() -> Self {
        Self {
            enabled: false,
            normalize_unicode: true,
            normalize_newlines: true,
            trim_trailing_whitespace: true,
            remove_by_regex: false,
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub out_dir: String,
    pub write_report_json: bool,
    pub report_filename: String,
    pub print_summary: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            write_report_json: true,
            report_filename: "report.json".into(),
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: false,
        }
    }
}
