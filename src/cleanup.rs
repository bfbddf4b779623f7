//! Normalization applied to recognized text before it is stored.

use crate::config::Cleanup;
use crate::error::{Error, Result};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Compiled form of the `[cleanup]` section.
#[derive(Debug, Clone)]
pub struct TextCleanup {
    cfg: Cleanup,
    patterns: Vec<Regex>,
}

impl TextCleanup {
    pub fn new(cfg: &Cleanup) -> Result<Self> {
        let patterns = if cfg.remove_by_regex {
            cfg.patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Config(format!("invalid cleanup pattern: {e}")))?
        } else {
            Vec::new()
        };
        Ok(Self {
            cfg: cfg.clone(),
            patterns,
        })
    }

    pub fn apply(&self, text: &str) -> String {
        if !self.cfg.enabled {
            return text.to_string();
        }

        let mut out = text.to_string();

        if self.cfg.normalize_newlines {
            out = out.replace("\r\n", "\n").replace('\r', "\n");
        }

        if self.cfg.normalize_unicode {
            out = out.nfc().collect::<String>();
        }

        out = strip_control_chars(&out);

        if self.cfg.trim_trailing_whitespace {
            out = out
                .lines()
                .map(|l| l.trim_end())
                .collect::<Vec<_>>()
                .join("\n");
            out.truncate(out.trim_end().len());
        }

        if !self.patterns.is_empty() {
            out = out
                .lines()
                .filter(|line| !self.patterns.iter().any(|r| r.is_match(line.trim())))
                .collect::<Vec<_>>()
                .join("\n");
        }

        out
    }
}

fn strip_control_chars(s: &str) -> String {
    s.chars()
        .filter(|&ch| {
            // Structural whitespace survives; form feeds from page breaks do not.
            ch == '\n' || ch == '\r' || ch == '\t' || !ch.is_control()
        })
        .collect()
}
