use super::{types::*, ProgressFn, RecognitionEngine};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Drives the `tesseract` command-line program, one child process per job.
pub struct TesseractEngine {
    cfg: crate::config::Engine,
    executable: PathBuf,
    language: Option<String>,
}

impl TesseractEngine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            executable: resolve_executable(&cfg.engine.executable),
            cfg: cfg.engine.clone(),
            language: None,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        for (k, v) in &self.cfg.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run_capture(&self, args: &[&str]) -> Result<Output> {
        debug!("tesseract run {:?}", args);
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| {
                Error::Engine(format!(
                    "spawning {}: {e}",
                    self.executable.display()
                ))
            })?;
        if !output.status.success() {
            return Err(Error::Engine(format!(
                "{} {:?} failed: {}",
                self.executable.display(),
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    async fn query_version(&self) -> Result<String> {
        let output = self.run_capture(&["--version"]).await?;
        // Older builds print the banner on stderr.
        let raw = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let banner = String::from_utf8_lossy(&raw);
        Ok(banner.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn list_languages(&self) -> Result<Vec<String>> {
        let output = self.run_capture(&["--list-langs"]).await?;
        Ok(parse_language_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn timeout(&self) -> Option<Duration> {
        (self.cfg.recognize_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.cfg.recognize_timeout_seconds))
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    async fn load(&mut self) -> Result<()> {
        let version = self.query_version().await?;
        debug!("tesseract version {version}");
        Ok(())
    }

    async fn configure_language(&mut self, language: &str) -> Result<()> {
        let available = self.list_languages().await?;
        let missing: Vec<&str> = language
            .split('+')
            .filter(|l| !available.iter().any(|a| a == l))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Engine(format!(
                "language data not installed: {}",
                missing.join(", ")
            )));
        }
        self.language = Some(language.to_string());
        Ok(())
    }

    async fn recognize(&mut self, image: &[u8], progress: ProgressFn<'_>) -> Result<String> {
        let language = self.language.clone().ok_or(Error::EngineNotReady)?;
        progress(Progress::new(0.0, LABEL_RECOGNIZING));

        let mut cmd = self.command();
        cmd.arg("stdin").arg("stdout").arg("-l").arg(&language);
        cmd.args(&self.cfg.extra_args);
        cmd.stdin(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::Engine(format!("spawning {}: {e}", self.executable.display()))
        })?;

        // Feeding stdin counts against the timeout too: a child that stops
        // reading would otherwise block the write forever.
        let job = async move {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| std::io::Error::other("tesseract stdin not captured"))?;
            stdin.write_all(image).await?;
            drop(stdin);
            child.wait_with_output().await
        };

        let output = match self.timeout() {
            Some(limit) => match tokio::time::timeout(limit, job).await {
                Ok(res) => res?,
                Err(_) => {
                    warn!("tesseract timed out after {:?}", limit);
                    return Err(Error::ExtractionFailure(format!(
                        "recognition exceeded timeout ({limit:?})"
                    )));
                }
            },
            None => job.await?,
        };

        if !output.status.success() {
            return Err(Error::ExtractionFailure(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !output.stderr.is_empty() {
            debug!(
                "tesseract stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn terminate(&mut self) -> Result<()> {
        // Jobs run as short-lived children; only cached state is released.
        self.language = None;
        Ok(())
    }

    async fn doctor(&self) -> Result<EngineDiag> {
        let executable = self.executable.display().to_string();
        let version = match self.query_version().await {
            Ok(v) => v,
            Err(err) => {
                return Ok(EngineDiag {
                    executable,
                    version: None,
                    languages: Vec::new(),
                    ok: false,
                    error: Some(err.to_string()),
                });
            }
        };
        let (languages, error) = match self.list_languages().await {
            Ok(langs) => (langs, None),
            Err(err) => (Vec::new(), Some(err.to_string())),
        };
        let ok = error.is_none()
            && self
                .cfg
                .language
                .split('+')
                .all(|l| languages.iter().any(|a| a == l));
        Ok(EngineDiag {
            executable,
            version: Some(version),
            languages,
            ok,
            error,
        })
    }
}

fn resolve_executable(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("TESSERACT_EXE") {
            return expand_tilde(&env_val);
        }
        return PathBuf::from("tesseract");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// `--list-langs` prints a header line followed by one code per line.
fn parse_language_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}
