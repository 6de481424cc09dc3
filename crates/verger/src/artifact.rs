//! Artifact collection: screenshots, step logs and the run summary.
//!
//! Files land flat in the output directory as `<name>.png`,
//! `<scenario>.log` and `run-summary.json`. Writes go through a temporary
//! file and a rename, so a partially written PNG is never visible.

use crate::driver::CaptureArea;
use crate::locator::Selector;
use crate::result::{VergerError, VergerResult};
use crate::runner::RunResult;
use crate::scenario::ScreenshotScope;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// File name of the run summary
pub const SUMMARY_FILE: &str = "run-summary.json";

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// PNG screenshot
    Screenshot,
    /// Plain-text step log
    Log,
}

impl ArtifactKind {
    /// File extension
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Screenshot => "png",
            Self::Log => "log",
        }
    }
}

/// A file produced by a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Scenario that produced it
    pub scenario: String,
    /// Logical name (file stem before sanitising)
    pub name: String,
    /// Content type
    pub kind: ArtifactKind,
    /// Where it was written
    pub path: PathBuf,
}

/// Writes artifacts and remembers the latest record per file
#[derive(Debug)]
pub struct ArtifactCollector {
    output_dir: PathBuf,
    registry: Mutex<BTreeMap<PathBuf, Artifact>>,
}

impl ArtifactCollector {
    /// Collector writing under `output_dir`; the directory is created lazily
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    /// Output directory
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path an artifact name maps to
    #[must_use]
    pub fn path_for(&self, name: &str, kind: ArtifactKind) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", sanitize(name), kind.extension()))
    }

    /// Capture a screenshot of the session's page.
    ///
    /// Capturing an existing name replaces both the file and the record.
    ///
    /// # Errors
    ///
    /// Returns `SelectorNotFound` when an element scope has no visible match,
    /// the driver's error if capture fails, or `ArtifactWriteError`
    pub async fn capture(
        &self,
        session: &Session,
        scenario: &str,
        name: &str,
        scope: &ScreenshotScope,
    ) -> VergerResult<Artifact> {
        let area = match scope {
            ScreenshotScope::FullPage => CaptureArea::FullPage,
            ScreenshotScope::Element(selector) => element_area(session, selector).await?,
        };
        let bytes = session.driver().screenshot(area).await?;
        let path = self.path_for(name, ArtifactKind::Screenshot);
        self.write_atomic(&path, &bytes).await?;
        info!(scenario, name, path = %path.display(), "screenshot captured");
        Ok(self.record(Artifact {
            scenario: scenario.to_string(),
            name: name.to_string(),
            kind: ArtifactKind::Screenshot,
            path,
        }))
    }

    /// Write a scenario's step log
    ///
    /// # Errors
    ///
    /// Returns `ArtifactWriteError`
    pub async fn write_log(&self, scenario: &str, lines: &[String]) -> VergerResult<Artifact> {
        let path = self.path_for(scenario, ArtifactKind::Log);
        let mut body = lines.join("\n");
        body.push('\n');
        self.write_atomic(&path, body.as_bytes()).await?;
        Ok(self.record(Artifact {
            scenario: scenario.to_string(),
            name: scenario.to_string(),
            kind: ArtifactKind::Log,
            path,
        }))
    }

    /// Write `run-summary.json`
    ///
    /// # Errors
    ///
    /// Returns `ArtifactWriteError`, or `Json` if the result cannot be encoded
    pub async fn write_summary(&self, result: &RunResult) -> VergerResult<PathBuf> {
        let path = self.output_dir.join(SUMMARY_FILE);
        let body = serde_json::to_vec_pretty(result)?;
        self.write_atomic(&path, &body).await?;
        info!(path = %path.display(), "run summary written");
        Ok(path)
    }

    /// Every recorded artifact, ordered by path
    #[must_use]
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Artifacts recorded for one scenario
    #[must_use]
    pub fn artifacts_for(&self, scenario: &str) -> Vec<Artifact> {
        self.artifacts()
            .into_iter()
            .filter(|a| a.scenario == scenario)
            .collect()
    }

    fn record(&self, artifact: Artifact) -> Artifact {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = registry.insert(artifact.path.clone(), artifact.clone()) {
            debug!(
                path = %artifact.path.display(),
                previous = %previous.scenario,
                "artifact replaced"
            );
        }
        artifact
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> VergerResult<()> {
        let write_err = |e: std::io::Error| VergerError::ArtifactWriteError {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(write_err)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        Ok(())
    }
}

async fn element_area(session: &Session, selector: &Selector) -> VergerResult<CaptureArea> {
    let probe = session.driver().probe(selector).await?;
    match probe.bounding_box {
        Some(bounds) if probe.visible && !bounds.is_empty() => Ok(CaptureArea::Clip(bounds)),
        _ => Err(VergerError::SelectorNotFound {
            selector: selector.to_string(),
        }),
    }
}

/// Map a name to a safe file stem
#[must_use]
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "artifact".to_string()
    } else {
        cleaned.to_string()
    }
}
