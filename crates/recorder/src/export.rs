//! Stage-B: asynchronous export of Stage-A artifacts.
//!
//! A dedicated worker drains Stage-A on an interval, content-addresses each
//! artifact, and hands it to an [`ExportSink`].  Sink failures are logged
//! and dropped — Stage-B must never apply backpressure to Stage-A, block
//! turn terminalization, or delay cancellation propagation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vox_domain::trace::TraceEvent;
use vox_domain::{Error, Result};

use crate::stage_a::StageA;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Artifacts and sinks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which Stage-A ring an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Baseline,
    Detail,
}

/// A content-addressed export artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    /// Hex sha-256 of the serialized body.
    pub address: String,
    pub kind: ArtifactKind,
    pub body: serde_json::Value,
}

impl ExportArtifact {
    pub fn new(kind: ArtifactKind, body: serde_json::Value) -> Self {
        let bytes = body.to_string();
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_bytes());
        ExportArtifact {
            address: hex::encode(hasher.finalize()),
            kind,
            body,
        }
    }
}

/// External destination for exported artifacts.
#[async_trait::async_trait]
pub trait ExportSink: Send + Sync {
    async fn export(&self, artifact: ExportArtifact) -> Result<()>;
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    artifacts: Mutex<Vec<ExportArtifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn artifacts(&self) -> Vec<ExportArtifact> {
        self.artifacts.lock().clone()
    }
}

#[async_trait::async_trait]
impl ExportSink for MemorySink {
    async fn export(&self, artifact: ExportArtifact) -> Result<()> {
        self.artifacts.lock().push(artifact);
        Ok(())
    }
}

/// Appends one artifact per line to a JSONL file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        Ok(JsonlSink {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl ExportSink for JsonlSink {
    async fn export(&self, artifact: ExportArtifact) -> Result<()> {
        use std::io::Write;
        let line = serde_json::to_string(&artifact)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}").map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exporter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The Stage-B worker handle.
pub struct StageBExporter {
    handle: tokio::task::JoinHandle<()>,
}

impl StageBExporter {
    /// Spawn the export worker on the current tokio runtime.
    pub fn spawn(
        stage_a: Arc<StageA>,
        sink: Arc<dyn ExportSink>,
        interval: Duration,
    ) -> StageBExporter {
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                export_pass(&stage_a, sink.as_ref()).await;
            }
        });
        StageBExporter { handle }
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// One drain-and-export pass.  Exposed so tests (and draining shutdown
/// paths) can run Stage-B deterministically.
pub async fn export_pass(stage_a: &StageA, sink: &dyn ExportSink) -> usize {
    let mut exported = 0;

    for evidence in stage_a.drain_finalized() {
        match serde_json::to_value(&evidence) {
            Ok(body) => {
                exported += export_one(sink, ExportArtifact::new(ArtifactKind::Baseline, body)).await
            }
            Err(e) => tracing::warn!(error = %e, "baseline evidence serialization failed"),
        }
    }
    for record in stage_a.drain_detail() {
        match serde_json::to_value(&record) {
            Ok(body) => {
                exported += export_one(sink, ExportArtifact::new(ArtifactKind::Detail, body)).await
            }
            Err(e) => tracing::warn!(error = %e, "detail record serialization failed"),
        }
    }

    exported
}

async fn export_one(sink: &dyn ExportSink, artifact: ExportArtifact) -> usize {
    let address = artifact.address.clone();
    let bytes = artifact.body.to_string().len();
    match sink.export(artifact).await {
        Ok(()) => {
            TraceEvent::ArtifactExported { address, bytes }.emit();
            1
        }
        Err(e) => {
            // Export failure never propagates; the runtime keeps going.
            TraceEvent::ExportFailed {
                address,
                error: e.to_string(),
            }
            .emit();
            0
        }
    }
}
