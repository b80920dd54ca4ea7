//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use catchframe_pipeline::{
    Intake, PipelineConfig, PipelineContext, PipelineMode, StageHandler, Submission, Transform,
    TransformError, TransformOutput, Transition,
};
use catchframe_protocol::ReportId;
use catchframe_store::{MemoryArtifactStore, MemoryRecordStore, MemoryTriggerChannel, Stores};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Barrier, Notify};

pub const VIDEO: &[u8] = b"\x1a\x45\xdf\xa3webm-frames";

/// Copies input to output, counting runs. Optionally waits on a barrier so
/// concurrent handlers overlap inside the transform, or holds the first run
/// until released and then fails it.
#[derive(Default)]
pub struct FakeTransform {
    runs: AtomicU32,
    fail_runs: AtomicU32,
    barrier: Option<Barrier>,
    held_first_run: Option<Notify>,
}

impl FakeTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_barrier(parties: usize) -> Self {
        Self {
            barrier: Some(Barrier::new(parties)),
            ..Self::default()
        }
    }

    pub fn holding_first_run() -> Self {
        Self {
            held_first_run: Some(Notify::new()),
            ..Self::default()
        }
    }

    /// Let a held first run continue (to its failure).
    pub fn release(&self) {
        if let Some(gate) = &self.held_first_run {
            gate.notify_one();
        }
    }

    pub fn fail_next_runs(&self, n: u32) {
        self.fail_runs.store(n, Ordering::SeqCst);
    }

    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for FakeTransform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<TransformOutput, TransformError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        let mut failing = self
            .fail_runs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if let (0, Some(gate)) = (run, &self.held_first_run) {
            gate.notified().await;
            failing = true;
        }
        if failing {
            return Err(TransformError::Failed {
                program: "fake".to_string(),
                code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        tokio::fs::copy(input, output).await?;
        Ok(TransformOutput {
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        })
    }
}

pub struct Harness {
    pub ctx: Arc<PipelineContext>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub records: Arc<MemoryRecordStore>,
    pub channel: Arc<MemoryTriggerChannel>,
    pub transform: Arc<FakeTransform>,
}

pub fn test_config(mode: PipelineMode) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.mode = mode;
    config.public_base_url = "https://cdn.example.com".to_string();
    config.intake.publish_backoff_ms = 1;
    config
}

impl Harness {
    pub fn new(mode: PipelineMode) -> Self {
        Self::with_config(test_config(mode), FakeTransform::new())
    }

    pub fn with_config(config: PipelineConfig, transform: FakeTransform) -> Self {
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let channel = Arc::new(MemoryTriggerChannel::new());
        let transform = Arc::new(transform);
        let stores = Stores {
            artifacts: artifacts.clone(),
            records: records.clone(),
            channel: channel.clone(),
        };
        let ctx = Arc::new(PipelineContext::new(stores, config, transform.clone()).unwrap());
        Self {
            ctx,
            artifacts,
            records,
            channel,
            transform,
        }
    }

    pub fn intake(&self) -> Intake {
        Intake::new(self.ctx.clone())
    }

    pub fn handler(&self) -> StageHandler {
        StageHandler::new(self.ctx.clone())
    }

    pub fn transition(&self, index: usize) -> Transition {
        self.ctx.table.transitions()[index].clone()
    }

    pub async fn submit(&self, video: &[u8], contact: Option<&str>) -> ReportId {
        self.intake()
            .submit(submission(video, contact))
            .await
            .unwrap()
    }
}

pub fn submission<'a>(video: &'a [u8], contact: Option<&str>) -> Submission<&'a [u8]> {
    Submission {
        artifact: video,
        description: "crash on load".to_string(),
        diagnostic_log: r#"[{"level":"error","message":"TypeError: x is undefined"}]"#.to_string(),
        metadata: r#"{"userAgent":"Mozilla/5.0","url":"https://app.example.com"}"#.to_string(),
        contact_address: contact.map(str::to_string),
    }
}
