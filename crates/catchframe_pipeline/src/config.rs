//! Pipeline configuration
//!
//! Read from a TOML file; every section and field is optional and falls back
//! to the values the hosted deployment used.

use catchframe_protocol::defaults::{
    DEFAULT_INTAKE_TOPIC, DEFAULT_MAX_ARTIFACT_BYTES, DEFAULT_PROCESSED_BUCKET,
    DEFAULT_PROCESSED_EXTENSION, DEFAULT_PUBLIC_BASE_URL, DEFAULT_PUBLIC_BUCKET,
    DEFAULT_PUBLISH_TOPIC, DEFAULT_RAW_BUCKET, DEFAULT_RAW_EXTENSION,
};
use catchframe_protocol::{ArtifactForm, ObjectLocation, PublicUrlFormat, ReportId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which transitions are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// pending -> downloaded -> completed, with an external transform
    #[default]
    Transcode,
    /// pending -> completed, publishing the raw upload as-is
    Direct,
}

/// How the terminal stage makes the finished artifact public.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishStrategy {
    /// Server-side copy into the public bucket, then mark it public
    #[default]
    Relocate,
    /// Toggle visibility on the object where it already is
    InPlace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub raw: String,
    pub processed: String,
    pub public: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            raw: DEFAULT_RAW_BUCKET.to_string(),
            processed: DEFAULT_PROCESSED_BUCKET.to_string(),
            public: DEFAULT_PUBLIC_BUCKET.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub raw_extension: String,
    pub processed_extension: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            raw_extension: DEFAULT_RAW_EXTENSION.to_string(),
            processed_extension: DEFAULT_PROCESSED_EXTENSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Published by intake; consumed by the first stage
    pub intake: String,
    /// Consumed by the publish stage in transcode mode
    pub publish: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            intake: DEFAULT_INTAKE_TOPIC.to_string(),
            publish: DEFAULT_PUBLISH_TOPIC.to_string(),
        }
    }
}

/// External transform invocation. `{input}` and `{output}` in `args` are
/// replaced with the working-copy paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: ["-i", "{input}", "-c:v", "copy", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: 300,
        }
    }
}

impl TransformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// In-flight handlers per worker
    pub concurrency: usize,
    /// How long a claimed delivery stays hidden from other consumers
    pub lease_secs: u64,
    pub poll_interval_ms: u64,
    /// Deadline for one handler invocation, transform included
    pub stage_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease_secs: 600,
            poll_interval_ms: 500,
            stage_timeout_secs: 540,
        }
    }
}

impl WorkerConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// A non-terminal report untouched for this long is re-triggered
    pub stall_after_secs: u64,
    pub batch_size: usize,
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            stall_after_secs: 900,
            batch_size: 100,
            interval_secs: 300,
        }
    }
}

impl SweepConfig {
    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_after_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub max_bytes: u64,
    /// Publish tries before intake gives up and reports the id for a kick
    pub publish_attempts: u32,
    pub publish_backoff_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            publish_attempts: 3,
            publish_backoff_ms: 200,
        }
    }
}

/// Root of the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    pub publish: PublishStrategy,
    pub public_base_url: String,
    pub buckets: BucketConfig,
    pub artifacts: ArtifactConfig,
    pub topics: TopicConfig,
    pub transform: TransformConfig,
    pub retry: RetryPolicy,
    pub worker: WorkerConfig,
    pub sweep: SweepConfig,
    pub intake: IntakeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            publish: PublishStrategy::default(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            buckets: BucketConfig::default(),
            artifacts: ArtifactConfig::default(),
            topics: TopicConfig::default(),
            transform: TransformConfig::default(),
            retry: RetryPolicy::default(),
            worker: WorkerConfig::default(),
            sweep: SweepConfig::default(),
            intake: IntakeConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        for (name, value) in [
            ("buckets.raw", &self.buckets.raw),
            ("buckets.processed", &self.buckets.processed),
            ("buckets.public", &self.buckets.public),
            ("artifacts.raw_extension", &self.artifacts.raw_extension),
            ("artifacts.processed_extension", &self.artifacts.processed_extension),
            ("topics.intake", &self.topics.intake),
            ("public_base_url", &self.public_base_url),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{name} must not be empty"));
            }
        }

        if self.mode == PipelineMode::Transcode {
            if self.topics.publish.trim().is_empty() {
                return invalid("topics.publish must not be empty in transcode mode".into());
            }
            if self.topics.publish == self.topics.intake {
                return invalid("topics.intake and topics.publish must differ".into());
            }
            if self.transform.program.trim().is_empty() {
                return invalid("transform.program must not be empty".into());
            }
            for placeholder in ["{input}", "{output}"] {
                if !self.transform.args.iter().any(|a| a.contains(placeholder)) {
                    return invalid(format!("transform.args must contain {placeholder}"));
                }
            }
            if self.transform.timeout_secs == 0 {
                return invalid("transform.timeout_secs must be at least 1".into());
            }
            if self.transform.timeout_secs >= self.worker.stage_timeout_secs {
                return invalid(
                    "transform.timeout_secs must be below worker.stage_timeout_secs".into(),
                );
            }
        }

        if self.publish == PublishStrategy::Relocate {
            let source = match self.mode {
                PipelineMode::Transcode => &self.buckets.processed,
                PipelineMode::Direct => &self.buckets.raw,
            };
            if source == &self.buckets.public {
                return invalid("relocate publishing needs a distinct public bucket".into());
            }
        }

        if self.worker.concurrency == 0 {
            return invalid("worker.concurrency must be at least 1".into());
        }
        if self.worker.stage_timeout_secs == 0 {
            return invalid("worker.stage_timeout_secs must be at least 1".into());
        }
        if self.worker.lease_secs <= self.worker.stage_timeout_secs {
            return invalid("worker.lease_secs must exceed worker.stage_timeout_secs".into());
        }
        if self.intake.max_bytes == 0 {
            return invalid("intake.max_bytes must be at least 1".into());
        }
        if self.intake.publish_attempts == 0 {
            return invalid("intake.publish_attempts must be at least 1".into());
        }
        if self.sweep.batch_size == 0 {
            return invalid("sweep.batch_size must be at least 1".into());
        }
        self.retry.validate().map_err(ConfigError::Invalid)
    }

    /// Deterministic storage location of one artifact form.
    pub fn location(&self, form: ArtifactForm, id: &ReportId) -> ObjectLocation {
        match form {
            ArtifactForm::Raw => {
                ObjectLocation::for_report(&self.buckets.raw, id, &self.artifacts.raw_extension)
            }
            ArtifactForm::Processed => ObjectLocation::for_report(
                &self.buckets.processed,
                id,
                &self.artifacts.processed_extension,
            ),
        }
    }

    /// The form the terminal stage publishes.
    pub fn published_form(&self) -> ArtifactForm {
        match self.mode {
            PipelineMode::Transcode => ArtifactForm::Processed,
            PipelineMode::Direct => ArtifactForm::Raw,
        }
    }

    /// Where the finished artifact lives once public.
    pub fn public_location(&self, id: &ReportId) -> ObjectLocation {
        let source = self.location(self.published_form(), id);
        match self.publish {
            PublishStrategy::Relocate => ObjectLocation::new(&self.buckets.public, source.key),
            PublishStrategy::InPlace => source,
        }
    }

    pub fn url_format(&self) -> PublicUrlFormat {
        PublicUrlFormat::new(&self.public_base_url)
    }
}
