//! Canonical default values shared by intake, workers and the launcher.

pub const DEFAULT_RAW_BUCKET: &str = "catchframe-raw-uploads";
pub const DEFAULT_PROCESSED_BUCKET: &str = "catchframe-processed-reports";
pub const DEFAULT_PUBLIC_BUCKET: &str = "catchframe-public-reports";
pub const DEFAULT_INTAKE_TOPIC: &str = "reports-to-process";
pub const DEFAULT_PUBLISH_TOPIC: &str = "reports-to-publish";
pub const DEFAULT_RAW_EXTENSION: &str = "webm";
pub const DEFAULT_PROCESSED_EXTENSION: &str = "mp4";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "https://storage.googleapis.com";
pub const DEFAULT_STATE_STORE_URL: &str = "sqlite:catchframe.sqlite";
pub const DEFAULT_ARTIFACT_ROOT: &str = "./artifacts";

/// 32 MiB, the multipart limit of the original upload form.
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 32 << 20;
