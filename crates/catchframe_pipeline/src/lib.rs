//! Report lifecycle pipeline.
//!
//! Intake stores the raw artifact, creates the record and publishes a
//! trigger. Stage workers consume triggers and run one transition of the
//! table in [`fsm`] per delivery. Every handler is safe under redelivery and
//! under concurrent delivery of the same report: the only coordination point
//! is the record store's compare-and-set on status.

pub mod config;
pub mod context;
pub mod error;
pub mod fsm;
pub mod handler;
pub mod intake;
pub mod metrics;
pub mod retry;
pub mod sweep;
pub mod transform;
pub mod worker;

pub use config::{ConfigError, PipelineConfig, PipelineMode, PublishStrategy};
pub use context::{PipelineContext, Retrigger};
pub use error::{ErrorClass, PipelineError, PipelineResult};
pub use fsm::{decide, Decision, Stage, Transition, TransitionTable};
pub use handler::{PostAction, StageHandler, StageOutcome};
pub use intake::{Intake, Submission};
pub use metrics::{MetricsSnapshot, METRICS};
pub use retry::{RetryDecision, RetryPolicy};
pub use sweep::{SweepSummary, Sweeper};
pub use transform::{CommandTransform, Transform, TransformError, TransformOutput};
pub use worker::{process_delivery, DeliveryOutcome, RunSummary, StageWorker, WorkerHandle};
