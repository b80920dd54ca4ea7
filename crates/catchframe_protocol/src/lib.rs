//! Shared vocabulary for the CatchFrame report pipeline.
//!
//! Everything in here is plain data: the report document kept by the record
//! store, the artifact locations kept by the artifact store, and the payload
//! carried by trigger messages. Adapters and stage handlers live elsewhere.

pub mod defaults;
pub mod error;
pub mod location;
pub mod trigger;
pub mod types;

pub use catchframe_ids::{IdParseError, ReportId};
pub use error::ProtocolError;
pub use location::{ArtifactForm, ObjectLocation, PublicUrlFormat, Visibility};
pub use trigger::TriggerPayload;
pub use types::{NewReport, Report, ReportStatus, StatusUpdate};
