//! herald - Campaign content pipeline
//!
//! Turns campaign definitions into dated tasks, generates post content for
//! them with an LLM, and publishes the posts to several social platforms.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`campaign`] - Campaign records, recurrence and the stage timeline
//! - [`task`] - Per-occurrence tasks and their state machine
//! - [`pipeline`] - Schedule, generate and publish stages, guard, orchestrator, ticker
//! - [`platforms`] - Platform adapters and the parallel fan-out
//! - [`llm`] - Content generator client
//! - [`content`] - Prompt rendering, generated post storage, media resolution
//! - [`storage`] - Record store over named collections
//! - [`server`] - HTTP trigger surface
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Retry helpers
//!
//! # Example
//!
//! ```no_run
//! use herald::config::Config;
//! use herald::pipeline::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let orchestrator = Orchestrator::from_config(&config, None).await?;
//!     for report in orchestrator.run_all().await? {
//!         println!("{}: {} advanced", report.stage, report.advanced);
//!     }
//!     Ok(())
//! }
//! ```

pub mod campaign;
pub mod clock;
pub mod config;
pub mod content;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod platforms;
pub mod server;
pub mod storage;
pub mod task;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::campaign::{Campaign, CampaignInput, RecurrenceSpec};
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, HeraldErrorTrait, Result};
    pub use crate::pipeline::{Orchestrator, PipelineContext, StageReport, TaskOutcome};
    pub use crate::platforms::{PlatformAdapter, PlatformFanout, PlatformId, PublishResult};
    pub use crate::task::{CampaignTask, Stage, TaskStatus};
}

// Direct re-exports for convenience
pub use campaign::Campaign;
pub use task::{CampaignTask, TaskStatus};
