//! # Pagesmith Core
//!
//! The orchestrator for the Pagesmith landing-page pipeline - owns the job
//! state machine, the durable queue/blob substrate, and the consumers that
//! drive briefs through the five generation stages.
//!
//! ## Architecture
//!
//! - `stage` - the canonical five-stage pipeline model
//! - `store/` - SQLite-backed blob store and queue client
//! - `index` - in-memory job state index with atomic transitions
//! - `controller` - admission and stage-advance state machine
//! - `intake` / `events` - queue consumers feeding the controller
//! - `reaper` - periodic eviction of terminal jobs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagesmith_core::{config::OrchestratorConfig, store::PipelineDb};
//!
//! let config = OrchestratorConfig::from_env()?;
//! let db = PipelineDb::open_at(&config.db_path)?;
//! ```

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod events;
pub mod index;
pub mod intake;
pub mod job;
pub mod messages;
pub mod metrics;
pub mod prompts;
pub mod reaper;
pub mod stage;
pub mod store;

pub use controller::PipelineController;
pub use index::JobIndex;
pub use metrics::Metrics;
pub use stage::Stage;
pub use store::{BlobStore, PipelineDb, QueueClient};
