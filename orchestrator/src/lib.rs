//! The moving parts of the Herald delivery pipeline.
//!
//! - [`OutboxRelay`]: drains the transactional outbox onto the bus under a
//!   single-winner lock (C2).
//! - [`OrchestrationConsumer`]: folds bus events into the read model,
//!   idempotently, with bounded retries and dead-lettering (C3).
//! - [`TargetPlanner`]: expands ALL/ROLE/SELECTED into `PENDING` delivery
//!   rows ahead of activation (C8).
//! - [`Scheduler`]: the periodic jobs (scheduled activation, expiry,
//!   stale-session sweep, inbox-cache cleanup, session purge), each under
//!   its own cluster-wide lock (C7).
//! - [`RedriveService`]: replays dead-lettered deliveries through the
//!   normal pipeline (C9).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod consumer;
pub mod error;
pub mod redrive;
pub mod relay;
pub mod scheduler;
pub mod targeting;

pub use backoff::Backoff;
pub use consumer::{ConsumerConfig, OrchestrationConsumer};
pub use error::OrchestratorError;
pub use redrive::{RedriveService, RedriveSummary};
pub use relay::{OutboxRelay, RelayConfig};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use targeting::TargetPlanner;
