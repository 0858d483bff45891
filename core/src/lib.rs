//! Core types and seam traits for the Herald broadcast delivery service.
//!
//! Herald delivers administrator-authored broadcasts to large recipient
//! populations: every targeted recipient receives each message exactly once
//! over a live push stream while connected, or from a durable inbox on the
//! next connect. This crate holds the domain model and the traits at the
//! seams between layers; the adapter crates (`herald-postgres`,
//! `herald-redpanda`, `herald-redis`) provide the production
//! implementations, and `herald-testing` provides in-memory ones.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  Admin RPC   │
//! └──────┬───────┘
//!        ▼
//! ┌──────────────────┐
//! │ 1. Postgres      │◄─── state + outbox, one transaction
//! │    (outbox)      │
//! └──────┬───────────┘
//!        ▼
//! ┌──────────────────┐
//! │ 2. Relay → Bus   │◄─── at-least-once, key = aggregate id
//! └──────┬───────────┘
//!        ▼
//! ┌──────────────────┐
//! │ 3. Consumers     │◄─── idempotent fold into the read model,
//! │    (fan-out)     │     per-node push work items
//! └──────┬───────────┘
//!        ▼
//! ┌──────────────────┐
//! │ 4. Push sessions │◄─── live connections, bounded queues
//! └──────────────────┘
//! ```
//!
//! # Key principles
//!
//! - **Postgres first**: every state change is persisted together with its
//!   outbox event before anything reaches the bus.
//! - **At-least-once on the bus, exactly-once effect**: consumers probe the
//!   read model before writing and refuse to regress it.
//! - **Ordered per recipient**: delivery events share the recipient id as
//!   their partition key.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod bus;
pub mod delivery;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod frame;
pub mod inbox;
pub mod outbox;
pub mod preferences;
pub mod registry;
pub mod session;
pub mod stats;

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
