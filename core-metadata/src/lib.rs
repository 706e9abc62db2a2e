//! # Cover Metadata Module
//!
//! Keeps cached cover art in step with the remote metadata services.
//!
//! ## Overview
//!
//! This crate provides:
//! - A two-tier cover cache with download and refresh ([`cover`])
//! - The bounded, drop-on-overflow id queue ([`work_queue`])
//! - Per-item cool-down bookkeeping ([`cooldown`])
//! - The per-kind background freshness worker ([`freshness`])

pub mod cooldown;
pub mod cover;
pub mod error;
pub mod freshness;
pub mod work_queue;

pub use cooldown::CooldownTracker;
pub use cover::CoverService;
pub use error::{MetadataError, Result};
pub use freshness::{CheckOutcome, CoverFreshnessUpdater};
pub use work_queue::WorkQueue;
