//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the catalog crates:
//! - Logging and tracing setup
//! - Configuration and bridge validation
//! - Event bus
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its configuration type,
//! its event vocabulary and its logging conventions.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CatalogConfig, CatalogConfigBuilder, FreshnessSettings, TransferSettings};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
