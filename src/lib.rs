//! Workspace placeholder crate.
//!
//! Exposes the `desktop-shims` feature, which maps onto `core-service` with the
//! desktop bridge adapters enabled. Host applications can depend on
//! `catalog-workspace` instead of wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
