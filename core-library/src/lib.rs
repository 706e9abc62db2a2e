//! # Catalog Library Module
//!
//! Owns the catalog database and the per-kind access paths into it.
//!
//! ## Overview
//!
//! This crate manages:
//! - The SQLite schema, migrations and connection pool ([`db`])
//! - The [`CatalogItem`](models::CatalogItem) model
//! - Multi-key identity resolution with leading-zero normalisation ([`identity`])
//! - The repository trait and its SQLite implementation ([`repositories`])
//! - The per-kind [`CatalogManager`](manager::CatalogManager) facade

pub mod db;
pub mod error;
pub mod identity;
pub mod manager;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use identity::{normalize_code, IdentityKey, IdentityResolver, MatchPolicy};
pub use manager::CatalogManager;
pub use models::CatalogItem;
