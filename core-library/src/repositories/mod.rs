//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! - Traits define the interface; tests and alternative stores implement them
//! - SQLite implementations use sqlx against the pool from [`crate::db`]
//! - All operations return [`crate::Result`]

pub mod catalog;

pub use catalog::{CatalogRepository, SqliteCatalogRepository};
