//! Local entity storage for Goalpost.
//!
//! This crate provides:
//! - The `EntityStore` trait, one implementation per entity kind
//! - `MemoryStore` for tests and ephemeral use
//! - `SqliteStore` for durable on-device storage
//! - Goal reordering on top of any store

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{reorder_goals, EntityStore, KindSummary, LocalStore};
