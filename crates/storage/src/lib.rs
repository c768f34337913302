//! Persistence backends for Mentor.
//!
//! Two backends implement the store traits from `mentor-core`: an in-memory
//! store for tests and dev runs, and the SQLite store used in production.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
