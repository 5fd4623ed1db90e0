//! Persistent key-value storage for Embaixada.
//!
//! The offline cache and the sync queue are both built on a narrow,
//! string-to-string async store. This crate defines that interface and the
//! backends that implement it, plus a registry for picking a backend by name.
//!
//! # Design Principles
//! - Narrow surface: get/set/remove/keys/remove_many, no transactions or queries
//! - Async operations: callers never block the runtime on disk I/O
//! - Unified error semantics: every backend reports `Error::Storage` or `Error::Io`

pub mod store;
pub mod registry;
pub mod memory;
pub mod local;
pub mod sqlite;

pub use store::KeyValueStore;
pub use registry::{StoreRegistry, StoreFactory, create_default_registry};
pub use memory::MemoryStore;
pub use local::DirectoryStore;
pub use sqlite::SqliteStore;
