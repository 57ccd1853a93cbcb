//! Database module: chat registry, admins and broadcast audit log.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions over a SQLite pool.
//! - `store`: the pool wired into the broadcast engine's collaborator traits.
//!
//! The repository API is re-exported at `crate::db::*`.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::*;

pub use model::{BroadcastLog, ChatKind, ChatRecord, ChatStats};
pub use store::SqliteStore;
