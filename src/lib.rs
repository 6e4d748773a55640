//! Ideawell - dual-store write/query engine
//!
//! Ideawell keeps an authoritative key-value record store and a derived
//! search index in sync under concurrent writes. Record writes are
//! synchronous and conditional; index writes are asynchronous projections
//! reported through an [`stores::IndexingTicket`].
//!
//! ## Services
//!
//! - **Record store**: conditional point writes, batch reads, range queries
//! - **Search index**: filtered/sorted queries over projected documents
//! - **Entity stores**: per-family write/query pipelines (accounts, users,
//!   ideas, comments, engagement)
//! - **Membership filter**: compact duplicate-action detection per actor
//! - **Sharded counter**: hot aggregate counters spread across partitions
//! - **Cursor codec**: encrypted, tamper-evident pagination tokens

pub mod config;
pub mod counter;
pub mod cursor;
pub mod db;
pub mod filter;
pub mod logging;
pub mod projection;
pub mod rank;
pub mod search;
pub mod stores;
pub mod types;
pub mod usage;

pub use config::{Args, EngineSettings};
pub use types::{EngineError, Result};
