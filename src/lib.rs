//! Document-database persistence adapter.
//!
//! A [`Server`] wraps a [`driver::Driver`] and hands out [`Session`]s; a session hands out
//! [`Collection`]s that count, query, iterate, load, save and delete records described by
//! backend-neutral [`Expression`] trees. [`Server::with_transaction`] runs a block of work
//! atomically.

pub mod collection;
pub mod config;
pub mod context;
pub mod document;
pub mod driver;
pub mod errors;
pub mod expression;
pub mod geo;
pub mod iterator;
pub mod query;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod utils;

pub use collection::{Collection, CollectionSettings, SaveStrategy};
pub use config::ServerConfig;
pub use context::Context;
pub use document::{Journal, PersistentObject};
pub use driver::memory::{MemoryDriver, MemorySession};
pub use errors::{DbError, ErrorKind, Result};
pub use expression::{Expression, FULL_TEXT_FIELD, Operator};
pub use iterator::{DocumentIterator, IteratorState};
pub use query::{QueryOption, SortDirection};
pub use server::Server;
pub use session::Session;
pub use telemetry::SlowQueryMonitor;

/// Initializes logging from `log4rs.yaml` when present.
///
/// Call once at startup; later calls and a missing file are ignored.
pub fn init() -> std::result::Result<(), Box<dyn std::error::Error>> {
    utils::logger::init()?;
    Ok(())
}
