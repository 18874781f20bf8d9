//! Interface to the underlying document-database client.
//!
//! The adapter never talks to a database directly. Everything it needs from a client is
//! captured by three traits: [`Driver`] (connection, sessions, transactions),
//! [`NativeCollection`] (per-collection commands) and [`NativeCursor`] (streamed results).
//!
//! Two implementations ship with the crate: [`memory::MemoryDriver`], an in-process store
//! that interprets compiled filter documents, and `mongo::MongoDriver` (cargo feature
//! `mongodb`) backed by the official MongoDB client.

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
mod types;

pub use types::{
    Collation, CollationStrength, DEFAULT_LOCALE, FindOneOptions, FindOptions, ReadConcern,
    ReadPreference, SessionOptions, TransactionOptions, UpdateResult, WriteConcern,
};

use crate::context::Context;
use bson::{Bson, Document};
use thiserror::Error;

/// Failure reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("operation exceeded its deadline")]
    Timeout,

    #[error("operation context was cancelled")]
    Cancelled,

    #[error("client is disconnected")]
    Disconnected,

    #[error("unable to connect: {0}")]
    Connect(String),

    /// The server refused a write (duplicate key, document validation, ...).
    #[error("write rejected ({code}): {message}")]
    Write { code: i32, message: String },

    #[error("command failed ({code}): {message}")]
    Command { code: i32, message: String },

    #[error("transaction error: {message}")]
    Transaction { message: String, transient: bool },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("cursor is closed")]
    CursorClosed,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DriverError {
    #[must_use]
    pub const fn is_write_rejection(&self) -> bool {
        matches!(self, Self::Write { .. })
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transaction { transient: true, .. })
    }
}

/// Connection-level operations of a database client.
///
/// Implementations are cheap to clone and safe to share between threads; every clone refers
/// to the same underlying connection.
pub trait Driver: Clone + Send + Sync + 'static {
    /// Server-side session used to scope a transaction.
    type ClientSession: Send + Sync + 'static;
    type Collection: NativeCollection<ClientSession = Self::ClientSession>;

    fn database_name(&self) -> &str;

    /// Handle to a named collection. Performs no I/O.
    fn collection(&self, name: &str) -> Self::Collection;

    fn start_session(&self, options: &SessionOptions) -> Result<Self::ClientSession, DriverError>;

    fn start_transaction(
        &self,
        session: &Self::ClientSession,
        options: &TransactionOptions,
    ) -> Result<(), DriverError>;

    fn commit_transaction(&self, session: &Self::ClientSession) -> Result<(), DriverError>;

    fn abort_transaction(&self, session: &Self::ClientSession) -> Result<(), DriverError>;

    /// Releases the server session, aborting any transaction still open on it.
    fn end_session(&self, session: &Self::ClientSession);

    fn disconnect(&self) -> Result<(), DriverError>;
}

/// Commands against one collection. `session` is set when the call belongs to a transaction.
pub trait NativeCollection: Clone + Send + Sync + 'static {
    type ClientSession: Send + Sync + 'static;
    type Cursor: NativeCursor;

    fn name(&self) -> &str;

    fn count_documents(
        &self,
        ctx: &Context,
        session: Option<&Self::ClientSession>,
        filter: Document,
    ) -> Result<u64, DriverError>;

    fn find(
        &self,
        ctx: &Context,
        session: Option<&Self::ClientSession>,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<Self::Cursor, DriverError>;

    fn find_one(
        &self,
        ctx: &Context,
        session: Option<&Self::ClientSession>,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> Result<Option<Document>, DriverError>;

    /// Returns the `_id` of the inserted document.
    fn insert_one(
        &self,
        ctx: &Context,
        session: Option<&Self::ClientSession>,
        document: Document,
    ) -> Result<Bson, DriverError>;

    fn replace_one(
        &self,
        ctx: &Context,
        session: Option<&Self::ClientSession>,
        filter: Document,
        replacement: Document,
    ) -> Result<UpdateResult, DriverError>;

    fn update_one(
        &self,
        ctx: &Context,
        session: Option<&Self::ClientSession>,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, DriverError>;

    /// Returns the number of deleted documents.
    fn delete_many(
        &self,
        ctx: &Context,
        session: Option<&Self::ClientSession>,
        filter: Document,
    ) -> Result<u64, DriverError>;
}

/// A server-side result stream.
pub trait NativeCursor: Send {
    /// Moves to the next document. `Ok(false)` means the stream is exhausted.
    fn advance(&mut self, ctx: &Context) -> Result<bool, DriverError>;

    /// Document the cursor is positioned on after a successful `advance`.
    fn current(&self) -> Option<&Document>;

    /// Documents already fetched and not yet consumed from the current batch.
    fn buffered(&self) -> usize;

    fn close(&mut self, ctx: &Context) -> Result<(), DriverError>;
}
