//! Driver backed by the official MongoDB client (synchronous API).

use bson::{Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure};
use mongodb::options::{self, Acknowledgment, SelectionCriteria};
use mongodb::sync::{Client, ClientSession, Collection as SyncCollection, Cursor, Database};
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{
    Collation, CollationStrength, Driver, DriverError, FindOneOptions, FindOptions, NativeCollection, NativeCursor,
    ReadConcern, ReadPreference, SessionOptions, TransactionOptions, UpdateResult, WriteConcern,
};
use crate::context::Context;

const MAX_TIME_EXPIRED: i32 = 50;

fn map_error(err: MongoError) -> DriverError {
    let transient = err.contains_label(TRANSIENT_TRANSACTION_ERROR);
    let mapped = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(w)) => DriverError::Write { code: w.code, message: w.message.clone() },
        ErrorKind::Write(WriteFailure::WriteConcernError(w)) => {
            DriverError::Command { code: w.code, message: w.message.clone() }
        }
        ErrorKind::Command(c) if c.code == MAX_TIME_EXPIRED => DriverError::Timeout,
        ErrorKind::Command(c) => DriverError::Command { code: c.code, message: c.message.clone() },
        ErrorKind::BsonDeserialization(e) => DriverError::Decode(e.to_string()),
        ErrorKind::BsonSerialization(e) => DriverError::Encode(e.to_string()),
        ErrorKind::Transaction { message, .. } => DriverError::Transaction { message: message.clone(), transient },
        ErrorKind::ServerSelection { message, .. } => DriverError::Connect(message.clone()),
        ErrorKind::Io(e) => DriverError::Connect(e.to_string()),
        _ => DriverError::Command { code: 0, message: err.to_string() },
    };
    if transient && !matches!(mapped, DriverError::Transaction { .. }) {
        return DriverError::Transaction { message: mapped.to_string(), transient: true };
    }
    mapped
}

fn native_collation(c: &Collation) -> options::Collation {
    let strength = match c.strength {
        CollationStrength::Primary => options::CollationStrength::Primary,
        CollationStrength::Secondary => options::CollationStrength::Secondary,
        CollationStrength::Tertiary => options::CollationStrength::Tertiary,
    };
    options::Collation::builder().locale(c.locale.clone()).strength(strength).build()
}

fn native_read_concern(c: ReadConcern) -> options::ReadConcern {
    match c {
        ReadConcern::Local => options::ReadConcern::local(),
        ReadConcern::Majority => options::ReadConcern::majority(),
        ReadConcern::Snapshot => options::ReadConcern::snapshot(),
    }
}

fn native_write_concern(c: WriteConcern) -> options::WriteConcern {
    let mut out = options::WriteConcern::default();
    out.w = Some(match c {
        WriteConcern::Acknowledged => Acknowledgment::Nodes(1),
        WriteConcern::Majority => Acknowledgment::Majority,
    });
    out
}

fn native_read_preference(p: ReadPreference) -> SelectionCriteria {
    let pref = match p {
        ReadPreference::Primary => options::ReadPreference::Primary,
        ReadPreference::PrimaryPreferred => options::ReadPreference::PrimaryPreferred { options: Default::default() },
        ReadPreference::Secondary => options::ReadPreference::Secondary { options: Default::default() },
        ReadPreference::SecondaryPreferred => {
            options::ReadPreference::SecondaryPreferred { options: Default::default() }
        }
        ReadPreference::Nearest => options::ReadPreference::Nearest { options: Default::default() },
    };
    SelectionCriteria::ReadPreference(pref)
}

fn native_transaction(t: &TransactionOptions) -> options::TransactionOptions {
    let mut out = options::TransactionOptions::default();
    out.read_concern = Some(native_read_concern(t.read_concern));
    out.write_concern = Some(native_write_concern(t.write_concern));
    out.selection_criteria = Some(native_read_preference(t.read_preference));
    out.max_commit_time = t.max_commit_time;
    out
}

fn native_session(s: &SessionOptions) -> options::SessionOptions {
    let mut out = options::SessionOptions::default();
    out.causal_consistency = Some(s.causal_consistency);
    out.default_transaction_options = Some(native_transaction(&s.default_transaction_options));
    out
}

/// Connection to a MongoDB deployment and one of its databases.
#[derive(Clone, Debug)]
pub struct MongoDriver {
    client: Client,
    database: Database,
    name: String,
}

impl MongoDriver {
    /// # Errors
    /// `Connect` when the URI is invalid or the client cannot be created.
    pub fn connect(uri: &str, database: &str) -> Result<Self, DriverError> {
        let client = Client::with_uri_str(uri).map_err(|e| DriverError::Connect(e.to_string()))?;
        Ok(Self::from_client(client, database))
    }

    #[must_use]
    pub fn from_client(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, database: db, name: database.to_string() }
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }
}

/// A MongoDB client session. Commands issued with it are serialised.
///
/// The native session is released by [`Driver::end_session`]; later commands on it fail.
pub struct MongoSession {
    inner: Mutex<Option<ClientSession>>,
}

impl MongoSession {
    /// Runs `f` on the native session, or returns `None` once the session has ended.
    pub fn with_native<R>(&self, f: impl FnOnce(&mut ClientSession) -> R) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }

    fn run<R>(&self, f: impl FnOnce(&mut ClientSession) -> Result<R, MongoError>) -> Result<R, DriverError> {
        let mut guard = self.inner.lock();
        let Some(native) = guard.as_mut() else {
            return Err(DriverError::Transaction { message: "session has already ended".to_string(), transient: false });
        };
        f(native).map_err(map_error)
    }
}

impl Driver for MongoDriver {
    type ClientSession = MongoSession;
    type Collection = MongoCollection;

    fn database_name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> MongoCollection {
        MongoCollection { inner: self.database.collection::<Document>(name) }
    }

    fn start_session(&self, options: &SessionOptions) -> Result<MongoSession, DriverError> {
        let session = self.client.start_session().with_options(native_session(options)).run().map_err(map_error)?;
        Ok(MongoSession { inner: Mutex::new(Some(session)) })
    }

    fn start_transaction(&self, session: &MongoSession, options: &TransactionOptions) -> Result<(), DriverError> {
        session.run(|native| native.start_transaction().with_options(native_transaction(options)).run())
    }

    fn commit_transaction(&self, session: &MongoSession) -> Result<(), DriverError> {
        session.run(|native| native.commit_transaction().run())
    }

    fn abort_transaction(&self, session: &MongoSession) -> Result<(), DriverError> {
        session.run(|native| native.abort_transaction().run())
    }

    fn end_session(&self, session: &MongoSession) {
        // dropping the native session aborts an open transaction and returns it to the pool
        if session.inner.lock().take().is_some() {
            log::trace!(target: "docbridge::mongo", "session released on {}", self.name);
        }
    }

    fn disconnect(&self) -> Result<(), DriverError> {
        self.client.clone().shutdown().immediate(true).run();
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MongoCollection {
    inner: SyncCollection<Document>,
}

impl MongoCollection {
    #[must_use]
    pub const fn native(&self) -> &SyncCollection<Document> {
        &self.inner
    }
}

impl NativeCollection for MongoCollection {
    type ClientSession = MongoSession;
    type Cursor = MongoCursor;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn count_documents(
        &self,
        ctx: &Context,
        session: Option<&MongoSession>,
        filter: Document,
    ) -> Result<u64, DriverError> {
        ctx.check()?;
        let mut opts = options::CountOptions::default();
        opts.max_time = ctx.time_limit();
        let action = self.inner.count_documents(filter).with_options(opts);
        match session {
            Some(s) => s.run(|native| action.session(native).run()),
            None => action.run().map_err(map_error),
        }
    }

    fn find(
        &self,
        ctx: &Context,
        session: Option<&MongoSession>,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<MongoCursor, DriverError> {
        ctx.check()?;
        let options = options.unwrap_or_default();
        let mut opts = options::FindOptions::default();
        opts.limit = options.limit;
        opts.projection = options.projection;
        opts.sort = options.sort;
        opts.collation = options.collation.as_ref().map(native_collation);
        opts.max_time = ctx.time_limit();
        let action = self.inner.find(filter).with_options(opts);
        match session {
            None => Ok(MongoCursor::streaming(action.run().map_err(map_error)?)),
            Some(s) => {
                // a session cursor needs the session for every getMore, so drain it now
                let docs = s.run(|native| {
                    let mut cursor = action.session(&mut *native).run()?;
                    let mut docs = VecDeque::new();
                    while let Some(doc) = cursor.next(native) {
                        docs.push_back(doc?);
                    }
                    Ok(docs)
                })?;
                Ok(MongoCursor::buffered(docs))
            }
        }
    }

    fn find_one(
        &self,
        ctx: &Context,
        session: Option<&MongoSession>,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> Result<Option<Document>, DriverError> {
        ctx.check()?;
        let options = options.unwrap_or_default();
        let mut opts = options::FindOneOptions::default();
        opts.projection = options.projection;
        opts.collation = options.collation.as_ref().map(native_collation);
        opts.max_time = ctx.time_limit();
        let action = self.inner.find_one(filter).with_options(opts);
        match session {
            Some(s) => s.run(|native| action.session(native).run()),
            None => action.run().map_err(map_error),
        }
    }

    fn insert_one(
        &self,
        ctx: &Context,
        session: Option<&MongoSession>,
        document: Document,
    ) -> Result<Bson, DriverError> {
        ctx.check()?;
        let action = self.inner.insert_one(document);
        let result = match session {
            Some(s) => s.run(|native| action.session(native).run())?,
            None => action.run().map_err(map_error)?,
        };
        Ok(result.inserted_id)
    }

    fn replace_one(
        &self,
        ctx: &Context,
        session: Option<&MongoSession>,
        filter: Document,
        replacement: Document,
    ) -> Result<UpdateResult, DriverError> {
        ctx.check()?;
        let action = self.inner.replace_one(filter, replacement);
        let result = match session {
            Some(s) => s.run(|native| action.session(native).run())?,
            None => action.run().map_err(map_error)?,
        };
        Ok(UpdateResult { matched: result.matched_count, modified: result.modified_count })
    }

    fn update_one(
        &self,
        ctx: &Context,
        session: Option<&MongoSession>,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, DriverError> {
        ctx.check()?;
        let action = self.inner.update_one(filter, update);
        let result = match session {
            Some(s) => s.run(|native| action.session(native).run())?,
            None => action.run().map_err(map_error)?,
        };
        Ok(UpdateResult { matched: result.matched_count, modified: result.modified_count })
    }

    fn delete_many(
        &self,
        ctx: &Context,
        session: Option<&MongoSession>,
        filter: Document,
    ) -> Result<u64, DriverError> {
        ctx.check()?;
        let action = self.inner.delete_many(filter);
        let result = match session {
            Some(s) => s.run(|native| action.session(native).run())?,
            None => action.run().map_err(map_error)?,
        };
        Ok(result.deleted_count)
    }
}

enum Source {
    Stream(Cursor<Document>),
    Buffered(VecDeque<Document>),
}

/// Result stream of a find. Inside a transaction the results are fetched up front.
pub struct MongoCursor {
    source: Source,
    current: Option<Document>,
    closed: bool,
}

impl MongoCursor {
    const fn streaming(cursor: Cursor<Document>) -> Self {
        Self { source: Source::Stream(cursor), current: None, closed: false }
    }

    const fn buffered(docs: VecDeque<Document>) -> Self {
        Self { source: Source::Buffered(docs), current: None, closed: false }
    }
}

impl NativeCursor for MongoCursor {
    fn advance(&mut self, ctx: &Context) -> Result<bool, DriverError> {
        if self.closed {
            return Err(DriverError::CursorClosed);
        }
        ctx.check()?;
        self.current = match &mut self.source {
            Source::Stream(cursor) => cursor.next().transpose().map_err(map_error)?,
            Source::Buffered(docs) => docs.pop_front(),
        };
        Ok(self.current.is_some())
    }

    fn current(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    /// Only known for buffered results; a live stream reports 0.
    fn buffered(&self) -> usize {
        match &self.source {
            Source::Stream(_) => 0,
            Source::Buffered(docs) => docs.len(),
        }
    }

    fn close(&mut self, _ctx: &Context) -> Result<(), DriverError> {
        // dropping the stream kills the server cursor
        self.source = Source::Buffered(VecDeque::new());
        self.current = None;
        self.closed = true;
        Ok(())
    }
}
