//! In-process document store implementing the driver traits.
//!
//! Collections live in a shared map guarded by a `RwLock`. Transactions work on a private
//! snapshot of that map and are committed back only if nothing else wrote in between;
//! otherwise commit fails with a transient transaction error, the way a server reports a
//! write conflict.
//!
//! The store also carries hooks for tests: per-operation counters, scripted failures and
//! artificial latency.

mod cursor;
mod eval;

pub use cursor::{DEFAULT_BATCH_SIZE, MemoryCursor};

use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use super::{
    Collation, Driver, DriverError, FindOneOptions, FindOptions, NativeCollection, SessionOptions,
    TransactionOptions, UpdateResult,
};
use crate::context::Context;

const DUPLICATE_KEY: i32 = 11000;
const IMMUTABLE_FIELD: i32 = 66;

/// Operations observed by the store's hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Count,
    Find,
    FindOne,
    Insert,
    Replace,
    Update,
    Delete,
    StartSession,
    StartTransaction,
    Commit,
    Abort,
    Disconnect,
}

/// A scripted failure: the next `times` calls of `op` fail with `error`.
#[derive(Debug, Clone)]
pub struct FailPoint {
    pub op: OpKind,
    pub error: DriverError,
    pub times: u32,
}

type Tables = HashMap<String, Vec<Document>>;

#[derive(Debug, Default)]
struct Store {
    tables: Tables,
    version: u64,
}

#[derive(Debug)]
struct Inner {
    database: String,
    store: RwLock<Store>,
    connected: AtomicBool,
    batch_size: usize,
    op_counts: Mutex<HashMap<OpKind, u64>>,
    fail_points: Mutex<Vec<FailPoint>>,
    latency: Mutex<Option<Duration>>,
    last_session_options: Mutex<Option<SessionOptions>>,
}

/// Handle to an in-process database. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    inner: Arc<Inner>,
}

impl MemoryDriver {
    pub fn new(database: impl Into<String>) -> Self {
        Self::with_batch_size(database, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(database: impl Into<String>, batch_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                database: database.into(),
                store: RwLock::new(Store::default()),
                connected: AtomicBool::new(true),
                batch_size,
                op_counts: Mutex::new(HashMap::new()),
                fail_points: Mutex::new(Vec::new()),
                latency: Mutex::new(None),
                last_session_options: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn op_count(&self, op: OpKind) -> u64 {
        self.inner.op_counts.lock().get(&op).copied().unwrap_or(0)
    }

    /// Operations attempted since creation or the last [`reset_op_counts`](Self::reset_op_counts).
    #[must_use]
    pub fn total_ops(&self) -> u64 {
        self.inner.op_counts.lock().values().sum()
    }

    pub fn reset_op_counts(&self) {
        self.inner.op_counts.lock().clear();
    }

    pub fn set_fail_point(&self, fail_point: FailPoint) {
        self.inner.fail_points.lock().push(fail_point);
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: OpKind, error: DriverError) {
        self.set_fail_point(FailPoint { op, error, times: 1 });
    }

    pub fn clear_fail_points(&self) {
        self.inner.fail_points.lock().clear();
    }

    /// Delay applied to every collection command, bounded by the caller's deadline.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Options of the most recently started session.
    #[must_use]
    pub fn last_session_options(&self) -> Option<SessionOptions> {
        self.inner.last_session_options.lock().clone()
    }

    /// Committed contents of a collection, bypassing hooks.
    #[must_use]
    pub fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.inner.store.read().tables.get(collection).cloned().unwrap_or_default()
    }

    /// Seeds a collection with committed documents, bypassing hooks.
    pub fn seed(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        let mut store = self.inner.store.write();
        store.tables.entry(collection.to_string()).or_default().extend(docs);
        store.version += 1;
    }

    fn enter(&self, ctx: Option<&Context>, op: OpKind) -> Result<(), DriverError> {
        *self.inner.op_counts.lock().entry(op).or_insert(0) += 1;
        log::trace!(target: "docbridge::memory", "{op:?} on {}", self.inner.database);
        if op != OpKind::Disconnect && !self.is_connected() {
            return Err(DriverError::Disconnected);
        }
        if let Some(ctx) = ctx {
            ctx.check()?;
            let latency = *self.inner.latency.lock();
            if let Some(latency) = latency {
                let wait = ctx.remaining().map_or(latency, |left| left.min(latency));
                thread::sleep(wait);
                ctx.check()?;
            }
        }
        self.trip_fail_point(op)
    }

    /// Hook entry for a collection command. Commands on an ended session are refused.
    fn enter_command(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        op: OpKind,
    ) -> Result<(), DriverError> {
        self.enter(Some(ctx), op)?;
        if session.is_some_and(MemorySession::is_ended) {
            return Err(DriverError::Transaction {
                message: "session has already ended".to_string(),
                transient: false,
            });
        }
        Ok(())
    }

    fn trip_fail_point(&self, op: OpKind) -> Result<(), DriverError> {
        let mut points = self.inner.fail_points.lock();
        let Some(pos) = points.iter().position(|p| p.op == op && p.times > 0) else {
            return Ok(());
        };
        let point = &mut points[pos];
        point.times -= 1;
        let error = point.error.clone();
        if point.times == 0 {
            points.remove(pos);
        }
        Err(error)
    }

    fn read<R>(&self, session: Option<&MemorySession>, f: impl FnOnce(&Tables) -> R) -> R {
        if let Some(session) = session {
            let txn = session.txn.lock();
            if let Some(txn) = txn.as_ref() {
                return f(&txn.tables);
            }
        }
        f(&self.inner.store.read().tables)
    }

    fn write<R>(&self, session: Option<&MemorySession>, f: impl FnOnce(&mut Tables) -> R) -> R {
        if let Some(session) = session {
            let mut txn = session.txn.lock();
            if let Some(txn) = txn.as_mut() {
                txn.dirty = true;
                return f(&mut txn.tables);
            }
        }
        let mut store = self.inner.store.write();
        store.version += 1;
        f(&mut store.tables)
    }
}

#[derive(Debug)]
struct Txn {
    base_version: u64,
    tables: Tables,
    dirty: bool,
    options: TransactionOptions,
}

/// Session of a [`MemoryDriver`]. Holds the snapshot of an open transaction.
#[derive(Debug)]
pub struct MemorySession {
    id: Uuid,
    options: SessionOptions,
    txn: Mutex<Option<Txn>>,
    ended: AtomicBool,
}

impl MemorySession {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn.lock().is_some()
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Options of the open transaction, if any.
    #[must_use]
    pub fn transaction_options(&self) -> Option<TransactionOptions> {
        self.txn.lock().as_ref().map(|t| t.options.clone())
    }
}

impl Driver for MemoryDriver {
    type ClientSession = MemorySession;
    type Collection = MemoryCollection;

    fn database_name(&self) -> &str {
        &self.inner.database
    }

    fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection { driver: self.clone(), name: name.to_string() }
    }

    fn start_session(&self, options: &SessionOptions) -> Result<MemorySession, DriverError> {
        self.enter(None, OpKind::StartSession)?;
        *self.inner.last_session_options.lock() = Some(options.clone());
        Ok(MemorySession {
            id: Uuid::new_v4(),
            options: options.clone(),
            txn: Mutex::new(None),
            ended: AtomicBool::new(false),
        })
    }

    fn start_transaction(
        &self,
        session: &MemorySession,
        options: &TransactionOptions,
    ) -> Result<(), DriverError> {
        self.enter(None, OpKind::StartTransaction)?;
        let mut txn = session.txn.lock();
        if txn.is_some() {
            return Err(DriverError::Transaction {
                message: "transaction already in progress".to_string(),
                transient: false,
            });
        }
        let store = self.inner.store.read();
        *txn = Some(Txn {
            base_version: store.version,
            tables: store.tables.clone(),
            dirty: false,
            options: options.clone(),
        });
        Ok(())
    }

    fn commit_transaction(&self, session: &MemorySession) -> Result<(), DriverError> {
        self.enter(None, OpKind::Commit)?;
        let Some(txn) = session.txn.lock().take() else {
            return Err(DriverError::Transaction {
                message: "no transaction started".to_string(),
                transient: false,
            });
        };
        if !txn.dirty {
            return Ok(());
        }
        let mut store = self.inner.store.write();
        if store.version != txn.base_version {
            return Err(DriverError::Transaction {
                message: "write conflict during commit".to_string(),
                transient: true,
            });
        }
        store.tables = txn.tables;
        store.version += 1;
        Ok(())
    }

    fn abort_transaction(&self, session: &MemorySession) -> Result<(), DriverError> {
        self.enter(None, OpKind::Abort)?;
        session.txn.lock().take();
        Ok(())
    }

    fn end_session(&self, session: &MemorySession) {
        session.ended.store(true, Ordering::SeqCst);
        if session.txn.lock().take().is_some() {
            log::debug!(target: "docbridge::memory", "session {} ended with an open transaction", session.id);
        }
    }

    fn disconnect(&self) -> Result<(), DriverError> {
        self.enter(None, OpKind::Disconnect)?;
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Handle to one collection of a [`MemoryDriver`].
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    driver: MemoryDriver,
    name: String,
}

fn folds_case(collation: Option<&Collation>) -> bool {
    collation.is_some_and(|c| !c.strength.is_case_sensitive())
}

fn select(
    docs: &[Document],
    filter: &Document,
    fold_case: bool,
) -> Result<Vec<Document>, DriverError> {
    let mut out = Vec::new();
    for doc in docs {
        if eval::matches(doc, filter, fold_case)? {
            out.push(doc.clone());
        }
    }
    Ok(out)
}

fn first_match(docs: &[Document], filter: &Document) -> Result<Option<usize>, DriverError> {
    for (i, doc) in docs.iter().enumerate() {
        if eval::matches(doc, filter, false)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

impl NativeCollection for MemoryCollection {
    type ClientSession = MemorySession;
    type Cursor = MemoryCursor;

    fn name(&self) -> &str {
        &self.name
    }

    fn count_documents(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        filter: Document,
    ) -> Result<u64, DriverError> {
        self.driver.enter_command(ctx, session, OpKind::Count)?;
        let matched = self.driver.read(session, |tables| {
            tables.get(&self.name).map_or(Ok(Vec::new()), |docs| select(docs, &filter, false))
        })?;
        Ok(matched.len() as u64)
    }

    fn find(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<MemoryCursor, DriverError> {
        self.driver.enter_command(ctx, session, OpKind::Find)?;
        let options = options.unwrap_or_default();
        let fold_case = folds_case(options.collation.as_ref());
        let mut docs = self.driver.read(session, |tables| {
            tables.get(&self.name).map_or(Ok(Vec::new()), |docs| select(docs, &filter, fold_case))
        })?;
        if let Some(sort) = &options.sort {
            docs.sort_by(|a, b| eval::compare_docs(a, b, sort, fold_case));
        }
        if let Some(limit) = options.limit.filter(|l| *l != 0) {
            docs.truncate(usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX));
        }
        if let Some(projection) = &options.projection {
            docs = docs.iter().map(|d| eval::project(d, projection)).collect();
        }
        Ok(MemoryCursor::new(docs, self.driver.inner.batch_size))
    }

    fn find_one(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> Result<Option<Document>, DriverError> {
        self.driver.enter_command(ctx, session, OpKind::FindOne)?;
        let options = options.unwrap_or_default();
        let fold_case = folds_case(options.collation.as_ref());
        let found = self.driver.read(session, |tables| -> Result<Option<Document>, DriverError> {
            let Some(docs) = tables.get(&self.name) else {
                return Ok(None);
            };
            for doc in docs {
                if eval::matches(doc, &filter, fold_case)? {
                    return Ok(Some(doc.clone()));
                }
            }
            Ok(None)
        })?;
        Ok(match (found, &options.projection) {
            (Some(doc), Some(projection)) => Some(eval::project(&doc, projection)),
            (found, _) => found,
        })
    }

    fn insert_one(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        document: Document,
    ) -> Result<Bson, DriverError> {
        self.driver.enter_command(ctx, session, OpKind::Insert)?;
        let id = document.get("_id").cloned().unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
        let mut stored = Document::new();
        stored.insert("_id", id.clone());
        for (k, v) in document {
            if k != "_id" {
                stored.insert(k, v);
            }
        }
        self.driver.write(session, |tables| {
            let docs = tables.entry(self.name.clone()).or_default();
            if docs.iter().any(|d| d.get("_id") == Some(&id)) {
                return Err(DriverError::Write {
                    code: DUPLICATE_KEY,
                    message: format!(
                        "E11000 duplicate key error collection: {}.{} index: _id_ dup key: {{ _id: {id} }}",
                        self.driver.inner.database, self.name
                    ),
                });
            }
            docs.push(stored);
            Ok(id.clone())
        })
    }

    fn replace_one(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        filter: Document,
        replacement: Document,
    ) -> Result<UpdateResult, DriverError> {
        self.driver.enter_command(ctx, session, OpKind::Replace)?;
        self.driver.write(session, |tables| {
            let Some(docs) = tables.get_mut(&self.name) else {
                return Ok(UpdateResult::default());
            };
            let Some(pos) = first_match(docs, &filter)? else {
                return Ok(UpdateResult::default());
            };
            let existing_id = docs[pos].get("_id").cloned();
            if let (Some(new_id), Some(old_id)) = (replacement.get("_id"), existing_id.as_ref()) {
                if new_id != old_id {
                    return Err(DriverError::Write {
                        code: IMMUTABLE_FIELD,
                        message: "the (immutable) field '_id' was found to have been altered".to_string(),
                    });
                }
            }
            let mut next = Document::new();
            if let Some(id) = existing_id {
                next.insert("_id", id);
            }
            for (k, v) in replacement {
                if k != "_id" {
                    next.insert(k, v);
                }
            }
            let modified = u64::from(docs[pos] != next);
            docs[pos] = next;
            Ok(UpdateResult { matched: 1, modified })
        })
    }

    fn update_one(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, DriverError> {
        self.driver.enter_command(ctx, session, OpKind::Update)?;
        self.driver.write(session, |tables| {
            let Some(docs) = tables.get_mut(&self.name) else {
                return Ok(UpdateResult::default());
            };
            let Some(pos) = first_match(docs, &filter)? else {
                return Ok(UpdateResult::default());
            };
            let mut next = docs[pos].clone();
            let changed = eval::apply_update(&mut next, &update)?;
            docs[pos] = next;
            Ok(UpdateResult { matched: 1, modified: u64::from(changed) })
        })
    }

    fn delete_many(
        &self,
        ctx: &Context,
        session: Option<&MemorySession>,
        filter: Document,
    ) -> Result<u64, DriverError> {
        self.driver.enter_command(ctx, session, OpKind::Delete)?;
        self.driver.write(session, |tables| {
            let Some(docs) = tables.get_mut(&self.name) else {
                return Ok(0);
            };
            let mut hits = Vec::with_capacity(docs.len());
            for doc in docs.iter() {
                hits.push(eval::matches(doc, &filter, false)?);
            }
            let mut flags = hits.iter();
            docs.retain(|_| !flags.next().copied().unwrap_or(false));
            Ok(hits.iter().filter(|hit| **hit).count() as u64)
        })
    }
}
