use bson::oid::ObjectId;
use bson::{Document, doc};
use serde::de::DeserializeOwned;

use super::core::{Collection, CursorOf, SaveStrategy};
use crate::document::{Journal, PersistentObject};
use crate::driver::{Driver, NativeCollection};
use crate::errors::{DbError, Result};
use crate::expression::Expression;
use crate::iterator::DocumentIterator;
use crate::query::{QueryOption, compile_or_empty, describe, to_multi_options, to_single_options};

const LOC_COUNT: &str = "docbridge::Collection::count";
const LOC_QUERY: &str = "docbridge::Collection::query";
const LOC_ITERATE: &str = "docbridge::Collection::iterate";
const LOC_LOAD: &str = "docbridge::Collection::load";
const LOC_SAVE: &str = "docbridge::Collection::save";
const LOC_DELETE: &str = "docbridge::Collection::delete";
const LOC_HARD_DELETE: &str = "docbridge::Collection::hard_delete";

fn filter_detail(filter: &Document) -> String {
    format!("filter: {filter}")
}

impl<D: Driver> Collection<D> {
    /// Number of documents matching `criteria`.
    ///
    /// # Errors
    /// `Internal` when the driver fails; the error carries the compiled filter.
    pub fn count(&self, criteria: &Expression) -> Result<i64> {
        let filter = compile_or_empty(criteria);
        let result = self.timed(LOC_COUNT, Some(&filter), || {
            self.native.count_documents(&self.ctx, self.client_session(), filter.clone())
        });
        let n = result.map_err(|e| {
            DbError::from_driver(LOC_COUNT, "unable to count documents", e).with_detail(filter_detail(&filter))
        })?;
        Ok(i64::try_from(n).unwrap_or(i64::MAX))
    }

    /// Every document matching `criteria`, decoded into `T`.
    ///
    /// # Errors
    /// `Internal` when the query cannot run or a result cannot be decoded.
    pub fn query<T: DeserializeOwned>(&self, criteria: &Expression, options: &[QueryOption]) -> Result<Vec<T>> {
        let filter = compile_or_empty(criteria);
        let context = || {
            [
                format!("target: {}", std::any::type_name::<T>()),
                filter_detail(&filter),
                describe(options),
            ]
        };
        self.timed(LOC_QUERY, Some(&filter), || {
            let cursor = self
                .native
                .find(&self.ctx, self.client_session(), filter.clone(), to_multi_options(options))
                .map_err(|e| DbError::from_driver(LOC_QUERY, "unable to execute query", e).with_details(context()))?;
            let mut results = DocumentIterator::new(cursor, self.ctx.clone());
            let mut out = Vec::new();
            loop {
                match results.try_next::<T>() {
                    Ok(Some(value)) => out.push(value),
                    Ok(None) => break,
                    Err(e) => {
                        return Err(DbError::wrap(e, LOC_QUERY, "unable to read query results").with_details(context()));
                    }
                }
            }
            Ok(out)
        })
    }

    /// Streams the documents matching `criteria`.
    ///
    /// # Errors
    /// `Internal` when the query cannot be started. Callers that need an iterator either way
    /// can fall back to [`DocumentIterator::inert`].
    pub fn iterate(&self, criteria: &Expression, options: &[QueryOption]) -> Result<DocumentIterator<CursorOf<D>>> {
        let filter = compile_or_empty(criteria);
        let cursor = self
            .timed(LOC_ITERATE, Some(&filter), || {
                self.native.find(&self.ctx, self.client_session(), filter.clone(), to_multi_options(options))
            })
            .map_err(|e| {
                DbError::from_driver(LOC_ITERATE, "unable to start query", e)
                    .with_details([filter_detail(&filter), describe(options)])
            })?;
        Ok(DocumentIterator::new(cursor, self.ctx.clone()))
    }

    /// The first document matching `criteria`.
    ///
    /// Only field selection and case sensitivity apply; row limits and sorting are ignored.
    ///
    /// # Errors
    /// `NotFound` when nothing matches, `Internal` for any other failure.
    pub fn load<T: DeserializeOwned>(&self, criteria: &Expression, options: &[QueryOption]) -> Result<T> {
        let filter = compile_or_empty(criteria);
        let found = self
            .timed(LOC_LOAD, Some(&filter), || {
                self.native.find_one(&self.ctx, self.client_session(), filter.clone(), to_single_options(options))
            })
            .map_err(|e| {
                DbError::from_driver(LOC_LOAD, "unable to load document", e).with_detail(filter_detail(&filter))
            })?;
        let Some(found) = found else {
            return Err(DbError::not_found(LOC_LOAD, "document not found").with_detail(filter_detail(&filter)));
        };
        bson::deserialize_from_document::<T>(found).map_err(|e| {
            DbError::internal(LOC_LOAD, "unable to decode document")
                .with_details([format!("target: {}", std::any::type_name::<T>()), filter_detail(&filter)])
                .with_source(e)
        })
    }

    /// Writes `object`, inserting it when it is new.
    ///
    /// The journal is stamped as updated on every call and as created on insert. When the
    /// write fails the journal is put back as it was, so a retry takes the same path.
    ///
    /// # Errors
    /// `BadRequest` when the server rejects the write, `NotFound` when no stored document
    /// matches an existing object (or, for a guarded update, no live one), `Internal`
    /// otherwise (including a malformed id).
    pub fn save<O: PersistentObject>(&self, object: &mut O, note: &str) -> Result<()> {
        let before = object.journal().clone();
        let result = self.write_object(object, note);
        if result.is_err() {
            *object.journal_mut() = before;
        }
        result
    }

    fn write_object<O: PersistentObject>(&self, object: &mut O, note: &str) -> Result<()> {
        object.set_updated(note);

        if object.is_new() {
            object.set_created(note);
            let document = encode(object)?;
            self.timed(LOC_SAVE, None, || self.native.insert_one(&self.ctx, self.client_session(), document))
                .map_err(|e| DbError::from_write(LOC_SAVE, "unable to insert object", e))?;
            return Ok(());
        }

        let raw_id = object.id();
        let id = ObjectId::parse_str(&raw_id).map_err(|e| {
            DbError::internal(LOC_SAVE, "invalid object id").with_detail(format!("id: {raw_id}")).with_source(e)
        })?;
        let mut document = encode(object)?;

        match self.settings.save_strategy {
            SaveStrategy::Replace => {
                let filter = doc! { "_id": id };
                let result = self
                    .timed(LOC_SAVE, Some(&filter), || {
                        self.native.replace_one(&self.ctx, self.client_session(), filter.clone(), document)
                    })
                    .map_err(|e| {
                        DbError::from_write(LOC_SAVE, "unable to replace object", e).with_detail(filter_detail(&filter))
                    })?;
                if result.matched == 0 {
                    return Err(DbError::not_found(LOC_SAVE, "no stored document to replace")
                        .with_detail(filter_detail(&filter)));
                }
            }
            SaveStrategy::GuardedUpdate => {
                let mut filter = doc! { "_id": id };
                filter.insert(Journal::DELETE_DATE_PATH, 0_i64);
                document.remove("_id");
                let update = doc! { "$set": document };
                let result = self
                    .timed(LOC_SAVE, Some(&filter), || {
                        self.native.update_one(&self.ctx, self.client_session(), filter.clone(), update)
                    })
                    .map_err(|e| {
                        DbError::from_write(LOC_SAVE, "unable to update object", e).with_detail(filter_detail(&filter))
                    })?;
                if result.matched == 0 {
                    return Err(DbError::not_found(LOC_SAVE, "no live document to update")
                        .with_detail(filter_detail(&filter)));
                }
            }
        }
        Ok(())
    }

    /// Soft-deletes `object`: stamps the journal as deleted and saves it. On failure the
    /// journal is left as it was before the call.
    ///
    /// # Errors
    /// `BadRequest` without touching the database when `object` was never saved; otherwise
    /// whatever [`save`](Self::save) reports.
    pub fn delete<O: PersistentObject>(&self, object: &mut O, note: &str) -> Result<()> {
        if object.is_new() {
            return Err(DbError::bad_request(LOC_DELETE, "object has never been saved"));
        }
        let before = object.journal().clone();
        object.set_deleted(note);
        self.save(object, note).map_err(|e| {
            *object.journal_mut() = before;
            DbError::wrap(e, LOC_DELETE, "unable to delete object")
        })
    }

    /// Permanently removes every document matching `criteria`. Returns how many were removed.
    ///
    /// # Errors
    /// `Internal` when the driver fails.
    pub fn hard_delete(&self, criteria: &Expression) -> Result<u64> {
        let filter = compile_or_empty(criteria);
        self.timed(LOC_HARD_DELETE, Some(&filter), || {
            self.native.delete_many(&self.ctx, self.client_session(), filter.clone())
        })
        .map_err(|e| {
            DbError::from_driver(LOC_HARD_DELETE, "unable to delete documents", e).with_detail(filter_detail(&filter))
        })
    }

    fn timed<R>(&self, location: &'static str, filter: Option<&Document>, op: impl FnOnce() -> R) -> R {
        let monitor = &self.settings.monitor;
        let started = monitor.start();
        let out = op();
        monitor.finish(location, started, self.name(), filter);
        out
    }
}

fn encode<O: PersistentObject>(object: &O) -> Result<Document> {
    bson::serialize_to_document(object).map_err(|e| {
        DbError::internal(LOC_SAVE, "unable to encode object")
            .with_detail(format!("target: {}", std::any::type_name::<O>()))
            .with_source(e)
    })
}
