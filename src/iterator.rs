//! Pull-based access to a streamed result set.

use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::context::Context;
use crate::driver::{DriverError, NativeCursor};
use crate::errors::DbError;

const LOC_NEXT: &str = "docbridge::Iterator::next";
const LOC_CLOSE: &str = "docbridge::Iterator::close";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    Open,
    /// The cursor ran out of documents.
    Exhausted,
    /// Reading or decoding failed; see [`DocumentIterator::error`].
    Failed,
    /// Closed by the caller.
    Closed,
}

/// Iterator over the documents of one query.
///
/// The iterator owns its cursor and the context it was opened under. The cursor is released
/// exactly once: on exhaustion, on the first error, on [`close`](Self::close), or on drop,
/// whichever comes first.
pub struct DocumentIterator<C: NativeCursor> {
    cursor: Option<C>,
    ctx: Context,
    state: IteratorState,
    error: Option<DriverError>,
}

impl<C: NativeCursor> DocumentIterator<C> {
    pub(crate) fn new(cursor: C, ctx: Context) -> Self {
        Self { cursor: Some(cursor), ctx, state: IteratorState::Open, error: None }
    }

    /// An iterator with no cursor behind it. It yields nothing and reports no error.
    #[must_use]
    pub fn inert() -> Self {
        Self { cursor: None, ctx: Context::background(), state: IteratorState::Exhausted, error: None }
    }

    #[must_use]
    pub const fn state(&self) -> IteratorState {
        self.state
    }

    /// Decodes the next document into `out`.
    ///
    /// Returns false when the result set is exhausted and when reading fails; the two are
    /// told apart by [`error`](Self::error).
    #[allow(clippy::should_implement_trait)]
    pub fn next<T: DeserializeOwned>(&mut self, out: &mut T) -> bool {
        match self.try_next::<T>() {
            Ok(Some(value)) => {
                *out = value;
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    /// Reads the next document.
    ///
    /// `Ok(None)` once the set is exhausted, and after a failure has already been reported.
    ///
    /// # Errors
    /// `Internal` when the cursor fails, the document cannot be decoded, or the iterator was
    /// already closed.
    pub fn try_next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, DbError> {
        match self.state {
            IteratorState::Open => {}
            IteratorState::Exhausted | IteratorState::Failed => return Ok(None),
            IteratorState::Closed => {
                self.error = Some(DriverError::CursorClosed);
                return Err(DbError::from_driver(LOC_NEXT, "iterator is closed", DriverError::CursorClosed));
            }
        }
        let Some(cursor) = self.cursor.as_mut() else {
            self.state = IteratorState::Exhausted;
            return Ok(None);
        };
        let decoded = match cursor.advance(&self.ctx) {
            Ok(false) => {
                self.release(IteratorState::Exhausted);
                return Ok(None);
            }
            Err(err) => Err(err),
            Ok(true) => match cursor.current() {
                Some(doc) => bson::deserialize_from_document::<T>(doc.clone())
                    .map_err(|e| DriverError::Decode(e.to_string())),
                None => Err(DriverError::Decode("cursor has no current document".to_string())),
            },
        };
        match decoded {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.error = Some(err.clone());
                self.release(IteratorState::Failed);
                let message = match err {
                    DriverError::Decode(_) => "unable to decode document",
                    _ => "unable to read from cursor",
                };
                Err(DbError::from_driver(LOC_NEXT, message, err))
            }
        }
    }

    /// Last cursor error; `None` when the iterator ended cleanly or is still open.
    #[must_use]
    pub const fn error(&self) -> Option<&DriverError> {
        self.error.as_ref()
    }

    /// Documents buffered in the current batch. Not the size of the result set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.cursor.as_ref().map_or(0, NativeCursor::buffered)
    }

    /// Releases the cursor. Calling it again is a no-op.
    ///
    /// # Errors
    /// `Internal` when the driver fails to release the cursor.
    pub fn close(&mut self) -> Result<(), DbError> {
        self.state = IteratorState::Closed;
        match self.cursor.take() {
            Some(mut cursor) => cursor
                .close(&self.ctx)
                .map_err(|e| DbError::from_driver(LOC_CLOSE, "unable to close cursor", e)),
            None => Ok(()),
        }
    }

    /// Adapts the iterator into a standard [`Iterator`] of decoded values. The adapter
    /// stops after the first error.
    pub fn documents<T: DeserializeOwned>(&mut self) -> Documents<'_, C, T> {
        Documents { inner: self, done: false, _marker: PhantomData }
    }

    fn release(&mut self, state: IteratorState) {
        self.state = state;
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close(&self.ctx) {
                log::debug!("cursor release failed: {e}");
            }
        }
    }
}

impl<C: NativeCursor> Drop for DocumentIterator<C> {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close(&self.ctx) {
                log::debug!("cursor release on drop failed: {e}");
            }
        }
    }
}

impl<C: NativeCursor> std::fmt::Debug for DocumentIterator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIterator")
            .field("state", &self.state)
            .field("buffered", &self.count())
            .field("error", &self.error)
            .finish()
    }
}

pub struct Documents<'a, C: NativeCursor, T> {
    inner: &'a mut DocumentIterator<C>,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<C: NativeCursor, T: DeserializeOwned> Iterator for Documents<'_, C, T> {
    type Item = Result<T, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.inner.try_next::<T>().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}
