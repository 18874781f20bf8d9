use bson::Document;
use std::collections::VecDeque;

use crate::context::Context;
use crate::driver::{DriverError, NativeCursor};

/// Number of documents the store hands out per simulated round trip.
pub const DEFAULT_BATCH_SIZE: usize = 101;

/// Cursor over a materialised result set, delivered in batches.
#[derive(Debug)]
pub struct MemoryCursor {
    pending: VecDeque<Document>,
    current: Option<Document>,
    batch_size: usize,
    in_batch: usize,
    closed: bool,
}

impl MemoryCursor {
    pub(crate) fn new(docs: Vec<Document>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let in_batch = batch_size.min(docs.len());
        Self { pending: docs.into(), current: None, batch_size, in_batch, closed: false }
    }

    /// Documents not yet handed out, across all batches.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl NativeCursor for MemoryCursor {
    fn advance(&mut self, ctx: &Context) -> Result<bool, DriverError> {
        if self.closed {
            return Err(DriverError::CursorClosed);
        }
        if self.in_batch == 0 {
            // next batch is a round trip
            ctx.check()?;
            self.in_batch = self.batch_size.min(self.pending.len());
        }
        self.current = self.pending.pop_front();
        if self.current.is_some() {
            self.in_batch -= 1;
        }
        Ok(self.current.is_some())
    }

    fn current(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    fn buffered(&self) -> usize {
        self.in_batch
    }

    fn close(&mut self, _ctx: &Context) -> Result<(), DriverError> {
        self.closed = true;
        self.pending.clear();
        self.current = None;
        self.in_batch = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn docs(n: i32) -> Vec<Document> {
        (0..n).map(|i| doc! { "n": i }).collect()
    }

    #[test]
    fn walks_batches_and_reports_buffered() {
        let ctx = Context::background();
        let mut cur = MemoryCursor::new(docs(5), 2);
        assert_eq!(cur.buffered(), 2);
        let mut seen = Vec::new();
        while cur.advance(&ctx).unwrap() {
            seen.push(cur.current().unwrap().get_i32("n").unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(cur.current().is_none());
        assert_eq!(cur.buffered(), 0);
    }

    #[test]
    fn closed_cursor_refuses_to_advance() {
        let ctx = Context::background();
        let mut cur = MemoryCursor::new(docs(3), DEFAULT_BATCH_SIZE);
        cur.close(&ctx).unwrap();
        assert_eq!(cur.advance(&ctx), Err(DriverError::CursorClosed));
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn cancellation_surfaces_on_next_batch() {
        let ctx = Context::background();
        let mut cur = MemoryCursor::new(docs(3), 1);
        assert!(cur.advance(&ctx).unwrap());
        ctx.cancel();
        assert_eq!(cur.advance(&ctx), Err(DriverError::Cancelled));
    }
}
