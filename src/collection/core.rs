use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::Context;
use crate::driver::{Driver, NativeCollection};
use crate::telemetry::SlowQueryMonitor;

/// Cursor type produced by a driver's collections.
pub type CursorOf<D> = <<D as Driver>::Collection as NativeCollection>::Cursor;

/// How `save` writes an object that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    /// Replace the whole document by identity. Last writer wins, even over a concurrent
    /// soft delete. Fails with `NotFound` when no stored document has that identity.
    #[default]
    Replace,
    /// `$set` the document, restricted to documents that are not soft-deleted. Saving an
    /// object that was deleted in the meantime fails with `NotFound`.
    GuardedUpdate,
}

/// Per-accessor behaviour injected by the server.
#[derive(Debug, Clone, Default)]
pub struct CollectionSettings {
    pub monitor: SlowQueryMonitor,
    pub save_strategy: SaveStrategy,
}

/// A view of one collection under one context, and optionally one transaction.
///
/// Cheap to build and to drop; it holds no locks and no server resources.
pub struct Collection<D: Driver> {
    pub(crate) native: D::Collection,
    pub(crate) ctx: Context,
    pub(crate) session: Option<Arc<D::ClientSession>>,
    pub(crate) settings: CollectionSettings,
}

impl<D: Driver> Collection<D> {
    pub(crate) fn new(
        native: D::Collection,
        ctx: Context,
        session: Option<Arc<D::ClientSession>>,
        settings: CollectionSettings,
    ) -> Self {
        Self { native, ctx, session, settings }
    }

    pub fn name(&self) -> &str {
        self.native.name()
    }

    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.ctx
    }

    #[must_use]
    pub const fn settings(&self) -> &CollectionSettings {
        &self.settings
    }

    #[must_use]
    pub const fn is_transactional(&self) -> bool {
        self.session.is_some()
    }

    /// The driver's own collection handle, for commands this accessor does not cover.
    ///
    /// Calls made through it skip compilation, error mapping and slow-query reporting.
    #[must_use]
    pub const fn native_collection(&self) -> &D::Collection {
        &self.native
    }

    /// Transaction handle to pass along with calls on [`native_collection`](Self::native_collection).
    #[must_use]
    pub fn client_session(&self) -> Option<&D::ClientSession> {
        self.session.as_deref()
    }
}

impl<D: Driver> Clone for Collection<D> {
    fn clone(&self) -> Self {
        Self {
            native: self.native.clone(),
            ctx: self.ctx.clone(),
            session: self.session.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Collection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name())
            .field("transactional", &self.is_transactional())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
