//! A logical unit of work bound to one context.

use std::sync::Arc;

use crate::collection::{Collection, CollectionSettings};
use crate::context::Context;
use crate::driver::Driver;
use crate::errors::DbError;

const LOC_CLOSE: &str = "docbridge::Session::close";

/// Hands out collection accessors that share the session's context and, inside
/// [`Server::with_transaction`](crate::server::Server::with_transaction), its transaction.
pub struct Session<D: Driver> {
    driver: D,
    ctx: Context,
    transaction: Option<Arc<D::ClientSession>>,
    settings: CollectionSettings,
}

impl<D: Driver> Session<D> {
    pub(crate) fn new(driver: D, ctx: Context, settings: CollectionSettings) -> Self {
        Self { driver, ctx, transaction: None, settings }
    }

    pub(crate) fn transactional(
        driver: D,
        ctx: Context,
        transaction: Arc<D::ClientSession>,
        settings: CollectionSettings,
    ) -> Self {
        Self { driver, ctx, transaction: Some(transaction), settings }
    }

    /// Accessor for the named collection. Performs no I/O.
    pub fn collection(&self, name: &str) -> Collection<D> {
        Collection::new(
            self.driver.collection(name),
            self.ctx.clone(),
            self.transaction.clone(),
            self.settings.clone(),
        )
    }

    /// Disconnects the underlying client. Failures are logged, not returned.
    ///
    /// The client is shared with the server and every other session.
    pub fn close(&self) {
        if let Err(e) = self.driver.disconnect() {
            let err = DbError::from_driver(LOC_CLOSE, "error disconnecting from database", e);
            log::error!("{}", err.diagnostic());
        }
    }

    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.ctx
    }

    #[must_use]
    pub const fn is_transactional(&self) -> bool {
        self.transaction.is_some()
    }

    /// The driver handle, for libraries that need to bypass this abstraction.
    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    #[must_use]
    pub fn client_session(&self) -> Option<&D::ClientSession> {
        self.transaction.as_deref()
    }
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.driver.database_name())
            .field("transactional", &self.is_transactional())
            .finish_non_exhaustive()
    }
}
