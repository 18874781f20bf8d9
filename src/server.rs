//! Entry point: owns the client connection and creates sessions.

use std::sync::Arc;
use std::time::Duration;

use crate::collection::{CollectionSettings, SaveStrategy};
use crate::config::ServerConfig;
use crate::context::Context;
use crate::driver::{Driver, SessionOptions, TransactionOptions};
use crate::errors::{DbError, Result};
use crate::session::Session;
use crate::telemetry::SlowQueryMonitor;

const LOC_TRANSACTION: &str = "docbridge::Server::with_transaction";

/// A database reachable through driver `D`.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct Server<D: Driver> {
    driver: D,
    settings: CollectionSettings,
    transaction_options: TransactionOptions,
}

impl<D: Driver> Server<D> {
    pub fn new(driver: D) -> Self {
        Self { driver, settings: CollectionSettings::default(), transaction_options: TransactionOptions::default() }
    }

    /// Applies the slow-query threshold, save strategy and commit bound from `config`.
    pub fn with_config(driver: D, config: &ServerConfig) -> Self {
        Self::new(driver)
            .with_settings(config.collection_settings())
            .with_max_commit_time(config.max_commit_time())
    }

    #[must_use]
    pub fn with_settings(mut self, settings: CollectionSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.settings.monitor = SlowQueryMonitor::new(threshold);
        self
    }

    #[must_use]
    pub fn with_save_strategy(mut self, strategy: SaveStrategy) -> Self {
        self.settings.save_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_max_commit_time(mut self, max_commit_time: Option<Duration>) -> Self {
        self.transaction_options.max_commit_time = max_commit_time;
        self
    }

    /// The driver handle, for libraries that need to bypass this abstraction.
    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    #[must_use]
    pub const fn monitor(&self) -> &SlowQueryMonitor {
        &self.settings.monitor
    }

    /// Options used for transactional sessions: causally consistent, majority read and
    /// write concern, primary reads, bounded commit time.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions { causal_consistency: true, default_transaction_options: self.transaction_options.clone() }
    }

    /// A session bound to `ctx`. No I/O.
    pub fn new_session(&self, ctx: Context) -> Session<D> {
        Session::new(self.driver.clone(), ctx, self.settings.clone())
    }

    /// Runs `f` inside a transaction and commits if it succeeds.
    ///
    /// `f` receives a session whose collections all take part in the transaction. If `f`
    /// fails the transaction is aborted and its error is returned unchanged. The server
    /// session is ended on every path, panics included, and collections that escape `f`
    /// fail every later command. Transient failures are not retried here.
    ///
    /// # Errors
    /// `Internal` when the session or transaction cannot be started or the commit fails;
    /// otherwise whatever `f` returns.
    pub fn with_transaction<R, F>(&self, ctx: &Context, f: F) -> Result<R>
    where
        F: FnOnce(&Session<D>) -> Result<R>,
    {
        let options = self.session_options();
        let client_session = self
            .driver
            .start_session(&options)
            .map_err(|e| DbError::from_driver(LOC_TRANSACTION, "unable to start database session", e))?;
        let mut guard = TransactionGuard { driver: &self.driver, session: Arc::new(client_session), open: false };

        self.driver
            .start_transaction(&guard.session, &options.default_transaction_options)
            .map_err(|e| DbError::from_driver(LOC_TRANSACTION, "unable to start transaction", e))?;
        guard.open = true;

        let session =
            Session::transactional(self.driver.clone(), ctx.clone(), Arc::clone(&guard.session), self.settings.clone());
        let value = f(&session)?;
        drop(session);

        self.driver.commit_transaction(&guard.session).map_err(|e| {
            let transient = e.is_transient();
            DbError::from_driver(LOC_TRANSACTION, "unable to commit transaction", e)
                .with_detail(format!("transient: {transient}"))
        })?;
        guard.open = false;
        Ok(value)
    }
}

impl<D: Driver> std::fmt::Debug for Server<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("database", &self.driver.database_name())
            .field("settings", &self.settings)
            .field("transaction_options", &self.transaction_options)
            .finish()
    }
}

/// Aborts a still-open transaction and ends the server session when dropped.
struct TransactionGuard<'a, D: Driver> {
    driver: &'a D,
    session: Arc<D::ClientSession>,
    open: bool,
}

impl<D: Driver> Drop for TransactionGuard<'_, D> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.driver.abort_transaction(&self.session) {
                let err = DbError::from_driver(LOC_TRANSACTION, "unable to abort transaction", e);
                log::warn!("{}", err.diagnostic());
            }
        }
        self.driver.end_session(&self.session);
    }
}

#[cfg(feature = "mongodb")]
impl Server<crate::driver::mongo::MongoDriver> {
    /// Connects to the cluster named by `config`.
    ///
    /// # Errors
    /// `Internal` when the client cannot be created.
    pub fn connect(config: &ServerConfig) -> Result<Self> {
        let driver = crate::driver::mongo::MongoDriver::connect(&config.uri_with_options(), &config.database)
            .map_err(|e| {
                DbError::from_driver("docbridge::Server::connect", "unable to connect to mongodb server", e)
                    .with_detail(format!("database: {}", config.database))
            })?;
        Ok(Self::with_config(driver, config))
    }
}
