//! The backend-independent driver.
//!
//! [`DbDriver`] owns exactly one [`Backend`] and everything every backend
//! needs: the connected flag, the last backend error, and the option
//! ledger. The ledger has two parts:
//!
//! - **applied**: options that were set successfully. "Set unless already
//!   set" consults this list, and it is what gets replayed when the driver
//!   is duplicated.
//! - **pending**: options handed in while disconnected that could not be
//!   applied yet. They are retried in submission order when the next
//!   handshake succeeds.
//!
//! Option failures are never raised from this layer. They come back as
//! [`OptionError`] values and are also kept in a single "last option
//! error" slot, which is only meaningful right after a `set_option*` call.

use std::collections::VecDeque;
use std::fmt;
use std::mem;

use crate::backend::{Backend, ConnectArgs, ResultSet};
use crate::error::{BackendError, OptionError};
use crate::option::{ConnOption, OptionKind};

/// What happened to an option that was not refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionOutcome {
    /// The option took effect and was recorded as applied.
    Applied,
    /// The option needs a live session; it was queued for the next connect.
    Deferred,
    /// An option of the same kind was already applied; nothing changed.
    AlreadySet,
}

/// How [`DbDriver::apply_pending_options`] reacts to a failing option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Stop at the first failure. A hard-rejected option is dropped;
    /// options after it stay queued.
    #[default]
    QuitOnFirstFailure,
    /// Try every option; failures go back on the queue in order.
    BestEffort,
}

/// A backend plus the connection bookkeeping shared by all backends.
pub struct DbDriver {
    backend: Box<dyn Backend>,
    connected: bool,
    applied: Vec<ConnOption>,
    pending: VecDeque<ConnOption>,
    option_error: Option<OptionError>,
    last_error: Option<BackendError>,
}

impl DbDriver {
    /// Wrap an unconnected backend.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            connected: false,
            applied: Vec::new(),
            pending: VecDeque::new(),
            option_error: None,
            last_error: None,
        }
    }

    /// Connect to the server.
    ///
    /// An existing session is dropped first and the options applied to it
    /// are replayed onto the new one. After the handshake, pending
    /// options are applied with [`RetryPolicy::QuitOnFirstFailure`]; the
    /// call succeeds only if the handshake and every pending option did.
    pub fn connect(&mut self, args: &ConnectArgs) -> bool {
        if self.connected {
            self.disconnect();
            self.replay_applied();
        }

        tracing::debug!(
            backend = self.backend.name(),
            host = ?args.host,
            socket = ?args.socket,
            port = args.port,
            database = ?args.database,
            pending_options = self.pending.len(),
            "connecting driver"
        );

        match self.backend.connect(args) {
            Ok(()) => {
                self.connected = true;
                self.last_error = None;
                self.apply_pending_options(RetryPolicy::QuitOnFirstFailure)
            }
            Err(e) => {
                tracing::debug!(error = %e, code = ?e.code, "driver handshake failed");
                self.connected = false;
                self.last_error = Some(e);
                false
            }
        }
    }

    /// Hand the applied options to the backend again ahead of a new
    /// handshake. Those bound to the old session land back on the pending
    /// queue, in front of anything already waiting there.
    fn replay_applied(&mut self) {
        let replay = mem::take(&mut self.applied);
        let queued = mem::take(&mut self.pending);
        for option in replay {
            if let Err((error, option)) = self.submit(option) {
                tracing::debug!(
                    kind = %option.kind(),
                    error = %error,
                    "applied option not replayed on reconnect"
                );
            }
        }
        self.pending.extend(queued);
        self.option_error = None;
    }

    /// Drop the session. The option ledger is kept.
    pub fn disconnect(&mut self) {
        if self.connected {
            tracing::debug!(backend = self.backend.name(), "disconnecting driver");
        }
        self.backend.disconnect();
        self.connected = false;
    }

    /// Whether a connect succeeded without a later disconnect.
    ///
    /// This does not test the session; use [`ping`](Self::ping) for that.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Hand an option to the driver.
    ///
    /// The driver owns the option from here on. On success it is recorded
    /// as applied; if it needs a session that does not exist yet it is
    /// queued and [`OptionOutcome::Deferred`] is returned. Any other
    /// failure drops the option.
    pub fn set_option(&mut self, option: ConnOption) -> Result<OptionOutcome, OptionError> {
        self.submit(option).map_err(|(error, option)| {
            tracing::debug!(kind = %option.kind(), error = %error, "option refused");
            error
        })
    }

    /// Like [`set_option`](Self::set_option), but a no-op when an option of
    /// the same kind has already been applied.
    ///
    /// In that case the new option is discarded and the driver's state,
    /// including the last option error, is left untouched.
    pub fn set_option_default(
        &mut self,
        option: ConnOption,
    ) -> Result<OptionOutcome, OptionError> {
        if self.has_applied(option.kind()) {
            tracing::trace!(kind = %option.kind(), "option already set, keeping existing value");
            return Ok(OptionOutcome::AlreadySet);
        }
        self.set_option(option)
    }

    /// Retry every pending option, in submission order.
    ///
    /// With [`RetryPolicy::QuitOnFirstFailure`] this returns `false` at the
    /// first option that does not apply. An option the backend rejected
    /// outright is dropped, since retrying it cannot help; one that is still
    /// waiting for a session stays queued, as do all options after it.
    ///
    /// With [`RetryPolicy::BestEffort`] every option is tried, the failures
    /// are queued again in order, and the result is always `true`: it means
    /// "ran to completion", not "everything applied". Check
    /// [`pending_options`](Self::pending_options) to see what is left.
    pub fn apply_pending_options(&mut self, policy: RetryPolicy) -> bool {
        self.option_error = None;
        let mut queue = mem::take(&mut self.pending);
        let mut last_failure = None;

        while let Some(option) = queue.pop_front() {
            match self.submit(option) {
                Ok(OptionOutcome::Deferred) if policy == RetryPolicy::QuitOnFirstFailure => {
                    // submit() already put it back on the pending queue
                    self.pending.extend(queue);
                    return false;
                }
                Ok(OptionOutcome::Deferred) => {
                    last_failure = Some(OptionError::Disconnected);
                }
                Ok(_) => {}
                Err((error, option)) => match policy {
                    RetryPolicy::QuitOnFirstFailure => {
                        tracing::warn!(
                            kind = %option.kind(),
                            error = %error,
                            remaining = queue.len(),
                            "pending option rejected at connect time, dropping it"
                        );
                        self.pending.extend(queue);
                        return false;
                    }
                    RetryPolicy::BestEffort => {
                        tracing::debug!(
                            kind = %option.kind(),
                            error = %error,
                            "pending option failed, keeping it queued"
                        );
                        last_failure = Some(error);
                        self.pending.push_back(option);
                    }
                },
            }
        }

        if policy == RetryPolicy::BestEffort {
            self.option_error = last_failure;
        }
        true
    }

    /// Error from the most recent `set_option*` call, if it did not apply.
    ///
    /// After a call that returned [`OptionOutcome::Deferred`] this is
    /// [`OptionError::Disconnected`].
    #[must_use]
    pub fn option_error(&self) -> Option<OptionError> {
        self.option_error
    }

    /// Options that have taken effect, oldest first.
    #[must_use]
    pub fn applied_options(&self) -> &[ConnOption] {
        &self.applied
    }

    /// Options waiting for the next connect, in submission order.
    pub fn pending_options(&self) -> impl ExactSizeIterator<Item = &ConnOption> {
        self.pending.iter()
    }

    /// Whether an option of this kind has taken effect.
    #[must_use]
    pub fn has_applied(&self, kind: OptionKind) -> bool {
        self.applied.iter().any(|o| o.kind() == kind)
    }

    /// Whether an option of this kind is waiting for the next connect.
    #[must_use]
    pub fn has_pending(&self, kind: OptionKind) -> bool {
        self.pending.iter().any(|o| o.kind() == kind)
    }

    /// Run a statement that returns no rows.
    pub fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        self.require_session()?;
        let result = self.backend.execute(sql);
        self.record(result)
    }

    /// Run a statement and fetch its rows.
    pub fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError> {
        self.require_session()?;
        let result = self.backend.query(sql);
        self.record(result)
    }

    /// Switch the default database.
    pub fn select_db(&mut self, database: &str) -> Result<(), BackendError> {
        self.require_session()?;
        let result = self.backend.select_db(database);
        self.record(result)
    }

    /// Check that the server is responding.
    pub fn ping(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        let alive = self.backend.ping();
        if !alive {
            tracing::debug!(backend = self.backend.name(), "ping failed");
        }
        alive
    }

    /// SQL-escape a string using the backend's rules.
    #[must_use]
    pub fn escape_string(&self, input: &str) -> String {
        self.backend.escape_string(input)
    }

    /// Server version, when connected.
    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        self.backend.server_version()
    }

    /// Client library version.
    #[must_use]
    pub fn client_version(&self) -> String {
        self.backend.client_version()
    }

    /// Rows affected by the last statement.
    #[must_use]
    pub fn affected_rows(&self) -> u64 {
        self.backend.affected_rows()
    }

    /// ID generated by the last INSERT.
    #[must_use]
    pub fn insert_id(&self) -> Option<u64> {
        self.backend.insert_id()
    }

    /// Message for the last backend failure, or an empty string.
    #[must_use]
    pub fn error(&self) -> &str {
        self.last_error.as_ref().map_or("", |e| e.message.as_str())
    }

    /// Backend error number for the last failure, or 0.
    #[must_use]
    pub fn errnum(&self) -> u32 {
        self.last_error.as_ref().and_then(|e| e.code).unwrap_or(0)
    }

    /// The last backend failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&BackendError> {
        self.last_error.as_ref()
    }

    /// Name of the wrapped backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// A new, unconnected driver for the same kind of backend.
    ///
    /// Every applied and pending option is submitted to the copy, in order,
    /// so it ends up configured the same way once it connects. Options the
    /// fresh backend refuses are left out.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new(self.backend.duplicate());
        for option in self.applied.iter().chain(self.pending.iter()) {
            if let Err((error, option)) = copy.submit(option.clone()) {
                tracing::debug!(
                    kind = %option.kind(),
                    error = %error,
                    "option not carried over to duplicate"
                );
            }
        }
        copy.option_error = None;
        copy
    }

    fn submit(&mut self, option: ConnOption) -> Result<OptionOutcome, (OptionError, ConnOption)> {
        let result = option.apply(self.backend.as_mut());
        self.option_error = result.err();

        match result {
            Ok(()) => {
                tracing::trace!(kind = %option.kind(), "option applied");
                self.applied.push(option);
                Ok(OptionOutcome::Applied)
            }
            Err(OptionError::Disconnected) => {
                tracing::debug!(kind = %option.kind(), "option deferred until connect");
                self.pending.push_back(option);
                Ok(OptionOutcome::Deferred)
            }
            Err(error) => Err((error, option)),
        }
    }

    fn require_session(&mut self) -> Result<(), BackendError> {
        if self.connected {
            Ok(())
        } else {
            let error = BackendError::not_connected();
            self.last_error = Some(error.clone());
            Err(error)
        }
    }

    fn record<T>(&mut self, result: Result<T, BackendError>) -> Result<T, BackendError> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Ok(value)
            }
            Err(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}

impl Drop for DbDriver {
    fn drop(&mut self) {
        if self.connected {
            self.backend.disconnect();
        }
    }
}

impl fmt::Debug for DbDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbDriver")
            .field("backend", &self.backend.name())
            .field("connected", &self.connected)
            .field("applied", &self.applied.len())
            .field("pending", &self.pending.len())
            .field("option_error", &self.option_error)
            .finish()
    }
}
