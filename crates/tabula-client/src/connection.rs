//! The user-facing connection type.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tabula_driver::{
    Backend, ConnOption, ConnectArgs, DbDriver, OptionError, OptionOutcome, ResultSet,
};

use crate::address::IpcMethod;
use crate::config::ConnectParams;
use crate::error::{Error, Result};

/// How a [`Connection`] reports failures.
///
/// Fixed when the connection is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Return failures as `Err`.
    #[default]
    Propagate,
    /// Return `Ok(false)` from operations that report success as a boolean,
    /// and leave the details in [`Connection::error`] and
    /// [`Connection::errnum`].
    ///
    /// [`Connection::execute`] and [`Connection::query`] have no `false` to
    /// return, so they still fail with `Err` in this mode. The failure is
    /// recorded as well.
    Record,
}

/// A database connection.
///
/// Owns exactly one [`DbDriver`]. Cloning with
/// [`try_clone`](Connection::try_clone) opens a second, independent session
/// with the same parameters and options.
///
/// [`is_ok`](Connection::is_ok) reports whether the last operation
/// succeeded, not whether the session is up; use
/// [`connected`](Connection::connected) for that.
pub struct Connection {
    driver: DbDriver,
    mode: ErrorMode,
    params: Option<ConnectParams>,
    copacetic: bool,
    error: String,
    errnum: u32,
}

impl Connection {
    /// Wrap an unconnected backend, propagating errors.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self::with_mode(backend, ErrorMode::Propagate)
    }

    /// Wrap an unconnected backend with the given error mode.
    pub fn with_mode(backend: Box<dyn Backend>, mode: ErrorMode) -> Self {
        Self {
            driver: DbDriver::new(backend),
            mode,
            params: None,
            copacetic: true,
            error: String::new(),
            errnum: 0,
        }
    }

    /// A connection using the MySQL backend.
    #[cfg(feature = "mysql")]
    pub fn mysql(mode: ErrorMode) -> Self {
        Self::with_mode(Box::new(crate::mysql::MysqlBackend::new()), mode)
    }

    /// Connect to a server.
    ///
    /// An existing session is closed first and the driver is replaced by a
    /// fresh one carrying the same options. Options in `params` are handed
    /// to the driver unless one of the same kind is already applied or
    /// queued.
    ///
    /// Returns `Ok(true)` once the handshake and every queued option
    /// succeeded.
    pub fn connect(&mut self, params: &ConnectParams) -> Result<bool> {
        if self.driver.connected() {
            self.driver = self.driver.duplicate();
        }
        self.params = Some(params.clone());

        for option in &params.options {
            let kind = option.kind();
            if self.driver.has_applied(kind) || self.driver.has_pending(kind) {
                continue;
            }
            if let Err(error) = self.driver.set_option(option.clone()) {
                return self.fail(Error::BadOption { kind, error });
            }
        }

        let ipc = match IpcMethod::resolve(params.server.as_deref(), params.port) {
            Ok(ipc) => ipc,
            Err(e) => return self.fail(Error::Address(e)),
        };
        let args = connect_args(&ipc, params);

        tracing::debug!(ipc = ?ipc, database = ?params.database, "connecting");

        if self.driver.connect(&args) {
            tracing::info!(
                backend = self.driver.backend_name(),
                host = ?args.host,
                socket = ?args.socket,
                port = args.port,
                "connected"
            );
            self.succeed();
            Ok(true)
        } else if self.driver.connected() {
            let error = self.driver.option_error().unwrap_or(OptionError::Disconnected);
            self.fail(Error::ConnectionFailed {
                message: format!("connected, but a queued option failed: {error}"),
                errnum: 0,
            })
        } else {
            let message = self.driver.error().to_string();
            let errnum = self.driver.errnum();
            tracing::debug!(errnum, error = %message, "connect failed");
            self.fail(Error::ConnectionFailed { message, errnum })
        }
    }

    /// Close the session. Options stay configured for the next connect.
    pub fn disconnect(&mut self) {
        self.driver.disconnect();
    }

    /// Whether a session is up.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.driver.connected()
    }

    /// Whether the last operation succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.copacetic
    }

    /// Message for the last failure, or an empty string.
    #[must_use]
    pub fn error(&self) -> &str {
        &self.error
    }

    /// Backend error number for the last failure, or 0.
    #[must_use]
    pub fn errnum(&self) -> u32 {
        self.errnum
    }

    /// The error mode chosen at construction.
    #[must_use]
    pub fn error_mode(&self) -> ErrorMode {
        self.mode
    }

    /// Hand an option to the driver.
    ///
    /// `Ok(true)` covers both "applied" and "queued until connect"; check
    /// [`option_error`](Self::option_error) to tell them apart.
    pub fn set_option(&mut self, option: ConnOption) -> Result<bool> {
        let kind = option.kind();
        match self.driver.set_option(option) {
            Ok(_) => {
                self.succeed();
                Ok(true)
            }
            Err(error) => self.fail(Error::BadOption { kind, error }),
        }
    }

    /// Hand an option to the driver unless one of its kind is already applied.
    pub fn set_option_default(&mut self, option: ConnOption) -> Result<bool> {
        let kind = option.kind();
        match self.driver.set_option_default(option) {
            Ok(OptionOutcome::AlreadySet) => Ok(true),
            Ok(_) => {
                self.succeed();
                Ok(true)
            }
            Err(error) => self.fail(Error::BadOption { kind, error }),
        }
    }

    /// Error from the most recent `set_option*` call.
    #[must_use]
    pub fn option_error(&self) -> Option<OptionError> {
        self.driver.option_error()
    }

    /// A second connection with the same options, connected with the same
    /// parameters if this one is connected.
    pub fn try_clone(&self) -> Result<Self> {
        let mut copy = Self {
            driver: self.driver.duplicate(),
            mode: self.mode,
            params: None,
            copacetic: true,
            error: String::new(),
            errnum: 0,
        };
        if let (true, Some(params)) = (self.connected(), &self.params) {
            copy.connect(params)?;
        }
        Ok(copy)
    }

    /// Run a statement that returns no rows.
    ///
    /// Failures are returned as [`Error::Query`] in either [`ErrorMode`].
    pub fn execute(&mut self, sql: &str) -> Result<u64> {
        tracing::trace!(sql = sql, "execute");
        match self.driver.execute(sql) {
            Ok(affected) => {
                self.succeed();
                Ok(affected)
            }
            Err(e) => Err(self.record(Error::query(&e))),
        }
    }

    /// Run a statement and fetch its rows.
    ///
    /// Failures are returned as [`Error::Query`] in either [`ErrorMode`].
    pub fn query(&mut self, sql: &str) -> Result<ResultSet> {
        tracing::trace!(sql = sql, "query");
        match self.driver.query(sql) {
            Ok(rows) => {
                self.succeed();
                Ok(rows)
            }
            Err(e) => Err(self.record(Error::query(&e))),
        }
    }

    /// Create a database.
    pub fn create_db(&mut self, name: &str) -> Result<bool> {
        self.run_command(name, |name| format!("CREATE DATABASE `{name}`"))
    }

    /// Drop a database.
    pub fn drop_db(&mut self, name: &str) -> Result<bool> {
        self.run_command(name, |name| format!("DROP DATABASE `{name}`"))
    }

    /// Make `name` the session's default database.
    pub fn select_db(&mut self, name: &str) -> Result<bool> {
        if let Err(e) = validate_identifier(name) {
            return self.fail(e);
        }
        match self.driver.select_db(name) {
            Ok(()) => {
                self.succeed();
                Ok(true)
            }
            Err(e) => self.fail(Error::query(&e)),
        }
    }

    /// Check that the server is responding.
    pub fn ping(&mut self) -> bool {
        self.driver.ping()
    }

    /// SQL-escape a string for use between quotes.
    #[must_use]
    pub fn escape_string(&self, input: &str) -> String {
        self.driver.escape_string(input)
    }

    /// Server version, when connected.
    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        self.driver.server_version()
    }

    /// Client library version.
    #[must_use]
    pub fn client_version(&self) -> String {
        self.driver.client_version()
    }

    /// Rows affected by the last statement.
    #[must_use]
    pub fn affected_rows(&self) -> u64 {
        self.driver.affected_rows()
    }

    /// ID generated by the last INSERT.
    #[must_use]
    pub fn insert_id(&self) -> Option<u64> {
        self.driver.insert_id()
    }

    /// The underlying driver.
    #[must_use]
    pub fn driver(&self) -> &DbDriver {
        &self.driver
    }

    /// The underlying driver, mutably.
    pub fn driver_mut(&mut self) -> &mut DbDriver {
        &mut self.driver
    }

    fn run_command(&mut self, name: &str, sql: impl FnOnce(&str) -> String) -> Result<bool> {
        if let Err(e) = validate_identifier(name) {
            return self.fail(e);
        }
        match self.driver.execute(&sql(name)) {
            Ok(_) => {
                self.succeed();
                Ok(true)
            }
            Err(e) => self.fail(Error::query(&e)),
        }
    }

    fn succeed(&mut self) {
        self.copacetic = true;
        self.error.clear();
        self.errnum = 0;
    }

    fn record(&mut self, error: Error) -> Error {
        self.copacetic = false;
        self.error = error.to_string();
        self.errnum = error.errnum();
        error
    }

    fn fail(&mut self, error: Error) -> Result<bool> {
        let error = self.record(error);
        match self.mode {
            ErrorMode::Propagate => Err(error),
            ErrorMode::Record => Ok(false),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.driver)
            .field("mode", &self.mode)
            .field("params", &self.params)
            .field("copacetic", &self.copacetic)
            .finish()
    }
}

fn connect_args(ipc: &IpcMethod, params: &ConnectParams) -> ConnectArgs {
    let mut args = ConnectArgs {
        database: params.database.clone(),
        user: params.user.clone(),
        password: params.password.clone(),
        ..ConnectArgs::default()
    };
    match ipc {
        IpcMethod::Default => {}
        IpcMethod::NamedPipe => args.host = Some(".".into()),
        IpcMethod::UnixSocket(path) => args.socket = Some(path.to_string_lossy().into_owned()),
        IpcMethod::Tcp { host, port } => {
            args.host = Some(host.clone());
            args.port = *port;
        }
    }
    args
}

/// Validate a database name before it is spliced into SQL.
fn validate_identifier(name: &str) -> Result<()> {
    #[allow(clippy::expect_used)]
    static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[a-zA-Z0-9_$]{1,64}$").expect("identifier pattern is valid")
    });

    if name.is_empty() {
        return Err(Error::InvalidIdentifier(
            "identifier cannot be empty".into(),
        ));
    }

    if !IDENTIFIER_RE.is_match(name) || name.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{name}': must contain only alphanumerics/_/$, \
             not be all digits, and be 1-64 characters"
        )));
    }

    Ok(())
}
