//! The backend capability set.
//!
//! A backend is the DBMS-specific half of a driver: it performs the actual
//! handshake, runs statements and translates [`ConnOption`]s into client
//! library settings. Everything that is common to all backends lives in
//! [`DbDriver`](crate::DbDriver).

use std::fmt;

use crate::error::{BackendError, OptionError};
use crate::option::ConnOption;

/// Where and as whom to connect.
///
/// Exactly one of `host` and `socket` is normally set; both unset means
/// "the client library's default IPC method".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectArgs {
    /// TCP host name or address.
    pub host: Option<String>,
    /// Unix domain socket path (or named pipe name).
    pub socket: Option<String>,
    /// TCP port; 0 means the backend's default.
    pub port: u16,
    /// Database to select after connecting.
    pub database: Option<String>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl fmt::Debug for ConnectArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectArgs")
            .field("host", &self.host)
            .field("socket", &self.socket)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Rows fetched by [`Backend::query`], in text form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSet {
    /// Column names, in order.
    pub fields: Vec<String>,
    /// One entry per row; `None` is SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the named column.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

/// DBMS-specific connection primitives.
///
/// Implementations are not required to be internally synchronized: a
/// backend is only ever driven by one thread at a time.
pub trait Backend: Send {
    /// Short backend name, e.g. `"mysql"`.
    fn name(&self) -> &'static str;

    /// Perform the network/IPC handshake.
    fn connect(&mut self, args: &ConnectArgs) -> Result<(), BackendError>;

    /// Drop the session, if any.
    fn disconnect(&mut self);

    /// Whether the handshake succeeded and no disconnect followed.
    fn is_connected(&self) -> bool;

    /// Translate one option into a client setting.
    ///
    /// Return [`OptionError::Disconnected`] for options that need a live
    /// session when there is none; the driver will queue them.
    fn apply_option(&mut self, option: &ConnOption) -> Result<(), OptionError>;

    /// Run a statement that returns no rows, returning the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64, BackendError>;

    /// Run a statement and fetch every row.
    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError>;

    /// Check that the server is still responding.
    fn ping(&mut self) -> bool;

    /// Switch the session's default database.
    fn select_db(&mut self, database: &str) -> Result<(), BackendError>;

    /// Server version string, when connected.
    fn server_version(&self) -> Option<String>;

    /// Client library version string.
    fn client_version(&self) -> String;

    /// Rows affected by the last statement.
    fn affected_rows(&self) -> u64;

    /// Value generated for an AUTO_INCREMENT column by the last INSERT.
    fn insert_id(&self) -> Option<u64>;

    /// A new, unconnected backend of the same kind.
    fn duplicate(&self) -> Box<dyn Backend>;

    /// SQL-escape a string for inclusion between quotes.
    fn escape_string(&self, input: &str) -> String {
        escape_sql_string(input)
    }
}

/// Escape the characters MySQL treats specially inside a quoted string.
#[must_use]
pub fn escape_sql_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for c in input.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out
}
