//! Connection options.
//!
//! Every configurable connection parameter is a variant of [`ConnOption`]
//! carrying a typed payload. Options are plain values: the logic that
//! turns one into a DBMS setting lives in the backend, which receives the
//! whole enum and dispatches on the variant.

use std::fmt;
use std::time::Duration;

use crate::backend::Backend;
use crate::error::OptionError;

/// Transport a client should prefer when more than one is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Let the client library decide.
    #[default]
    Default,
    /// TCP/IP.
    Tcp,
    /// Unix domain socket.
    Socket,
    /// Windows named pipe.
    Pipe,
    /// Windows shared memory.
    Memory,
}

/// TLS parameters for [`ConnOption::Ssl`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SslSettings {
    /// Path to the client private key.
    pub key: Option<String>,
    /// Path to the client certificate.
    pub cert: Option<String>,
    /// Path to the certificate authority file.
    pub ca: Option<String>,
    /// Directory holding trusted CA certificates.
    pub ca_path: Option<String>,
    /// Permitted cipher list.
    pub cipher: Option<String>,
}

impl SslSettings {
    /// Create empty settings (server certificate checked against system roots).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client key and certificate pair.
    #[must_use]
    pub fn identity(mut self, key: impl Into<String>, cert: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.cert = Some(cert.into());
        self
    }

    /// Set the certificate authority file.
    #[must_use]
    pub fn ca(mut self, ca: impl Into<String>) -> Self {
        self.ca = Some(ca.into());
        self
    }

    /// Set the directory of trusted CA certificates.
    #[must_use]
    pub fn ca_path(mut self, path: impl Into<String>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    /// Set the permitted cipher list.
    #[must_use]
    pub fn cipher(mut self, cipher: impl Into<String>) -> Self {
        self.cipher = Some(cipher.into());
        self
    }
}

/// A single connection option with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnOption {
    /// Compress the client/server protocol.
    Compress,
    /// Give up on the handshake after this long.
    ConnectTimeout(Duration),
    /// Report matched rather than changed rows for UPDATE.
    FoundRows(bool),
    /// Let the client guess between embedded and remote servers.
    GuessConnection,
    /// Allow spaces after function names.
    IgnoreSpace(bool),
    /// SQL to run right after each connect.
    InitCommand(String),
    /// Use the interactive (rather than wait) timeout.
    Interactive(bool),
    /// Enable `LOAD DATA LOCAL`.
    LocalFiles(bool),
    /// Enable `LOAD DATA LOCAL INFILE` with the given flag value.
    LocalInfile(u32),
    /// Accept multiple result sets from stored procedures.
    MultiResults(bool),
    /// Allow several statements separated by `;` in one query.
    MultiStatements(bool),
    /// Connect through a Windows named pipe.
    NamedPipe,
    /// Forbid the `db.table.column` syntax.
    NoSchema(bool),
    /// Preferred transport.
    Protocol(Protocol),
    /// Read options from this file instead of `my.cnf`.
    ReadDefaultFile(String),
    /// Read this group from the option file.
    ReadDefaultGroup(String),
    /// Timeout for each read from the server.
    ReadTimeout(Duration),
    /// Reconnect automatically when the server goes away.
    Reconnect(bool),
    /// Report truncation of fetched data.
    ReportDataTruncation(bool),
    /// Refuse the pre-4.1 password scheme.
    SecureAuth(bool),
    /// Directory holding character set definitions.
    SetCharsetDir(String),
    /// Default character set for the session.
    SetCharsetName(String),
    /// Client IP reported to an embedded server.
    SetClientIp(String),
    /// Shared-memory base name (Windows).
    SharedMemoryBaseName(String),
    /// Encrypt the connection.
    Ssl(SslSettings),
    /// Force use of an embedded server.
    UseEmbeddedConnection,
    /// Force use of a remote server.
    UseRemoteConnection,
    /// Timeout for each write to the server.
    WriteTimeout(Duration),
}

/// The payload-free discriminant of a [`ConnOption`].
///
/// Two options with the same kind configure the same setting, which is
/// what "set unless already set" compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum OptionKind {
    Compress,
    ConnectTimeout,
    FoundRows,
    GuessConnection,
    IgnoreSpace,
    InitCommand,
    Interactive,
    LocalFiles,
    LocalInfile,
    MultiResults,
    MultiStatements,
    NamedPipe,
    NoSchema,
    Protocol,
    ReadDefaultFile,
    ReadDefaultGroup,
    ReadTimeout,
    Reconnect,
    ReportDataTruncation,
    SecureAuth,
    SetCharsetDir,
    SetCharsetName,
    SetClientIp,
    SharedMemoryBaseName,
    Ssl,
    UseEmbeddedConnection,
    UseRemoteConnection,
    WriteTimeout,
}

impl ConnOption {
    /// The kind of setting this option configures.
    #[must_use]
    pub fn kind(&self) -> OptionKind {
        match self {
            Self::Compress => OptionKind::Compress,
            Self::ConnectTimeout(_) => OptionKind::ConnectTimeout,
            Self::FoundRows(_) => OptionKind::FoundRows,
            Self::GuessConnection => OptionKind::GuessConnection,
            Self::IgnoreSpace(_) => OptionKind::IgnoreSpace,
            Self::InitCommand(_) => OptionKind::InitCommand,
            Self::Interactive(_) => OptionKind::Interactive,
            Self::LocalFiles(_) => OptionKind::LocalFiles,
            Self::LocalInfile(_) => OptionKind::LocalInfile,
            Self::MultiResults(_) => OptionKind::MultiResults,
            Self::MultiStatements(_) => OptionKind::MultiStatements,
            Self::NamedPipe => OptionKind::NamedPipe,
            Self::NoSchema(_) => OptionKind::NoSchema,
            Self::Protocol(_) => OptionKind::Protocol,
            Self::ReadDefaultFile(_) => OptionKind::ReadDefaultFile,
            Self::ReadDefaultGroup(_) => OptionKind::ReadDefaultGroup,
            Self::ReadTimeout(_) => OptionKind::ReadTimeout,
            Self::Reconnect(_) => OptionKind::Reconnect,
            Self::ReportDataTruncation(_) => OptionKind::ReportDataTruncation,
            Self::SecureAuth(_) => OptionKind::SecureAuth,
            Self::SetCharsetDir(_) => OptionKind::SetCharsetDir,
            Self::SetCharsetName(_) => OptionKind::SetCharsetName,
            Self::SetClientIp(_) => OptionKind::SetClientIp,
            Self::SharedMemoryBaseName(_) => OptionKind::SharedMemoryBaseName,
            Self::Ssl(_) => OptionKind::Ssl,
            Self::UseEmbeddedConnection => OptionKind::UseEmbeddedConnection,
            Self::UseRemoteConnection => OptionKind::UseRemoteConnection,
            Self::WriteTimeout(_) => OptionKind::WriteTimeout,
        }
    }

    /// Apply this option to a backend, classifying the outcome.
    ///
    /// This has no side effects beyond the backend's own state.
    pub fn apply(&self, backend: &mut dyn Backend) -> Result<(), OptionError> {
        backend.apply_option(self)
    }
}

impl OptionKind {
    /// Stable snake_case name, used in logs and connection strings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::ConnectTimeout => "connect_timeout",
            Self::FoundRows => "found_rows",
            Self::GuessConnection => "guess_connection",
            Self::IgnoreSpace => "ignore_space",
            Self::InitCommand => "init_command",
            Self::Interactive => "interactive",
            Self::LocalFiles => "local_files",
            Self::LocalInfile => "local_infile",
            Self::MultiResults => "multi_results",
            Self::MultiStatements => "multi_statements",
            Self::NamedPipe => "named_pipe",
            Self::NoSchema => "no_schema",
            Self::Protocol => "protocol",
            Self::ReadDefaultFile => "read_default_file",
            Self::ReadDefaultGroup => "read_default_group",
            Self::ReadTimeout => "read_timeout",
            Self::Reconnect => "reconnect",
            Self::ReportDataTruncation => "report_data_truncation",
            Self::SecureAuth => "secure_auth",
            Self::SetCharsetDir => "set_charset_dir",
            Self::SetCharsetName => "set_charset_name",
            Self::SetClientIp => "set_client_ip",
            Self::SharedMemoryBaseName => "shared_memory_base_name",
            Self::Ssl => "ssl",
            Self::UseEmbeddedConnection => "use_embedded_connection",
            Self::UseRemoteConnection => "use_remote_connection",
            Self::WriteTimeout => "write_timeout",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
