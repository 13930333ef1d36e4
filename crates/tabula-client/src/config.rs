//! Connection parameters.

use std::fmt;
use std::time::Duration;

use tabula_driver::{ConnOption, Protocol, SslSettings};

use crate::error::Error;

/// Everything [`Connection::connect`](crate::Connection::connect) needs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// Database to select after connecting.
    pub database: Option<String>,

    /// Server address: empty for the default, a socket path, `.` for a
    /// named pipe, or `host[:port-or-service]`.
    pub server: Option<String>,

    /// User name.
    pub user: Option<String>,

    /// Password.
    pub password: Option<String>,

    /// TCP port; 0 means "whatever `server` says, else the default".
    pub port: u16,

    /// Options handed to the driver before connecting.
    pub options: Vec<ConnOption>,
}

impl ConnectParams {
    /// Create empty parameters (default server, no credentials).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string.
    ///
    /// Keys are case-insensitive and `;`-separated:
    /// ```text
    /// Server=db.example.com:3306;Database=shop;User Id=app;Password=secret;Connect Timeout=5
    /// ```
    /// Besides the address and credentials, keys naming connection options
    /// (`Compress`, `Charset`, `Init Command`, `SSL CA`, ...) are turned
    /// into [`ConnOption`]s. Unknown keys are ignored.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut params = Self::default();
        let mut ssl: Option<SslSettings> = None;

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "host" | "data source" | "socket" => {
                    params.server = Some(value.to_string());
                }
                "port" => {
                    params.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {value}")))?;
                }
                "database" | "initial catalog" | "db" => {
                    params.database = Some(value.to_string());
                }
                "user id" | "uid" | "user" | "username" => {
                    params.user = Some(value.to_string());
                }
                "password" | "pwd" => {
                    params.password = Some(value.to_string());
                }
                "connect timeout" | "connection timeout" => {
                    params.options.push(ConnOption::ConnectTimeout(seconds(value)?));
                }
                "read timeout" => {
                    params.options.push(ConnOption::ReadTimeout(seconds(value)?));
                }
                "write timeout" => {
                    params.options.push(ConnOption::WriteTimeout(seconds(value)?));
                }
                "compress" | "compression" => {
                    if flag(value)? {
                        params.options.push(ConnOption::Compress);
                    }
                }
                "charset" | "character set" => {
                    params
                        .options
                        .push(ConnOption::SetCharsetName(value.to_string()));
                }
                "init command" => {
                    params
                        .options
                        .push(ConnOption::InitCommand(value.to_string()));
                }
                "multi statements" | "allow multiple statements" => {
                    params.options.push(ConnOption::MultiStatements(flag(value)?));
                }
                "found rows" => {
                    params.options.push(ConnOption::FoundRows(flag(value)?));
                }
                "local infile" => {
                    params
                        .options
                        .push(ConnOption::LocalInfile(u32::from(flag(value)?)));
                }
                "reconnect" => {
                    params.options.push(ConnOption::Reconnect(flag(value)?));
                }
                "protocol" => {
                    params.options.push(ConnOption::Protocol(protocol(value)?));
                }
                "ssl ca" => {
                    ssl.get_or_insert_with(SslSettings::new).ca = Some(value.to_string());
                }
                "ssl capath" => {
                    ssl.get_or_insert_with(SslSettings::new).ca_path = Some(value.to_string());
                }
                "ssl cert" => {
                    ssl.get_or_insert_with(SslSettings::new).cert = Some(value.to_string());
                }
                "ssl key" => {
                    ssl.get_or_insert_with(SslSettings::new).key = Some(value.to_string());
                }
                "ssl cipher" => {
                    ssl.get_or_insert_with(SslSettings::new).cipher = Some(value.to_string());
                }
                "ssl" | "encrypt" => {
                    if flag(value)? {
                        ssl.get_or_insert_with(SslSettings::new);
                    }
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        if let Some(ssl) = ssl {
            params.options.push(ConnOption::Ssl(ssl));
        }

        Ok(params)
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the server address.
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the TCP port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Add a connection option.
    #[must_use]
    pub fn option(mut self, option: ConnOption) -> Self {
        self.options.push(option);
        self
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("database", &self.database)
            .field("server", &self.server)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("options", &self.options)
            .finish()
    }
}

fn flag(value: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean: {value}"))),
    }
}

fn seconds(value: &str) -> Result<Duration, Error> {
    value
        .parse()
        .map(Duration::from_secs)
        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))
}

fn protocol(value: &str) -> Result<Protocol, Error> {
    match value.to_ascii_lowercase().as_str() {
        "default" => Ok(Protocol::Default),
        "tcp" => Ok(Protocol::Tcp),
        "socket" | "unix" => Ok(Protocol::Socket),
        "pipe" => Ok(Protocol::Pipe),
        "memory" => Ok(Protocol::Memory),
        _ => Err(Error::Config(format!("invalid protocol: {value}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_parsing() {
        let params = ConnectParams::from_connection_string(
            "Server=localhost;Database=test;User Id=app;Password=secret;",
        )
        .unwrap();

        assert_eq!(params.server.as_deref(), Some("localhost"));
        assert_eq!(params.database.as_deref(), Some("test"));
        assert_eq!(params.user.as_deref(), Some("app"));
        assert_eq!(params.password.as_deref(), Some("secret"));
        assert_eq!(params.port, 0);
        assert!(params.options.is_empty());
    }

    #[test]
    fn test_connection_string_options() {
        let params = ConnectParams::from_connection_string(
            "host=db:3307;Connect Timeout=5;COMPRESS=yes;Charset=utf8mb4;\
             Multi Statements=false;SSL CA=/etc/ssl/ca.pem;Protocol=tcp",
        )
        .unwrap();

        assert_eq!(params.server.as_deref(), Some("db:3307"));
        assert_eq!(
            params.options,
            [
                ConnOption::ConnectTimeout(Duration::from_secs(5)),
                ConnOption::Compress,
                ConnOption::SetCharsetName("utf8mb4".into()),
                ConnOption::MultiStatements(false),
                ConnOption::Protocol(Protocol::Tcp),
                ConnOption::Ssl(SslSettings::new().ca("/etc/ssl/ca.pem")),
            ]
        );
    }

    #[test]
    fn test_connection_string_errors() {
        assert!(matches!(
            ConnectParams::from_connection_string("Server"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ConnectParams::from_connection_string("Port=ninety"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ConnectParams::from_connection_string("Compress=maybe"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let params =
            ConnectParams::from_connection_string("Application Name=reports;Port=3306").unwrap();
        assert_eq!(params.port, 3306);
        assert!(params.options.is_empty());
    }

    #[test]
    fn test_debug_redacts_password() {
        let params = ConnectParams::new().user("app").password("hunter2");
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
