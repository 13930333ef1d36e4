//! MySQL backend on top of `mysql_async`.
//!
//! The backend API is blocking, so every call is driven to completion on a
//! small runtime shared by all MySQL backends in the process.

use std::future::Future;
use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Row, SslOpts, Value};
use once_cell::sync::Lazy;
use tabula_driver::{
    Backend, BackendError, ConnOption, ConnectArgs, OptionError, Protocol, ResultSet,
    SslSettings,
};
use tokio::runtime::{Builder, Runtime};

/// "Lost connection to MySQL server during query".
const CR_SERVER_LOST: u32 = 2013;

static RUNTIME: Lazy<Result<Runtime, String>> = Lazy::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("tabula-mysql")
        .enable_all()
        .build()
        .map_err(|e| e.to_string())
});

fn runtime() -> Result<&'static Runtime, BackendError> {
    RUNTIME
        .as_ref()
        .map_err(|e| BackendError::new(format!("cannot start async runtime: {e}")))
}

/// Settings gathered from options until the next handshake.
#[derive(Debug, Clone, Default)]
struct Settings {
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    init: Vec<String>,
    prefer_socket: Option<bool>,
    ssl: bool,
}

/// A [`Backend`] talking to MySQL or MariaDB.
#[derive(Default)]
pub struct MysqlBackend {
    conn: Option<Conn>,
    settings: Settings,
    affected_rows: u64,
    insert_id: Option<u64>,
}

impl MysqlBackend {
    /// An unconnected backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a setting that only the handshake reads.
    fn before_connect(&mut self, f: impl FnOnce(&mut Settings)) -> Result<(), OptionError> {
        if self.conn.is_some() {
            return Err(OptionError::Connected);
        }
        f(&mut self.settings);
        Ok(())
    }

    fn opts(&self, args: &ConnectArgs) -> OptsBuilder {
        let mut opts = OptsBuilder::default()
            .user(args.user.clone())
            .pass(args.password.clone())
            .db_name(args.database.clone())
            .init(self.settings.init.clone());
        if let Some(host) = &args.host {
            opts = opts.ip_or_hostname(host.clone());
        }
        if args.port != 0 {
            opts = opts.tcp_port(args.port);
        }
        if let Some(socket) = &args.socket {
            opts = opts.socket(Some(socket.clone()));
        }
        if let Some(prefer) = self.settings.prefer_socket {
            opts = opts.prefer_socket(prefer);
        }
        if self.settings.ssl {
            opts = opts.ssl_opts(SslOpts::default());
        }
        opts
    }

    fn session(&mut self) -> Result<(&mut Conn, &'static Runtime), BackendError> {
        let runtime = runtime()?;
        let conn = self.conn.as_mut().ok_or_else(BackendError::not_connected)?;
        Ok((conn, runtime))
    }
}

impl Backend for MysqlBackend {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn connect(&mut self, args: &ConnectArgs) -> Result<(), BackendError> {
        self.disconnect();
        let runtime = runtime()?;
        let opts = self.opts(args);
        let limit = self.settings.connect_timeout;

        let conn = runtime.block_on(bounded(limit, Conn::new(opts)))?;
        tracing::debug!(
            server_version = ?conn.server_version(),
            connection_id = conn.id(),
            "mysql handshake complete"
        );
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match runtime() {
            Ok(runtime) => {
                if let Err(e) = runtime.block_on(conn.disconnect()) {
                    tracing::debug!(error = %e, "mysql disconnect was not clean");
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping mysql connection without a runtime"),
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn apply_option(&mut self, option: &ConnOption) -> Result<(), OptionError> {
        match option {
            ConnOption::ConnectTimeout(limit) => {
                let limit = *limit;
                self.before_connect(|s| s.connect_timeout = Some(limit))
            }
            ConnOption::ReadTimeout(limit) => {
                self.settings.read_timeout = Some(*limit);
                Ok(())
            }
            ConnOption::InitCommand(sql) => {
                let sql = sql.clone();
                self.before_connect(|s| s.init.push(sql))
            }
            ConnOption::SetCharsetName(name) => {
                if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
                {
                    return Err(OptionError::ApiReject);
                }
                let set_names = format!("SET NAMES {name}");
                if self.conn.is_none() {
                    self.settings.init.push(set_names);
                    return Ok(());
                }
                let (conn, runtime) = self.session().map_err(|_| OptionError::ApiReject)?;
                runtime
                    .block_on(conn.query_drop(set_names))
                    .map_err(|_| OptionError::ApiReject)
            }
            // mysql_async always negotiates multi-statement support
            ConnOption::MultiStatements(true) | ConnOption::MultiResults(true) => Ok(()),
            ConnOption::Reconnect(false) => Ok(()),
            ConnOption::Protocol(protocol) => match protocol {
                Protocol::Default => Ok(()),
                Protocol::Tcp => self.before_connect(|s| s.prefer_socket = Some(false)),
                Protocol::Socket => self.before_connect(|s| s.prefer_socket = Some(true)),
                Protocol::Pipe | Protocol::Memory => Err(OptionError::ApiLimit),
            },
            ConnOption::Ssl(ssl) if *ssl == SslSettings::default() => {
                self.before_connect(|s| s.ssl = true)
            }
            _ => Err(OptionError::ApiLimit),
        }
    }

    fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        let limit = self.settings.read_timeout;
        let (conn, runtime) = self.session()?;
        let (affected, insert_id) = runtime.block_on(async {
            bounded(limit, conn.query_drop(sql)).await?;
            Ok::<_, BackendError>((conn.affected_rows(), conn.last_insert_id()))
        })?;
        self.affected_rows = affected;
        self.insert_id = insert_id;
        Ok(affected)
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError> {
        let limit = self.settings.read_timeout;
        let (conn, runtime) = self.session()?;
        let rows: Vec<Row> = runtime.block_on(bounded(limit, conn.query(sql)))?;

        let fields = rows
            .first()
            .map(|row| {
                row.columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let rows: Vec<Vec<Option<String>>> = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.as_ref(i).and_then(value_to_text))
                    .collect()
            })
            .collect();

        self.affected_rows = rows.len() as u64;
        Ok(ResultSet { fields, rows })
    }

    fn ping(&mut self) -> bool {
        match self.session() {
            Ok((conn, runtime)) => runtime.block_on(conn.ping()).is_ok(),
            Err(_) => false,
        }
    }

    fn select_db(&mut self, database: &str) -> Result<(), BackendError> {
        let (conn, runtime) = self.session()?;
        let sql = format!("USE `{}`", database.replace('`', "``"));
        runtime.block_on(conn.query_drop(sql)).map_err(backend_error)
    }

    fn server_version(&self) -> Option<String> {
        self.conn.as_ref().map(|conn| {
            let (major, minor, patch) = conn.server_version();
            format!("{major}.{minor}.{patch}")
        })
    }

    fn client_version(&self) -> String {
        concat!("mysql_async (tabula ", env!("CARGO_PKG_VERSION"), ")").to_owned()
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn insert_id(&self) -> Option<u64> {
        self.insert_id
    }

    fn duplicate(&self) -> Box<dyn Backend> {
        Box::new(Self::new())
    }
}

impl Drop for MysqlBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn bounded<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = mysql_async::Result<T>>,
) -> Result<T, BackendError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(backend_error),
            Err(_) => Err(BackendError::with_code(
                CR_SERVER_LOST,
                format!("Lost connection to MySQL server after {limit:?}"),
            )),
        },
        None => fut.await.map_err(backend_error),
    }
}

fn backend_error(error: mysql_async::Error) -> BackendError {
    match &error {
        mysql_async::Error::Server(server) => {
            BackendError::with_code(u32::from(server.code), server.message.clone())
        }
        _ => BackendError::new(error.to_string()),
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text =
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
            if *micros != 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            Some(text)
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let hours = days * 24 + u32::from(*hours);
            let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if *micros != 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            Some(text)
        }
    }
}
