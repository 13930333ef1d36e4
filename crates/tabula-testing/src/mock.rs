//! Scriptable in-memory backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tabula_driver::{
    Backend, BackendError, ConnOption, ConnectArgs, OptionError, OptionKind, ResultSet,
};

/// MySQL's "server has gone away" error number.
const CR_SERVER_GONE_ERROR: u32 = 2006;

/// What one backend session did, as seen by the server.
#[derive(Debug, Clone)]
pub struct SessionLog {
    /// Session number, starting at 1 in connect order.
    pub id: usize,
    /// Arguments the session was opened with.
    pub args: ConnectArgs,
    /// Options applied while the session was live, plus those applied to
    /// the backend before it connected.
    pub applied: Vec<ConnOption>,
    /// Statements executed or queried, in order.
    pub executed: Vec<String>,
    /// Current default database.
    pub database: Option<String>,
    /// Whether the session is still open on the server side.
    pub alive: bool,
}

#[derive(Debug, Default)]
struct ServerState {
    requires_session: HashSet<OptionKind>,
    rejected: HashSet<OptionKind>,
    unsupported: HashSet<OptionKind>,
    refuse_connect: Option<BackendError>,
    ping_fails: bool,
    connect_delay: Option<Duration>,
    failing_sql: HashMap<String, BackendError>,
    results: HashMap<String, ResultSet>,
    sessions: Vec<SessionLog>,
    option_log: Vec<OptionKind>,
    server_version: String,
}

/// An in-memory database server shared by every backend it creates.
///
/// Cloning the server is cheap and yields another handle to the same state.
#[derive(Debug, Clone)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// A server that accepts every connection and option.
    #[must_use]
    pub fn new() -> Self {
        let state = ServerState {
            server_version: "8.0.36-mock".into(),
            ..ServerState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A fresh, unconnected backend talking to this server.
    #[must_use]
    pub fn backend(&self) -> Box<dyn Backend> {
        Box::new(self.mock_backend())
    }

    /// Like [`backend`](Self::backend), without the box.
    #[must_use]
    pub fn mock_backend(&self) -> MockBackend {
        MockBackend {
            server: self.clone(),
            session: None,
            preconnect: Vec::new(),
            affected_rows: 0,
            insert_id: None,
        }
    }

    /// Options of this kind report "disconnected" until a session exists.
    pub fn require_session(&self, kind: OptionKind) -> &Self {
        self.state.lock().requires_session.insert(kind);
        self
    }

    /// Options of this kind are refused with [`OptionError::ApiReject`].
    pub fn reject(&self, kind: OptionKind) -> &Self {
        self.state.lock().rejected.insert(kind);
        self
    }

    /// Options of this kind are refused with [`OptionError::ApiLimit`].
    pub fn unsupported(&self, kind: OptionKind) -> &Self {
        self.state.lock().unsupported.insert(kind);
        self
    }

    /// Make every following handshake fail with `error`, or succeed again
    /// with `None`.
    pub fn refuse_connections(&self, error: Option<BackendError>) -> &Self {
        self.state.lock().refuse_connect = error;
        self
    }

    /// Make every ping fail while `fails` is set, even on live sessions.
    pub fn fail_pings(&self, fails: bool) -> &Self {
        self.state.lock().ping_fails = fails;
        self
    }

    /// Sleep this long inside each handshake.
    pub fn connect_delay(&self, delay: Duration) -> &Self {
        self.state.lock().connect_delay = Some(delay);
        self
    }

    /// Make one statement fail.
    pub fn fail_sql(&self, sql: impl Into<String>, error: BackendError) -> &Self {
        self.state.lock().failing_sql.insert(sql.into(), error);
        self
    }

    /// Rows to return for one query.
    pub fn set_result(&self, sql: impl Into<String>, rows: ResultSet) -> &Self {
        self.state.lock().results.insert(sql.into(), rows);
        self
    }

    /// Close a session from the server side.
    pub fn kill_session(&self, id: usize) {
        if let Some(session) = self.state.lock().sessions.iter_mut().find(|s| s.id == id) {
            tracing::debug!(session = id, "mock server killing session");
            session.alive = false;
        }
    }

    /// Close every session from the server side.
    pub fn kill_all(&self) {
        for session in &mut self.state.lock().sessions {
            session.alive = false;
        }
    }

    /// Snapshot of every session ever opened.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionLog> {
        self.state.lock().sessions.clone()
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn session(&self, id: usize) -> Option<SessionLog> {
        self.state.lock().sessions.iter().find(|s| s.id == id).cloned()
    }

    /// Number of successful handshakes.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of sessions that are still open.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.state.lock().sessions.iter().filter(|s| s.alive).count()
    }

    /// Kinds of every option any backend applied, in order.
    #[must_use]
    pub fn option_log(&self) -> Vec<OptionKind> {
        self.state.lock().option_log.clone()
    }
}

/// A backend connected to a [`MockServer`].
#[derive(Debug)]
pub struct MockBackend {
    server: MockServer,
    session: Option<usize>,
    preconnect: Vec<ConnOption>,
    affected_rows: u64,
    insert_id: Option<u64>,
}

impl MockBackend {
    /// Server-side session number, when connected.
    #[must_use]
    pub fn session_id(&self) -> Option<usize> {
        self.session
    }

    fn with_session<T>(
        &mut self,
        f: impl FnOnce(&mut SessionLog) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let id = self.session.ok_or_else(BackendError::not_connected)?;
        let mut state = self.server.state.lock();
        match state.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) if session.alive => f(session),
            _ => Err(BackendError::with_code(
                CR_SERVER_GONE_ERROR,
                "MySQL server has gone away",
            )),
        }
    }

    fn run(&mut self, sql: &str) -> Result<(), BackendError> {
        let failure = self.server.state.lock().failing_sql.get(sql).cloned();
        self.with_session(|session| {
            session.executed.push(sql.to_owned());
            failure.map_or(Ok(()), Err)
        })
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn connect(&mut self, args: &ConnectArgs) -> Result<(), BackendError> {
        self.disconnect();

        let delay = {
            let state = self.server.state.lock();
            if let Some(error) = &state.refuse_connect {
                return Err(error.clone());
            }
            state.connect_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.server.state.lock();
        let id = state.sessions.len() + 1;
        state.sessions.push(SessionLog {
            id,
            args: args.clone(),
            applied: self.preconnect.clone(),
            executed: Vec::new(),
            database: args.database.clone(),
            alive: true,
        });
        self.session = Some(id);
        tracing::trace!(session = id, "mock session opened");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(id) = self.session.take() {
            self.server.kill_session(id);
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn apply_option(&mut self, option: &ConnOption) -> Result<(), OptionError> {
        let kind = option.kind();
        let mut state = self.server.state.lock();
        if state.unsupported.contains(&kind) {
            return Err(OptionError::ApiLimit);
        }
        if state.rejected.contains(&kind) {
            return Err(OptionError::ApiReject);
        }

        match self.session {
            Some(id) => {
                if let Some(session) = state.sessions.iter_mut().find(|s| s.id == id) {
                    session.applied.push(option.clone());
                }
            }
            None if state.requires_session.contains(&kind) => {
                return Err(OptionError::Disconnected);
            }
            None => {
                // a later value of the same option overrides the earlier one
                self.preconnect.retain(|o| o.kind() != kind);
                self.preconnect.push(option.clone());
            }
        }
        state.option_log.push(kind);
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        self.run(sql)?;
        self.affected_rows = 1;
        if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            self.insert_id = Some(self.insert_id.map_or(1, |id| id + 1));
        }
        Ok(self.affected_rows)
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError> {
        self.run(sql)?;
        let rows = self
            .server
            .state
            .lock()
            .results
            .get(sql)
            .cloned()
            .unwrap_or_default();
        self.affected_rows = rows.len() as u64;
        Ok(rows)
    }

    fn ping(&mut self) -> bool {
        let fails = self.server.state.lock().ping_fails;
        !fails && self.with_session(|_| Ok(())).is_ok()
    }

    fn select_db(&mut self, database: &str) -> Result<(), BackendError> {
        self.with_session(|session| {
            session.database = Some(database.to_owned());
            Ok(())
        })
    }

    fn server_version(&self) -> Option<String> {
        self.session
            .map(|_| self.server.state.lock().server_version.clone())
    }

    fn client_version(&self) -> String {
        concat!("tabula-mock ", env!("CARGO_PKG_VERSION")).to_owned()
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn insert_id(&self) -> Option<u64> {
        self.insert_id
    }

    fn duplicate(&self) -> Box<dyn Backend> {
        self.server.backend()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}
