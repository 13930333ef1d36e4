//! Option ledger behaviour of `DbDriver` against the mock server.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use proptest::prelude::*;
use tabula_driver::{
    ConnOption, ConnectArgs, DbDriver, OptionError, OptionKind, OptionOutcome, RetryPolicy,
};
use tabula_testing::MockServer;

fn kinds<'a>(options: impl IntoIterator<Item = &'a ConnOption>) -> Vec<OptionKind> {
    options.into_iter().map(ConnOption::kind).collect()
}

#[test]
fn set_option_on_disconnected_driver_is_deferred() {
    let server = MockServer::new();
    server.require_session(OptionKind::MultiStatements);
    let mut driver = DbDriver::new(server.backend());

    let outcome = driver.set_option(ConnOption::MultiStatements(true));

    assert_eq!(outcome, Ok(OptionOutcome::Deferred));
    assert_eq!(driver.option_error(), Some(OptionError::Disconnected));
    assert!(driver.has_pending(OptionKind::MultiStatements));
    assert!(!driver.has_applied(OptionKind::MultiStatements));
}

#[test]
fn set_option_default_is_a_noop_after_first_success() {
    let server = MockServer::new();
    let mut driver = DbDriver::new(server.backend());

    let first = driver.set_option_default(ConnOption::ConnectTimeout(Duration::from_secs(5)));
    assert_eq!(first, Ok(OptionOutcome::Applied));

    let second = driver.set_option_default(ConnOption::ConnectTimeout(Duration::from_secs(30)));
    assert_eq!(second, Ok(OptionOutcome::AlreadySet));

    assert_eq!(
        driver.applied_options(),
        [ConnOption::ConnectTimeout(Duration::from_secs(5))]
    );
    assert_eq!(driver.pending_options().len(), 0);
    assert_eq!(server.option_log(), [OptionKind::ConnectTimeout]);
}

#[test]
fn set_option_default_does_not_touch_option_error() {
    let server = MockServer::new();
    server.reject(OptionKind::SetCharsetName);
    let mut driver = DbDriver::new(server.backend());

    driver.set_option(ConnOption::Compress).unwrap();
    let _ = driver.set_option(ConnOption::SetCharsetName("klingon".into()));
    assert_eq!(driver.option_error(), Some(OptionError::ApiReject));

    driver.set_option_default(ConnOption::Compress).unwrap();
    assert_eq!(driver.option_error(), Some(OptionError::ApiReject));
}

#[test]
fn set_option_default_still_applies_while_only_pending() {
    let server = MockServer::new();
    server.require_session(OptionKind::InitCommand);
    let mut driver = DbDriver::new(server.backend());

    driver
        .set_option(ConnOption::InitCommand("SET @a = 1".into()))
        .unwrap();
    let outcome = driver.set_option_default(ConnOption::InitCommand("SET @b = 2".into()));

    assert_eq!(outcome, Ok(OptionOutcome::Deferred));
    assert_eq!(driver.pending_options().len(), 2);
}

#[test]
fn rejected_and_unsupported_options_are_dropped() {
    let server = MockServer::new();
    server
        .reject(OptionKind::Protocol)
        .unsupported(OptionKind::SharedMemoryBaseName);
    let mut driver = DbDriver::new(server.backend());

    assert_eq!(
        driver.set_option(ConnOption::Protocol(tabula_driver::Protocol::Memory)),
        Err(OptionError::ApiReject)
    );
    assert_eq!(
        driver.set_option(ConnOption::SharedMemoryBaseName("MYSQL".into())),
        Err(OptionError::ApiLimit)
    );
    assert_eq!(driver.option_error(), Some(OptionError::ApiLimit));
    assert!(driver.applied_options().is_empty());
    assert_eq!(driver.pending_options().len(), 0);
}

#[test]
fn connect_applies_pending_options_in_submission_order() {
    let server = MockServer::new();
    server
        .require_session(OptionKind::InitCommand)
        .require_session(OptionKind::SetCharsetName)
        .require_session(OptionKind::MultiResults);
    let mut driver = DbDriver::new(server.backend());

    driver.set_option(ConnOption::SetCharsetName("utf8mb4".into())).unwrap();
    driver.set_option(ConnOption::Compress).unwrap();
    driver.set_option(ConnOption::MultiResults(true)).unwrap();
    driver.set_option(ConnOption::InitCommand("SET time_zone = '+00:00'".into())).unwrap();

    assert!(driver.connect(&ConnectArgs::default()));
    assert!(driver.connected());
    assert_eq!(driver.pending_options().len(), 0);
    assert_eq!(
        server.option_log(),
        [
            OptionKind::Compress,
            OptionKind::SetCharsetName,
            OptionKind::MultiResults,
            OptionKind::InitCommand,
        ]
    );
    assert_eq!(
        kinds(&server.session(1).unwrap().applied),
        [
            OptionKind::Compress,
            OptionKind::SetCharsetName,
            OptionKind::MultiResults,
            OptionKind::InitCommand,
        ]
    );
}

#[test]
fn connect_fails_when_a_pending_option_is_rejected() {
    let server = MockServer::new();
    server
        .require_session(OptionKind::InitCommand)
        .require_session(OptionKind::SetCharsetName)
        .require_session(OptionKind::MultiResults);
    let mut driver = DbDriver::new(server.backend());

    driver.set_option(ConnOption::InitCommand("SELECT 1".into())).unwrap();
    driver.set_option(ConnOption::SetCharsetName("klingon".into())).unwrap();
    driver.set_option(ConnOption::MultiResults(true)).unwrap();

    // The charset is refused only once a session exists.
    server.reject(OptionKind::SetCharsetName);
    assert!(!driver.connect(&ConnectArgs::default()));

    // The handshake itself succeeded.
    assert!(driver.connected());
    assert_eq!(driver.option_error(), Some(OptionError::ApiReject));
    assert_eq!(kinds(driver.applied_options()), [OptionKind::InitCommand]);
    assert_eq!(kinds(driver.pending_options()), [OptionKind::MultiResults]);
}

#[test]
fn best_effort_keeps_failures_queued_in_order() {
    let server = MockServer::new();
    server
        .require_session(OptionKind::InitCommand)
        .require_session(OptionKind::ReadTimeout)
        .require_session(OptionKind::WriteTimeout)
        .require_session(OptionKind::NoSchema);
    let mut driver = DbDriver::new(server.backend());

    driver.set_option(ConnOption::ReadTimeout(Duration::from_secs(10))).unwrap();
    driver.set_option(ConnOption::InitCommand("SELECT 1".into())).unwrap();
    driver.set_option(ConnOption::WriteTimeout(Duration::from_secs(10))).unwrap();
    driver.set_option(ConnOption::NoSchema(true)).unwrap();

    server
        .reject(OptionKind::ReadTimeout)
        .unsupported(OptionKind::WriteTimeout);
    driver.connect(&ConnectArgs::default());

    // Quit-on-first-failure dropped ReadTimeout and left the rest queued.
    assert_eq!(
        kinds(driver.pending_options()),
        [OptionKind::InitCommand, OptionKind::WriteTimeout, OptionKind::NoSchema]
    );

    assert!(driver.apply_pending_options(RetryPolicy::BestEffort));
    assert_eq!(kinds(driver.pending_options()), [OptionKind::WriteTimeout]);
    assert_eq!(driver.option_error(), Some(OptionError::ApiLimit));
    assert_eq!(
        kinds(driver.applied_options()),
        [OptionKind::InitCommand, OptionKind::NoSchema]
    );
}

#[test]
fn best_effort_while_disconnected_changes_nothing() {
    let server = MockServer::new();
    server
        .require_session(OptionKind::InitCommand)
        .require_session(OptionKind::SetCharsetName);
    let mut driver = DbDriver::new(server.backend());

    driver.set_option(ConnOption::InitCommand("SELECT 1".into())).unwrap();
    driver.set_option(ConnOption::SetCharsetName("latin1".into())).unwrap();

    assert!(driver.apply_pending_options(RetryPolicy::BestEffort));
    assert_eq!(
        kinds(driver.pending_options()),
        [OptionKind::InitCommand, OptionKind::SetCharsetName]
    );
    assert_eq!(driver.option_error(), Some(OptionError::Disconnected));

    assert!(!driver.apply_pending_options(RetryPolicy::QuitOnFirstFailure));
    assert_eq!(driver.pending_options().len(), 2);
}

#[test]
fn failed_handshake_keeps_pending_options() {
    let server = MockServer::new();
    server.require_session(OptionKind::InitCommand);
    server.refuse_connections(Some(tabula_driver::BackendError::with_code(
        2003,
        "Can't connect to MySQL server",
    )));
    let mut driver = DbDriver::new(server.backend());
    driver.set_option(ConnOption::InitCommand("SELECT 1".into())).unwrap();

    assert!(!driver.connect(&ConnectArgs::default()));
    assert!(!driver.connected());
    assert_eq!(driver.errnum(), 2003);
    assert_eq!(driver.error(), "Can't connect to MySQL server");
    assert_eq!(driver.pending_options().len(), 1);

    server.refuse_connections(None);
    assert!(driver.connect(&ConnectArgs::default()));
    assert_eq!(driver.errnum(), 0);
    assert_eq!(driver.pending_options().len(), 0);
}

#[test]
fn duplicate_connects_with_same_configuration() {
    let server = MockServer::new();
    server.require_session(OptionKind::InitCommand);
    let mut driver = DbDriver::new(server.backend());
    driver.set_option(ConnOption::Compress).unwrap();
    driver.set_option(ConnOption::InitCommand("SET @x = 1".into())).unwrap();
    assert!(driver.connect(&ConnectArgs::default()));

    let mut copy = driver.duplicate();
    assert!(!copy.connected());
    assert!(copy.connect(&ConnectArgs::default()));

    assert_eq!(server.connect_count(), 2);
    assert_eq!(
        kinds(&server.session(2).unwrap().applied),
        [OptionKind::Compress, OptionKind::InitCommand]
    );
}

#[test]
fn drop_closes_the_session() {
    let server = MockServer::new();
    let mut driver = DbDriver::new(server.backend());
    assert!(driver.connect(&ConnectArgs::default()));
    assert_eq!(server.live_sessions(), 1);

    drop(driver);
    assert_eq!(server.live_sessions(), 0);
}

#[test]
fn reconnect_replaces_the_session() {
    let server = MockServer::new();
    let mut driver = DbDriver::new(server.backend());
    assert!(driver.connect(&ConnectArgs::default()));
    assert!(driver.connect(&ConnectArgs::default()));

    assert_eq!(server.connect_count(), 2);
    assert_eq!(server.live_sessions(), 1);
    assert!(!server.session(1).unwrap().alive);
}

#[test]
fn reconnect_replays_applied_options() {
    let server = MockServer::new();
    server.require_session(OptionKind::InitCommand);
    let mut driver = DbDriver::new(server.backend());
    driver.set_option(ConnOption::Compress).unwrap();
    assert!(driver.connect(&ConnectArgs::default()));
    assert_eq!(
        driver.set_option(ConnOption::InitCommand("SET autocommit = 0".into())),
        Ok(OptionOutcome::Applied)
    );

    assert!(driver.connect(&ConnectArgs::default()));
    assert_eq!(
        kinds(&server.session(2).unwrap().applied),
        [OptionKind::Compress, OptionKind::InitCommand]
    );
    assert_eq!(
        kinds(driver.applied_options()),
        [OptionKind::Compress, OptionKind::InitCommand]
    );
    assert_eq!(driver.pending_options().len(), 0);
    assert_eq!(driver.option_error(), None);
}

#[test]
fn reconnect_keeps_replayed_options_ahead_of_queued_ones() {
    let server = MockServer::new();
    server
        .require_session(OptionKind::MultiResults)
        .require_session(OptionKind::InitCommand)
        .require_session(OptionKind::SetCharsetName)
        .reject(OptionKind::MultiResults);
    let mut driver = DbDriver::new(server.backend());
    driver.set_option(ConnOption::MultiResults(true)).unwrap();
    driver.set_option(ConnOption::InitCommand("SELECT 1".into())).unwrap();

    // MultiResults is dropped at connect and InitCommand is left queued.
    assert!(!driver.connect(&ConnectArgs::default()));
    assert!(driver.connected());
    assert_eq!(kinds(driver.pending_options()), [OptionKind::InitCommand]);

    driver.set_option(ConnOption::SetCharsetName("utf8mb4".into())).unwrap();
    assert!(driver.connect(&ConnectArgs::default()));
    assert_eq!(
        kinds(&server.session(2).unwrap().applied),
        [OptionKind::SetCharsetName, OptionKind::InitCommand]
    );
    assert_eq!(driver.pending_options().len(), 0);
}

#[test]
fn forwards_statements_to_backend() {
    let server = MockServer::new();
    let mut driver = DbDriver::new(server.backend());
    assert!(driver.connect(&ConnectArgs::default()));

    assert_eq!(driver.execute("INSERT INTO t VALUES (1)").unwrap(), 1);
    assert_eq!(driver.insert_id(), Some(1));
    assert_eq!(driver.affected_rows(), 1);
    driver.select_db("inventory").unwrap();
    assert!(driver.ping());
    assert_eq!(driver.server_version().as_deref(), Some("8.0.36-mock"));
    assert_eq!(driver.escape_string("it's"), "it\\'s");

    let session = server.session(1).unwrap();
    assert_eq!(session.database.as_deref(), Some("inventory"));
    assert_eq!(session.executed, ["INSERT INTO t VALUES (1)"]);
}

fn option_strategy() -> impl Strategy<Value = ConnOption> {
    prop_oneof![
        Just(ConnOption::Compress),
        any::<bool>().prop_map(ConnOption::FoundRows),
        any::<bool>().prop_map(ConnOption::MultiResults),
        any::<bool>().prop_map(ConnOption::Reconnect),
        (1u64..600).prop_map(|s| ConnOption::ReadTimeout(Duration::from_secs(s))),
        "[a-z0-9]{1,12}".prop_map(ConnOption::SetCharsetName),
        "SELECT [0-9]{1,3}".prop_map(ConnOption::InitCommand),
    ]
}

proptest! {
    #[test]
    fn deferred_options_apply_in_submission_order(
        options in proptest::collection::vec(option_strategy(), 0..16)
    ) {
        let server = MockServer::new();
        for option in &options {
            server.require_session(option.kind());
        }
        let mut driver = DbDriver::new(server.backend());
        for option in &options {
            prop_assert_eq!(driver.set_option(option.clone()), Ok(OptionOutcome::Deferred));
        }

        prop_assert!(driver.connect(&ConnectArgs::default()));
        prop_assert_eq!(driver.applied_options(), options.as_slice());
        prop_assert_eq!(server.session(1).unwrap().applied, options);
    }
}
