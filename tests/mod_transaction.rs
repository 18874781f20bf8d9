mod common;

use common::{PEOPLE, Person, saved, server};
use docbridge::driver::memory::OpKind;
use docbridge::driver::{DriverError, ReadConcern, ReadPreference, WriteConcern};
use docbridge::{Context, DbError, ErrorKind, Expression, MemoryDriver, PersistentObject, Server};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

#[test]
fn committed_writes_become_visible() {
    let (driver, server) = server();
    let ctx = Context::background();
    let ids = server
        .with_transaction(&ctx, |session| {
            assert!(session.is_transactional());
            let people = session.collection(PEOPLE);
            let mut a = Person::new("Alice", 30);
            let mut b = Person::new("Bob", 25);
            people.save(&mut a, "tx")?;
            people.save(&mut b, "tx")?;
            assert_eq!(people.count(&Expression::all())?, 2);
            assert!(driver.snapshot(PEOPLE).is_empty());
            Ok((a.id, b.id))
        })
        .unwrap();

    assert_eq!(driver.snapshot(PEOPLE).len(), 2);
    let people = server.new_session(ctx).collection(PEOPLE);
    let loaded: Person = people.load(&Expression::equal("_id", ids.0), &[]).unwrap();
    assert_eq!(loaded.name, "Alice");
    assert_eq!(driver.op_count(OpKind::Commit), 1);
    assert_eq!(driver.op_count(OpKind::Abort), 0);
}

#[test]
fn callback_error_aborts_and_is_returned_unchanged() {
    let (driver, server) = server();
    let ctx = Context::background();
    let err = server
        .with_transaction(&ctx, |session| -> docbridge::Result<()> {
            let mut a = Person::new("Alice", 30);
            session.collection(PEOPLE).save(&mut a, "tx")?;
            Err(DbError::bad_request("caller", "validation failed"))
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.location(), "caller");
    assert!(driver.snapshot(PEOPLE).is_empty());
    assert_eq!(driver.op_count(OpKind::Abort), 1);
    assert_eq!(driver.op_count(OpKind::Commit), 0);
}

#[test]
fn transactional_session_options() {
    let driver = MemoryDriver::new("test");
    let server = Server::new(driver.clone()).with_max_commit_time(Some(Duration::from_secs(60)));
    server.with_transaction(&Context::background(), |_| Ok(())).unwrap();

    let options = driver.last_session_options().unwrap();
    assert!(options.causal_consistency);
    let txn = options.default_transaction_options;
    assert_eq!(txn.read_concern, ReadConcern::Majority);
    assert_eq!(txn.write_concern, WriteConcern::Majority);
    assert_eq!(txn.read_preference, ReadPreference::Primary);
    assert_eq!(txn.max_commit_time, Some(Duration::from_secs(60)));
}

#[test]
fn session_start_failure() {
    let (driver, server) = server();
    driver.fail_next(OpKind::StartSession, DriverError::Disconnected);
    let mut ran = false;
    let err = server
        .with_transaction(&Context::background(), |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();
    assert!(!ran);
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("unable to start database session"));
}

#[test]
fn transaction_start_failure_ends_session_without_running() {
    let (driver, server) = server();
    driver.fail_next(OpKind::StartTransaction, DriverError::Disconnected);
    let err = server.with_transaction(&Context::background(), |_| Ok(())).unwrap_err();
    assert!(err.to_string().contains("unable to start transaction"));
    assert_eq!(driver.op_count(OpKind::Abort), 0);
}

#[test]
fn commit_conflict_is_internal_and_discards_writes() {
    let (driver, server) = server();
    saved(&server, &[("Alice", 30)]);
    let outside = server.new_session(Context::background()).collection(PEOPLE);

    let err = server
        .with_transaction(&Context::background(), |session| {
            let mut b = Person::new("Bob", 25);
            session.collection(PEOPLE).save(&mut b, "tx")?;
            let mut c = Person::new("Carol", 41);
            outside.save(&mut c, "concurrent")?;
            Ok(())
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.details().iter().any(|d| d == "transient: true"));
    assert!(err.driver_error().is_some_and(DriverError::is_transient));
    let names: Vec<String> = driver
        .snapshot(PEOPLE)
        .iter()
        .map(|d| d.get_str("name").unwrap().to_string())
        .collect();
    assert_eq!(names, ["Alice", "Carol"]);
}

#[test]
fn collection_outliving_transaction_is_refused() {
    let (driver, server) = server();
    let ctx = Context::background();
    let escaped = server.with_transaction(&ctx, |session| Ok(session.collection(PEOPLE))).unwrap();

    let mut late = Person::new("Late", 1);
    let err = escaped.save(&mut late, "after commit").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(matches!(err.driver_error(), Some(DriverError::Transaction { transient: false, .. })));
    assert!(late.is_new());
    assert!(escaped.count(&Expression::all()).is_err());
    assert!(driver.snapshot(PEOPLE).is_empty());
}

#[test]
fn panic_in_callback_still_ends_session() {
    let (driver, server) = server();
    let result = catch_unwind(AssertUnwindSafe(|| {
        server.with_transaction(&Context::background(), |session| -> docbridge::Result<()> {
            let mut a = Person::new("Alice", 30);
            session.collection(PEOPLE).save(&mut a, "tx")?;
            panic!("boom");
        })
    }));
    assert!(result.is_err());
    assert_eq!(driver.op_count(OpKind::Abort), 1);
    assert!(driver.snapshot(PEOPLE).is_empty());
}

#[test]
fn session_close_disconnects_and_logs_failures() {
    let (driver, server) = server();
    let session = server.new_session(Context::background());
    driver.fail_next(OpKind::Disconnect, DriverError::Command { code: 1, message: "nope".into() });
    session.close();
    assert!(driver.is_connected());
    session.close();
    assert!(!driver.is_connected());

    let err = session.collection(PEOPLE).count(&Expression::all()).unwrap_err();
    assert_eq!(err.driver_error(), Some(&DriverError::Disconnected));
}
