mod common;

use common::{PEOPLE, Person, saved};
use docbridge::driver::DriverError;
use docbridge::driver::memory::OpKind;
use docbridge::{Context, DocumentIterator, Expression, IteratorState, MemoryDriver, QueryOption, Server};

fn batched_server(batch: usize) -> (MemoryDriver, Server<MemoryDriver>) {
    let driver = MemoryDriver::with_batch_size("test", batch);
    (driver.clone(), Server::new(driver))
}

#[test]
fn iterates_across_batches() {
    let (_driver, server) = batched_server(2);
    saved(&server, &[("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)]);
    let people = server.new_session(Context::background()).collection(PEOPLE);

    let mut it = people.iterate(&Expression::all(), &[QueryOption::sort_asc("age")]).unwrap();
    let mut person = Person::new("", 0);
    let mut ages = Vec::new();
    while it.next(&mut person) {
        ages.push(person.age);
    }
    assert_eq!(ages, [1, 2, 3, 4, 5]);
    assert!(it.error().is_none());
    assert_eq!(it.state(), IteratorState::Exhausted);
}

#[test]
fn count_reports_buffered_documents_only() {
    let (_driver, server) = batched_server(2);
    saved(&server, &[("a", 1), ("b", 2), ("c", 3)]);
    let people = server.new_session(Context::background()).collection(PEOPLE);
    let mut it = people.iterate(&Expression::all(), &[]).unwrap();
    let first: Option<Person> = it.try_next().unwrap();
    assert!(first.is_some());
    assert_eq!(it.count(), 1);
}

#[test]
fn iterate_failure_is_reported_and_inert_fallback_is_empty() {
    let (driver, server) = batched_server(2);
    let people = server.new_session(Context::background()).collection(PEOPLE);
    driver.fail_next(OpKind::Find, DriverError::Disconnected);
    let err = people.iterate(&Expression::all(), &[]).unwrap_err();
    assert_eq!(err.location(), "docbridge::Collection::iterate");

    let mut it = people.iterate(&Expression::all(), &[]).unwrap_or_else(|_| DocumentIterator::inert());
    assert!(it.try_next::<Person>().unwrap().is_none());
}

#[test]
fn cancelled_context_stops_iteration_at_next_batch() {
    let (_driver, server) = batched_server(2);
    saved(&server, &[("a", 1), ("b", 2), ("c", 3)]);
    let ctx = Context::background();
    let people = server.new_session(ctx.clone()).collection(PEOPLE);
    let mut it = people.iterate(&Expression::all(), &[]).unwrap();

    let mut person = Person::new("", 0);
    assert!(it.next(&mut person));
    assert!(it.next(&mut person));
    ctx.cancel();
    assert!(!it.next(&mut person));
    assert_eq!(it.error(), Some(&DriverError::Cancelled));
    assert_eq!(it.state(), IteratorState::Failed);
}

#[test]
fn documents_adapter_and_close() {
    let (_driver, server) = batched_server(10);
    saved(&server, &[("a", 1), ("b", 2)]);
    let people = server.new_session(Context::background()).collection(PEOPLE);
    let mut it = people.iterate(&Expression::all(), &[]).unwrap();
    let all: Vec<Person> = it.documents().collect::<Result<_, _>>().unwrap();
    assert_eq!(all.len(), 2);
    it.close().unwrap();
    it.close().unwrap();
    assert_eq!(it.state(), IteratorState::Closed);
}
