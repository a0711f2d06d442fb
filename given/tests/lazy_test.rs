use std::cell::Cell;
use std::rc::Rc;

use given::prelude::*;

fn counted(calls: &Rc<Cell<u32>>, value: u32) -> impl Fn() -> u32 + 'static {
    let calls = Rc::clone(calls);
    move || {
        calls.set(calls.get() + 1);
        value
    }
}

#[tokio::test]
async fn nothing_runs_until_first_read() {
    let calls = Rc::new(Cell::new(0));
    let before_read = Rc::new(Cell::new(u32::MAX));
    let suite = TestSuite::build(|s| {
        let value = s.given_named::<u32>("value");
        value.define(counted(&calls, 7));
        {
            let calls = Rc::clone(&calls);
            let before_read = Rc::clone(&before_read);
            s.it("does not read", move || async move {
                before_read.set(calls.get());
            });
        }
        {
            let value = value.clone();
            s.it("reads", move || async move {
                assert_eq!(*value.value().await.unwrap(), 7);
            });
        }
    });
    let report = suite.run().await;
    assert_eq!(report.tests, 2);
    assert_eq!(before_read.get(), 0);
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn reads_share_one_allocation_within_a_test() {
    let suite = TestSuite::build(|s| {
        let value = s.given_named::<Vec<u32>>("value");
        value.define(|| vec![1, 2, 3]);
        let value = value.clone();
        s.it("reads twice", move || async move {
            let first = value.value().await.unwrap();
            let second = value.value().await.unwrap();
            assert!(Rc::ptr_eq(&first, &second));
        });
    });
    suite.run().await;
}

#[tokio::test]
async fn undefined_fixture_fails_with_no_definition() {
    let suite = TestSuite::build(|s| {
        let value = s.given_named::<u32>("value");
        s.it("reads", move || async move {
            let err = value.value().await.unwrap_err();
            assert!(matches!(err, GivenError::NoDefinition { .. }));
            assert!(err.to_string().contains("`value`"));
        });
    });
    suite.run().await;
}

#[tokio::test]
async fn definitions_may_be_async() {
    let suite = TestSuite::build(|s| {
        let value = s.given_named::<u32>("value");
        value.define_async(|| async {
            tokio::task::yield_now().await;
            41 + 1
        });
        s.it("reads", move || async move {
            assert_eq!(*value.value().await.unwrap(), 42);
        });
    });
    suite.run().await;
}

#[tokio::test]
async fn dependencies_resolve_lazily_through_the_chain() {
    let base_calls = Rc::new(Cell::new(0));
    let suite = TestSuite::build(|s| {
        let base = s.given_named::<u32>("base");
        base.define(counted(&base_calls, 5));
        let derived = s.given_named::<u32>("derived");
        {
            let base = base.clone();
            derived.define_async(move || {
                let base = base.clone();
                async move { base.value().await.map(|v| *v * 2) }
            });
        }
        {
            let base_calls = Rc::clone(&base_calls);
            s.it("reads the derived fixture only", move || async move {
                assert_eq!(*derived.value().await.unwrap(), 10);
                assert_eq!(base_calls.get(), 1);
            });
        }
    });
    suite.run().await;
    assert_eq!(base_calls.get(), 1);
}
