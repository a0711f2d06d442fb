use std::cell::Cell;
use std::rc::Rc;

use given::prelude::*;

#[tokio::test]
async fn smart_cache_reuses_snapshots_across_dependency_changes() {
    let derived_calls = Rc::new(Cell::new(0));
    let suite = TestSuite::build(|s| {
        let base = s.given_named::<u32>("base");
        base.define(|| 1u32).compare_by_value();
        let derived = s.given_named::<u32>("derived");
        {
            let base = base.clone();
            let calls = Rc::clone(&derived_calls);
            derived.define_async_with(
                GivenOptions::new()
                    .cache(CacheMode::Smart)
                    .cache_scope(Scope::All),
                move || {
                    let base = base.clone();
                    let calls = Rc::clone(&calls);
                    async move {
                        calls.set(calls.get() + 1);
                        base.value().await.map(|v| *v * 10)
                    }
                },
            );
        }
        {
            let derived = derived.clone();
            s.it("computes once", move || async move {
                assert_eq!(*derived.value().await.unwrap(), 10);
                assert_eq!(*derived.value().await.unwrap(), 10);
            });
        }
        s.describe("with a changed dependency", |s| {
            base.define(|| 2u32);
            let derived = derived.clone();
            s.it("recomputes", move || async move {
                assert_eq!(*derived.value().await.unwrap(), 20);
            });
        });
        {
            let derived = derived.clone();
            s.it("reuses the original snapshot", move || async move {
                assert_eq!(*derived.value().await.unwrap(), 10);
            });
        }
    });
    let report = suite.run().await;
    assert_eq!(report.tests, 3);
    // One computation per distinct dependency value, not per test.
    assert_eq!(derived_calls.get(), 2);
}

#[tokio::test]
async fn failed_dependencies_revalidate_without_recomputing() {
    let base_calls = Rc::new(Cell::new(0));
    let derived_calls = Rc::new(Cell::new(0));
    let suite = TestSuite::build(|s| {
        let base = s.given_named::<u32>("base");
        {
            let calls = Rc::clone(&base_calls);
            base.define(move || -> anyhow::Result<u32> {
                calls.set(calls.get() + 1);
                anyhow::bail!("unreachable backend")
            });
        }
        let derived = s.given_named::<u32>("derived");
        {
            let base = base.clone();
            let calls = Rc::clone(&derived_calls);
            derived.define_async_with(GivenOptions::new().cache(CacheMode::Smart), move || {
                let base = base.clone();
                let calls = Rc::clone(&calls);
                async move {
                    calls.set(calls.get() + 1);
                    base.value().await.map(|v| *v * 10)
                }
            });
        }
        {
            let derived = derived.clone();
            s.it("fails consistently", move || async move {
                let first = derived.value().await.unwrap_err();
                let second = derived.value().await.unwrap_err();
                assert_eq!(first, second);
            });
        }
    });
    suite.run().await;
    assert_eq!(base_calls.get(), 1);
    assert_eq!(derived_calls.get(), 1);
}

#[tokio::test]
async fn only_direct_dependencies_are_recorded() {
    // `top` depends on `middle`, which depends on `bottom`. Redefining
    // `bottom` to a value that leaves `middle` unchanged must not invalidate
    // `top`'s snapshot.
    let top_calls = Rc::new(Cell::new(0));
    let suite = TestSuite::build(|s| {
        let bottom = s.given_named::<u32>("bottom");
        bottom.define(|| 3u32);
        let middle = s.given_named::<u32>("middle");
        middle.compare_by_value();
        {
            let bottom = bottom.clone();
            middle.define_async(move || {
                let bottom = bottom.clone();
                async move { bottom.value().await.map(|v| *v % 2) }
            });
        }
        let top = s.given_named::<u32>("top");
        {
            let middle = middle.clone();
            let calls = Rc::clone(&top_calls);
            top.define_async_with(
                GivenOptions::new()
                    .cache(CacheMode::Smart)
                    .cache_scope(Scope::All),
                move || {
                    let middle = middle.clone();
                    let calls = Rc::clone(&calls);
                    async move {
                        calls.set(calls.get() + 1);
                        middle.value().await.map(|v| *v + 100)
                    }
                },
            );
        }
        {
            let top = top.clone();
            s.it("computes", move || async move {
                assert_eq!(*top.value().await.unwrap(), 101);
            });
        }
        s.describe("with an equivalent bottom", |s| {
            bottom.define(|| 5u32);
            let top = top.clone();
            s.it("revalidates through middle", move || async move {
                assert_eq!(*top.value().await.unwrap(), 101);
            });
        });
    });
    suite.run().await;
    assert_eq!(top_calls.get(), 1);
}
