use std::cell::Cell;
use std::rc::Rc;

use given::prelude::*;

#[tokio::test]
async fn refine_layers_on_the_previous_definition() {
    let suite = TestSuite::build(|s| {
        let path = s.given_named::<Vec<&'static str>>("path");
        path.define(|| vec!["root"]);
        s.describe("nested", |s| {
            path.refine(|previous| {
                let mut path = (*previous).clone();
                path.push("nested");
                path
            });
            s.describe("deeper", |s| {
                path.refine_mut(|path| path.push("deeper"));
                let path = path.clone();
                s.it("sees every layer", move || async move {
                    assert_eq!(*path.value().await.unwrap(), vec!["root", "nested", "deeper"]);
                });
            });
            let path = path.clone();
            s.it("sees one layer", move || async move {
                assert_eq!(*path.value().await.unwrap(), vec!["root", "nested"]);
            });
        });
        {
            let path = path.clone();
            s.it("sees the base", move || async move {
                assert_eq!(*path.value().await.unwrap(), vec!["root"]);
            });
        }
    });
    let report = suite.run().await;
    assert_eq!(report.tests, 3);
}

#[tokio::test]
async fn refine_without_a_previous_definition_fails() {
    let suite = TestSuite::build(|s| {
        let value = s.given_named::<u32>("value");
        value.refine(|previous| *previous + 1);
        s.it("reads", move || async move {
            let err = value.value().await.unwrap_err();
            assert!(matches!(err, GivenError::NoDefinition { .. }));
        });
    });
    suite.run().await;
}

#[tokio::test]
async fn cleanup_declared_above_a_refinement_does_not_rerun_the_refiner() {
    let refined = Rc::new(Cell::new(0u32));
    let suite = TestSuite::build(|s| {
        let value = s.given_named::<u32>("value");
        value.define(|| 1u32);
        {
            let refined = Rc::clone(&refined);
            value.refine(move |previous| {
                refined.set(refined.get() + 1);
                *previous + 1
            });
        }
        value.clean_up(|_| Ok(()));
        {
            let value = value.clone();
            s.it("reads", move || async move {
                assert_eq!(*value.value().await.unwrap(), 2);
                assert_eq!(*value.value().await.unwrap(), 2);
            });
        }
    });
    suite.run().await;
    // The refiner's self-read must land on the base definition, not back on
    // the refiner, even with a cleanup frame sitting above it.
    assert_eq!(refined.get(), 1);
}

#[tokio::test]
async fn refined_values_cache_like_any_other() {
    let suite = TestSuite::build(|s| {
        let value = s.given_named::<Vec<u32>>("value");
        value.define(|| vec![1]);
        s.describe("refined", |s| {
            value.refine_mut(|v| v.push(2));
            let value = value.clone();
            s.it("reads twice", move || async move {
                let first = value.value().await.unwrap();
                let second = value.value().await.unwrap();
                assert!(std::rc::Rc::ptr_eq(&first, &second));
                assert_eq!(*first, vec![1, 2]);
            });
        });
    });
    suite.run().await;
}
