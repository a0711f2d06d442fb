use std::cell::RefCell;
use std::rc::Rc;

use given::prelude::*;

#[tokio::test]
async fn nested_scope_overrides_and_unwinds() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let suite = TestSuite::build(|s| {
        let flavor = s.given_named::<&'static str>("flavor");
        flavor.define(|| "base");
        {
            let flavor = flavor.clone();
            let seen = Rc::clone(&seen);
            s.it("before", move || async move {
                seen.borrow_mut().push(*flavor.value().await.unwrap());
            });
        }
        s.describe("with an override", |s| {
            flavor.define(|| "override");
            let flavor = flavor.clone();
            let seen = Rc::clone(&seen);
            s.it("inside", move || async move {
                seen.borrow_mut().push(*flavor.value().await.unwrap());
            });
        });
        {
            let flavor = flavor.clone();
            let seen = Rc::clone(&seen);
            s.it("after", move || async move {
                seen.borrow_mut().push(*flavor.value().await.unwrap());
            });
        }
    });
    suite.run().await;
    assert_eq!(*seen.borrow(), vec!["base", "override", "base"]);
}

#[tokio::test]
async fn sibling_scopes_do_not_leak_overrides() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let suite = TestSuite::build(|s| {
        let flavor = s.given_named::<&'static str>("flavor");
        flavor.define(|| "base");
        for side in ["left", "right"] {
            s.describe(side, |s| {
                flavor.define(move || side);
                let flavor = flavor.clone();
                let seen = Rc::clone(&seen);
                s.it("sees its own override", move || async move {
                    seen.borrow_mut().push(*flavor.value().await.unwrap());
                });
            });
        }
        {
            let flavor = flavor.clone();
            let seen = Rc::clone(&seen);
            s.it("sees the base", move || async move {
                seen.borrow_mut().push(*flavor.value().await.unwrap());
            });
        }
    });
    suite.run().await;
    assert_eq!(*seen.borrow(), vec!["left", "right", "base"]);
}

#[tokio::test]
async fn mid_test_definitions_unwind_after_the_test() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let suite = TestSuite::build(|s| {
        let flavor = s.given_named::<&'static str>("flavor");
        flavor.define(|| "base");
        {
            let flavor = flavor.clone();
            let seen = Rc::clone(&seen);
            s.it("patches mid-test", move || async move {
                seen.borrow_mut().push(*flavor.value().await.unwrap());
                flavor.define(|| "patched");
                seen.borrow_mut().push(*flavor.value().await.unwrap());
            });
        }
        {
            let flavor = flavor.clone();
            let seen = Rc::clone(&seen);
            s.it("is unaffected", move || async move {
                seen.borrow_mut().push(*flavor.value().await.unwrap());
            });
        }
    });
    suite.run().await;
    assert_eq!(*seen.borrow(), vec!["base", "patched", "base"]);
}
