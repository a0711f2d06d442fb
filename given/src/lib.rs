//! Lazily-evaluated, auto-cached, dependency-aware test fixtures.
//!
//! A [`Given<T>`] is a handle to a value that tests declare up front and
//! compute on first read. Definitions layer: a nested suite can redefine or
//! refine a fixture and the override is scoped to that suite, unwinding
//! automatically when the suite ends. Values are memoized per test by
//! default, with an opt-in smart mode that revalidates recorded dependencies
//! instead of recomputing, and teardown is tied to the exact values a
//! fixture produced.
//!
//! The engine is deliberately single-threaded and async-first: definitions
//! may be `async`, tests run sequentially, and all shared state lives behind
//! `Rc`/`RefCell`. It talks to its host through the [`Hooks`] trait; the
//! bundled [`runner`] is one such host.
//!
//! ```no_run
//! use given::{Given, TestSuite};
//!
//! # async fn demo() {
//! let suite = TestSuite::build(|s| {
//!     let port = s.given_named::<u16>("port");
//!     port.define(|| 4242u16);
//!
//!     let url = s.given_named::<String>("url");
//!     {
//!         let port = port.clone();
//!         url.define_async(move || {
//!             let port = port.clone();
//!             async move { format!("http://localhost:{}", port.value().await.unwrap()) }
//!         });
//!     }
//!
//!     s.describe("with a tls port", |s| {
//!         port.define(|| 4443u16);
//!         let url = url.clone();
//!         s.it("sees the override", move || {
//!             let url = url.clone();
//!             async move {
//!                 assert_eq!(*url.value().await.unwrap(), "http://localhost:4443");
//!             }
//!         });
//!     });
//! });
//! suite.run().await;
//! # }
//! ```

#![warn(missing_docs)]

mod cleanup;
mod context;
mod env;
mod error;
mod frame;
mod given;
mod lifecycle;
mod outcome;
pub mod runner;

pub use cleanup::Disposable;
pub use env::{CacheMode, GivenEnv, GivenOptions, Middleware, Scope};
pub use error::{GivenError, GivenResult};
pub use given::{AnyGiven, Given, IntoFixture};
pub use lifecycle::{EachHook, Hooks, OnceHook};
pub use outcome::Outcome;
pub use runner::{RunReport, SuiteCtx, TestSuite};

/// Commonly used types, for glob import in test modules.
pub mod prelude {
    pub use crate::{
        AnyGiven, CacheMode, Disposable, Given, GivenEnv, GivenError, GivenOptions, GivenResult,
        Scope, SuiteCtx, TestSuite,
    };
}
