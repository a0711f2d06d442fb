//! The fixture environment: the factory for [`Given`] handles, the options
//! they are constructed with, and the environment-level operations (`using`,
//! `defer`) that are not tied to a single fixture.

use std::rc::Rc;

use futures::FutureExt;

use crate::cleanup::{self, Disposable};
use crate::context::Context;
use crate::error::{GivenError, GivenResult};
use crate::given::{AnyGiven, Given, GivenCore, IntoFixture};
use crate::lifecycle::Hooks;

/// Caching strategy for one layered definition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Memoize the first settled result until the frame is released.
    #[default]
    Cache,
    /// Keep per-dependency-snapshot results; revalidate dependencies on
    /// each read and reuse the matching snapshot.
    Smart,
    /// Recompute on every read.
    Off,
}

/// When a frame's cached state (and accumulated cleanups) are released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    /// After every test, and again at the declaring scope's end.
    #[default]
    Each,
    /// Only at the declaring scope's end.
    All,
}

/// Construction options for one layered definition.
///
/// The defaults match the common case: memoized per test, computed on first
/// read.
#[derive(Clone, Copy, Debug, Default)]
pub struct GivenOptions {
    /// Caching strategy for the definition.
    pub cache: CacheMode,
    /// When cached state is released.
    pub cache_scope: Scope,
    /// Compute eagerly before each test instead of on first read.
    pub immediate: bool,
}

impl GivenOptions {
    /// The default options: memoized per test, computed on first read.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the caching strategy.
    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Selects when cached state is released.
    pub fn cache_scope(mut self, scope: Scope) -> Self {
        self.cache_scope = scope;
        self
    }

    /// Computes the value eagerly before each test instead of on first read.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// An observer invoked for every fixture the environment constructs.
///
/// Middleware observe construction only; they receive the type-erased handle
/// and may resolve it, name-inspect it, or stash it, but construction itself
/// is not alterable.
pub trait Middleware {
    /// Called once per constructed fixture, outermost middleware first.
    fn construct(&self, given: &AnyGiven);
}

/// A fixture environment bound to one host runner.
///
/// Cheap to clone; clones share the same context and hooks, so fixtures
/// created through any clone participate in one resolution stack.
pub struct GivenEnv {
    context: Rc<Context>,
    hooks: Rc<dyn Hooks>,
    middleware: Rc<Vec<Rc<dyn Middleware>>>,
}

impl Clone for GivenEnv {
    fn clone(&self) -> Self {
        Self {
            context: Rc::clone(&self.context),
            hooks: Rc::clone(&self.hooks),
            middleware: Rc::clone(&self.middleware),
        }
    }
}

impl GivenEnv {
    /// Creates an environment over a host runner.
    pub fn new(hooks: Rc<dyn Hooks>) -> Self {
        Self::with_middleware(hooks, Vec::new())
    }

    /// Creates an environment with construction middleware, applied in order
    /// to every fixture the environment constructs.
    pub fn with_middleware(hooks: Rc<dyn Hooks>, middleware: Vec<Rc<dyn Middleware>>) -> Self {
        Self {
            context: Context::new(),
            hooks,
            middleware: Rc::new(middleware),
        }
    }

    /// Constructs an anonymous, undefined fixture.
    pub fn given<T: 'static>(&self) -> Given<T> {
        self.construct(None)
    }

    /// Constructs a named, undefined fixture; the name appears in error
    /// messages and logs.
    pub fn given_named<T: 'static>(&self, name: impl Into<String>) -> Given<T> {
        self.construct(Some(name.into()))
    }

    /// Constructs a named fixture with an initial definition under default
    /// options.
    pub fn given_defined<T, V>(
        &self,
        name: impl Into<String>,
        definition: impl Fn() -> V + 'static,
    ) -> Given<T>
    where
        T: 'static,
        V: IntoFixture<T>,
    {
        let given = self.given_named(name);
        given.define(definition);
        given
    }

    /// Constructs a named fixture with an initial definition and explicit
    /// options.
    pub fn given_with<T, V>(
        &self,
        name: impl Into<String>,
        options: GivenOptions,
        definition: impl Fn() -> V + 'static,
    ) -> Given<T>
    where
        T: 'static,
        V: IntoFixture<T>,
    {
        let given = self.given_named(name);
        given.define_with(options, definition);
        given
    }

    fn construct<T: 'static>(&self, name: Option<String>) -> Given<T> {
        let core = GivenCore::new(name, Rc::clone(&self.context), Rc::clone(&self.hooks));
        let any = AnyGiven::from_core(Rc::clone(&core));
        for middleware in self.middleware.iter() {
            middleware.construct(&any);
        }
        Given::from_core(core)
    }

    /// Forces the listed fixtures to resolve before every test in the
    /// current scope, so side-effectful fixtures take effect without an
    /// explicit read in the test body.
    ///
    /// Fails with [`GivenError::Lifecycle`] when called mid-test: there is
    /// no later per-test setup point, so the registration could never fire.
    pub fn using(&self, fixtures: &[AnyGiven]) -> GivenResult<()> {
        if self.hooks.in_test() {
            return Err(GivenError::Lifecycle { api: "using" });
        }
        let fixtures: Vec<AnyGiven> = fixtures.to_vec();
        self.hooks.before_each(Rc::new(move || {
            let fixtures = fixtures.clone();
            async move {
                for fixture in &fixtures {
                    if let Err(err) = fixture.resolve().await {
                        log::warn!(
                            "fixture `{}`: eager resolution failed: {err}",
                            fixture.name().unwrap_or("<anonymous>")
                        );
                    }
                }
            }
            .boxed_local()
        }));
        Ok(())
    }

    /// Queues teardown work against the innermost running computation's
    /// frame, or against the current test when no computation is running.
    ///
    /// Inside a definition this ties the teardown to the produced value's
    /// cache window; inside a test body it runs after the test. During suite
    /// assembly there is nothing to attach to and the call fails with
    /// [`GivenError::Lifecycle`].
    pub fn defer(&self, teardown: impl FnOnce() + 'static) -> GivenResult<()> {
        self.defer_cleanup(cleanup::from_fn(teardown), "defer")
    }

    /// Asynchronous [`GivenEnv::defer`].
    pub fn defer_async(
        &self,
        teardown: impl std::future::Future<Output = ()> + 'static,
    ) -> GivenResult<()> {
        self.defer_cleanup(cleanup::from_future(teardown), "defer_async")
    }

    /// Queues disposal of a [`Disposable`] value, with [`GivenEnv::defer`]
    /// placement rules.
    pub fn defer_dispose<D: Disposable>(&self, value: Rc<D>) -> GivenResult<()> {
        self.defer_cleanup(cleanup::from_disposable(value), "defer_dispose")
    }

    fn defer_cleanup(&self, teardown: cleanup::CleanupFn, api: &'static str) -> GivenResult<()> {
        if let Some((core, frame)) = self.context.cleanup_target() {
            core.add_cleanup(frame, teardown);
            return Ok(());
        }
        if self.hooks.in_test() {
            self.hooks.defer(Box::new(move || {
                teardown().map(|result| {
                    if let Err(err) = result {
                        log::error!("deferred teardown failed: {err:#}");
                    }
                })
                .boxed_local()
            }));
            return Ok(());
        }
        Err(GivenError::Lifecycle { api })
    }
}
