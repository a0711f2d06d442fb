//! The fixture handle: a lazily computed, redefinable, cacheable value with
//! reentrancy/cycle detection and deterministic teardown bookkeeping.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::cleanup;
use crate::context::Context;
use crate::env::{CacheMode, GivenOptions, Scope};
use crate::error::{GivenError, GivenResult};
use crate::frame::{DefFn, DestructorFn, FrameKind, FrameRecord, Snapshot};
use crate::lifecycle::{Hooks, Scheduler};
use crate::outcome::{outcomes_match, same_value, Outcome, ValueEq};

type DisposeFn = Rc<dyn Fn(Rc<dyn Any>) -> LocalBoxFuture<'static, ()>>;

/// The type-erased half of a fixture: identity, frame arena, and the
/// reentrancy state for one logical fixture. [`Given`] is a typed facade
/// over this.
pub(crate) struct GivenCore {
    name: Option<String>,
    context: Rc<Context>,
    hooks: Rc<dyn Hooks>,
    frames: RefCell<Vec<FrameRecord>>,
    top: Cell<Option<usize>>,
    depth: Cell<usize>,
    value_eq: RefCell<Option<Rc<ValueEq>>>,
    disposer: RefCell<Option<DisposeFn>>,
}

impl GivenCore {
    pub fn new(name: Option<String>, context: Rc<Context>, hooks: Rc<dyn Hooks>) -> Rc<Self> {
        Rc::new(Self {
            name,
            context,
            hooks,
            frames: RefCell::new(Vec::new()),
            top: Cell::new(None),
            depth: Cell::new(0),
            value_eq: RefCell::new(None),
            disposer: RefCell::new(None),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    fn no_definition(&self) -> GivenError {
        GivenError::NoDefinition {
            fixture: self.name.clone(),
        }
    }

    /// Allocates a new frame record in the arena; the frame stays unmounted
    /// until the lifecycle scheduler mounts it at scope begin.
    pub fn new_frame(&self, kind: FrameKind) -> usize {
        let mut frames = self.frames.borrow_mut();
        frames.push(FrameRecord::new(kind));
        frames.len() - 1
    }

    /// Makes `idx` the top of the chain, linking it over the previous top.
    pub fn mount(&self, idx: usize) {
        self.frames.borrow()[idx].previous.set(self.top.get());
        self.top.set(Some(idx));
        log::trace!("fixture `{}`: frame {idx} mounted", self.display_name());
    }

    /// Removes `idx` from the chain. The normal case pops the top; if the
    /// host fired teardown hooks out of mount order the frame is spliced out
    /// of the middle so sibling frames keep their own stack discipline.
    pub fn unmount(&self, idx: usize) {
        let frames = self.frames.borrow();
        let previous = frames[idx].previous.get();
        if self.top.get() == Some(idx) {
            self.top.set(previous);
        } else {
            log::warn!(
                "fixture `{}`: frame {idx} unmounted out of mount order",
                self.display_name()
            );
            let mut cursor = self.top.get();
            while let Some(current) = cursor {
                if frames[current].previous.get() == Some(idx) {
                    frames[current].previous.set(previous);
                    break;
                }
                cursor = frames[current].previous.get();
            }
        }
        frames[idx].previous.set(None);
        log::trace!("fixture `{}`: frame {idx} unmounted", self.display_name());
    }

    /// Clears the frame's cache state and runs its accumulated cleanups.
    /// Idempotent; the `Each`-scope hook and the scope-end hook may both
    /// release the same frame.
    pub async fn release(&self, idx: usize) {
        let (kind, cleanups) = {
            let frames = self.frames.borrow();
            (frames[idx].kind.clone(), Rc::clone(&frames[idx].cleanups))
        };
        let pending: Vec<_> = cleanups.borrow_mut().drain(..).collect();
        cleanup::run_all(pending, self.name.as_deref()).await;
        match kind {
            FrameKind::Define { .. } => {}
            FrameKind::Cache { memo, .. } => {
                *memo.borrow_mut() = None;
            }
            FrameKind::Smart { snapshots, .. } => {
                snapshots.borrow_mut().clear();
            }
            FrameKind::CleanUp {
                destructor,
                recorded,
            } => {
                let values: Vec<_> = recorded.borrow_mut().drain(..).collect();
                for value in values {
                    if let Err(err) = destructor(value).await {
                        log::error!(
                            "destructor for fixture `{}` failed: {err:#}",
                            self.display_name()
                        );
                    }
                }
            }
        }
        log::trace!("fixture `{}`: frame {idx} released", self.display_name());
    }

    /// Attaches a cleanup to a frame; it runs at that frame's release.
    pub fn add_cleanup(&self, frame: usize, cleanup: cleanup::CleanupFn) {
        self.frames.borrow()[frame].cleanups.borrow_mut().push(cleanup);
    }

    /// Arena index of the frame `pos` steps down from the top of the chain.
    fn frame_index_at(&self, pos: usize) -> Option<usize> {
        let frames = self.frames.borrow();
        let mut cursor = self.top.get();
        for _ in 0..pos {
            cursor = frames[cursor?].previous.get();
        }
        cursor
    }

    /// Resolves the fixture through its current top frame.
    ///
    /// The per-fixture depth counter routes a nested read of the *same*
    /// fixture to the frame below the one computing it (legal
    /// self-extension). A nested read that arrives through a different
    /// fixture is a circular reference.
    pub fn resolve(self: &Rc<Self>) -> LocalBoxFuture<'static, Outcome> {
        let core = Rc::clone(self);
        async move {
            let depth = core.depth.get();
            if depth > 0 && !core.context.current_is(&core) {
                return Err(GivenError::CircularReference {
                    fixture: core.name.clone(),
                });
            }
            let _entered = DepthGuard::enter(&core);
            let context = Rc::clone(&core.context);
            context.within(&core, resolve_at(&core, depth)).await
        }
        .boxed_local()
    }

    async fn run_definition(self: &Rc<Self>, idx: usize, def: &DefFn) -> Outcome {
        self.context.enter_computation(Rc::clone(self), idx);
        let outcome = def().await;
        self.context.exit_computation();
        if let Ok(value) = &outcome {
            self.record_for_cleanup(value);
            let disposer = self.disposer.borrow().clone();
            if let Some(disposer) = disposer {
                let value = Rc::clone(value);
                let cleanups = Rc::clone(&self.frames.borrow()[idx].cleanups);
                cleanups
                    .borrow_mut()
                    .push(Box::new(move || disposer(value).map(Ok).boxed_local()));
            }
        }
        outcome
    }

    /// A resolution yielded `value`: every cleanup frame in the current
    /// chain records it, wherever the yielding frame sits. Identity
    /// deduplication keeps a destructor at one invocation per value per
    /// release window, however many reads hit the cache; a cache hit after
    /// a release re-records the value for the next window.
    fn record_for_cleanup(&self, value: &Rc<dyn Any>) {
        let frames = self.frames.borrow();
        let mut cursor = self.top.get();
        while let Some(idx) = cursor {
            if let FrameKind::CleanUp { recorded, .. } = &frames[idx].kind {
                let mut recorded = recorded.borrow_mut();
                if !recorded.iter().any(|seen| same_value(seen, value)) {
                    recorded.push(Rc::clone(value));
                }
            }
            cursor = frames[idx].previous.get();
        }
    }

    async fn resolve_smart(
        self: &Rc<Self>,
        idx: usize,
        def: &DefFn,
        snapshots: &Rc<RefCell<Vec<Snapshot>>>,
    ) -> Outcome {
        // Revalidate retained snapshots, newest first, resolving each
        // dependency at most once per pass.
        let retained = snapshots.borrow().clone();
        let mut revalidated: Vec<(Rc<GivenCore>, Outcome)> = Vec::new();
        'snapshots: for snapshot in &retained {
            for (dep, recorded) in &snapshot.depends_on {
                let current = match revalidated.iter().find(|(seen, _)| Rc::ptr_eq(seen, dep)) {
                    Some((_, outcome)) => outcome.clone(),
                    None => {
                        let outcome = dep.resolve().await;
                        revalidated.push((Rc::clone(dep), outcome.clone()));
                        outcome
                    }
                };
                let eq = dep.value_eq.borrow().clone();
                if !outcomes_match(recorded, &current, eq.as_ref()) {
                    continue 'snapshots;
                }
            }
            if let Ok(value) = &snapshot.result {
                self.record_for_cleanup(value);
            }
            return snapshot.result.clone();
        }

        // No snapshot held up; recompute inside a recording session.
        let record_depth = self.context.depth();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let subscription = {
            let this = Rc::clone(self);
            let observed = Rc::clone(&observed);
            self.context.subscribe(move |event| {
                let direct = event.new_depth == record_depth
                    && event
                        .next
                        .as_ref()
                        .is_some_and(|next| Rc::ptr_eq(next, &this));
                if direct {
                    observed
                        .borrow_mut()
                        .push((Rc::clone(&event.previous), event.outcome.clone()));
                }
            })
        };
        let outcome = self.run_definition(idx, def).await;
        drop(subscription);
        snapshots.borrow_mut().insert(
            0,
            Snapshot {
                depends_on: observed.take(),
                result: outcome.clone(),
            },
        );
        outcome
    }
}

fn resolve_at(core: &Rc<GivenCore>, pos: usize) -> LocalBoxFuture<'static, Outcome> {
    let core = Rc::clone(core);
    async move {
        let Some(idx) = core.frame_index_at(pos) else {
            return Err(core.no_definition());
        };
        let kind = core.frames.borrow()[idx].kind.clone();
        match kind {
            FrameKind::Define { def } => core.run_definition(idx, &def).await,
            FrameKind::Cache { def, memo } => {
                let hit = memo.borrow().clone();
                if let Some(outcome) = hit {
                    if let Ok(value) = &outcome {
                        core.record_for_cleanup(value);
                    }
                    return outcome;
                }
                let outcome = core.run_definition(idx, &def).await;
                *memo.borrow_mut() = Some(outcome.clone());
                outcome
            }
            FrameKind::Smart { def, snapshots } => {
                core.resolve_smart(idx, &def, &snapshots).await
            }
            FrameKind::CleanUp { .. } => {
                // Delegation consumes a depth level, preserving the
                // invariant that a definition computing at chain position
                // `p` sees depth `p + 1`; a nested self-read then resolves
                // one frame below it no matter how many cleanup frames sit
                // above.
                let _entered = DepthGuard::enter(&core);
                resolve_at(&core, pos + 1).await
            }
        }
    }
    .boxed_local()
}

struct DepthGuard {
    core: Rc<GivenCore>,
    saved: usize,
}

impl DepthGuard {
    fn enter(core: &Rc<GivenCore>) -> Self {
        let saved = core.depth.get();
        core.depth.set(saved + 1);
        Self {
            core: Rc::clone(core),
            saved,
        }
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.core.depth.set(self.saved);
    }
}

/// Conversion from a definition's return value into a settled outcome.
///
/// Implemented for plain values, for `anyhow::Result`, and for
/// [`GivenResult`], so infallible definitions, fallible definitions, and
/// definitions that propagate another fixture's failure all share one
/// `define` surface.
pub trait IntoFixture<T: 'static> {
    #[doc(hidden)]
    fn into_outcome(self, fixture: Option<&str>) -> Outcome;
}

impl<T: 'static> IntoFixture<T> for T {
    fn into_outcome(self, _fixture: Option<&str>) -> Outcome {
        Ok(Rc::new(self))
    }
}

impl<T: 'static> IntoFixture<T> for anyhow::Result<T> {
    fn into_outcome(self, fixture: Option<&str>) -> Outcome {
        match self {
            Ok(value) => Ok(Rc::new(value)),
            Err(cause) => Err(GivenError::Definition {
                fixture: fixture.map(str::to_owned),
                cause: Rc::new(cause),
            }),
        }
    }
}

impl<T: 'static> IntoFixture<T> for GivenResult<T> {
    fn into_outcome(self, _fixture: Option<&str>) -> Outcome {
        match self {
            Ok(value) => Ok(Rc::new(value)),
            Err(err) => Err(err),
        }
    }
}

/// A lazily-evaluated, redefinable, cacheable test value.
///
/// Handles are cheap to clone and share one underlying fixture; redefinition
/// never recreates the fixture, it only layers a new definition over the
/// previous one for the duration of the declaring scope.
pub struct Given<T> {
    core: Rc<GivenCore>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for Given<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            _value: PhantomData,
        }
    }
}

impl<T: 'static> Given<T> {
    pub(crate) fn from_core(core: Rc<GivenCore>) -> Self {
        Self {
            core,
            _value: PhantomData,
        }
    }

    /// Diagnostic name supplied at construction, if any.
    pub fn name(&self) -> Option<&str> {
        self.core.name()
    }

    /// Resolves the fixture's current value.
    ///
    /// Reads within one cache window return the identical `Rc`. Fails with
    /// [`GivenError::NoDefinition`] if nothing was ever defined and with
    /// [`GivenError::CircularReference`] if resolution re-enters this
    /// fixture's current definition through another fixture.
    pub async fn value(&self) -> GivenResult<Rc<T>> {
        let value = self.core.resolve().await?;
        value.downcast::<T>().map_err(|_| GivenError::Definition {
            fixture: self.core.name().map(str::to_owned),
            cause: Rc::new(anyhow::anyhow!(
                "fixture produced a value of an unexpected type"
            )),
        })
    }

    /// Type-erased handle for [`using`] lists and middleware.
    ///
    /// [`using`]: crate::GivenEnv::using
    pub fn as_any(&self) -> AnyGiven {
        AnyGiven {
            core: Rc::clone(&self.core),
        }
    }

    /// Layers a new definition over the current one with default options
    /// (cached, released after each test).
    pub fn define<V>(&self, definition: impl Fn() -> V + 'static) -> &Self
    where
        V: IntoFixture<T>,
    {
        self.define_with(GivenOptions::default(), definition)
    }

    /// Layers a new definition with explicit options.
    pub fn define_with<V>(
        &self,
        options: GivenOptions,
        definition: impl Fn() -> V + 'static,
    ) -> &Self
    where
        V: IntoFixture<T>,
    {
        let name = self.core.name().map(str::to_owned);
        let def: DefFn = Rc::new(move || {
            let outcome = definition().into_outcome(name.as_deref());
            futures::future::ready(outcome).boxed_local()
        });
        self.push_definition(options, def)
    }

    /// Layers an asynchronous definition; the produced future is awaited
    /// inside the resolution context, so dependency recording and
    /// reentrancy checks stay correct across its suspension points.
    pub fn define_async<V, Fut>(&self, definition: impl Fn() -> Fut + 'static) -> &Self
    where
        Fut: Future<Output = V> + 'static,
        V: IntoFixture<T>,
    {
        self.define_async_with(GivenOptions::default(), definition)
    }

    /// Asynchronous [`Given::define_with`].
    pub fn define_async_with<V, Fut>(
        &self,
        options: GivenOptions,
        definition: impl Fn() -> Fut + 'static,
    ) -> &Self
    where
        Fut: Future<Output = V> + 'static,
        V: IntoFixture<T>,
    {
        let name = self.core.name().map(str::to_owned);
        let def: DefFn = Rc::new(move || {
            let fut = definition();
            let name = name.clone();
            async move { fut.await.into_outcome(name.as_deref()) }.boxed_local()
        });
        self.push_definition(options, def)
    }

    /// Redefines the fixture in terms of its own previous definition.
    ///
    /// Resolving the previous value from inside the new definition is the
    /// one legal form of self-reference; with no previous definition it
    /// fails with [`GivenError::NoDefinition`].
    pub fn refine(&self, refiner: impl Fn(Rc<T>) -> T + 'static) -> &Self {
        self.refine_with(GivenOptions::default(), refiner)
    }

    /// [`Given::refine`] with explicit options.
    pub fn refine_with(
        &self,
        options: GivenOptions,
        refiner: impl Fn(Rc<T>) -> T + 'static,
    ) -> &Self {
        let weak = Rc::downgrade(&self.core);
        let refiner = Rc::new(refiner);
        let def: DefFn = Rc::new(move || {
            let weak = Weak::clone(&weak);
            let refiner = Rc::clone(&refiner);
            async move {
                let Some(core) = weak.upgrade() else {
                    return Err(GivenError::NoDefinition { fixture: None });
                };
                let previous = Given::<T>::from_core(Rc::clone(&core)).value().await?;
                Ok(Rc::new(refiner(previous)) as Rc<dyn Any>)
            }
            .boxed_local()
        });
        self.push_definition(options, def)
    }

    /// Mutate-in-place refinement: clones the previous value, lets the
    /// refiner edit it, and layers the edited copy.
    pub fn refine_mut(&self, refiner: impl Fn(&mut T) + 'static) -> &Self
    where
        T: Clone,
    {
        self.refine(move |previous| {
            let mut value = (*previous).clone();
            refiner(&mut value);
            value
        })
    }

    /// Registers a destructor for every value the fixture produces while
    /// the declaring scope is active; released at scope end.
    pub fn clean_up(&self, destructor: impl Fn(Rc<T>) -> anyhow::Result<()> + 'static) -> &Self {
        self.clean_up_scoped(Scope::All, destructor)
    }

    /// [`Given::clean_up`] with an explicit release scope.
    pub fn clean_up_scoped(
        &self,
        scope: Scope,
        destructor: impl Fn(Rc<T>) -> anyhow::Result<()> + 'static,
    ) -> &Self {
        let erased: DestructorFn = Rc::new(move |value: Rc<dyn Any>| {
            let result = match value.downcast::<T>() {
                Ok(value) => destructor(value),
                Err(_) => Ok(()),
            };
            futures::future::ready(result).boxed_local()
        });
        self.push_cleanup(scope, erased)
    }

    /// Asynchronous [`Given::clean_up`].
    pub fn clean_up_async<Fut>(&self, destructor: impl Fn(Rc<T>) -> Fut + 'static) -> &Self
    where
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.clean_up_async_scoped(Scope::All, destructor)
    }

    /// Asynchronous [`Given::clean_up_scoped`].
    pub fn clean_up_async_scoped<Fut>(
        &self,
        scope: Scope,
        destructor: impl Fn(Rc<T>) -> Fut + 'static,
    ) -> &Self
    where
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let destructor = Rc::new(destructor);
        let erased: DestructorFn = Rc::new(move |value: Rc<dyn Any>| {
            match value.downcast::<T>() {
                Ok(value) => destructor(value).boxed_local(),
                Err(_) => futures::future::ready(Ok(())).boxed_local(),
            }
        });
        self.push_cleanup(scope, erased)
    }

    /// Installs by-value outcome comparison for dependents' smart caches.
    ///
    /// Without this, smart-cache revalidation compares this fixture's
    /// outcomes by allocation identity, which is exact for cached fixtures
    /// but treats every recomputation of an uncached fixture as a change.
    pub fn compare_by_value(&self) -> &Self
    where
        T: PartialEq,
    {
        let eq: Rc<ValueEq> = Rc::new(|a, b| {
            matches!(
                (a.downcast_ref::<T>(), b.downcast_ref::<T>()),
                (Some(x), Some(y)) if x == y
            )
        });
        *self.core.value_eq.borrow_mut() = Some(eq);
        self
    }

    /// Declares the [`Disposable`] capability: every value this fixture
    /// produces is auto-registered for disposal at the producing frame's
    /// release, with no explicit `clean_up` call.
    ///
    /// [`Disposable`]: crate::cleanup::Disposable
    pub fn auto_dispose(&self) -> &Self
    where
        T: cleanup::Disposable,
    {
        let disposer: DisposeFn = Rc::new(|value: Rc<dyn Any>| match value.downcast::<T>() {
            Ok(value) => value.dispose(),
            Err(_) => futures::future::ready(()).boxed_local(),
        });
        *self.core.disposer.borrow_mut() = Some(disposer);
        self
    }

    fn push_definition(&self, options: GivenOptions, def: DefFn) -> &Self {
        let kind = match options.cache {
            CacheMode::Off => FrameKind::Define { def },
            CacheMode::Cache => FrameKind::Cache {
                def,
                memo: Rc::new(RefCell::new(None)),
            },
            CacheMode::Smart => FrameKind::Smart {
                def,
                snapshots: Rc::new(RefCell::new(Vec::new())),
            },
        };
        self.manage(self.core.new_frame(kind), options.cache_scope, options.immediate)
    }

    fn push_cleanup(&self, scope: Scope, destructor: DestructorFn) -> &Self {
        let kind = FrameKind::CleanUp {
            destructor,
            recorded: Rc::new(RefCell::new(Vec::new())),
        };
        self.manage(self.core.new_frame(kind), scope, false)
    }

    fn manage(&self, frame: usize, scope: Scope, immediate: bool) -> &Self {
        Scheduler::new(Rc::clone(&self.core.hooks)).manage(
            Rc::clone(&self.core),
            frame,
            scope,
            immediate,
        );
        self
    }
}

/// A type-erased fixture handle: enough surface for eager-resolution lists
/// and construction middleware.
#[derive(Clone)]
pub struct AnyGiven {
    core: Rc<GivenCore>,
}

impl AnyGiven {
    pub(crate) fn from_core(core: Rc<GivenCore>) -> Self {
        Self { core }
    }

    /// Diagnostic name supplied at construction, if any.
    pub fn name(&self) -> Option<&str> {
        self.core.name()
    }

    /// Resolves the fixture, discarding the value.
    pub async fn resolve(&self) -> GivenResult<()> {
        self.core.resolve().await.map(|_| ())
    }
}
