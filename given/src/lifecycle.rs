//! The lifecycle scheduler: maps frame mount/release/unmount onto the host
//! runner's hook points, with an immediate-execution path for APIs invoked
//! while a test is already running.

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::env::Scope;
use crate::given::GivenCore;

/// A hook that runs exactly once (suite setup/teardown, same-test deferral).
pub type OnceHook = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()>>;

/// A hook that runs once per test (test setup/teardown).
pub type EachHook = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

/// The host-runner collaborator.
///
/// The engine never talks to a test runner directly; it registers callbacks
/// through this trait and assumes the usual nested-scope composition: inner
/// suite setup after outer, inner suite teardown before outer, per-test
/// hooks for every leaf test. Hosts that stop accepting hook registrations
/// once a test has started (all of them, in practice) additionally expose
/// [`Hooks::in_test`] and a same-test teardown queue via [`Hooks::defer`].
pub trait Hooks {
    /// Registers a hook to run when the current scope begins.
    fn before_all(&self, hook: OnceHook);
    /// Registers a hook to run before every test in the current scope.
    fn before_each(&self, hook: EachHook);
    /// Registers a hook to run after every test in the current scope.
    fn after_each(&self, hook: EachHook);
    /// Registers a hook to run when the current scope ends.
    fn after_all(&self, hook: OnceHook);
    /// Whether a test is currently executing (suite assembly is over).
    fn in_test(&self) -> bool;
    /// Queues a hook on the same-test teardown queue, drained in reverse
    /// registration order after the current test.
    fn defer(&self, hook: OnceHook);
}

/// Schedules one frame's mount, release, and unmount against the host hooks.
///
/// All frame-chain mutation happens inside the callbacks registered here,
/// never synchronously inside `define` itself, so a definition declared in a
/// nested scope takes effect only for that scope and its descendants. The
/// exception is a definition declared while a test is running: the host no
/// longer accepts hooks, so the mount happens immediately and teardown is
/// deferred to the same-test queue.
pub(crate) struct Scheduler {
    hooks: Rc<dyn Hooks>,
}

impl Scheduler {
    pub fn new(hooks: Rc<dyn Hooks>) -> Self {
        Self { hooks }
    }

    pub fn manage(&self, core: Rc<GivenCore>, frame: usize, scope: Scope, immediate: bool) {
        if self.hooks.in_test() {
            core.mount(frame);
        } else {
            let mounting = Rc::clone(&core);
            self.hooks.before_all(Box::new(move || {
                mounting.mount(frame);
                futures::future::ready(()).boxed_local()
            }));
        }

        if immediate {
            if self.hooks.in_test() {
                // Mid-test there is no later setup point; the first read
                // computes the value anyway.
                log::debug!(
                    "fixture `{}`: `immediate` declared mid-test, seeding skipped",
                    core.display_name()
                );
            } else {
                let seeding = Rc::clone(&core);
                self.hooks.before_each(Rc::new(move || {
                    let seeding = Rc::clone(&seeding);
                    async move {
                        if let Err(err) = seeding.resolve().await {
                            log::warn!(
                                "fixture `{}`: eager seeding failed: {err}",
                                seeding.display_name()
                            );
                        }
                    }
                    .boxed_local()
                }));
            }
        }

        if scope == Scope::Each {
            let releasing = Rc::clone(&core);
            if self.hooks.in_test() {
                self.hooks.defer(Box::new(move || {
                    async move { releasing.release(frame).await }.boxed_local()
                }));
            } else {
                self.hooks.after_each(Rc::new(move || {
                    let releasing = Rc::clone(&releasing);
                    async move { releasing.release(frame).await }.boxed_local()
                }));
            }
        }

        let ending: OnceHook = Box::new(move || {
            async move {
                core.unmount(frame);
                core.release(frame).await;
            }
            .boxed_local()
        });
        if self.hooks.in_test() {
            self.hooks.defer(ending);
        } else {
            self.hooks.after_all(ending);
        }
    }
}
