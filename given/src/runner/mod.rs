//! A minimal nested-suite test runner.
//!
//! The runner exists so fixtures have a host: it implements [`Hooks`] and
//! drives suites in two phases. Assembly executes the suite closures and
//! records the tree; the run phase walks the tree, firing scope hooks
//! outermost-setup-first and innermost-teardown-first. Teardown hooks within
//! one scope run in reverse registration order, mirroring setup.
//!
//! Tests execute strictly sequentially on the calling task; test bodies and
//! hooks are futures awaited in place, never spawned.

mod tree;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::env::{GivenEnv, Middleware};
use crate::given::Given;
use crate::lifecycle::{EachHook, Hooks, OnceHook};

use tree::{Child, Node};

/// Counts reported by [`TestSuite::run`].
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    /// Number of leaf tests executed.
    pub tests: usize,
}

struct RunnerShared {
    nodes: RefCell<Vec<Node>>,
    /// Stack of node indices currently being assembled; empty once the run
    /// phase starts.
    assembling: RefCell<Vec<usize>>,
    running: Cell<bool>,
    /// Same-test teardown queue, drained in reverse order after each test.
    deferred: RefCell<Vec<OnceHook>>,
}

impl RunnerShared {
    fn current(&self) -> usize {
        self.assembling.borrow().last().copied().unwrap_or(0)
    }
}

impl Hooks for RunnerShared {
    fn before_all(&self, hook: OnceHook) {
        let id = self.current();
        self.nodes.borrow_mut()[id].before_all.push(hook);
    }

    fn before_each(&self, hook: EachHook) {
        let id = self.current();
        self.nodes.borrow_mut()[id].before_each.push(hook);
    }

    fn after_each(&self, hook: EachHook) {
        let id = self.current();
        self.nodes.borrow_mut()[id].after_each.push(hook);
    }

    fn after_all(&self, hook: OnceHook) {
        let id = self.current();
        self.nodes.borrow_mut()[id].after_all.push(hook);
    }

    fn in_test(&self) -> bool {
        self.running.get()
    }

    fn defer(&self, hook: OnceHook) {
        self.deferred.borrow_mut().push(hook);
    }
}

/// An assembled suite tree, ready to run once.
pub struct TestSuite {
    shared: Rc<RunnerShared>,
}

impl TestSuite {
    /// Assembles a suite: the closure runs immediately and declares the
    /// tree through [`SuiteCtx`].
    pub fn build(assemble: impl FnOnce(&SuiteCtx)) -> Self {
        Self::build_with(Vec::new(), assemble)
    }

    /// [`TestSuite::build`] with fixture-construction middleware.
    pub fn build_with(
        middleware: Vec<Rc<dyn Middleware>>,
        assemble: impl FnOnce(&SuiteCtx),
    ) -> Self {
        let shared = Rc::new(RunnerShared {
            nodes: RefCell::new(vec![Node::default()]),
            assembling: RefCell::new(vec![0]),
            running: Cell::new(false),
            deferred: RefCell::new(Vec::new()),
        });
        let env = GivenEnv::with_middleware(Rc::clone(&shared) as Rc<dyn Hooks>, middleware);
        let ctx = SuiteCtx {
            shared: Rc::clone(&shared),
            env,
        };
        assemble(&ctx);
        shared.assembling.borrow_mut().pop();
        Self { shared }
    }

    /// Runs every test in declaration order.
    pub async fn run(self) -> RunReport {
        self.shared.running.set(true);
        let tests = run_node(Rc::clone(&self.shared), 0, Vec::new(), Vec::new()).await;
        RunReport { tests }
    }
}

/// The assembly-phase surface handed to suite closures.
pub struct SuiteCtx {
    shared: Rc<RunnerShared>,
    env: GivenEnv,
}

impl SuiteCtx {
    /// The fixture environment bound to this suite tree.
    pub fn env(&self) -> &GivenEnv {
        &self.env
    }

    /// Shorthand for [`GivenEnv::given`].
    pub fn given<T: 'static>(&self) -> Given<T> {
        self.env.given()
    }

    /// Shorthand for [`GivenEnv::given_named`].
    pub fn given_named<T: 'static>(&self, name: impl Into<String>) -> Given<T> {
        self.env.given_named(name)
    }

    /// Declares a nested suite.
    pub fn describe(&self, name: impl Into<String>, assemble: impl FnOnce(&SuiteCtx)) {
        let id = {
            let mut nodes = self.shared.nodes.borrow_mut();
            nodes.push(Node {
                name: name.into(),
                ..Node::default()
            });
            nodes.len() - 1
        };
        let parent = self.shared.current();
        self.shared.nodes.borrow_mut()[parent]
            .children
            .push(Child::Suite(id));
        self.shared.assembling.borrow_mut().push(id);
        assemble(self);
        self.shared.assembling.borrow_mut().pop();
    }

    /// Declares a leaf test.
    pub fn it<Fut>(&self, name: impl Into<String>, body: impl FnOnce() -> Fut + 'static)
    where
        Fut: Future<Output = ()> + 'static,
    {
        let body: OnceHook = Box::new(move || body().boxed_local());
        let id = self.shared.current();
        self.shared.nodes.borrow_mut()[id].children.push(Child::Test {
            name: name.into(),
            body,
        });
    }

    /// Registers a hook to run once when the current suite starts.
    pub fn before_all<Fut>(&self, hook: impl FnOnce() -> Fut + 'static)
    where
        Fut: Future<Output = ()> + 'static,
    {
        self.shared.before_all(Box::new(move || hook().boxed_local()));
    }

    /// Registers a hook to run before every test in the current suite.
    pub fn before_each<Fut>(&self, hook: impl Fn() -> Fut + 'static)
    where
        Fut: Future<Output = ()> + 'static,
    {
        self.shared.before_each(Rc::new(move || hook().boxed_local()));
    }

    /// Registers a hook to run after every test in the current suite.
    pub fn after_each<Fut>(&self, hook: impl Fn() -> Fut + 'static)
    where
        Fut: Future<Output = ()> + 'static,
    {
        self.shared.after_each(Rc::new(move || hook().boxed_local()));
    }

    /// Registers a hook to run once when the current suite ends.
    pub fn after_all<Fut>(&self, hook: impl FnOnce() -> Fut + 'static)
    where
        Fut: Future<Output = ()> + 'static,
    {
        self.shared.after_all(Box::new(move || hook().boxed_local()));
    }
}

fn run_node(
    shared: Rc<RunnerShared>,
    id: usize,
    inherited_before: Vec<EachHook>,
    inherited_after: Vec<EachHook>,
) -> LocalBoxFuture<'static, usize> {
    async move {
        let node = std::mem::take(&mut shared.nodes.borrow_mut()[id]);
        if !node.name.is_empty() {
            log::debug!("suite `{}`", node.name);
        }
        for hook in node.before_all {
            hook().await;
        }

        // Per-test chains: setup outermost-first, teardown innermost-first.
        let mut before = inherited_before;
        before.extend(node.before_each);
        let mut after: Vec<EachHook> = node.after_each;
        after.reverse();
        after.extend(inherited_after.iter().cloned());

        let mut tests = 0;
        for child in node.children {
            match child {
                Child::Suite(child_id) => {
                    tests += run_node(
                        Rc::clone(&shared),
                        child_id,
                        before.clone(),
                        after.clone(),
                    )
                    .await;
                }
                Child::Test { name, body } => {
                    log::debug!("test `{name}`");
                    for hook in &before {
                        hook().await;
                    }
                    body().await;
                    for hook in &after {
                        hook().await;
                    }
                    loop {
                        let deferred = shared.deferred.borrow_mut().pop();
                        match deferred {
                            Some(hook) => hook().await,
                            None => break,
                        }
                    }
                    tests += 1;
                }
            }
        }

        let mut after_all = node.after_all;
        after_all.reverse();
        for hook in after_all {
            hook().await;
        }
        tests
    }
    .boxed_local()
}
