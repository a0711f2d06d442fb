//! The execution context threaded through every fixture resolution.
//!
//! One [`Context`] is shared by every fixture of a suite environment. It is
//! deliberately *not* a process-global: isolated suites get isolated
//! contexts, so concurrent test binaries never interfere. The engine runs
//! single-threaded and the host executes tests sequentially, so plain
//! `RefCell`/`Cell` state stays consistent across the `await` points inside
//! asynchronous definitions: nested resolutions are strictly nested even when
//! they suspend.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use crate::given::GivenCore;
use crate::outcome::Outcome;

/// Fired whenever a fixture resolution completes, successfully or not.
///
/// Smart caches subscribe to these to learn which fixtures a computation
/// observed and what they settled to.
pub(crate) struct PopEvent {
    /// The fixture whose resolution just completed.
    pub previous: Rc<GivenCore>,
    /// The fixture that is now innermost, if any.
    pub next: Option<Rc<GivenCore>>,
    /// What the completed resolution settled to.
    pub outcome: Outcome,
    /// Resolution stack depth after the pop.
    pub new_depth: usize,
}

type Subscriber = Rc<dyn Fn(&PopEvent)>;

/// Per-environment resolution state: the stack of currently-computing
/// fixtures, pop-event subscribers, and the stack of frames eligible to
/// receive cleanup registrations.
pub(crate) struct Context {
    stack: RefCell<Vec<Rc<GivenCore>>>,
    subscribers: RefCell<Vec<(u64, Subscriber)>>,
    next_subscriber: Cell<u64>,
    cleanup_targets: RefCell<Vec<(Rc<GivenCore>, usize)>>,
}

impl Context {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            stack: RefCell::new(Vec::new()),
            subscribers: RefCell::new(Vec::new()),
            next_subscriber: Cell::new(0),
            cleanup_targets: RefCell::new(Vec::new()),
        })
    }

    /// Whether `core` is the innermost fixture currently being computed.
    pub fn current_is(&self, core: &Rc<GivenCore>) -> bool {
        self.stack
            .borrow()
            .last()
            .is_some_and(|top| Rc::ptr_eq(top, core))
    }

    /// Current resolution stack depth.
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Runs `fut` with `core` pushed onto the resolution stack, then fires a
    /// [`PopEvent`] at every subscriber.
    pub async fn within<F>(&self, core: &Rc<GivenCore>, fut: F) -> Outcome
    where
        F: Future<Output = Outcome>,
    {
        self.stack.borrow_mut().push(Rc::clone(core));
        let outcome = fut.await;
        let previous = match self.stack.borrow_mut().pop() {
            Some(previous) => previous,
            None => return outcome,
        };
        let event = PopEvent {
            previous,
            next: self.stack.borrow().last().cloned(),
            outcome: outcome.clone(),
            new_depth: self.depth(),
        };
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, s)| Rc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(&event);
        }
        outcome
    }

    /// Subscribes to pop events until the returned guard is dropped.
    pub fn subscribe(
        self: &Rc<Self>,
        subscriber: impl Fn(&PopEvent) + 'static,
    ) -> Subscription {
        let id = self.next_subscriber.get();
        self.next_subscriber.set(id + 1);
        self.subscribers.borrow_mut().push((id, Rc::new(subscriber)));
        Subscription {
            context: Rc::clone(self),
            id,
        }
    }

    /// Marks `frame` of `core` as the computation currently accepting
    /// cleanup registrations. Balanced by [`Context::exit_computation`].
    pub fn enter_computation(&self, core: Rc<GivenCore>, frame: usize) {
        self.cleanup_targets.borrow_mut().push((core, frame));
    }

    pub fn exit_computation(&self) {
        self.cleanup_targets.borrow_mut().pop();
    }

    /// The frame of the innermost running computation, if any.
    pub fn cleanup_target(&self) -> Option<(Rc<GivenCore>, usize)> {
        self.cleanup_targets.borrow().last().cloned()
    }
}

/// RAII handle for a pop-event subscription.
pub(crate) struct Subscription {
    context: Rc<Context>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.context
            .subscribers
            .borrow_mut()
            .retain(|(id, _)| *id != self.id);
    }
}
