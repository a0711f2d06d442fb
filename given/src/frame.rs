//! Frame records: one layered definition (and its cache/cleanup state) per
//! record, arena-allocated per fixture and chained by `previous` indices.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::cleanup::CleanupFn;
use crate::given::GivenCore;
use crate::outcome::Outcome;

/// A definition closure, already type-erased and settled-result-shaped.
pub(crate) type DefFn = Rc<dyn Fn() -> LocalBoxFuture<'static, Outcome>>;

/// A type-erased destructor for values recorded by a cleanup frame.
pub(crate) type DestructorFn =
    Rc<dyn Fn(Rc<dyn Any>) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

/// One dependency snapshot retained by a smart cache: the fixtures observed
/// during a computation, what they settled to, and the result to reuse if
/// they all still settle the same way.
#[derive(Clone)]
pub(crate) struct Snapshot {
    pub depends_on: Vec<(Rc<GivenCore>, Outcome)>,
    pub result: Outcome,
}

/// The computation strategy of one frame.
///
/// Mutable state sits behind `Rc<RefCell<_>>` so resolution can take cheap
/// handles out of the arena without holding a borrow across an `await`.
#[derive(Clone)]
pub(crate) enum FrameKind {
    /// Runs the definition on every read; never caches.
    Define { def: DefFn },
    /// Memoizes the first settled result until released.
    Cache {
        def: DefFn,
        memo: Rc<RefCell<Option<Outcome>>>,
    },
    /// Caches per dependency snapshot; revalidates instead of recomputing.
    Smart {
        def: DefFn,
        snapshots: Rc<RefCell<Vec<Snapshot>>>,
    },
    /// Transparent for resolution; records every value resolution yields,
    /// for release with `destructor`.
    CleanUp {
        destructor: DestructorFn,
        recorded: Rc<RefCell<Vec<Rc<dyn Any>>>>,
    },
}

/// One arena slot: a frame plus its chain link and cleanup bookkeeping.
///
/// `previous` is set at mount time and left untouched until unmount; frames
/// of one fixture unmount in strict reverse mount order even if the host
/// fires teardown hooks in a different order.
pub(crate) struct FrameRecord {
    pub kind: FrameKind,
    pub previous: Cell<Option<usize>>,
    pub cleanups: Rc<RefCell<Vec<CleanupFn>>>,
}

impl FrameRecord {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            previous: Cell::new(None),
            cleanups: Rc::new(RefCell::new(Vec::new())),
        }
    }
}
