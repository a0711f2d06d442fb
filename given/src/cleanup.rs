//! The disposal protocol: normalizing cleanup callbacks and disposable
//! values into one internal shape, and the policy for running them.
//!
//! Policy: cleanups for a frame run in registration order at release time,
//! and a failing cleanup is logged via `log::error!` without stopping the
//! cleanups that follow it. This one policy applies to explicit deferrals,
//! destructors, and automatic disposal alike.

use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

/// An owned capability to release a produced value.
///
/// Implement this on fixture values that hold resources, then declare the
/// capability on the handle with [`Given::auto_dispose`]; every value the
/// fixture produces is then registered for disposal without an explicit
/// `clean_up` call. Synchronous disposal simply returns a ready future.
///
/// [`Given::auto_dispose`]: crate::Given::auto_dispose
pub trait Disposable: 'static {
    /// Releases the value. Runs at the owning frame's release point.
    fn dispose(self: Rc<Self>) -> LocalBoxFuture<'static, ()>;
}

/// The single internal cleanup shape everything normalizes to.
pub(crate) type CleanupFn = Box<dyn FnOnce() -> LocalBoxFuture<'static, anyhow::Result<()>>>;

pub(crate) fn from_fn(f: impl FnOnce() + 'static) -> CleanupFn {
    Box::new(move || {
        f();
        futures::future::ready(Ok(())).boxed_local()
    })
}

pub(crate) fn from_future(fut: impl Future<Output = ()> + 'static) -> CleanupFn {
    Box::new(move || fut.map(Ok).boxed_local())
}

pub(crate) fn from_disposable<D: Disposable>(value: Rc<D>) -> CleanupFn {
    Box::new(move || value.dispose().map(Ok).boxed_local())
}

/// Runs a batch of cleanups in registration order, isolating failures.
pub(crate) async fn run_all(cleanups: Vec<CleanupFn>, fixture: Option<&str>) {
    for cleanup in cleanups {
        if let Err(err) = cleanup().await {
            log::error!(
                "cleanup for fixture `{}` failed: {err:#}",
                fixture.unwrap_or("<anonymous>")
            );
        }
    }
}
