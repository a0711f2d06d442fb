//! Settled results: success/failure-tagged outcomes used uniformly for
//! caching and dependency comparison.

use std::any::Any;
use std::rc::Rc;

use crate::error::GivenError;

/// A settled fixture outcome: either a produced value or a failure.
///
/// Failures are first-class here so that a fixture whose definition fails can
/// be cached, depended upon, and compared exactly like one that succeeds.
pub type Outcome = Result<Rc<dyn Any>, GivenError>;

/// Type-erased value equality installed by [`Given::compare_by_value`].
///
/// [`Given::compare_by_value`]: crate::Given::compare_by_value
pub(crate) type ValueEq = dyn Fn(&dyn Any, &dyn Any) -> bool;

/// Whether two `Rc<dyn Any>` handles share one allocation.
pub(crate) fn same_value(a: &Rc<dyn Any>, b: &Rc<dyn Any>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// Compares two settled outcomes for smart-cache revalidation.
///
/// Success compares by allocation identity, falling back to the owning
/// fixture's by-value comparator when one is installed. Failure compares by
/// [`GivenError`] equality, which for definition failures is the identity of
/// the underlying error object. Tags never cross-match.
pub(crate) fn outcomes_match(a: &Outcome, b: &Outcome, eq: Option<&Rc<ValueEq>>) -> bool {
    match (a, b) {
        (Ok(x), Ok(y)) => {
            same_value(x, y) || eq.is_some_and(|eq| eq(x.as_ref(), y.as_ref()))
        }
        (Err(x), Err(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_allocation_matches() {
        let v: Rc<dyn Any> = Rc::new(7u32);
        let a: Outcome = Ok(Rc::clone(&v));
        let b: Outcome = Ok(v);
        assert!(outcomes_match(&a, &b, None));
    }

    #[test]
    fn distinct_allocations_do_not_match_without_comparator() {
        let a: Outcome = Ok(Rc::new(7u32));
        let b: Outcome = Ok(Rc::new(7u32));
        assert!(!outcomes_match(&a, &b, None));
    }

    #[test]
    fn by_value_comparator_bridges_distinct_allocations() {
        let eq: Rc<ValueEq> = Rc::new(|a, b| {
            matches!(
                (a.downcast_ref::<u32>(), b.downcast_ref::<u32>()),
                (Some(x), Some(y)) if x == y
            )
        });
        let a: Outcome = Ok(Rc::new(7u32));
        let b: Outcome = Ok(Rc::new(7u32));
        let c: Outcome = Ok(Rc::new(8u32));
        assert!(outcomes_match(&a, &b, Some(&eq)));
        assert!(!outcomes_match(&a, &c, Some(&eq)));
    }

    #[test]
    fn tags_never_cross_match() {
        let ok: Outcome = Ok(Rc::new(1u32));
        let err: Outcome = Err(GivenError::NoDefinition { fixture: None });
        assert!(!outcomes_match(&ok, &err, None));
        assert!(!outcomes_match(&err, &ok, None));
    }
}
