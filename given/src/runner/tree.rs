//! Suite tree storage: nodes are arena-allocated and hold their hooks and
//! children in declaration order.

use crate::lifecycle::{EachHook, OnceHook};

/// One entry in a suite's body, in declaration order.
pub(crate) enum Child {
    /// A nested suite, by arena index.
    Suite(usize),
    /// A leaf test.
    Test { name: String, body: OnceHook },
}

/// One suite scope: its hooks and its children.
#[derive(Default)]
pub(crate) struct Node {
    pub name: String,
    pub children: Vec<Child>,
    pub before_all: Vec<OnceHook>,
    pub before_each: Vec<EachHook>,
    pub after_each: Vec<EachHook>,
    pub after_all: Vec<OnceHook>,
}
