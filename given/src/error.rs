//! Typed failures raised by fixture resolution and lifecycle APIs.

use std::rc::Rc;
use thiserror::Error;

/// Result alias for fixture resolution.
pub type GivenResult<T> = Result<T, GivenError>;

/// Error type for fixture resolution and lifecycle misuse.
///
/// Every variant carries the fixture's diagnostic name when one was supplied
/// at construction time. Errors are cheap to clone so that a failed
/// resolution can be cached and compared exactly like a successful one.
#[derive(Debug, Clone, Error)]
pub enum GivenError {
    /// The fixture was read before any definition was mounted, or a
    /// self-referencing definition had no previous definition to fall
    /// back to.
    #[error("no definition for fixture `{}`", display_name(fixture))]
    NoDefinition {
        /// Diagnostic name of the fixture, if one was given.
        fixture: Option<String>,
    },

    /// Resolving the fixture re-entered its own current definition through
    /// another fixture, which would recurse forever.
    #[error("circular reference while resolving fixture `{}`", display_name(fixture))]
    CircularReference {
        /// Diagnostic name of the fixture, if one was given.
        fixture: Option<String>,
    },

    /// A suite-assembly-only API was invoked while a test was already
    /// running and no immediate-execution fallback exists.
    #[error("`{api}` must be called during suite assembly, not inside a running test")]
    Lifecycle {
        /// The API that was misused.
        api: &'static str,
    },

    /// A fallible definition returned an error.
    ///
    /// The underlying error is held behind `Rc` so the failure has a stable
    /// identity: two outcomes are the same failure only if they share the
    /// same underlying error object.
    #[error("definition for fixture `{}` failed: {cause}", display_name(fixture))]
    Definition {
        /// Diagnostic name of the fixture, if one was given.
        fixture: Option<String>,
        /// The error produced by the definition.
        cause: Rc<anyhow::Error>,
    },
}

impl PartialEq for GivenError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::NoDefinition { fixture: a },
                Self::NoDefinition { fixture: b },
            ) => a == b,
            (
                Self::CircularReference { fixture: a },
                Self::CircularReference { fixture: b },
            ) => a == b,
            (Self::Lifecycle { api: a }, Self::Lifecycle { api: b }) => a == b,
            (
                Self::Definition { cause: a, .. },
                Self::Definition { cause: b, .. },
            ) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn display_name(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("<anonymous>")
}
