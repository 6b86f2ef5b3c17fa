//! The error type returned from annotation operations.
//!
//! The original runtime reports failures as a single `cali_err` sentinel
//! (`CALI_SUCCESS` / `CALI_EINV`). Idiomatic Rust prefers `Result`, so every
//! fallible public method here returns `Result<T, Error>`; `Error` keeps
//! enough detail in non-release builds to tell misuse apart in tests and
//! logs, while still rendering as a single "invalid argument" family to
//! callers who only care about the top-level kind.

use thiserror::Error;

/// Errors returned by [`crate::Runtime`] and its annotation operations.
///
/// Every variant corresponds to a case the spec's error-handling design
/// classifies as `EINV`: programmer misuse, a state imbalance, or a call
/// made before bootstrap / after teardown. None of these are fatal; the
/// only fatal condition (pool exhaustion) aborts the process rather than
/// returning an `Error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The runtime has not been initialized yet, or has already been torn
    /// down. Every public method short-circuits to this case silently (no
    /// log line) to avoid reentering a dying process from a static
    /// destructor.
    #[error("runtime is not available (uninitialized or torn down)")]
    RuntimeUnavailable,

    /// The given attribute handle does not resolve to a live tree node.
    #[error("unknown or invalid attribute{}", name_suffix(.0))]
    UnknownAttribute(Option<String>),

    /// `end`/`exchange`/`get` was called for an attribute that has no
    /// active entry in the resolved scope's context buffer.
    #[error("attribute `{0}` is not currently active in its scope")]
    NotActive(String),

    /// `set_path` was called on an `ASVALUE` attribute, or `exchange` was
    /// called on a node-valued one.
    #[error("operation not valid for attribute `{0}`'s storage kind")]
    WrongKind(String),

    /// A scope callback of this kind has already been registered; the
    /// second registration is ignored (and logged) rather than replacing
    /// the first.
    #[error("a scope callback for {0:?} is already registered")]
    CallbackAlreadySet(crate::scope::ScopeKind),
}

fn name_suffix(name: &Option<String>) -> String {
    match name {
        Some(n) => format!(" `{n}`"),
        None => String::new(),
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
