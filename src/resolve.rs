#![forbid(unsafe_code)]

//! Generic "first success wins" driver for ordered fallback chains.
//!
//! Every unreliable source in this service — the remote metadata endpoints,
//! the direct-URL tiers — is modelled as a strategy returning [`Attempt`].
//! The driver walks strategies in priority order, absorbs individual
//! failures, and stops at the first success. A failed strategy is never
//! retried; it is only superseded by the next one.

/// Outcome of a single resolution strategy. Failures carry a human-readable
/// reason for the warning log but are otherwise opaque to callers.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Failure(String),
}

impl<T> Attempt<T> {
    /// Convenience for strategies built on `Result` internals.
    pub fn from_result(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(err) => Attempt::Failure(format!("{err:#}")),
        }
    }
}

/// Runs the given strategies in order and returns the first success, or
/// `None` when the chain is exhausted. Each strategy is a `(label, fn)`
/// pair; the label only shows up in warning output.
pub fn first_success<T>(
    operation: &str,
    strategies: &mut [(&str, &mut (dyn FnMut() -> Attempt<T> + '_))],
) -> Option<T> {
    for (label, strategy) in strategies.iter_mut() {
        match strategy() {
            Attempt::Success(value) => return Some(value),
            Attempt::Failure(reason) => {
                eprintln!("  Warning: {operation} via {label} failed: {reason}");
            }
        }
    }
    None
}
