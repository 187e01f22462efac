//! Bounded retry with a per-attempt delay schedule and cancellation (C1).
//!
//! Mirrors the retry/backoff split the teacher's download engine uses
//! (error classification kept separate from the attempt loop), but the
//! schedule here is an explicit ordered delay list rather than an
//! exponential formula, per `spec.md` §4.1, and the attempt loop is async
//! so a sleep can be raced against cancellation.

mod policy;
mod run;

pub use policy::RetryPolicy;
pub use run::{run_with_retry, RetryOutcome};
