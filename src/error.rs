// SPDX-License-Identifier: MIT
//! Request-level error taxonomy.
//!
//! Only failures that terminate a whole request live here. Component-local
//! failures — a single action in a batch, one port attempt, an install that
//! did not finish — are absorbed into result data by their owning module and
//! never surface as errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// Project or file does not exist. Returned as data (404), never raised
    /// from storage lookups.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or empty request body.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The generation service was unreachable or returned something we could
    /// not salvage. Ends the current stream with one error event; no retry.
    #[error("generation service error: {0}")]
    ExternalService(String),

    /// A dev-server child process exited before it became ready.
    #[error("process failure: {0}")]
    ProcessFailure(String),
}
