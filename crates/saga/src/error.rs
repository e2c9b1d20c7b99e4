//! Saga error types.

use thiserror::Error;

use crate::flow::FlowReport;

/// A flow chain that stopped at a failing step.
///
/// Carries the run report (with the rolled back steps) and the error the
/// failing step produced.
#[derive(Debug, Error)]
#[error("flow '{}' failed at step '{}': {error}", .report.chain, .report.failed_step.as_deref().unwrap_or_default())]
pub struct FlowFailure<E> {
    pub report: FlowReport,
    pub error: E,
}

impl<E> FlowFailure<E> {
    /// Discards the report and returns the step's error.
    pub fn into_error(self) -> E {
        self.error
    }

    /// Name of the step that failed.
    pub fn failed_step(&self) -> &str {
        self.report.failed_step.as_deref().unwrap_or_default()
    }

    /// Maps the carried error, keeping the report.
    pub fn map_err<F, O>(self, f: F) -> FlowFailure<O>
    where
        F: FnOnce(E) -> O,
    {
        FlowFailure {
            report: self.report,
            error: f(self.error),
        }
    }
}
