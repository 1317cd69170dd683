//! Experiment lifecycle state machine
//!
//! `draft -> running -> {paused <-> running} -> completed`. A paused
//! experiment may also be completed directly. `completed` is terminal.

use crate::error::ExperimentError;
use crate::types::ExperimentStatus;

/// Validates a status transition
///
/// # Errors
/// Returns `ExperimentError::IllegalTransition` when `to` is not reachable
/// from `from` in one step.
pub fn validate_transition(from: ExperimentStatus, to: ExperimentStatus) -> Result<(), ExperimentError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(ExperimentError::IllegalTransition { from, to })
    }
}

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ExperimentStatus) -> Vec<ExperimentStatus> {
    use ExperimentStatus::{Completed, Draft, Paused, Running};
    match from {
        Draft => vec![Running],
        Running => vec![Paused, Completed],
        Paused => vec![Running, Completed],
        Completed => vec![],
    }
}

fn allowed(from: ExperimentStatus, to: ExperimentStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
