//! Run state graph checks
//!
//! Pure lookups over the allowed transition table. Used both before real
//! transitions and for dry-run queries.

use flowrun_types::{RunStatus, ValidationResult};

/// Validates `(from, to)` pairs against the run state graph
#[derive(Clone, Copy, Debug, Default)]
pub struct StateTransitionValidator;

impl StateTransitionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check one transition. Never mutates anything.
    pub fn validate(&self, from: RunStatus, to: RunStatus) -> ValidationResult {
        if from == to {
            return ValidationResult::invalid(from, to, format!("run is already {from}"));
        }
        if from.is_terminal() {
            return ValidationResult::invalid(from, to, format!("{from} is a terminal state"));
        }
        if from.can_transition_to(to) {
            ValidationResult::valid(from, to)
        } else {
            ValidationResult::invalid(from, to, format!("{from} cannot move to {to}"))
        }
    }

    /// Targets reachable from `from` in one step
    pub fn allowed_targets(&self, from: RunStatus) -> &'static [RunStatus] {
        from.allowed_targets()
    }
}
