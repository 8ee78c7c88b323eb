//! Approval queue for low-confidence decisions
//!
//! Decisions below the auto-execute threshold wait here for an operator.
//! Approving executes through the same executor path; rejecting records the
//! candidate as skipped with the operator's reason.

use std::collections::VecDeque;

use thiserror::Error;

use crate::models::Decision;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no pending decision at index {0}")]
    OutOfRange(usize),
    #[error("kill switch engaged: {0}")]
    KillSwitchEngaged(String),
}

/// Ordered queue of decisions awaiting operator review
#[derive(Debug, Default)]
pub struct ApprovalQueue {
    pending: VecDeque<Decision>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, decision: Decision) {
        self.pending.push_back(decision);
    }

    /// Pending decisions in arrival order
    pub fn list(&self) -> Vec<Decision> {
        self.pending.iter().cloned().collect()
    }

    /// Remove and return the decision at `index`
    pub fn take(&mut self, index: usize) -> Result<Decision, ApprovalError> {
        self.pending
            .remove(index)
            .ok_or(ApprovalError::OutOfRange(index))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
