/// Pipeline state definitions for tracking per-source progress
///
/// This module defines the lifecycle every source pipeline moves through
/// while the orchestrator drives it.
use crate::HarvestError;
use std::fmt;

/// Represents the current state of a source pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    // ===== Active States =====
    /// Created, first page not yet listed
    Initialized,

    /// Working through the items of the current page
    Listing,

    /// Trying to move to the next page
    Advancing,

    // ===== Terminal States =====
    /// The source reported an empty page; clean end
    Exhausted,

    /// Listing or advancing failed more often than allowed
    Failed,
}

impl PipelineState {
    /// Returns true if the pipeline will do no further work
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Initialized, Listing)
                | (Initialized, Failed)
                | (Listing, Advancing)
                | (Listing, Exhausted)
                | (Listing, Failed)
                | (Advancing, Listing)
                | (Advancing, Exhausted)
                | (Advancing, Failed)
        )
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: PipelineState) -> Result<(), HarvestError> {
        if !self.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        tracing::trace!("Pipeline state {} -> {}", self, next);
        *self = next;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Listing => "listing",
            Self::Advancing => "advancing",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
