//! Failure handling for cluster event handlers.

use thiserror::Error;
use tracing::{error, warn};

use hacluster_common::HaError;

use crate::state::MemberStateError;

/// Why a handler could not finish processing an event.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    /// The event contradicts what this node believes about the cluster.
    #[error(transparent)]
    State(#[from] MemberStateError),

    /// A collaborator refused the request.
    #[error(transparent)]
    Cluster(#[from] HaError),
}

/// A handler failure escalated to the cluster event source.
#[derive(Debug, Error)]
#[error("Fatal failure while handling {handler}: {failure}")]
pub struct HandlerError {
    pub handler: &'static str,
    #[source]
    pub failure: HandlerFailure,
}

/// What a handler does with its own failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The membership model is broken; surface the failure to the event source.
    Escalate,
    /// Log and carry on in the last good state.
    Log,
}

impl FailurePolicy {
    /// Turn a handler outcome into what the event source gets to see.
    pub fn apply(
        self,
        handler: &'static str,
        outcome: Result<(), HandlerFailure>,
    ) -> Result<(), HandlerError> {
        let failure = match outcome {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };

        match self {
            FailurePolicy::Escalate => {
                error!(handler, error = %failure, "Cluster event handler failed, escalating");
                Err(HandlerError { handler, failure })
            }
            FailurePolicy::Log => {
                warn!(handler, error = %failure, "Cluster event handler failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_policy_swallows() {
        let outcome = Err(HandlerFailure::Cluster(HaError::ElectionTriggerClosed));
        assert!(FailurePolicy::Log.apply("member_is_alive", outcome).is_ok());
    }

    #[test]
    fn test_escalate_policy_keeps_cause() {
        let outcome = Err(HandlerFailure::Cluster(HaError::ElectionTriggerClosed));
        let err = FailurePolicy::Escalate
            .apply("coordinator_is_elected", outcome)
            .unwrap_err();

        assert_eq!(err.handler, "coordinator_is_elected");
        assert!(matches!(
            err.failure,
            HandlerFailure::Cluster(HaError::ElectionTriggerClosed)
        ));
        assert!(err.to_string().contains("coordinator_is_elected"));
    }

    #[test]
    fn test_success_passes_through() {
        assert!(FailurePolicy::Escalate.apply("x", Ok(())).is_ok());
    }
}
