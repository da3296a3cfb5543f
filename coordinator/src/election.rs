//! Forcing new role elections.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use hacluster_common::{HaError, InstanceId, Result};

/// Asks the election transport to run a fresh round of role elections.
pub trait ElectionTrigger: Send + Sync {
    /// Fire-and-forget; an error only means the request could not be queued.
    fn perform_role_elections(&self) -> Result<()>;
}

/// An election request as queued for the election transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionRequest {
    /// Instance asking for the election.
    pub requested_by: InstanceId,
    pub requested_at: DateTime<Utc>,
}

/// Election trigger that queues requests on an unbounded channel.
pub struct ChannelElectionTrigger {
    instance_id: InstanceId,
    requests: mpsc::UnboundedSender<ElectionRequest>,
}

impl ChannelElectionTrigger {
    /// Create a trigger and the receiving end the election transport drains.
    pub fn new(instance_id: InstanceId) -> (Self, mpsc::UnboundedReceiver<ElectionRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                instance_id,
                requests,
            },
            rx,
        )
    }
}

impl ElectionTrigger for ChannelElectionTrigger {
    fn perform_role_elections(&self) -> Result<()> {
        let request = ElectionRequest {
            requested_by: self.instance_id,
            requested_at: Utc::now(),
        };
        self.requests
            .send(request)
            .map_err(|_| HaError::ElectionTriggerClosed)?;
        debug!(instance_id = %self.instance_id, "Role elections requested");
        Ok(())
    }
}
