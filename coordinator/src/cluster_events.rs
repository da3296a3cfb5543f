//! Cluster membership events and the bus that delivers them.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hacluster_common::{ClusterRole, HaError, InstanceId, Result, StoreId};

use crate::error::HandlerError;
use crate::listeners::{ListenerId, Listeners};

/// A membership or election notification from the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// A coordinator won the election.
    CoordinatorIsElected { coordinator_id: InstanceId },
    /// An instance announced it is serving a role.
    MemberIsAvailable {
        role: ClusterRole,
        instance_id: InstanceId,
        uri: String,
        #[serde(default)]
        store_id: Option<StoreId>,
    },
    /// An instance no longer serves a role.
    MemberIsUnavailable {
        role: ClusterRole,
        instance_id: InstanceId,
    },
    /// An instance stopped responding.
    MemberIsFailed { instance_id: InstanceId },
    /// A failed instance is reachable again.
    MemberIsAlive { instance_id: InstanceId },
}

impl ClusterEvent {
    /// Name of the callback this event is delivered through.
    pub fn name(&self) -> &'static str {
        match self {
            ClusterEvent::CoordinatorIsElected { .. } => "coordinator_is_elected",
            ClusterEvent::MemberIsAvailable { .. } => "member_is_available",
            ClusterEvent::MemberIsUnavailable { .. } => "member_is_unavailable",
            ClusterEvent::MemberIsFailed { .. } => "member_is_failed",
            ClusterEvent::MemberIsAlive { .. } => "member_is_alive",
        }
    }

    /// Invoke the matching callback on `listener`.
    pub fn dispatch(
        &self,
        listener: &dyn ClusterMemberListener,
    ) -> std::result::Result<(), HandlerError> {
        match self {
            ClusterEvent::CoordinatorIsElected { coordinator_id } => {
                listener.coordinator_is_elected(*coordinator_id)
            }
            ClusterEvent::MemberIsAvailable {
                role,
                instance_id,
                uri,
                store_id,
            } => listener.member_is_available(*role, *instance_id, uri, *store_id),
            ClusterEvent::MemberIsUnavailable { role, instance_id } => {
                listener.member_is_unavailable(*role, *instance_id)
            }
            ClusterEvent::MemberIsFailed { instance_id } => listener.member_is_failed(*instance_id),
            ClusterEvent::MemberIsAlive { instance_id } => listener.member_is_alive(*instance_id),
        }
    }
}

/// Receiver of cluster membership events.
///
/// Only failures a listener decides to escalate come back as errors.
pub trait ClusterMemberListener: Send + Sync {
    fn coordinator_is_elected(
        &self,
        _coordinator_id: InstanceId,
    ) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    fn member_is_available(
        &self,
        _role: ClusterRole,
        _instance_id: InstanceId,
        _uri: &str,
        _store_id: Option<StoreId>,
    ) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    fn member_is_unavailable(
        &self,
        _role: ClusterRole,
        _instance_id: InstanceId,
    ) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    fn member_is_failed(&self, _instance_id: InstanceId) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    fn member_is_alive(&self, _instance_id: InstanceId) -> std::result::Result<(), HandlerError> {
        Ok(())
    }
}

/// Source of cluster membership events.
pub trait ClusterMemberEvents: Send + Sync {
    fn add_cluster_member_listener(&self, listener: Arc<dyn ClusterMemberListener>) -> ListenerId;

    fn remove_cluster_member_listener(&self, id: ListenerId) -> bool;
}

/// Sending half of a [`ClusterEventBus`].
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<ClusterEvent>,
}

impl EventPublisher {
    /// Queue an event, waiting for room if the queue is full.
    pub async fn publish(&self, event: ClusterEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| HaError::EventSourceClosed)
    }
}

/// Event source that delivers queued events one at a time.
///
/// Listeners receive each event in registration order, so a listener that
/// keeps member liveness current should be registered before the state
/// machine that counts on it.
pub struct ClusterEventBus {
    listeners: Listeners<dyn ClusterMemberListener>,
    receiver: Mutex<Option<mpsc::Receiver<ClusterEvent>>>,
}

impl ClusterEventBus {
    /// Create a bus with a bounded queue.
    pub fn new(capacity: usize) -> (Arc<Self>, EventPublisher) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bus = Arc::new(Self {
            listeners: Listeners::new(),
            receiver: Mutex::new(Some(rx)),
        });
        (bus, EventPublisher { tx })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver one event to every registered listener.
    ///
    /// All listeners see the event even if one escalates; the first escalated
    /// failure is returned.
    pub fn deliver(&self, event: &ClusterEvent) -> std::result::Result<(), HandlerError> {
        debug!(event = event.name(), "Delivering cluster event");

        let mut first_failure = None;
        for (_, listener) in self.listeners.snapshot().iter() {
            if let Err(e) = event.dispatch(listener.as_ref()) {
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drain the queue until every publisher is dropped or a listener
    /// escalates a failure.
    pub async fn run(&self) -> std::result::Result<(), HandlerError> {
        let receiver = self.receiver.lock().take();
        let Some(mut rx) = receiver else {
            warn!("Cluster event bus is already running");
            return Ok(());
        };

        info!("Cluster event bus started");
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.deliver(&event) {
                error!(event = event.name(), error = %e, "Stopping cluster event bus");
                return Err(e);
            }
        }

        info!("Cluster event bus stopped");
        Ok(())
    }
}

impl ClusterMemberEvents for ClusterEventBus {
    fn add_cluster_member_listener(&self, listener: Arc<dyn ClusterMemberListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_cluster_member_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
