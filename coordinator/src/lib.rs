//! HaCluster member state coordinator
//!
//! Derives a database node's role (pending, master, slave and the switches
//! between them) from cluster membership and election events, and gates
//! access to the local database while a role switch is in flight.

pub mod availability;
pub mod cluster_events;
pub mod config;
pub mod context;
pub mod election;
pub mod error;
pub mod event;
pub mod listeners;
pub mod metrics;
pub mod observed_members;
pub mod quorum;
pub mod state;
pub mod state_machine;

pub use availability::{AvailabilityGate, AvailabilityGuard};
pub use cluster_events::{
    ClusterEvent, ClusterEventBus, ClusterMemberEvents, ClusterMemberListener, EventPublisher,
};
pub use config::MemberConfig;
pub use context::MemberContext;
pub use election::{ChannelElectionTrigger, ElectionRequest, ElectionTrigger};
pub use error::{FailurePolicy, HandlerError, HandlerFailure};
pub use event::{ChangeKind, MemberChangeEvent, MemberListener};
pub use listeners::ListenerId;
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use observed_members::{ClusterMember, MemberObserver, ObservedClusterMembers};
pub use quorum::has_quorum;
pub use state::{MemberState, MemberStateError};
pub use state_machine::{Collaborators, MemberStateMachine};
