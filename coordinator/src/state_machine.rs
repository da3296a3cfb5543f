//! Cluster member state machine.
//!
//! Listens to cluster membership events and moves this node between
//! [`MemberState`]s. Internal services that need to follow role changes
//! register a [`MemberListener`]; the availability gate is denied for the
//! whole of every role switch and granted again once the new role is
//! confirmed available.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use hacluster_common::{ClusterRole, InstanceId, Result, StoreId};

use crate::availability::AvailabilityGate;
use crate::cluster_events::{ClusterEvent, ClusterMemberEvents, ClusterMemberListener};
use crate::config::MemberConfig;
use crate::context::MemberContext;
use crate::election::ElectionTrigger;
use crate::error::{FailurePolicy, HandlerError, HandlerFailure};
use crate::event::{notify_listeners, ChangeKind, MemberChangeEvent, MemberListener};
use crate::listeners::{ListenerId, Listeners};
use crate::metrics::{Metrics, SharedMetrics};
use crate::observed_members::MemberObserver;
use crate::quorum::has_quorum;
use crate::state::MemberState;

/// Collaborators the state machine drives.
pub struct Collaborators {
    pub gate: Arc<dyn AvailabilityGate>,
    pub members: Arc<dyn MemberObserver>,
    pub events: Arc<dyn ClusterMemberEvents>,
    pub election: Arc<dyn ElectionTrigger>,
}

/// Derives this node's role from cluster events.
pub struct MemberStateMachine {
    core: Arc<StateMachineCore>,
    events: Arc<dyn ClusterMemberEvents>,
    registration: Mutex<Option<ListenerId>>,
}

/// The part registered with the event source.
struct StateMachineCore {
    my_id: InstanceId,
    owner: String,
    state: AtomicU8,
    /// Serializes every event handler and `stop`.
    context: Mutex<MemberContext>,
    listeners: Listeners<dyn MemberListener>,
    gate: Arc<dyn AvailabilityGate>,
    members: Arc<dyn MemberObserver>,
    election: Arc<dyn ElectionTrigger>,
    metrics: SharedMetrics,
}

impl MemberStateMachine {
    /// Create a state machine in `PENDING` for the configured instance.
    pub fn new(config: &MemberConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let my_id = config.require_instance_id()?;

        let core = StateMachineCore {
            my_id,
            owner: config.requirement_owner.clone(),
            state: AtomicU8::new(MemberState::Pending.as_u8()),
            context: Mutex::new(MemberContext::new(my_id)),
            listeners: Listeners::new(),
            gate: collaborators.gate,
            members: collaborators.members,
            election: collaborators.election,
            metrics: Arc::new(Metrics::new()),
        };

        Ok(Self {
            core: Arc::new(core),
            events: collaborators.events,
            registration: Mutex::new(None),
        })
    }

    /// Register with the event source and deny access until a role is known.
    #[instrument(skip(self), fields(instance_id = %self.instance_id()))]
    pub fn start(&self) {
        let mut registration = self.registration.lock();
        if registration.is_none() {
            *registration = Some(
                self.events
                    .add_cluster_member_listener(self.core.clone()),
            );
        }
        drop(registration);

        self.core.deny();
        info!(state = %self.current_state(), "Member state machine started");
    }

    /// Unregister, drop back to `PENDING` and deny access if it was allowed.
    #[instrument(skip(self), fields(instance_id = %self.instance_id()))]
    pub fn stop(&self) {
        if let Some(id) = self.registration.lock().take() {
            self.events.remove_cluster_member_listener(id);
        }

        let mut context = self.core.context.lock();
        let old = self.core.state();
        let new = old.to_pending();
        self.core.commit(old, new);
        self.core.notify(
            ChangeKind::InstanceStops,
            &MemberChangeEvent::new(old, new, None, None),
        );

        if old.is_access_allowed() {
            self.core.deny();
        }

        context.set_available_master_uri(None);
        info!(from = %old, "Member state machine stopped");
    }

    /// The last committed state. Never blocks.
    pub fn current_state(&self) -> MemberState {
        self.core.state()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.core.my_id
    }

    /// Diagnostic description of the current state.
    pub fn description(&self) -> String {
        format!("Cluster state is '{}'", self.current_state())
    }

    /// Copy of the member context.
    ///
    /// Takes the event lock, so it must not be called from a member listener.
    pub fn context(&self) -> MemberContext {
        self.core.context.lock().clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn MemberListener>) -> ListenerId {
        self.core.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.core.metrics.clone()
    }

    /// Process one cluster event directly, bypassing the event source.
    #[cfg(test)]
    fn handle(&self, event: &ClusterEvent) -> std::result::Result<(), HandlerError> {
        event.dispatch(self.core.as_ref())
    }
}

impl StateMachineCore {
    fn state(&self) -> MemberState {
        MemberState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn commit(&self, old: MemberState, new: MemberState) {
        self.state.store(new.as_u8(), Ordering::Release);
        if old != new {
            self.metrics.transition();
            debug!(from = %old, to = %new, "Member state changed");
        }
    }

    fn notify(&self, kind: ChangeKind, event: &MemberChangeEvent) {
        let failures = notify_listeners(&self.listeners, kind, event);
        self.metrics.listener_failed(failures);
    }

    fn deny(&self) {
        self.gate.deny(&self.owner);
        self.metrics.access_denied();
    }

    fn grant(&self) {
        self.gate.grant(&self.owner);
        self.metrics.access_granted();
    }

    fn trigger_elections(&self) -> std::result::Result<(), HandlerFailure> {
        self.election.perform_role_elections()?;
        self.metrics.election_triggered();
        Ok(())
    }

    fn member_counts(&self) -> (usize, usize) {
        (
            self.members.alive_members().len(),
            self.members.all_members().len(),
        )
    }

    /// Relinquish any role: deny if needed, go to `PENDING`, forget the
    /// elected and available master. Returns the state left behind.
    fn change_state_to_pending(&self, context: &mut MemberContext) -> MemberState {
        let old = self.state();
        if old.is_access_allowed() {
            self.deny();
        }

        let new = old.to_pending();
        self.commit(old, new);
        self.notify(
            ChangeKind::InstanceStops,
            &MemberChangeEvent::new(old, new, None, None),
        );

        context.clear();
        old
    }

    fn on_coordinator_elected(
        &self,
        coordinator_id: InstanceId,
    ) -> std::result::Result<(), HandlerFailure> {
        let mut context = self.context.lock();
        let old = self.state();
        let previous_elected = context.elected_master_id();

        let new = old.master_is_elected(&context, coordinator_id)?;
        context.set_available_master_uri(None);
        context.set_elected_master_id(Some(coordinator_id));
        self.commit(old, new);

        self.notify(
            ChangeKind::MasterIsElected,
            &MemberChangeEvent::new(old, new, Some(coordinator_id), None),
        );

        if old.is_access_allowed() && old != new {
            self.deny();
        }

        debug!(
            coordinator_id = %coordinator_id,
            from = %old,
            to = %new,
            previous_elected = ?previous_elected,
            "Got master_is_elected"
        );
        Ok(())
    }

    fn on_master_available(
        &self,
        instance_id: InstanceId,
        uri: &str,
    ) -> std::result::Result<(), HandlerFailure> {
        let mut context = self.context.lock();
        let old = self.state();

        let new = old.master_is_available(&context, instance_id)?;
        context.set_available_master_uri(Some(uri.to_string()));
        self.commit(old, new);

        self.notify(
            ChangeKind::MasterIsAvailable,
            &MemberChangeEvent::new(old, new, Some(instance_id), Some(uri.to_string())),
        );

        if old == MemberState::ToMaster && new == MemberState::Master {
            self.grant();
        }

        debug!(instance_id = %instance_id, from = %old, to = %new, "Got master_is_available");
        Ok(())
    }

    fn on_slave_available(
        &self,
        instance_id: InstanceId,
        uri: &str,
    ) -> std::result::Result<(), HandlerFailure> {
        let context = self.context.lock();
        let old = self.state();

        let new = old.slave_is_available(&context, instance_id)?;
        self.commit(old, new);

        self.notify(
            ChangeKind::SlaveIsAvailable,
            &MemberChangeEvent::new(old, new, Some(instance_id), Some(uri.to_string())),
        );

        if old == MemberState::ToSlave && new == MemberState::Slave {
            self.grant();
        }

        debug!(instance_id = %instance_id, from = %old, to = %new, "Got slave_is_available");
        Ok(())
    }

    /// Unavailability of this very instance means the cluster no longer
    /// sees it in its role: give the role up and force new elections.
    fn on_member_unavailable(
        &self,
        instance_id: InstanceId,
    ) -> std::result::Result<(), HandlerFailure> {
        if instance_id != self.my_id {
            debug!(instance_id = %instance_id, "Got member_is_unavailable");
            return Ok(());
        }

        let mut context = self.context.lock();
        if self.state() == MemberState::Pending {
            debug!(
                instance_id = %instance_id,
                "Got member_is_unavailable but already PENDING, skipping state change and elections"
            );
            return Ok(());
        }

        let old = self.change_state_to_pending(&mut context);
        info!(
            instance_id = %instance_id,
            from = %old,
            "This instance reported unavailable, forcing new round of elections"
        );
        self.trigger_elections()
    }

    fn on_member_failed(&self, instance_id: InstanceId) -> std::result::Result<(), HandlerFailure> {
        let mut context = self.context.lock();
        let (alive, total) = self.member_counts();

        if has_quorum(alive, total) {
            debug!(instance_id = %instance_id, alive, total, "Got member_is_failed");
            return Ok(());
        }

        if self.state() == MemberState::Pending {
            debug!(
                instance_id = %instance_id,
                alive,
                total,
                "Got member_is_failed without quorum, already PENDING"
            );
            return Ok(());
        }

        self.metrics.quorum_lost();
        let old = self.change_state_to_pending(&mut context);
        info!(
            instance_id = %instance_id,
            alive,
            total,
            from = %old,
            "Cluster lost quorum, moved to PENDING"
        );
        Ok(())
    }

    fn on_member_alive(&self, instance_id: InstanceId) -> std::result::Result<(), HandlerFailure> {
        let _context = self.context.lock();
        let (alive, total) = self.member_counts();

        if has_quorum(alive, total) && self.state() == MemberState::Pending {
            info!(
                instance_id = %instance_id,
                alive,
                total,
                "Quorum available while PENDING, requesting elections"
            );
            return self.trigger_elections();
        }

        debug!(instance_id = %instance_id, alive, total, "Got member_is_alive");
        Ok(())
    }

    fn apply_policy(
        &self,
        policy: FailurePolicy,
        handler: &'static str,
        outcome: std::result::Result<(), HandlerFailure>,
    ) -> std::result::Result<(), HandlerError> {
        if outcome.is_err() {
            match policy {
                FailurePolicy::Escalate => self.metrics.handler_failure_fatal(),
                FailurePolicy::Log => self.metrics.handler_failure_recovered(),
            }
        }
        policy.apply(handler, outcome)
    }
}

impl ClusterMemberListener for StateMachineCore {
    fn coordinator_is_elected(
        &self,
        coordinator_id: InstanceId,
    ) -> std::result::Result<(), HandlerError> {
        let outcome = self.on_coordinator_elected(coordinator_id);
        self.apply_policy(FailurePolicy::Escalate, "coordinator_is_elected", outcome)
    }

    fn member_is_available(
        &self,
        role: ClusterRole,
        instance_id: InstanceId,
        uri: &str,
        _store_id: Option<StoreId>,
    ) -> std::result::Result<(), HandlerError> {
        let outcome = match role {
            ClusterRole::Master => self.on_master_available(instance_id, uri),
            ClusterRole::Slave => self.on_slave_available(instance_id, uri),
        };
        self.apply_policy(FailurePolicy::Log, "member_is_available", outcome)
    }

    fn member_is_unavailable(
        &self,
        _role: ClusterRole,
        instance_id: InstanceId,
    ) -> std::result::Result<(), HandlerError> {
        let outcome = self.on_member_unavailable(instance_id);
        self.apply_policy(FailurePolicy::Log, "member_is_unavailable", outcome)
    }

    fn member_is_failed(&self, instance_id: InstanceId) -> std::result::Result<(), HandlerError> {
        let outcome = self.on_member_failed(instance_id);
        self.apply_policy(FailurePolicy::Log, "member_is_failed", outcome)
    }

    fn member_is_alive(&self, instance_id: InstanceId) -> std::result::Result<(), HandlerError> {
        let outcome = self.on_member_alive(instance_id);
        self.apply_policy(FailurePolicy::Log, "member_is_alive", outcome)
    }
}
