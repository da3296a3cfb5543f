//! Observed cluster members and their liveness.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use hacluster_common::{ClusterRole, InstanceId, StoreId};

use crate::cluster_events::ClusterMemberListener;
use crate::error::HandlerError;

/// What this node has observed about one cluster member.
#[derive(Debug, Clone)]
pub struct ClusterMember {
    /// Member ID.
    pub instance_id: InstanceId,
    /// Whether the member is currently reachable.
    pub alive: bool,
    /// Roles the member announced, with the address for each.
    pub roles: HashMap<ClusterRole, String>,
}

impl ClusterMember {
    /// Create a new, alive member with no roles.
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            alive: true,
            roles: HashMap::new(),
        }
    }

    /// Check if the member announced `role`.
    pub fn has_role(&self, role: ClusterRole) -> bool {
        self.roles.contains_key(&role)
    }

    fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }
}

/// Read access to the membership counts quorum is computed from.
pub trait MemberObserver: Send + Sync {
    /// Members currently considered reachable.
    fn alive_members(&self) -> Vec<ClusterMember>;

    /// Every member of the cluster, reachable or not.
    fn all_members(&self) -> Vec<ClusterMember>;
}

/// Registry of cluster members kept current from membership events.
pub struct ObservedClusterMembers {
    members: Arc<DashMap<InstanceId, ClusterMember>>,
}

impl ObservedClusterMembers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            members: Arc::new(DashMap::new()),
        }
    }

    /// Create a registry with the configured cluster members, all alive.
    pub fn with_members(ids: impl IntoIterator<Item = InstanceId>) -> Self {
        let observed = Self::new();
        for id in ids {
            observed.join(id);
        }
        observed
    }

    /// Add a member. Re-joining an existing member marks it alive.
    pub fn join(&self, id: InstanceId) {
        self.members
            .entry(id)
            .and_modify(|member| member.set_alive(true))
            .or_insert_with(|| ClusterMember::new(id));
        info!(instance_id = %id, "Cluster member joined");
    }

    /// Mark a member unreachable. Returns false for unknown members.
    pub fn mark_failed(&self, id: InstanceId) -> bool {
        match self.members.get_mut(&id) {
            Some(mut member) => {
                member.set_alive(false);
                debug!(instance_id = %id, "Cluster member failed");
                true
            }
            None => {
                warn!(instance_id = %id, "Failure reported for unknown cluster member");
                false
            }
        }
    }

    /// Mark a member reachable, adding it if it was not known.
    pub fn mark_alive(&self, id: InstanceId) {
        self.members
            .entry(id)
            .and_modify(|member| member.set_alive(true))
            .or_insert_with(|| ClusterMember::new(id));
        debug!(instance_id = %id, "Cluster member alive");
    }

    /// Get count of alive members.
    pub fn alive_count(&self) -> usize {
        self.members.iter().filter(|e| e.value().alive).count()
    }

    pub fn total_count(&self) -> usize {
        self.members.len()
    }

    /// The member currently announcing the master role, if any.
    pub fn current_master(&self) -> Option<ClusterMember> {
        self.members
            .iter()
            .find(|e| e.value().alive && e.value().has_role(ClusterRole::Master))
            .map(|e| e.value().clone())
    }
}

impl Default for ObservedClusterMembers {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberObserver for ObservedClusterMembers {
    fn alive_members(&self) -> Vec<ClusterMember> {
        self.members
            .iter()
            .filter(|e| e.value().alive)
            .map(|e| e.value().clone())
            .collect()
    }

    fn all_members(&self) -> Vec<ClusterMember> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }
}

impl ClusterMemberListener for ObservedClusterMembers {
    fn member_is_available(
        &self,
        role: ClusterRole,
        instance_id: InstanceId,
        uri: &str,
        store_id: Option<StoreId>,
    ) -> Result<(), HandlerError> {
        debug!(instance_id = %instance_id, role = %role, store_id = ?store_id, "Member available");
        if role == ClusterRole::Master {
            // a new master supersedes whoever announced the role before
            for mut entry in self.members.iter_mut() {
                if *entry.key() != instance_id {
                    entry.value_mut().roles.remove(&ClusterRole::Master);
                }
            }
        }

        self.members
            .entry(instance_id)
            .or_insert_with(|| ClusterMember::new(instance_id))
            .roles
            .insert(role, uri.to_string());
        Ok(())
    }

    fn member_is_unavailable(
        &self,
        role: ClusterRole,
        instance_id: InstanceId,
    ) -> Result<(), HandlerError> {
        if let Some(mut member) = self.members.get_mut(&instance_id) {
            member.roles.remove(&role);
        }
        Ok(())
    }

    fn member_is_failed(&self, instance_id: InstanceId) -> Result<(), HandlerError> {
        self.mark_failed(instance_id);
        Ok(())
    }

    fn member_is_alive(&self, instance_id: InstanceId) -> Result<(), HandlerError> {
        self.mark_alive(instance_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> InstanceId {
        InstanceId::new(n)
    }

    #[test]
    fn test_member_registration() {
        let observed = ObservedClusterMembers::with_members([id(1), id(2), id(3)]);

        assert_eq!(observed.total_count(), 3);
        assert_eq!(observed.alive_count(), 3);
        assert!(observed.all_members().iter().all(|member| member.alive));
    }

    #[test]
    fn test_failure_and_recovery() {
        let observed = ObservedClusterMembers::with_members([id(1), id(2), id(3)]);

        assert!(observed.mark_failed(id(2)));
        assert!(!observed.mark_failed(id(9)));
        assert_eq!(observed.alive_members().len(), 2);
        assert_eq!(observed.all_members().len(), 3);

        observed.mark_alive(id(2));
        assert_eq!(observed.alive_count(), 3);
    }

    #[test]
    fn test_failed_master_is_not_current() {
        let observed = ObservedClusterMembers::with_members([id(1), id(2)]);
        observed
            .member_is_available(ClusterRole::Master, id(1), "ha://node1:6001", None)
            .unwrap();

        observed.mark_failed(id(1));
        assert!(observed.current_master().is_none());

        observed.mark_alive(id(1));
        assert_eq!(observed.current_master().unwrap().instance_id, id(1));
    }

    #[test]
    fn test_role_tracking() {
        let observed = ObservedClusterMembers::with_members([id(1), id(2)]);

        observed
            .member_is_available(ClusterRole::Master, id(1), "ha://node1:6001", None)
            .unwrap();
        assert_eq!(observed.current_master().unwrap().instance_id, id(1));

        observed
            .member_is_available(ClusterRole::Master, id(2), "ha://node2:6001", None)
            .unwrap();
        assert_eq!(observed.current_master().unwrap().instance_id, id(2));
        let first = observed
            .all_members()
            .into_iter()
            .find(|member| member.instance_id == id(1))
            .unwrap();
        assert!(!first.has_role(ClusterRole::Master));

        observed
            .member_is_unavailable(ClusterRole::Master, id(2))
            .unwrap();
        assert!(observed.current_master().is_none());
    }

    #[test]
    fn test_events_update_liveness() {
        let observed = ObservedClusterMembers::with_members([id(1), id(2)]);

        observed.member_is_failed(id(1)).unwrap();
        assert_eq!(observed.alive_count(), 1);

        observed.member_is_alive(id(1)).unwrap();
        assert_eq!(observed.alive_count(), 2);
    }
}
