//! What this node currently knows about its own place in the cluster.

use hacluster_common::InstanceId;

/// Identity of this node plus the latest election and availability facts.
///
/// Only the state machine mutates a context, and always together with a
/// state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberContext {
    my_id: InstanceId,
    elected_master_id: Option<InstanceId>,
    available_master_uri: Option<String>,
}

impl MemberContext {
    /// Create a context for this node with nothing elected yet.
    pub fn new(my_id: InstanceId) -> Self {
        Self {
            my_id,
            elected_master_id: None,
            available_master_uri: None,
        }
    }

    pub fn my_id(&self) -> InstanceId {
        self.my_id
    }

    /// Last coordinator reported as elected.
    pub fn elected_master_id(&self) -> Option<InstanceId> {
        self.elected_master_id
    }

    /// Address the primary last announced itself available on.
    pub fn available_master_uri(&self) -> Option<&str> {
        self.available_master_uri.as_deref()
    }

    /// Check whether this node is the elected coordinator.
    pub fn is_elected_master(&self) -> bool {
        self.elected_master_id == Some(self.my_id)
    }

    pub(crate) fn set_elected_master_id(&mut self, id: Option<InstanceId>) {
        self.elected_master_id = id;
    }

    pub(crate) fn set_available_master_uri(&mut self, uri: Option<String>) {
        self.available_master_uri = uri;
    }

    /// Forget both the elected coordinator and the available primary.
    pub(crate) fn clear(&mut self) {
        self.elected_master_id = None;
        self.available_master_uri = None;
    }
}
