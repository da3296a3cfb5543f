//! Member state definitions and the transition table.
//!
//! Transitions are pure: they read the [`MemberContext`] and return the next
//! state. Committing the state, updating the context and notifying anyone is
//! left to the state machine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hacluster_common::InstanceId;

use crate::context::MemberContext;

/// Role of this node as derived from cluster events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MemberState {
    /// No coordinator known, or quorum lost. Initial state.
    Pending = 0,
    /// This node was elected and is switching to the primary role.
    ToMaster = 1,
    /// This node is the available primary.
    Master = 2,
    /// Another node was elected and this node is switching to secondary.
    ToSlave = 3,
    /// This node is an available secondary.
    Slave = 4,
}

/// The context contradicts the state the transition was asked to start from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemberStateError {
    /// Primary-side state while another instance (or none) is elected, or
    /// secondary-side state while this node is the elected one.
    #[error("State {state} contradicts elected master {elected:?} on instance {my_id}")]
    ContextMismatch {
        state: MemberState,
        my_id: InstanceId,
        elected: Option<InstanceId>,
    },
}

impl MemberState {
    /// Check if the local database may serve requests in this state.
    pub fn is_access_allowed(&self) -> bool {
        matches!(self, MemberState::Master | MemberState::Slave)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Pending => "PENDING",
            MemberState::ToMaster => "TO_MASTER",
            MemberState::Master => "MASTER",
            MemberState::ToSlave => "TO_SLAVE",
            MemberState::Slave => "SLAVE",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => MemberState::ToMaster,
            2 => MemberState::Master,
            3 => MemberState::ToSlave,
            4 => MemberState::Slave,
            // only values produced by as_u8 are ever stored
            _ => MemberState::Pending,
        }
    }

    /// A coordinator was elected.
    ///
    /// Applies from every state and is re-applied on every announcement,
    /// including a repeat of the coordinator already known.
    pub fn master_is_elected(
        self,
        context: &MemberContext,
        coordinator_id: InstanceId,
    ) -> Result<MemberState, MemberStateError> {
        self.check_context(context)?;

        if coordinator_id == context.my_id() {
            Ok(MemberState::ToMaster)
        } else {
            Ok(MemberState::ToSlave)
        }
    }

    /// An instance announced itself available as primary.
    pub fn master_is_available(
        self,
        context: &MemberContext,
        instance_id: InstanceId,
    ) -> Result<MemberState, MemberStateError> {
        self.check_context(context)?;

        match self {
            MemberState::ToMaster | MemberState::Master
                if context.elected_master_id() == Some(instance_id) =>
            {
                Ok(MemberState::Master)
            }
            _ => Ok(self),
        }
    }

    /// An instance announced itself available as secondary.
    pub fn slave_is_available(
        self,
        context: &MemberContext,
        _instance_id: InstanceId,
    ) -> Result<MemberState, MemberStateError> {
        self.check_context(context)?;

        match self {
            MemberState::ToSlave | MemberState::Slave => Ok(MemberState::Slave),
            _ => Ok(self),
        }
    }

    /// Drop back to pending from anywhere.
    pub fn to_pending(self) -> MemberState {
        MemberState::Pending
    }

    fn check_context(self, context: &MemberContext) -> Result<(), MemberStateError> {
        let consistent = match self {
            MemberState::Pending => true,
            MemberState::ToMaster | MemberState::Master => context.is_elected_master(),
            MemberState::ToSlave | MemberState::Slave => {
                context.elected_master_id().is_some() && !context.is_elected_master()
            }
        };

        if consistent {
            Ok(())
        } else {
            Err(MemberStateError::ContextMismatch {
                state: self,
                my_id: context.my_id(),
                elected: context.elected_master_id(),
            })
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
