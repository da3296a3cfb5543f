//! Identifier types for cluster members, stores and roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::HaError;

/// Identity of a cluster instance, as assigned by the cluster configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Create a new instance ID.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for InstanceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for InstanceId {
    type Err = HaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| HaError::InvalidInstanceId(s.to_string()))
    }
}

/// Identity of the store an instance serves, announced together with its role.
/// Uses UUID v7 so store identities are ordered by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Create a new store ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role an instance announces itself available for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    /// The primary, accepting writes.
    #[serde(alias = "primary")]
    Master,
    /// A secondary, replicating from the primary.
    #[serde(alias = "secondary")]
    Slave,
}

impl ClusterRole {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterRole::Master => "master",
            ClusterRole::Slave => "slave",
        }
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
