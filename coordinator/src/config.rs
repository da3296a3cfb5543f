//! Member state machine configuration.

use std::time::Duration;

use hacluster_common::{HaError, InstanceId, Result};

/// Default owner token the state machine denies and grants access under.
pub const DEFAULT_REQUIREMENT_OWNER: &str = "cluster-member-state";

/// Main configuration for a cluster member.
#[derive(Debug, Clone)]
pub struct MemberConfig {
    /// This node's instance ID (must be unique within the cluster).
    pub instance_id: Option<InstanceId>,
    /// Initial cluster membership, including this node.
    pub cluster_members: Vec<InstanceId>,
    /// Owner token used with the availability gate.
    pub requirement_owner: String,
    /// Capacity of the cluster event queue.
    pub event_queue_capacity: usize,
    /// How long callers wait for the database to become available.
    pub availability_timeout: Duration,
    /// Log level.
    pub log_level: String,
    /// Emit logs as JSON.
    pub log_json: bool,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            cluster_members: Vec::new(),
            requirement_owner: DEFAULT_REQUIREMENT_OWNER.to_string(),
            event_queue_capacity: 1024,
            availability_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl MemberConfig {
    /// Configuration for a known instance, with defaults for everything else.
    pub fn for_instance(instance_id: InstanceId) -> Self {
        Self {
            instance_id: Some(instance_id),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("HA_INSTANCE_ID") {
            config.instance_id = Some(id.parse()?);
        }

        if let Ok(members) = std::env::var("HA_CLUSTER_MEMBERS") {
            config.cluster_members = parse_members(&members)?;
        }

        if let Ok(owner) = std::env::var("HA_REQUIREMENT_OWNER") {
            config.requirement_owner = owner;
        }

        if let Ok(capacity) = std::env::var("HA_EVENT_QUEUE_CAPACITY") {
            if let Ok(capacity) = capacity.parse() {
                config.event_queue_capacity = capacity;
            }
        }

        if let Ok(timeout) = std::env::var("HA_AVAILABILITY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.availability_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(json) = std::env::var("HA_LOG_JSON") {
            config.log_json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// This node's instance ID, or an error if none was configured.
    pub fn require_instance_id(&self) -> Result<InstanceId> {
        self.instance_id
            .ok_or_else(|| HaError::ConfigurationError("Instance id is not set".to_string()))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.requirement_owner.trim().is_empty() {
            return Err(HaError::ConfigurationError(
                "Requirement owner cannot be empty".to_string(),
            ));
        }

        if self.event_queue_capacity == 0 {
            return Err(HaError::ConfigurationError(
                "Event queue capacity cannot be 0".to_string(),
            ));
        }

        if let Some(id) = self.instance_id {
            if !self.cluster_members.is_empty() && !self.cluster_members.contains(&id) {
                return Err(HaError::ConfigurationError(format!(
                    "Instance {} is not one of the cluster members",
                    id
                )));
            }
        }

        Ok(())
    }
}

fn parse_members(value: &str) -> Result<Vec<InstanceId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MemberConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.require_instance_id().is_err());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = MemberConfig::for_instance(InstanceId::new(1));
        config.event_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = MemberConfig::for_instance(InstanceId::new(1));
        config.requirement_owner = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_instance_must_be_member() {
        let mut config = MemberConfig::for_instance(InstanceId::new(4));
        config.cluster_members = vec![InstanceId::new(1), InstanceId::new(2)];
        assert!(config.validate().is_err());

        config.cluster_members.push(InstanceId::new(4));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_members() {
        let members = parse_members("1, 2,3,").unwrap();
        assert_eq!(
            members,
            vec![InstanceId::new(1), InstanceId::new(2), InstanceId::new(3)]
        );
        assert!(parse_members("1,two").is_err());
    }
}
