//! HaCluster Common Types
//!
//! Shared types used across the cluster member coordinator: instance and
//! store identifiers, cluster roles and the common error type.

pub mod identifiers;
pub mod error;

pub use identifiers::*;
pub use error::*;
