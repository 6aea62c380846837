//! Container entity carried across the namespace re-execution boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reference::ImageReference;

/// Advisory resource limits. Recorded in the descriptor, not enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in MB
    pub memory_mb: Option<u32>,
    /// Memory + swap limit in MB
    pub swap_mb: Option<u32>,
    /// Maximum number of processes
    pub pids: Option<u32>,
    /// CPU quota in cores
    pub cpus: Option<u32>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self == &ResourceLimits::default()
    }
}

/// A single container run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub image: ImageReference,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub limits: ResourceLimits,
    pub created_at: DateTime<Utc>,
}

impl Container {
    /// Create a container for a resolved image, generating an id if none is given.
    pub fn new(id: Option<String>, image: ImageReference, args: Vec<String>) -> Self {
        Self {
            id: id.unwrap_or_else(generate_id),
            image,
            args,
            limits: ResourceLimits::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// 12 hex characters from a random UUID.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}
