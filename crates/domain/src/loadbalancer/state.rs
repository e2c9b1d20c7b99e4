//! VM NIC attachment state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The state of a VM NIC attached to a load balancer.
///
/// State transitions:
/// ```text
/// Pending ──► Active
///    │
///    └──► (ref deleted when the backend rejects the attach)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VmNicStatus {
    /// Ref persisted, backend attach not yet confirmed.
    #[default]
    Pending,

    /// Backend confirmed the attach.
    Active,
}

impl VmNicStatus {
    /// Returns true if the ref can be promoted to Active.
    pub fn can_activate(&self) -> bool {
        matches!(self, VmNicStatus::Pending)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            VmNicStatus::Pending => "Pending",
            VmNicStatus::Active => "Active",
        }
    }
}

impl std::str::FromStr for VmNicStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(VmNicStatus::Pending),
            "Active" => Ok(VmNicStatus::Active),
            _ => Err(DomainError::UnknownStatus {
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for VmNicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(VmNicStatus::default(), VmNicStatus::Pending);
    }

    #[test]
    fn test_can_activate() {
        assert!(VmNicStatus::Pending.can_activate());
        assert!(!VmNicStatus::Active.can_activate());
    }

    #[test]
    fn test_parse_round_trips_display() {
        for status in [VmNicStatus::Pending, VmNicStatus::Active] {
            assert_eq!(status.to_string().parse::<VmNicStatus>(), Ok(status));
        }
        assert!("Deleting".parse::<VmNicStatus>().is_err());
    }
}
