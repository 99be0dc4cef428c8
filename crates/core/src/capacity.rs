//! Types shared between the admission controller and the coordinator
//!
//! Kept in `core` (rather than the `capacity` crate) because the server
//! crate needs to match on [`DenialReason`] to pick a user-audible message
//! without depending on the capacity crate's KV-store machinery.

use serde::{Deserialize, Serialize};

/// The three reservation scopes, checked in this fixed order (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityScope {
    TenantPerMinute,
    TenantConcurrent,
    GlobalConcurrent,
}

impl CapacityScope {
    pub fn key(self, tenant_id: &str) -> String {
        match self {
            CapacityScope::TenantPerMinute => format!("cap:tenant_min:{tenant_id}"),
            CapacityScope::TenantConcurrent => format!("cap:tenant:{tenant_id}"),
            CapacityScope::GlobalConcurrent => "cap:global".to_string(),
        }
    }
}

/// Reason a reservation was denied; each maps to a distinct user-audible
/// message (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    RateLimited,
    TenantAtCapacity,
    SystemAtCapacity,
}

impl DenialReason {
    pub fn canned_message(self) -> &'static str {
        match self {
            DenialReason::RateLimited => "We're receiving a lot of calls right now. Please try again in a minute.",
            DenialReason::TenantAtCapacity => "All our lines are currently busy. Please try again shortly.",
            DenialReason::SystemAtCapacity => "We're experiencing high call volume across the system. Please try again later.",
        }
    }

    pub fn metric_label(self) -> &'static str {
        match self {
            DenialReason::RateLimited => "rate_limited",
            DenialReason::TenantAtCapacity => "tenant_at_capacity",
            DenialReason::SystemAtCapacity => "system_at_capacity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_keys_are_distinct() {
        let t = "tenant-1";
        assert_eq!(CapacityScope::TenantPerMinute.key(t), "cap:tenant_min:tenant-1");
        assert_eq!(CapacityScope::TenantConcurrent.key(t), "cap:tenant:tenant-1");
        assert_eq!(CapacityScope::GlobalConcurrent.key(t), "cap:global");
    }

    #[test]
    fn denial_reasons_have_distinct_messages() {
        let msgs = [
            DenialReason::RateLimited.canned_message(),
            DenialReason::TenantAtCapacity.canned_message(),
            DenialReason::SystemAtCapacity.canned_message(),
        ];
        assert_ne!(msgs[0], msgs[1]);
        assert_ne!(msgs[1], msgs[2]);
    }
}
