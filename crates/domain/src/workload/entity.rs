use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::entity::{PolicyId, ProfileId};

/// Identifies one interface of one pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadEndpointId {
    pub namespace: String,
    pub pod: String,
    pub endpoint: String,
}

impl fmt::Display for WorkloadEndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.endpoint)
    }
}

/// One tier of policy attached to an endpoint: ordered ingress and
/// egress policy names. Tier order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    pub name: String,

    #[serde(default)]
    pub ingress_policies: Vec<String>,

    #[serde(default)]
    pub egress_policies: Vec<String>,
}

/// A workload endpoint as delivered by the upstream datamodel.
///
/// Replaced wholesale on every update; the manager never merges versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadEndpoint {
    /// Host-side interface name of the workload's veth.
    pub iface_name: String,

    #[serde(default)]
    pub tiers: Vec<TierInfo>,

    #[serde(default)]
    pub profile_ids: Vec<String>,
}

impl WorkloadEndpoint {
    /// Every (tier, policy) edge this endpoint declares, ingress lists
    /// first within each tier. Duplicates are yielded as-is; the
    /// reverse indices are set-valued and coalesce them.
    pub fn referenced_policies(&self) -> impl Iterator<Item = PolicyId> + '_ {
        self.tiers.iter().flat_map(|tier| {
            tier.ingress_policies
                .iter()
                .chain(tier.egress_policies.iter())
                .map(|name| PolicyId {
                    tier: tier.name.clone(),
                    name: name.clone(),
                })
        })
    }

    /// Every profile edge this endpoint declares, in order.
    pub fn referenced_profiles(&self) -> impl Iterator<Item = ProfileId> + '_ {
        self.profile_ids.iter().map(|name| ProfileId {
            name: name.clone(),
        })
    }
}
