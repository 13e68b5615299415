use serde::{Deserialize, Serialize};

/// Direction of policy relative to the endpoint it applies to.
///
/// On a host endpoint, ingress is towards the host. On a workload
/// endpoint, ingress is towards the workload, which is the opposite of
/// the host-namespace tc hook direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDirection {
    Ingress,
    Egress,
}

impl PolicyDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}
