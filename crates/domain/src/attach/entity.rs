use serde::{Deserialize, Serialize};

/// Kind of endpoint a program is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Workload,
    Host,
    Tunnel,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workload => "workload",
            Self::Host => "host",
            Self::Tunnel => "tunnel",
        }
    }
}

/// Kernel tc hook, relative to the host namespace. Workload policy
/// direction is flipped when mapped onto a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcHook {
    Ingress,
    Egress,
}

impl TcHook {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}

/// Whether the program sees traffic coming from or going to the
/// endpoint. Derived from the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToOrFromEp {
    From,
    To,
}

impl ToOrFromEp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
        }
    }
}

// Compile-flag bits understood by the program template, passed as
// CALI_COMPILE_FLAGS.
pub const COMPILE_FLAG_HOST_EP: u32 = 1;
pub const COMPILE_FLAG_INGRESS: u32 = 2;
pub const COMPILE_FLAG_TUNNEL: u32 = 4;
pub const COMPILE_FLAG_CGROUP: u32 = 8;

/// Where a compiled program gets attached: interface, hook, and the
/// ELF section holding the entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcAttachPoint {
    pub iface: String,
    pub hook: TcHook,
    pub section: String,
    pub compile_flags: u32,
}
