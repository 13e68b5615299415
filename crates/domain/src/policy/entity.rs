use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a policy within a tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyId {
    pub tier: String,
    pub name: String,
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tier, self.name)
    }
}

/// Identifies a profile. Profiles are not tiered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId {
    pub name: String,
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
    Log,
    Pass,
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Log => "log",
            Self::Pass => "pass",
        }
    }
}

/// Inclusive L4 port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// A single policy rule.
///
/// Match criteria are opaque to the controller; they are rendered into
/// the program source by the code generator. `None`/empty means
/// wildcard for that criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_net: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_net: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub src_ports: Vec<PortRange>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dst_ports: Vec<PortRange>,

    /// Names of ip-sets the source address must belong to. The code
    /// generator interns these to numeric ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub src_ip_set_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dst_ip_set_ids: Vec<String>,
}

impl Rule {
    /// Unconditional allow, used as the whole-tree policy for host
    /// data interfaces.
    pub fn allow() -> Self {
        Self {
            action: RuleAction::Allow,
            protocol: None,
            src_net: None,
            dst_net: None,
            src_ports: Vec::new(),
            dst_ports: Vec::new(),
            src_ip_set_ids: Vec::new(),
            dst_ip_set_ids: Vec::new(),
        }
    }
}

/// An active policy: ordered rules for each direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub inbound_rules: Vec<Rule>,

    #[serde(default)]
    pub outbound_rules: Vec<Rule>,
}

/// An active profile: same shape as a policy, applied by name after
/// all tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub inbound_rules: Vec<Rule>,

    #[serde(default)]
    pub outbound_rules: Vec<Rule>,
}

/// Extracted rules for one direction: tiers × policies × rules. The
/// outer list is tier-ordered and always ends with the synthetic
/// profiles tier.
pub type RuleTree = Vec<Vec<Vec<Rule>>>;
