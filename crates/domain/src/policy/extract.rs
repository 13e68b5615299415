use std::collections::HashMap;

use crate::common::entity::PolicyDirection;
use crate::policy::entity::{Policy, PolicyId, Profile, ProfileId, Rule, RuleTree};
use crate::workload::entity::TierInfo;

/// Flatten an endpoint's tier list and profile names into the
/// directional rule tree consumed by the code generator.
///
/// Tiers whose directional policy list is empty are omitted. The tree
/// always ends with one synthetic tier holding the profiles, one
/// "policy" entry per profile name. Nothing is deduplicated: a policy
/// referenced twice contributes its rules twice.
///
/// A referenced policy or profile that is not (yet) in the cache
/// contributes an empty rule list in its position, preserving the
/// tier/policy arity of the tree.
pub fn extract_rules(
    tiers: &[TierInfo],
    profile_names: &[String],
    direction: PolicyDirection,
    policies: &HashMap<PolicyId, Policy>,
    profiles: &HashMap<ProfileId, Profile>,
) -> RuleTree {
    let mut all_rules: RuleTree = Vec::new();

    for tier in tiers {
        let directional_pols = match direction {
            PolicyDirection::Ingress => &tier.ingress_policies,
            PolicyDirection::Egress => &tier.egress_policies,
        };
        if directional_pols.is_empty() {
            continue;
        }

        let mut pols: Vec<Vec<Rule>> = Vec::with_capacity(directional_pols.len());
        for pol_name in directional_pols {
            let id = PolicyId {
                tier: tier.name.clone(),
                name: pol_name.clone(),
            };
            let rules = match (policies.get(&id), direction) {
                (Some(pol), PolicyDirection::Ingress) => pol.inbound_rules.clone(),
                (Some(pol), PolicyDirection::Egress) => pol.outbound_rules.clone(),
                (None, _) => Vec::new(),
            };
            pols.push(rules);
        }
        all_rules.push(pols);
    }

    let mut profs: Vec<Vec<Rule>> = Vec::with_capacity(profile_names.len());
    for prof_name in profile_names {
        let id = ProfileId {
            name: prof_name.clone(),
        };
        let rules = match (profiles.get(&id), direction) {
            (Some(prof), PolicyDirection::Ingress) => prof.inbound_rules.clone(),
            (Some(prof), PolicyDirection::Egress) => prof.outbound_rules.clone(),
            (None, _) => Vec::new(),
        };
        profs.push(rules);
    }
    all_rules.push(profs);

    all_rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::entity::RuleAction;

    // ── Test helpers ───────────────────────────────────────────────

    fn rule(action: RuleAction) -> Rule {
        Rule {
            action,
            ..Rule::allow()
        }
    }

    fn tier(name: &str, ingress: &[&str], egress: &[&str]) -> TierInfo {
        TierInfo {
            name: name.to_string(),
            ingress_policies: ingress.iter().map(|s| (*s).to_string()).collect(),
            egress_policies: egress.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn policy_map(entries: &[(&str, &str, Policy)]) -> HashMap<PolicyId, Policy> {
        entries
            .iter()
            .map(|(t, n, p)| {
                (
                    PolicyId {
                        tier: (*t).to_string(),
                        name: (*n).to_string(),
                    },
                    p.clone(),
                )
            })
            .collect()
    }

    // ── Shape ──────────────────────────────────────────────────────

    #[test]
    fn no_tiers_no_profiles_yields_single_empty_profiles_tier() {
        let tree = extract_rules(
            &[],
            &[],
            PolicyDirection::Ingress,
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(tree, vec![Vec::<Vec<Rule>>::new()]);
    }

    #[test]
    fn tier_with_empty_directional_list_is_omitted() {
        // Both tiers have no ingress policies: only the profiles tier is left.
        let tiers = vec![tier("a", &[], &["polE"]), tier("b", &[], &[])];
        let tree = extract_rules(
            &tiers,
            &[],
            PolicyDirection::Ingress,
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(tree.len(), 1);
        assert!(tree[0].is_empty());
    }

    #[test]
    fn single_tier_single_policy() {
        let r1 = rule(RuleAction::Allow);
        let policies = policy_map(&[(
            "tierA",
            "polX",
            Policy {
                inbound_rules: vec![r1.clone()],
                outbound_rules: vec![],
            },
        )]);
        let tiers = vec![tier("tierA", &["polX"], &[])];
        let tree = extract_rules(
            &tiers,
            &[],
            PolicyDirection::Ingress,
            &policies,
            &HashMap::new(),
        );
        // One real tier plus the trailing (empty) profiles tier.
        assert_eq!(tree, vec![vec![vec![r1]], vec![]]);
    }

    #[test]
    fn direction_selects_rule_list() {
        let inbound = rule(RuleAction::Allow);
        let outbound = rule(RuleAction::Deny);
        let policies = policy_map(&[(
            "tierA",
            "polX",
            Policy {
                inbound_rules: vec![inbound.clone()],
                outbound_rules: vec![outbound.clone()],
            },
        )]);
        let tiers = vec![tier("tierA", &["polX"], &["polX"])];

        let ingress = extract_rules(
            &tiers,
            &[],
            PolicyDirection::Ingress,
            &policies,
            &HashMap::new(),
        );
        assert_eq!(ingress[0][0], vec![inbound]);

        let egress = extract_rules(
            &tiers,
            &[],
            PolicyDirection::Egress,
            &policies,
            &HashMap::new(),
        );
        assert_eq!(egress[0][0], vec![outbound]);
    }

    #[test]
    fn tier_order_and_policy_order_are_preserved() {
        let ra = rule(RuleAction::Allow);
        let rd = rule(RuleAction::Deny);
        let rl = rule(RuleAction::Log);
        let policies = policy_map(&[
            (
                "t1",
                "p1",
                Policy {
                    inbound_rules: vec![ra.clone()],
                    outbound_rules: vec![],
                },
            ),
            (
                "t1",
                "p2",
                Policy {
                    inbound_rules: vec![rd.clone()],
                    outbound_rules: vec![],
                },
            ),
            (
                "t2",
                "p3",
                Policy {
                    inbound_rules: vec![rl.clone()],
                    outbound_rules: vec![],
                },
            ),
        ]);
        let tiers = vec![tier("t1", &["p1", "p2"], &[]), tier("t2", &["p3"], &[])];
        let tree = extract_rules(
            &tiers,
            &[],
            PolicyDirection::Ingress,
            &policies,
            &HashMap::new(),
        );
        assert_eq!(tree, vec![vec![vec![ra], vec![rd]], vec![vec![rl]], vec![]]);
    }

    #[test]
    fn duplicate_policy_reference_is_not_deduplicated() {
        let r1 = rule(RuleAction::Allow);
        let policies = policy_map(&[(
            "t1",
            "p1",
            Policy {
                inbound_rules: vec![r1.clone()],
                outbound_rules: vec![],
            },
        )]);
        let tiers = vec![tier("t1", &["p1", "p1"], &[])];
        let tree = extract_rules(
            &tiers,
            &[],
            PolicyDirection::Ingress,
            &policies,
            &HashMap::new(),
        );
        assert_eq!(tree[0], vec![vec![r1.clone()], vec![r1]]);
    }

    #[test]
    fn absent_policy_contributes_empty_rule_list() {
        let tiers = vec![tier("t1", &["missing"], &[])];
        let tree = extract_rules(
            &tiers,
            &[],
            PolicyDirection::Ingress,
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(tree, vec![vec![vec![]], vec![]]);
    }

    // ── Profiles tier ──────────────────────────────────────────────

    #[test]
    fn profiles_become_trailing_tier() {
        let ra = rule(RuleAction::Allow);
        let rd = rule(RuleAction::Deny);
        let mut profiles = HashMap::new();
        profiles.insert(
            ProfileId {
                name: "profA".to_string(),
            },
            Profile {
                inbound_rules: vec![ra.clone()],
                outbound_rules: vec![rd.clone()],
            },
        );
        let names = vec!["profA".to_string()];

        let ingress = extract_rules(
            &[],
            &names,
            PolicyDirection::Ingress,
            &HashMap::new(),
            &profiles,
        );
        assert_eq!(ingress, vec![vec![vec![ra]]]);

        let egress = extract_rules(
            &[],
            &names,
            PolicyDirection::Egress,
            &HashMap::new(),
            &profiles,
        );
        assert_eq!(egress, vec![vec![vec![rd]]]);
    }

    #[test]
    fn absent_profile_contributes_empty_rule_list() {
        let names = vec!["ghost".to_string()];
        let tree = extract_rules(
            &[],
            &names,
            PolicyDirection::Ingress,
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(tree, vec![vec![vec![]]]);
    }

    #[test]
    fn all_tiers_empty_in_direction_leaves_only_profiles_tier() {
        let tiers: Vec<TierInfo> = (0..3)
            .map(|i| tier(&format!("t{i}"), &[], &["polE"]))
            .collect();
        let tree = extract_rules(
            &tiers,
            &["profA".to_string()],
            PolicyDirection::Ingress,
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].len(), 1);
    }
}
