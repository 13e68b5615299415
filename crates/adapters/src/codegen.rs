use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use domain::common::error::DomainError;
use domain::idalloc::IdAllocator;
use domain::policy::entity::{RuleAction, RuleTree};
use ports::secondary::codegen_port::ProgramCodegen;

/// Renders a rule tree as X-macro invocations appended to the C
/// template, which the template expands into its policy tables.
///
/// This is the controller-side half of the generator contract; the
/// macro definitions live with the template itself. Ip-set names are
/// interned through the shared id allocator so ids stay stable across
/// compiles.
pub struct TemplateCodegen {
    template: PathBuf,
    ids: Arc<Mutex<IdAllocator>>,
}

impl TemplateCodegen {
    pub fn new(template: impl Into<PathBuf>, ids: Arc<Mutex<IdAllocator>>) -> Self {
        Self {
            template: template.into(),
            ids,
        }
    }
}

fn action_macro(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Allow => "CALI_RULE_ALLOW",
        RuleAction::Deny => "CALI_RULE_DENY",
        RuleAction::Log => "CALI_RULE_LOG",
        RuleAction::Pass => "CALI_RULE_PASS",
    }
}

impl ProgramCodegen for TemplateCodegen {
    fn write_program(&self, rules: &RuleTree, out: &mut dyn Write) -> Result<(), DomainError> {
        let io_err = |e: std::io::Error| DomainError::Codegen(e.to_string());

        let template = std::fs::read(&self.template).map_err(|e| {
            DomainError::Codegen(format!(
                "failed to read template {}: {e}",
                self.template.display()
            ))
        })?;
        out.write_all(&template).map_err(io_err)?;

        let mut ids = self.ids.lock().expect("id allocator lock poisoned");
        writeln!(out).map_err(io_err)?;
        writeln!(out, "/* generated policy: {} tiers */", rules.len()).map_err(io_err)?;
        for (t, tier) in rules.iter().enumerate() {
            for (p, policy) in tier.iter().enumerate() {
                for (r, rule) in policy.iter().enumerate() {
                    for set in &rule.src_ip_set_ids {
                        writeln!(
                            out,
                            "CALI_SRC_IP_SET({t}, {p}, {r}, {}ULL)",
                            ids.get_or_alloc(set)
                        )
                        .map_err(io_err)?;
                    }
                    for set in &rule.dst_ip_set_ids {
                        writeln!(
                            out,
                            "CALI_DST_IP_SET({t}, {p}, {r}, {}ULL)",
                            ids.get_or_alloc(set)
                        )
                        .map_err(io_err)?;
                    }
                    writeln!(out, "CALI_RULE({t}, {p}, {r}, {})", action_macro(rule.action))
                        .map_err(io_err)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::policy::entity::Rule;

    fn codegen_with_template(content: &str) -> (TemplateCodegen, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redir_tc.c");
        std::fs::write(&path, content).unwrap();
        (
            TemplateCodegen::new(path, Arc::new(Mutex::new(IdAllocator::new()))),
            dir,
        )
    }

    fn generate(codegen: &TemplateCodegen, rules: &RuleTree) -> String {
        let mut buf = Vec::new();
        codegen.write_program(rules, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn output_starts_with_template_source() {
        let (codegen, _dir) = codegen_with_template("#include <bpf.h>\n");
        let out = generate(&codegen, &vec![vec![vec![Rule::allow()]]]);
        assert!(out.starts_with("#include <bpf.h>\n"));
    }

    #[test]
    fn rules_become_macro_invocations_in_tree_order() {
        let (codegen, _dir) = codegen_with_template("");
        let mut deny = Rule::allow();
        deny.action = RuleAction::Deny;
        let tree: RuleTree = vec![vec![vec![Rule::allow(), deny]], vec![]];
        let out = generate(&codegen, &tree);
        let allow_pos = out.find("CALI_RULE(0, 0, 0, CALI_RULE_ALLOW)").unwrap();
        let deny_pos = out.find("CALI_RULE(0, 0, 1, CALI_RULE_DENY)").unwrap();
        assert!(allow_pos < deny_pos);
        assert!(out.contains("/* generated policy: 2 tiers */"));
    }

    #[test]
    fn ip_set_ids_are_stable_across_programs() {
        let (codegen, _dir) = codegen_with_template("");
        let mut rule = Rule::allow();
        rule.src_ip_set_ids = vec!["set-a".to_string()];
        let tree: RuleTree = vec![vec![vec![rule]]];

        let first = generate(&codegen, &tree);
        let second = generate(&codegen, &tree);
        assert!(first.contains("CALI_SRC_IP_SET(0, 0, 0, 1ULL)"));
        assert_eq!(first, second);
    }

    #[test]
    fn missing_template_is_a_codegen_error() {
        let codegen = TemplateCodegen::new(
            "/nonexistent/redir_tc.c",
            Arc::new(Mutex::new(IdAllocator::new())),
        );
        let mut buf = Vec::new();
        let err = codegen.write_program(&Vec::new(), &mut buf).unwrap_err();
        assert!(matches!(err, DomainError::Codegen(_)));
    }
}
