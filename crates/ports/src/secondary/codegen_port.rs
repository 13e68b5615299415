use std::io::Write;

use domain::common::error::DomainError;
use domain::policy::entity::RuleTree;

/// Contract of the BPF policy code generator: render an extracted rule
/// tree as C source into the sink.
///
/// The generator itself is maintained alongside the program template;
/// the controller only drives it. Implementations are constructed
/// bound to a template source path and a shared numeric id allocator.
pub trait ProgramCodegen: Send + Sync {
    fn write_program(&self, rules: &RuleTree, out: &mut dyn Write) -> Result<(), DomainError>;
}
