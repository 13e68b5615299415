use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;

use domain::attach::entity::TcAttachPoint;
use domain::common::error::DomainError;
use domain::policy::entity::RuleTree;

/// Secondary port for programming tc BPF classifiers onto interfaces.
///
/// Uses `Pin<Box<dyn Future>>` return types (instead of RPITIT) so the
/// trait is dyn-compatible and can be shared as `Arc<dyn ProgramPort>`
/// across reconcile workers.
pub trait ProgramPort: Send + Sync {
    /// Make sure a clsact qdisc is present on the interface so both
    /// hooks are available. Best-effort; failures surface later when
    /// the filter is added.
    fn ensure_qdisc<'a>(&'a self, iface: &'a str)
    -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Compile the rule tree for the attach point and attach the
    /// resulting object. `host_ip` is the interface's primary IPv4
    /// address, when one is known.
    fn compile_and_attach<'a>(
        &'a self,
        rules: &'a RuleTree,
        attach_point: &'a TcAttachPoint,
        host_ip: Option<Ipv4Addr>,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>>;
}
