use std::collections::HashSet;
use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Mutex;

use domain::attach::entity::TcAttachPoint;
use domain::common::error::DomainError;
use domain::policy::entity::RuleTree;

use crate::secondary::metrics_port::{ProgramMetrics, ReconcileMetrics};
use crate::secondary::program_port::ProgramPort;
use crate::secondary::sysctl_port::SysctlPort;

/// No-op implementation of all metrics sub-traits for use in tests.
pub struct NoopMetrics;

impl ProgramMetrics for NoopMetrics {}
impl ReconcileMetrics for NoopMetrics {}

/// One `compile_and_attach` call as seen by [`RecordingProgramPort`].
#[derive(Debug, Clone)]
pub struct RecordedAttach {
    pub attach_point: TcAttachPoint,
    pub rules: RuleTree,
    pub host_ip: Option<Ipv4Addr>,
}

/// Recording fake for [`ProgramPort`]: remembers every call and fails
/// attaches on interfaces listed in `fail_ifaces`.
#[derive(Default)]
pub struct RecordingProgramPort {
    pub qdiscs: Mutex<Vec<String>>,
    pub attaches: Mutex<Vec<RecordedAttach>>,
    pub fail_ifaces: Mutex<HashSet<String>>,
}

impl RecordingProgramPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every attach on `iface` fail until cleared.
    pub fn fail_iface(&self, iface: &str) {
        self.fail_ifaces.lock().unwrap().insert(iface.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_ifaces.lock().unwrap().clear();
    }

    /// Recorded attaches for one interface, in call order.
    pub fn attaches_for(&self, iface: &str) -> Vec<RecordedAttach> {
        self.attaches
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.attach_point.iface == iface)
            .cloned()
            .collect()
    }
}

impl ProgramPort for RecordingProgramPort {
    fn ensure_qdisc<'a>(
        &'a self,
        iface: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.qdiscs.lock().unwrap().push(iface.to_string());
        })
    }

    fn compile_and_attach<'a>(
        &'a self,
        rules: &'a RuleTree,
        attach_point: &'a TcAttachPoint,
        host_ip: Option<Ipv4Addr>,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
        Box::pin(async move {
            self.attaches.lock().unwrap().push(RecordedAttach {
                attach_point: attach_point.clone(),
                rules: rules.clone(),
                host_ip,
            });
            if self
                .fail_ifaces
                .lock()
                .unwrap()
                .contains(&attach_point.iface)
            {
                return Err(DomainError::Attach {
                    iface: attach_point.iface.clone(),
                    reason: "injected failure".to_string(),
                });
            }
            Ok(())
        })
    }
}

/// Recording fake for [`SysctlPort`].
#[derive(Default)]
pub struct RecordingSysctl {
    pub writes: Mutex<Vec<(String, bool)>>,
}

impl RecordingSysctl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SysctlPort for RecordingSysctl {
    fn set_accept_local(&self, iface: &str, enabled: bool) -> Result<(), DomainError> {
        self.writes.lock().unwrap().push((iface.to_string(), enabled));
        Ok(())
    }
}
