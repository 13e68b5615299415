use std::path::Path;

use domain::common::error::DomainError;
use ports::secondary::sysctl_port::SysctlPort;
use tracing::{error, info};

/// Writes runtime kernel knobs under `/proc/sys`.
pub struct ProcSysctl;

fn write_proc_sys(path: &Path, value: &str) -> std::io::Result<()> {
    std::fs::write(path, value)
}

impl SysctlPort for ProcSysctl {
    fn set_accept_local(&self, iface: &str, enabled: bool) -> Result<(), DomainError> {
        let value = if enabled { "1" } else { "0" };
        let path = format!("/proc/sys/net/ipv4/conf/{iface}/accept_local");
        match write_proc_sys(Path::new(&path), value) {
            Ok(()) => {
                info!(path = %path, value, "sysctl set");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, path = %path, value, "failed to set sysctl");
                Err(DomainError::Sysctl {
                    path,
                    reason: e.to_string(),
                })
            }
        }
    }
}
