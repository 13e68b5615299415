use domain::common::error::DomainError;

/// Secondary port for the per-interface kernel knobs the dataplane
/// depends on.
pub trait SysctlPort: Send + Sync {
    /// Set `net.ipv4.conf.<iface>.accept_local`. Required on data
    /// interfaces so NodePort-style forwarding works when the host IP
    /// is the tunnelled source address.
    fn set_accept_local(&self, iface: &str, enabled: bool) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummySysctl;
    impl SysctlPort for DummySysctl {
        fn set_accept_local(&self, _iface: &str, _enabled: bool) -> Result<(), DomainError> {
            Ok(())
        }
    }

    #[test]
    fn sysctl_port_is_dyn_compatible() {
        let port: Box<dyn SysctlPort> = Box::new(DummySysctl);
        assert!(port.set_accept_local("eth0", true).is_ok());
    }
}
