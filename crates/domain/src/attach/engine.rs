use crate::common::entity::PolicyDirection;
use crate::attach::entity::{
    COMPILE_FLAG_HOST_EP, COMPILE_FLAG_INGRESS, COMPILE_FLAG_TUNNEL, EndpointKind, TcAttachPoint,
    TcHook, ToOrFromEp,
};

/// ELF section name for a program of the given kind and orientation.
pub fn section_name(kind: EndpointKind, to_or_from: ToOrFromEp) -> String {
    format!("calico_{}_{}_ep", to_or_from.as_str(), kind.as_str())
}

/// Compile flags for a known section name.
///
/// The mapping is fixed; asking for a section that cannot be produced
/// by [`section_name`] is a programmer error.
///
/// # Panics
///
/// Panics on an unknown section name.
pub fn section_flags(section: &str) -> u32 {
    match section {
        "calico_from_workload_ep" => 0,
        "calico_to_workload_ep" => COMPILE_FLAG_INGRESS,
        "calico_from_host_ep" => COMPILE_FLAG_HOST_EP | COMPILE_FLAG_INGRESS,
        "calico_to_host_ep" => COMPILE_FLAG_HOST_EP,
        "calico_from_tunnel_ep" => {
            COMPILE_FLAG_HOST_EP | COMPILE_FLAG_INGRESS | COMPILE_FLAG_TUNNEL
        }
        "calico_to_tunnel_ep" => COMPILE_FLAG_HOST_EP | COMPILE_FLAG_TUNNEL,
        other => panic!("bug: unknown BPF section name {other:?}"),
    }
}

/// Map (endpoint kind, policy direction, interface) to the concrete
/// hook, section, and compile flags.
///
/// Workload policy direction is relative to the workload, so it is
/// flipped for the host-namespace hook; host and tunnel endpoints have
/// the natural relationship.
pub fn calculate_attach_point(
    kind: EndpointKind,
    direction: PolicyDirection,
    iface: &str,
) -> TcAttachPoint {
    let hook = match (kind, direction) {
        (EndpointKind::Workload, PolicyDirection::Ingress) => TcHook::Egress,
        (EndpointKind::Workload, PolicyDirection::Egress) => TcHook::Ingress,
        (_, PolicyDirection::Ingress) => TcHook::Ingress,
        (_, PolicyDirection::Egress) => TcHook::Egress,
    };

    let to_or_from = match hook {
        TcHook::Ingress => ToOrFromEp::From,
        TcHook::Egress => ToOrFromEp::To,
    };

    let section = section_name(kind, to_or_from);
    let compile_flags = section_flags(&section);

    TcAttachPoint {
        iface: iface.to_string(),
        hook,
        section,
        compile_flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Section / flags contract ───────────────────────────────────

    #[test]
    fn section_flags_table() {
        // (kind, to/from, section, flags). This table is a wire-level
        // contract with the program template; do not change it.
        let cases = [
            (EndpointKind::Workload, ToOrFromEp::From, "calico_from_workload_ep", 0),
            (EndpointKind::Workload, ToOrFromEp::To, "calico_to_workload_ep", 2),
            (EndpointKind::Host, ToOrFromEp::From, "calico_from_host_ep", 3),
            (EndpointKind::Host, ToOrFromEp::To, "calico_to_host_ep", 1),
            (EndpointKind::Tunnel, ToOrFromEp::From, "calico_from_tunnel_ep", 7),
            (EndpointKind::Tunnel, ToOrFromEp::To, "calico_to_tunnel_ep", 5),
        ];
        for (kind, to_or_from, section, flags) in cases {
            assert_eq!(section_name(kind, to_or_from), section);
            assert_eq!(section_flags(section), flags, "flags for {section}");
        }
    }

    #[test]
    #[should_panic(expected = "unknown BPF section name")]
    fn unknown_section_is_fatal() {
        section_flags("calico_sideways_ep");
    }

    // ── Hook selection ─────────────────────────────────────────────

    #[test]
    fn workload_hook_is_opposite_of_policy_direction() {
        let ap = calculate_attach_point(EndpointKind::Workload, PolicyDirection::Ingress, "cali1");
        assert_eq!(ap.hook, TcHook::Egress);
        assert_eq!(ap.section, "calico_to_workload_ep");

        let ap = calculate_attach_point(EndpointKind::Workload, PolicyDirection::Egress, "cali1");
        assert_eq!(ap.hook, TcHook::Ingress);
        assert_eq!(ap.section, "calico_from_workload_ep");
        assert_eq!(ap.compile_flags, 0);
    }

    #[test]
    fn host_hook_equals_policy_direction() {
        let ap = calculate_attach_point(EndpointKind::Host, PolicyDirection::Ingress, "eth0");
        assert_eq!(ap.hook, TcHook::Ingress);
        assert_eq!(ap.section, "calico_from_host_ep");
        assert_eq!(ap.compile_flags, COMPILE_FLAG_HOST_EP | COMPILE_FLAG_INGRESS);

        let ap = calculate_attach_point(EndpointKind::Host, PolicyDirection::Egress, "eth0");
        assert_eq!(ap.hook, TcHook::Egress);
        assert_eq!(ap.section, "calico_to_host_ep");
        assert_eq!(ap.compile_flags, COMPILE_FLAG_HOST_EP);
    }

    #[test]
    fn tunnel_hook_equals_policy_direction() {
        let ap = calculate_attach_point(EndpointKind::Tunnel, PolicyDirection::Ingress, "tunl0");
        assert_eq!(ap.hook, TcHook::Ingress);
        assert_eq!(ap.compile_flags, 7);

        let ap = calculate_attach_point(EndpointKind::Tunnel, PolicyDirection::Egress, "tunl0");
        assert_eq!(ap.hook, TcHook::Egress);
        assert_eq!(ap.compile_flags, 5);
    }

    #[test]
    fn attach_point_carries_interface_name() {
        let ap = calculate_attach_point(EndpointKind::Host, PolicyDirection::Ingress, "enp0s3");
        assert_eq!(ap.iface, "enp0s3");
    }
}
