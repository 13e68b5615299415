use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use domain::attach::engine::calculate_attach_point;
use domain::attach::entity::EndpointKind;
use domain::common::entity::PolicyDirection;
use domain::common::error::DomainError;
use domain::iface::entity::{HostInterface, InterfaceState, parse_ipv4};
use domain::policy::entity::{Policy, PolicyId, Profile, ProfileId, Rule, RuleTree};
use domain::policy::extract::extract_rules;
use domain::workload::entity::{WorkloadEndpoint, WorkloadEndpointId};
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::program_port::ProgramPort;
use ports::secondary::sysctl_port::SysctlPort;
use regex::Regex;
use tracing::{debug, info, warn};

/// Static configuration for the endpoint manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Host interfaces matching this pattern are programmed as data
    /// interfaces.
    pub data_iface_regex: Regex,
    /// Interface treated as the IPIP/VXLAN tunnel device.
    pub tunnel_iface: String,
}

/// Owns the dataplane caches, the reverse indices from policies and
/// profiles to the workloads using them, and the dirty sets drained by
/// [`complete_deferred_work`](Self::complete_deferred_work).
///
/// Mutators are cheap and infallible; all kernel programming is
/// deferred to reconciliation. The caches are touched only by the
/// dispatcher task and the reconcile coordinator; workers get owned
/// snapshots at spawn.
pub struct BpfEndpointManager {
    // Caches. Updated immediately.
    workloads: HashMap<WorkloadEndpointId, WorkloadEndpoint>,
    policies: HashMap<PolicyId, Policy>,
    profiles: HashMap<ProfileId, Profile>,
    ifaces: HashMap<String, HostInterface>,

    // Indices.
    policies_to_workloads: HashMap<PolicyId, HashSet<WorkloadEndpointId>>,
    profiles_to_workloads: HashMap<ProfileId, HashSet<WorkloadEndpointId>>,

    dirty_workloads: HashSet<WorkloadEndpointId>,
    dirty_ifaces: HashSet<String>,

    settings: ManagerSettings,
    programs: Arc<dyn ProgramPort>,
    sysctl: Arc<dyn SysctlPort>,
    metrics: Arc<dyn MetricsPort>,
}

impl BpfEndpointManager {
    pub fn new(
        settings: ManagerSettings,
        programs: Arc<dyn ProgramPort>,
        sysctl: Arc<dyn SysctlPort>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            workloads: HashMap::new(),
            policies: HashMap::new(),
            profiles: HashMap::new(),
            ifaces: HashMap::new(),
            policies_to_workloads: HashMap::new(),
            profiles_to_workloads: HashMap::new(),
            dirty_workloads: HashSet::new(),
            dirty_ifaces: HashSet::new(),
            settings,
            programs,
            sysctl,
            metrics,
        }
    }

    // ── Mutators (dispatcher side) ─────────────────────────────────

    /// An `Unknown` state deletes the cache entry; anything else
    /// upserts. Either way the interface is marked dirty.
    pub fn on_interface_state(&mut self, name: &str, state: InterfaceState) {
        if state == InterfaceState::Unknown {
            self.ifaces.remove(name);
        } else {
            self.ifaces.entry(name.to_string()).or_default().state = state;
        }
        self.dirty_ifaces.insert(name.to_string());
    }

    /// Replace the interface's address list wholesale, keeping only
    /// IPv4. A missing address set means "no information" and mutates
    /// nothing.
    pub fn on_interface_addrs(&mut self, name: &str, addrs: Option<&[String]>) {
        let Some(addrs) = addrs else {
            return;
        };
        let parsed: Vec<Ipv4Addr> = addrs.iter().filter_map(|a| parse_ipv4(a)).collect();
        let iface = self.ifaces.entry(name.to_string()).or_default();
        iface.addrs = parsed;
        debug!(iface = name, addrs = ?iface.addrs, state = ?iface.state, "interface addrs update");
        self.dirty_ifaces.insert(name.to_string());
    }

    /// Replace the cached endpoint, moving its reverse-index
    /// memberships from the edges the old version declared to the
    /// edges the new one declares.
    pub fn on_workload_endpoint_update(
        &mut self,
        id: WorkloadEndpointId,
        endpoint: WorkloadEndpoint,
    ) {
        debug!(id = %id, iface = %endpoint.iface_name, "workload endpoint update");
        if let Some(old) = self.workloads.remove(&id) {
            self.detach_indices(&id, &old);
        }

        for pol_id in endpoint.referenced_policies() {
            self.policies_to_workloads
                .entry(pol_id)
                .or_default()
                .insert(id.clone());
        }
        for prof_id in endpoint.referenced_profiles() {
            self.profiles_to_workloads
                .entry(prof_id)
                .or_default()
                .insert(id.clone());
        }

        self.workloads.insert(id.clone(), endpoint);
        self.dirty_workloads.insert(id);
    }

    /// Drop the endpoint and its index memberships. The id stays
    /// dirty so reconciliation gets a chance to clean up.
    pub fn on_workload_endpoint_remove(&mut self, id: &WorkloadEndpointId) {
        debug!(id = %id, "workload endpoint removed");
        if let Some(old) = self.workloads.remove(id) {
            self.detach_indices(id, &old);
        }
        self.dirty_workloads.insert(id.clone());
    }

    pub fn on_active_policy_update(&mut self, id: PolicyId, policy: Policy) {
        debug!(id = %id, "policy update");
        self.policies.insert(id.clone(), policy);
        self.mark_policy_users_dirty(&id);
    }

    /// Marking users dirty here should be a no-op given the ordering
    /// guarantees of the calculation graph.
    pub fn on_active_policy_remove(&mut self, id: &PolicyId) {
        debug!(id = %id, "policy removed");
        self.mark_policy_users_dirty(id);
        self.policies.remove(id);
        self.policies_to_workloads.remove(id);
    }

    pub fn on_active_profile_update(&mut self, id: ProfileId, profile: Profile) {
        debug!(id = %id, "profile update");
        self.profiles.insert(id.clone(), profile);
        self.mark_profile_users_dirty(&id);
    }

    pub fn on_active_profile_remove(&mut self, id: &ProfileId) {
        debug!(id = %id, "profile removed");
        self.mark_profile_users_dirty(id);
        self.profiles.remove(id);
        self.profiles_to_workloads.remove(id);
    }

    fn detach_indices(&mut self, id: &WorkloadEndpointId, endpoint: &WorkloadEndpoint) {
        for pol_id in endpoint.referenced_policies() {
            if let Some(users) = self.policies_to_workloads.get_mut(&pol_id) {
                users.remove(id);
            }
        }
        for prof_id in endpoint.referenced_profiles() {
            if let Some(users) = self.profiles_to_workloads.get_mut(&prof_id) {
                users.remove(id);
            }
        }
    }

    fn mark_policy_users_dirty(&mut self, id: &PolicyId) {
        // Absent entry: we heard about the policy before any endpoint
        // that uses it.
        if let Some(users) = self.policies_to_workloads.get(id) {
            self.dirty_workloads.extend(users.iter().cloned());
        }
    }

    fn mark_profile_users_dirty(&mut self, id: &ProfileId) {
        if let Some(users) = self.profiles_to_workloads.get(id) {
            self.dirty_workloads.extend(users.iter().cloned());
        }
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// Drain both dirty sets: program dirty data interfaces, then
    /// dirty workload endpoints. Per-item work fans out to parallel
    /// workers; items whose worker failed stay dirty and are retried
    /// on the next call.
    pub async fn complete_deferred_work(&mut self) {
        self.apply_programs_to_dirty_data_ifaces().await;
        self.apply_programs_to_dirty_workloads().await;

        // TODO: handle cali interfaces with no WEP

        self.metrics.set_dirty_sizes(
            self.dirty_ifaces.len() as u64,
            self.dirty_workloads.len() as u64,
        );
        self.metrics.set_workloads_cached(self.workloads.len() as u64);
    }

    async fn apply_programs_to_dirty_data_ifaces(&mut self) {
        let dirty = std::mem::take(&mut self.dirty_ifaces);
        let mut candidates: Vec<String> = Vec::new();
        for iface in dirty {
            if !self.settings.data_iface_regex.is_match(&iface) {
                debug!(
                    iface = %iface,
                    "ignoring interface that doesn't match the data interface pattern"
                );
                continue;
            }
            if self.ifaces.get(&iface).map(|i| i.state) != Some(InterfaceState::Up) {
                debug!(iface = %iface, "ignoring interface that is down");
                continue;
            }
            candidates.push(iface);
        }

        let errs: Arc<Mutex<HashMap<String, Option<DomainError>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut handles = Vec::with_capacity(candidates.len());
        for iface in candidates {
            let kind = if iface == self.settings.tunnel_iface {
                EndpointKind::Tunnel
            } else {
                EndpointKind::Host
            };
            let host_ip = self
                .ifaces
                .get(&iface)
                .and_then(|i| i.addrs.first().copied());
            let programs = Arc::clone(&self.programs);
            let sysctl = Arc::clone(&self.sysctl);
            let metrics = Arc::clone(&self.metrics);
            let errs = Arc::clone(&errs);
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                programs.ensure_qdisc(&iface).await;
                let mut result = attach_data_iface_program(
                    &*programs,
                    &*metrics,
                    kind,
                    &iface,
                    host_ip,
                    PolicyDirection::Ingress,
                )
                .await;
                if result.is_ok() {
                    result = attach_data_iface_program(
                        &*programs,
                        &*metrics,
                        kind,
                        &iface,
                        host_ip,
                        PolicyDirection::Egress,
                    )
                    .await;
                }
                if result.is_ok() {
                    // Required to allow NodePort forwarding with
                    // encapsulation where the host IP is the tunnelled
                    // source address.
                    result = sysctl.set_accept_local(&iface, true);
                }
                match &result {
                    Ok(()) => metrics
                        .observe_apply_duration(kind.as_str(), started.elapsed().as_secs_f64()),
                    Err(e) => metrics.record_apply_failure(kind.as_str(), stage_of(e)),
                }
                errs.lock().unwrap().insert(iface, result.err());
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let errs = errs.lock().unwrap().drain().collect::<Vec<_>>();
        for (iface, err) in errs {
            match err {
                None => info!(iface = %iface, "applied program to host interface"),
                Some(e) => {
                    warn!(error = %e, iface = %iface, "failed to apply policy to interface");
                    self.dirty_ifaces.insert(iface);
                }
            }
        }
    }

    async fn apply_programs_to_dirty_workloads(&mut self) {
        let dirty = std::mem::take(&mut self.dirty_workloads);

        let errs: Arc<Mutex<HashMap<WorkloadEndpointId, Option<DomainError>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut handles = Vec::with_capacity(dirty.len());
        for id in dirty {
            let job = self.workload_apply_job(&id);
            let programs = Arc::clone(&self.programs);
            let metrics = Arc::clone(&self.metrics);
            let errs = Arc::clone(&errs);
            handles.push(tokio::spawn(async move {
                let result = match job {
                    None => {
                        // TODO clean up old workloads
                        None
                    }
                    Some(job) => apply_workload_policy(&*programs, &*metrics, &job).await.err(),
                };
                errs.lock().unwrap().insert(id, result);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let errs = errs.lock().unwrap().drain().collect::<Vec<_>>();
        for (id, err) in errs {
            match err {
                None => info!(id = %id, "applied policy to workload"),
                Some(e) => {
                    warn!(error = %e, id = %id, "failed to apply policy to endpoint");
                    self.dirty_workloads.insert(id);
                }
            }
        }
    }

    /// Snapshot everything a workload worker needs, so workers never
    /// touch the caches. `None` means the endpoint is gone and only
    /// cleanup is due.
    fn workload_apply_job(&self, id: &WorkloadEndpointId) -> Option<WorkloadApply> {
        let wep = self.workloads.get(id)?;
        let host_ip = self
            .ifaces
            .get(&wep.iface_name)
            .and_then(|i| i.addrs.first().copied());
        Some(WorkloadApply {
            iface: wep.iface_name.clone(),
            host_ip,
            ingress_rules: extract_rules(
                &wep.tiers,
                &wep.profile_ids,
                PolicyDirection::Ingress,
                &self.policies,
                &self.profiles,
            ),
            egress_rules: extract_rules(
                &wep.tiers,
                &wep.profile_ids,
                PolicyDirection::Egress,
                &self.policies,
                &self.profiles,
            ),
        })
    }

    // ── Read accessors ─────────────────────────────────────────────

    pub fn workload(&self, id: &WorkloadEndpointId) -> Option<&WorkloadEndpoint> {
        self.workloads.get(id)
    }

    pub fn interface(&self, name: &str) -> Option<&HostInterface> {
        self.ifaces.get(name)
    }

    /// Current reverse-index membership for a policy (empty if the
    /// index has no entry).
    pub fn policy_users(&self, id: &PolicyId) -> HashSet<WorkloadEndpointId> {
        self.policies_to_workloads
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn profile_users(&self, id: &ProfileId) -> HashSet<WorkloadEndpointId> {
        self.profiles_to_workloads
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dirty_workloads(&self) -> &HashSet<WorkloadEndpointId> {
        &self.dirty_workloads
    }

    pub fn dirty_ifaces(&self) -> &HashSet<String> {
        &self.dirty_ifaces
    }
}

/// Owned snapshot handed to one workload worker.
struct WorkloadApply {
    iface: String,
    host_ip: Option<Ipv4Addr>,
    ingress_rules: RuleTree,
    egress_rules: RuleTree,
}

async fn apply_workload_policy(
    programs: &dyn ProgramPort,
    metrics: &dyn MetricsPort,
    job: &WorkloadApply,
) -> Result<(), DomainError> {
    let started = Instant::now();
    programs.ensure_qdisc(&job.iface).await;

    let ingress_ap =
        calculate_attach_point(EndpointKind::Workload, PolicyDirection::Ingress, &job.iface);
    let egress_ap =
        calculate_attach_point(EndpointKind::Workload, PolicyDirection::Egress, &job.iface);

    let (ingress_res, egress_res) = tokio::join!(
        programs.compile_and_attach(&job.ingress_rules, &ingress_ap, job.host_ip),
        programs.compile_and_attach(&job.egress_rules, &egress_ap, job.host_ip),
    );
    if let Err(e) = ingress_res {
        metrics.record_apply_failure("workload", stage_of(&e));
        return Err(e);
    }
    if let Err(e) = egress_res {
        metrics.record_apply_failure("workload", stage_of(&e));
        return Err(e);
    }

    metrics.record_attach(&ingress_ap.section);
    metrics.record_attach(&egress_ap.section);
    metrics.observe_apply_duration("workload", started.elapsed().as_secs_f64());
    info!(
        time_taken = ?started.elapsed(),
        iface = %job.iface,
        "finished applying BPF programs for workload"
    );
    Ok(())
}

async fn attach_data_iface_program(
    programs: &dyn ProgramPort,
    metrics: &dyn MetricsPort,
    kind: EndpointKind,
    iface: &str,
    host_ip: Option<Ipv4Addr>,
    direction: PolicyDirection,
) -> Result<(), DomainError> {
    // Host interfaces get a single unconditional allow; policy is
    // enforced at the workload hooks.
    let rules: RuleTree = vec![vec![vec![Rule::allow()]]];
    let ap = calculate_attach_point(kind, direction, iface);
    programs.compile_and_attach(&rules, &ap, host_ip).await?;
    metrics.record_attach(&ap.section);
    Ok(())
}

fn stage_of(err: &DomainError) -> &'static str {
    match err {
        DomainError::Compile(_) => "compile",
        DomainError::Attach { .. } => "attach",
        DomainError::Codegen(_) => "codegen",
        DomainError::Sysctl { .. } => "sysctl",
    }
}
