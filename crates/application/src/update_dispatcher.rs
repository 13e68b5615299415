use std::time::Duration;

use domain::iface::entity::InterfaceState;
use domain::policy::entity::{Policy, PolicyId, Profile, ProfileId};
use domain::workload::entity::{WorkloadEndpoint, WorkloadEndpointId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::endpoint_manager::BpfEndpointManager;

/// Updates consumed by the dispatcher: the tagged union of upstream
/// calculation-graph messages. Variants the feed cannot parse never
/// reach the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataplaneUpdate {
    InterfaceState {
        name: String,
        state: InterfaceState,
    },
    InterfaceAddrs {
        name: String,
        addrs: Option<Vec<String>>,
    },
    WorkloadEndpointUpdate {
        id: WorkloadEndpointId,
        endpoint: WorkloadEndpoint,
    },
    WorkloadEndpointRemove {
        id: WorkloadEndpointId,
    },
    ActivePolicyUpdate {
        id: PolicyId,
        policy: Policy,
    },
    ActivePolicyRemove {
        id: PolicyId,
    },
    ActiveProfileUpdate {
        id: ProfileId,
        profile: Profile,
    },
    ActiveProfileRemove {
        id: ProfileId,
    },
}

/// Serial front-end to the endpoint manager.
///
/// Applies updates to the caches in arrival order and defers the
/// expensive work: after draining whatever is queued it runs one
/// reconcile pass, and a periodic resync tick retries items an earlier
/// pass left dirty.
pub struct UpdateDispatcher {
    manager: BpfEndpointManager,
    resync_interval: Duration,
}

impl UpdateDispatcher {
    pub fn new(manager: BpfEndpointManager, resync_interval: Duration) -> Self {
        Self {
            manager,
            resync_interval,
        }
    }

    /// Route one update to the matching cache mutator. No kernel work
    /// happens here.
    pub fn dispatch(&mut self, update: DataplaneUpdate) {
        match update {
            DataplaneUpdate::InterfaceState { name, state } => {
                self.manager.on_interface_state(&name, state);
            }
            DataplaneUpdate::InterfaceAddrs { name, addrs } => {
                self.manager.on_interface_addrs(&name, addrs.as_deref());
            }
            DataplaneUpdate::WorkloadEndpointUpdate { id, endpoint } => {
                self.manager.on_workload_endpoint_update(id, endpoint);
            }
            DataplaneUpdate::WorkloadEndpointRemove { id } => {
                self.manager.on_workload_endpoint_remove(&id);
            }
            DataplaneUpdate::ActivePolicyUpdate { id, policy } => {
                self.manager.on_active_policy_update(id, policy);
            }
            DataplaneUpdate::ActivePolicyRemove { id } => {
                self.manager.on_active_policy_remove(&id);
            }
            DataplaneUpdate::ActiveProfileUpdate { id, profile } => {
                self.manager.on_active_profile_update(id, profile);
            }
            DataplaneUpdate::ActiveProfileRemove { id } => {
                self.manager.on_active_profile_remove(&id);
            }
        }
    }

    /// Main loop. Consumes updates until the channel closes or the
    /// token fires, reconciling after each drained batch. Returns the
    /// manager so callers can inspect or tear down its state.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<DataplaneUpdate>,
        cancel_token: CancellationToken,
    ) -> BpfEndpointManager {
        // First retry tick one full interval out; a fresh manager has
        // nothing to retry.
        let mut resync = tokio::time::interval_at(
            tokio::time::Instant::now() + self.resync_interval,
            self.resync_interval,
        );
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut count: u64 = 0;

        loop {
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => {
                    // Apply whatever is already queued so the caches
                    // are consistent, but skip the final reconcile.
                    while let Ok(update) = rx.try_recv() {
                        count += 1;
                        self.dispatch(update);
                    }
                    break;
                }
                _ = resync.tick() => {
                    self.manager.complete_deferred_work().await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(update) => {
                            count += 1;
                            self.dispatch(update);
                            // Batch: drain everything already queued
                            // before paying for a reconcile.
                            while let Ok(update) = rx.try_recv() {
                                count += 1;
                                self.dispatch(update);
                            }
                            self.manager.complete_deferred_work().await;
                        }
                        None => break, // channel closed
                    }
                }
            }
        }

        info!(total_updates = count, "update dispatcher stopped");
        self.manager
    }

    pub fn manager(&self) -> &BpfEndpointManager {
        &self.manager
    }
}
