use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adapters::codegen::TemplateCodegen;
use adapters::http::run_metrics_server;
use adapters::sysctl::ProcSysctl;
use adapters::tc::{TcProgramDriver, TcSettings};
use application::endpoint_manager::{BpfEndpointManager, ManagerSettings};
use application::update_dispatcher::{DataplaneUpdate, UpdateDispatcher};
use domain::idalloc::IdAllocator;
use infrastructure::config::AgentConfig;
use infrastructure::constants::{
    BPF_LOG_PREFIX_ENV, GRACEFUL_SHUTDOWN_TIMEOUT, TEMPLATE_SOURCE_FILE, UPDATE_CHANNEL_CAPACITY,
};
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::program_port::ProgramPort;
use ports::secondary::sysctl_port::SysctlPort;
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::Cli;

/// Run the agent startup sequence and block until shutdown.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over the config file.
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "bpfplane",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        "bpfplane agent starting"
    );

    // ── 3. Initialize metrics ───────────────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());

    // ── 4. Build the compile/attach driver ──────────────────────────
    let template_dir = PathBuf::from(&config.bpf.template_dir);
    let ip_set_ids = Arc::new(Mutex::new(IdAllocator::new()));
    let codegen = Arc::new(TemplateCodegen::new(
        template_dir.join(TEMPLATE_SOURCE_FILE),
        Arc::clone(&ip_set_ids),
    ));
    let tc_settings = TcSettings {
        bpf_log_level: config.bpf.log_level.clone(),
        log_prefix: std::env::var(BPF_LOG_PREFIX_ENV).unwrap_or_default(),
        fib_lookup_enabled: config.bpf.fib_lookup_enabled,
        ep_to_host_drop: config.bpf.ep_to_host_drop,
        nat_tunnel_mtu: config.bpf.nat_tunnel_mtu,
        vxlan_port: config.bpf.vxlan_port,
        template_dir,
        include_paths: config.bpf.include_paths.iter().map(PathBuf::from).collect(),
        bpf_fs_path: PathBuf::from(&config.bpf.bpf_fs_path),
        bpftool_loader: config.bpf.bpftool_loader,
    };
    let programs: Arc<dyn ProgramPort> = Arc::new(TcProgramDriver::new(codegen, tc_settings));

    // ── 5. Build the endpoint manager and dispatcher ────────────────
    let manager = BpfEndpointManager::new(
        ManagerSettings {
            data_iface_regex: config.data_iface_regex()?,
            tunnel_iface: config.bpf.tunnel_iface.clone(),
        },
        programs,
        Arc::new(ProcSysctl) as Arc<dyn SysctlPort>,
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
    );
    let dispatcher = UpdateDispatcher::new(
        manager,
        Duration::from_secs(config.agent.resync_interval_secs),
    );
    info!(
        data_iface_pattern = %config.bpf.data_iface_pattern,
        tunnel_iface = %config.bpf.tunnel_iface,
        resync_interval_secs = config.agent.resync_interval_secs,
        "endpoint manager initialized"
    );

    // ── 6. Create cancellation token ────────────────────────────────
    let cancel_token = crate::shutdown::create_shutdown_token();

    // ── 7. Spawn metrics server ─────────────────────────────────────
    let metrics_bind = config.agent.bind_address.clone();
    let metrics_port = config.agent.metrics_port;
    let metrics_for_server = Arc::clone(&metrics);
    let metrics_shutdown = cancel_token.clone();
    let metrics_handle = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(
            metrics_for_server,
            &metrics_bind,
            metrics_port,
            metrics_shutdown.cancelled_owned(),
        )
        .await
        {
            tracing::error!(error = %e, "metrics server failed");
        }
    });

    // ── 8. Spawn the update feed and the dispatcher ─────────────────
    let (update_tx, update_rx) = mpsc::channel::<DataplaneUpdate>(UPDATE_CHANNEL_CAPACITY);
    let feed_handle = tokio::spawn(crate::feed::run_update_feed(
        PathBuf::from(&config.agent.update_socket),
        update_tx,
        cancel_token.clone(),
    ));

    let dispatcher_cancel = cancel_token.clone();
    let dispatcher_handle = tokio::spawn(dispatcher.run(update_rx, dispatcher_cancel));

    // ── 9. Ready — wait for cancellation ────────────────────────────
    info!("agent ready, waiting for shutdown signal");
    cancel_token.cancelled().await;

    // ── 10. Ordered shutdown sequence ───────────────────────────────
    info!("shutdown phase 1: stopping update feed");
    let _ = tokio::time::timeout(Duration::from_secs(1), feed_handle).await;

    info!("shutdown phase 2: draining dispatcher");
    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, dispatcher_handle).await;

    info!("shutdown phase 3: stopping metrics server");
    let _ = tokio::time::timeout(Duration::from_secs(1), metrics_handle).await;

    info!("agent stopped");
    Ok(())
}
