use std::time::Duration;

// ── Paths ──────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bpfplane/config.yaml";
pub const DEFAULT_UPDATE_SOCKET: &str = "/var/run/bpfplane/updates.sock";

/// Root of the pinned-map filesystem that tc uses for our programs.
pub const DEFAULT_BPF_FS_PATH: &str = "/sys/fs/bpf/tc";

/// Directory holding the BPF C template.
pub const DEFAULT_TEMPLATE_DIR: &str = "/usr/local/lib/bpfplane/bpf";

/// Template source file within the template directory.
pub const TEMPLATE_SOURCE_FILE: &str = "redir_tc.c";

/// Environment variable prefixing in-program log lines.
pub const BPF_LOG_PREFIX_ENV: &str = "BPF_LOG_PFX";

// ── Network defaults ───────────────────────────────────────────────

pub const DEFAULT_METRICS_PORT: u16 = 9090;

// ── Channel capacities ─────────────────────────────────────────────

pub const UPDATE_CHANNEL_CAPACITY: usize = 10_000;

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
