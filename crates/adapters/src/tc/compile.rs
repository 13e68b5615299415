use std::fmt::Display;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use domain::common::error::DomainError;
use domain::policy::entity::RuleTree;
use ports::secondary::codegen_port::ProgramCodegen;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Options for one clang/llc invocation. Every policy knob becomes a
/// `-D` or path argument on the clang command line.
#[derive(Debug, Clone)]
pub struct CompileOpts {
    extra_args: Vec<String>,
    dir: PathBuf,
    out_file: PathBuf,
    bpftool: bool,
}

impl CompileOpts {
    pub fn new(dir: impl Into<PathBuf>, out_file: impl Into<PathBuf>) -> Self {
        Self {
            extra_args: Vec::new(),
            dir: dir.into(),
            out_file: out_file.into(),
            bpftool: false,
        }
    }

    #[must_use]
    pub fn with_define(mut self, name: &str) -> Self {
        self.extra_args.push(format!("-D{name}"));
        self
    }

    #[must_use]
    pub fn with_define_value(mut self, name: &str, value: impl Display) -> Self {
        self.extra_args.push(format!("-D{name}={value}"));
        self
    }

    /// Whether the program may use FIB lookup for forwarding.
    #[must_use]
    pub fn with_fib_enabled(self, enabled: bool) -> Self {
        self.with_define_value("CALI_FIB_LOOKUP_ENABLED", enabled)
    }

    /// Log level compiled into the program; empty means `OFF`.
    #[must_use]
    pub fn with_log_level(self, level: &str) -> Self {
        let level = if level.is_empty() {
            "OFF".to_string()
        } else {
            level.to_uppercase()
        };
        self.with_define_value("CALI_LOG_LEVEL", format!("CALI_LOG_LEVEL_{level}"))
    }

    #[must_use]
    pub fn with_log_prefix(self, prefix: &str) -> Self {
        self.with_define_value("CALI_LOG_PFX", prefix)
    }

    /// Whether workload-to-host traffic is dropped.
    #[must_use]
    pub fn with_endpoint_to_host_drop(self, drop: bool) -> Self {
        self.with_define_value("CALI_DROP_WORKLOAD_TO_HOST", drop)
    }

    #[must_use]
    pub fn with_nat_tunnel_mtu(self, mtu: u16) -> Self {
        self.with_define_value("CALI_NAT_TUNNEL_MTU", mtu)
    }

    /// Name of the entrypoint section the template emits.
    #[must_use]
    pub fn with_entrypoint(self, name: &str) -> Self {
        self.with_define_value("CALI_ENTRYPOINT_NAME", name)
    }

    #[must_use]
    pub fn with_flags(self, flags: u32) -> Self {
        self.with_define_value("CALI_COMPILE_FLAGS", flags)
    }

    /// Host IPv4 address, packed little-endian so the program compares
    /// it against addresses straight out of the packet.
    #[must_use]
    pub fn with_host_ip(self, ip: Ipv4Addr) -> Self {
        let o = ip.octets();
        self.with_define_value(
            "CALI_HOST_IP",
            format!("0x{:02x}{:02x}{:02x}{:02x}", o[3], o[2], o[1], o[0]),
        )
    }

    /// VXLAN port override for the IANA default.
    #[must_use]
    pub fn with_vxlan_port(self, port: u16) -> Self {
        self.with_define_value("CALI_VXLAN_PORT", port)
    }

    #[must_use]
    pub fn with_include_path(mut self, path: &Path) -> Self {
        self.extra_args.push(format!("-I{}", path.display()));
        self
    }

    /// Make the object loadable by bpftool rather than iproute2 only.
    #[must_use]
    pub fn with_bpftool_loader(mut self) -> Self {
        self.bpftool = true;
        self
    }

    pub fn out_file(&self) -> &Path {
        &self.out_file
    }

    fn clang_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-x".to_string(),
            "c".to_string(),
            "-D__KERNEL__".to_string(),
            "-D__ASM_SYSREG_H".to_string(),
        ];
        if self.bpftool {
            args.push("-D__BPFTOOL_LOADER__".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(format!("-I{}", self.dir.display()));
        args.extend(
            [
                "-Wno-unused-value",
                "-Wno-pointer-sign",
                "-Wno-compare-distinct-pointer-types",
                "-Wunused",
                "-Wall",
                "-Werror",
                "-fno-stack-protector",
                "-O2",
                "-emit-llvm",
                "-c",
                "-",
                "-o",
                "-",
            ]
            .map(String::from),
        );
        args
    }
}

/// Compile the rule tree into a BPF object file.
///
/// Streams generated C source into clang on stdin and pipes clang's
/// bitcode output straight into llc, which writes the object to
/// `opts.out_file()`. Stderr is drained concurrently with the source
/// write: a full pipe buffer on a large program would otherwise
/// deadlock the compiler.
pub async fn compile_program(
    codegen: &dyn ProgramCodegen,
    rules: &RuleTree,
    opts: &CompileOpts,
) -> Result<(), DomainError> {
    let args = opts.clang_args();
    debug!(args = ?args, "about to run clang");

    let mut clang = Command::new("clang")
        .args(&args)
        .current_dir(&opts.dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DomainError::Compile(format!("failed to spawn clang: {e}")))?;

    let mut clang_stdin = clang.stdin.take().expect("clang stdin was piped");
    let clang_stdout = clang.stdout.take().expect("clang stdout was piped");
    let clang_stderr = clang.stderr.take().expect("clang stderr was piped");

    info!(program = "clang", "compiling bpf");

    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(clang_stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(line = %line, "clang stderr");
        }
    });

    // llc reads clang's stdout directly; hand it the fd.
    let clang_stdout_fd = clang_stdout
        .into_owned_fd()
        .map_err(|e| DomainError::Compile(format!("failed to take clang stdout: {e}")))?;
    let llc = Command::new("llc")
        .args(["-march=bpf", "-filetype=obj", "-o"])
        .arg(opts.out_file())
        .stdin(Stdio::from(clang_stdout_fd))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DomainError::Compile(format!("failed to spawn llc: {e}")))?;

    let mut source = Vec::new();
    codegen.write_program(rules, &mut source)?;
    clang_stdin
        .write_all(&source)
        .await
        .map_err(|e| DomainError::Compile(format!("failed to write source to clang: {e}")))?;
    // Close stdin so clang sees EOF.
    drop(clang_stdin);

    let llc_out = llc
        .wait_with_output()
        .await
        .map_err(|e| DomainError::Compile(format!("failed to wait for llc: {e}")))?;
    if !llc_out.status.success() {
        let out = String::from_utf8_lossy(&llc_out.stderr);
        error!(out = %out, "failed to compile C program (llc step)");
        return Err(DomainError::Compile(format!(
            "llc exited with {}: {out}",
            llc_out.status
        )));
    }

    let clang_status = clang
        .wait()
        .await
        .map_err(|e| DomainError::Compile(format!("failed to wait for clang: {e}")))?;
    let _ = stderr_task.await;
    if !clang_status.success() {
        error!(status = %clang_status, "clang failed");
        return Err(DomainError::Compile(format!(
            "clang exited with {clang_status}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Argument construction ──────────────────────────────────────

    #[test]
    fn clang_args_skeleton() {
        let opts = CompileOpts::new("/code/bpf", "/tmp/out.o");
        let args = opts.clang_args();
        assert_eq!(args[..4], ["-x", "c", "-D__KERNEL__", "-D__ASM_SYSREG_H"]);
        assert!(args.contains(&"-I/code/bpf".to_string()));
        assert_eq!(args[args.len() - 4..], ["-c", "-", "-o", "-"]);
        assert!(args.contains(&"-Werror".to_string()));
        assert!(args.contains(&"-emit-llvm".to_string()));
        assert!(!args.iter().any(|a| a == "-D__BPFTOOL_LOADER__"));
    }

    #[test]
    fn bpftool_loader_define_comes_before_extras() {
        let opts = CompileOpts::new("/code/bpf", "/tmp/out.o")
            .with_bpftool_loader()
            .with_flags(3);
        let args = opts.clang_args();
        let loader = args.iter().position(|a| a == "-D__BPFTOOL_LOADER__").unwrap();
        let flags = args
            .iter()
            .position(|a| a == "-DCALI_COMPILE_FLAGS=3")
            .unwrap();
        assert!(loader < flags);
    }

    #[test]
    fn policy_knobs_become_defines() {
        let opts = CompileOpts::new("/code/bpf", "/tmp/out.o")
            .with_fib_enabled(true)
            .with_log_level("debug")
            .with_log_prefix("eth0")
            .with_endpoint_to_host_drop(false)
            .with_nat_tunnel_mtu(1440)
            .with_entrypoint("calico_from_host_ep")
            .with_flags(3)
            .with_vxlan_port(4790);
        let args = opts.clang_args();
        for expected in [
            "-DCALI_FIB_LOOKUP_ENABLED=true",
            "-DCALI_LOG_LEVEL=CALI_LOG_LEVEL_DEBUG",
            "-DCALI_LOG_PFX=eth0",
            "-DCALI_DROP_WORKLOAD_TO_HOST=false",
            "-DCALI_NAT_TUNNEL_MTU=1440",
            "-DCALI_ENTRYPOINT_NAME=calico_from_host_ep",
            "-DCALI_COMPILE_FLAGS=3",
            "-DCALI_VXLAN_PORT=4790",
        ] {
            assert!(args.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn empty_log_level_maps_to_off() {
        let opts = CompileOpts::new("/d", "/o").with_log_level("");
        assert!(
            opts.clang_args()
                .contains(&"-DCALI_LOG_LEVEL=CALI_LOG_LEVEL_OFF".to_string())
        );
    }

    #[test]
    fn host_ip_is_little_endian_hex() {
        let opts = CompileOpts::new("/d", "/o").with_host_ip(Ipv4Addr::new(10, 2, 3, 4));
        assert!(
            opts.clang_args()
                .contains(&"-DCALI_HOST_IP=0x0403020a".to_string())
        );

        let opts = CompileOpts::new("/d", "/o").with_host_ip(Ipv4Addr::new(192, 168, 0, 1));
        assert!(
            opts.clang_args()
                .contains(&"-DCALI_HOST_IP=0x0100a8c0".to_string())
        );
    }

    #[test]
    fn include_paths_are_appended() {
        let opts =
            CompileOpts::new("/d", "/o").with_include_path(Path::new("/usr/include/bpf"));
        assert!(opts.clang_args().contains(&"-I/usr/include/bpf".to_string()));
    }
}
