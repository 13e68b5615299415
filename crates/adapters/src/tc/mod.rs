mod attach;
mod compile;

pub use attach::attach_program;
pub use compile::{CompileOpts, compile_program};

use std::future::Future;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use domain::attach::entity::TcAttachPoint;
use domain::common::error::DomainError;
use domain::policy::entity::RuleTree;
use ports::secondary::codegen_port::ProgramCodegen;
use ports::secondary::program_port::ProgramPort;
use tokio::process::Command;
use tracing::error;

/// Make sure a clsact qdisc is present on the interface.
///
/// Deletes then re-adds the qdisc; both invocations are best-effort
/// and a failure here surfaces when the filter is added.
// TODO: avoid flapping the qdisc and the attached program on reapply.
pub async fn ensure_qdisc(iface: &str) {
    let _ = Command::new("tc")
        .args(["qdisc", "del", "dev", iface, "clsact"])
        .output()
        .await;
    let _ = Command::new("tc")
        .args(["qdisc", "add", "dev", iface, "clsact"])
        .output()
        .await;
}

/// Static knobs for the compile/attach pipeline, resolved from config
/// at startup.
#[derive(Debug, Clone)]
pub struct TcSettings {
    /// Log level compiled into the programs; empty means off.
    pub bpf_log_level: String,
    /// Prefix for in-program log lines; the interface name is appended.
    pub log_prefix: String,
    pub fib_lookup_enabled: bool,
    pub ep_to_host_drop: bool,
    pub nat_tunnel_mtu: u16,
    pub vxlan_port: Option<u16>,
    /// Directory holding the C template; also the compile working dir.
    pub template_dir: PathBuf,
    pub include_paths: Vec<PathBuf>,
    /// Root of the pinned-map filesystem swept after each attach.
    pub bpf_fs_path: PathBuf,
    pub bpftool_loader: bool,
}

/// Drives the external clang/llc/tc toolchain to program interfaces.
pub struct TcProgramDriver {
    codegen: Arc<dyn ProgramCodegen>,
    settings: TcSettings,
}

impl TcProgramDriver {
    pub fn new(codegen: Arc<dyn ProgramCodegen>, settings: TcSettings) -> Self {
        Self { codegen, settings }
    }

    fn compile_opts(
        &self,
        attach_point: &TcAttachPoint,
        host_ip: Option<Ipv4Addr>,
        out_file: PathBuf,
    ) -> CompileOpts {
        let mut opts = CompileOpts::new(&self.settings.template_dir, out_file)
            .with_fib_enabled(self.settings.fib_lookup_enabled)
            .with_log_level(&self.settings.bpf_log_level)
            .with_log_prefix(&format!(
                "{}{}",
                self.settings.log_prefix, attach_point.iface
            ))
            .with_endpoint_to_host_drop(self.settings.ep_to_host_drop)
            .with_nat_tunnel_mtu(self.settings.nat_tunnel_mtu)
            .with_entrypoint(&attach_point.section)
            .with_flags(attach_point.compile_flags);
        if let Some(ip) = host_ip {
            opts = opts.with_host_ip(ip);
        }
        if let Some(port) = self.settings.vxlan_port {
            opts = opts.with_vxlan_port(port);
        }
        for path in &self.settings.include_paths {
            opts = opts.with_include_path(path);
        }
        if self.settings.bpftool_loader {
            opts = opts.with_bpftool_loader();
        }
        opts
    }
}

impl ProgramPort for TcProgramDriver {
    fn ensure_qdisc<'a>(
        &'a self,
        iface: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(ensure_qdisc(iface))
    }

    fn compile_and_attach<'a>(
        &'a self,
        rules: &'a RuleTree,
        attach_point: &'a TcAttachPoint,
        host_ip: Option<Ipv4Addr>,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
        Box::pin(async move {
            // Scoped compile dir; removed on drop whichever way we
            // leave this function.
            let temp_dir = tempfile::tempdir()
                .unwrap_or_else(|e| panic!("failed to make temporary directory: {e}"));
            let obj_file = temp_dir.path().join("redir_tc.o");

            let opts = self.compile_opts(attach_point, host_ip, obj_file.clone());
            compile_program(self.codegen.as_ref(), rules, &opts).await?;

            match attach_program(&obj_file, attach_point, &self.settings.bpf_fs_path).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    // Dump the generated source for debugging.
                    let mut buf = Vec::new();
                    match self.codegen.write_program(rules, &mut buf) {
                        Ok(()) => error!(
                            program = %String::from_utf8_lossy(&buf),
                            iface = %attach_point.iface,
                            section = %attach_point.section,
                            "dump of program that failed to attach"
                        ),
                        Err(gen_err) => error!(
                            error = %gen_err,
                            "failed to regenerate program for dump"
                        ),
                    }
                    Err(e)
                }
            }
        })
    }
}
