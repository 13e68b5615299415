use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("BPF program compile failed: {0}")]
    Compile(String),

    #[error("BPF program attach failed on {iface}: {reason}")]
    Attach { iface: String, reason: String },

    #[error("code generation failed: {0}")]
    Codegen(String),

    #[error("sysctl write failed for {path}: {reason}")]
    Sysctl { path: String, reason: String },
}
