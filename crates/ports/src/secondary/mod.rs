pub mod codegen_port;
pub mod metrics_port;
pub mod program_port;
pub mod sysctl_port;
