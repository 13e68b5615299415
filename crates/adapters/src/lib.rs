#![deny(unsafe_code)]

pub mod codegen;
pub mod http;
pub mod sysctl;
pub mod tc;
