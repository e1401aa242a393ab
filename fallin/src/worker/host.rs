//! Host capability probe reported at registration

use serde_json::{Value, json};
use sysinfo::System;
use tracing::debug;

/// Descriptors a worker sends with its registration
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    /// Host name and OS
    pub machine: String,
    /// `[physical cores, cpu MHz, free memory bytes]`
    pub hardware: Vec<Value>,
}

impl HostInfo {
    pub fn probe() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let host = System::host_name().unwrap_or_else(|| "unknown".to_string());
        let os = System::long_os_version().unwrap_or_else(|| "unknown OS".to_string());
        let cores = system.physical_core_count().unwrap_or_else(|| system.cpus().len());
        let mhz = system.cpus().iter().map(|cpu| cpu.frequency()).max().unwrap_or(0);
        let free = system.free_memory();

        debug!(%host, cores, mhz, free, "HostInfo::probe: called");
        Self {
            machine: format!("{} ({})", host, os),
            hardware: vec![json!(cores), json!(mhz), json!(free)],
        }
    }
}
