// src/core/collector/host.rs

//! Host-level resource sampling via `sysinfo`.

use crate::core::model::{DiskMetrics, HostMetrics, NetMetrics};
use chrono::Utc;
use sysinfo::{Disks, Networks, System};

/// Holds the long-lived `sysinfo` handles a coordinator keeps across ticks —
/// several of its counters (cpu usage, network deltas) are only meaningful
/// when refreshed repeatedly against the same instance.
pub struct HostCollector {
    system: System,
    disks: Disks,
    networks: Networks,
}

impl HostCollector {
    pub fn new() -> Self {
        HostCollector {
            system: System::new_all(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn sample_host(&mut self) -> HostMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        let load = System::load_average();
        HostMetrics {
            ts: Utc::now(),
            cpu_percent: self.system.global_cpu_usage() as f64,
            memory_percent: if self.system.total_memory() > 0 {
                self.system.used_memory() as f64 / self.system.total_memory() as f64 * 100.0
            } else {
                0.0
            },
            memory_used_bytes: self.system.used_memory(),
            memory_total_bytes: self.system.total_memory(),
            swap_percent: if self.system.total_swap() > 0 {
                self.system.used_swap() as f64 / self.system.total_swap() as f64 * 100.0
            } else {
                0.0
            },
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
        }
    }

    pub fn sample_disks(&mut self) -> Vec<DiskMetrics> {
        self.disks.refresh(true);
        let now = Utc::now();
        self.disks
            .list()
            .iter()
            .map(|d| {
                let total = d.total_space();
                let available = d.available_space();
                let used = total.saturating_sub(available);
                DiskMetrics {
                    ts: now,
                    mountpoint: d.mount_point().to_string_lossy().to_string(),
                    disk_percent: if total > 0 { used as f64 / total as f64 * 100.0 } else { 0.0 },
                    used_bytes: used,
                    total_bytes: total,
                }
            })
            .collect()
    }

    pub fn sample_networks(&mut self) -> Vec<NetMetrics> {
        self.networks.refresh(true);
        let now = Utc::now();
        self.networks
            .iter()
            .map(|(name, data)| NetMetrics {
                ts: now,
                interface: name.clone(),
                rx_bytes: data.total_received(),
                tx_bytes: data.total_transmitted(),
            })
            .collect()
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}
