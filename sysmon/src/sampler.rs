use crate::lock_utils::lock;
use crate::metrics::{MetricSample, NetworkCounters, NetworkThroughput, Reading};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{DiskExt, NetworkExt, NetworksExt, ProcessorExt, System, SystemExt};

pub const DEFAULT_CPU_INTERVAL: Duration = Duration::from_secs(2);

#[cfg(windows)]
const ROOT_MOUNT: &str = "C:\\";
#[cfg(not(windows))]
const ROOT_MOUNT: &str = "/";

/// Raw OS readings. `None` means the value could not be read.
pub trait MetricSource: Send {
    /// Average utilization over `interval`. Blocks the caller for that long.
    fn cpu_percent(&mut self, interval: Duration) -> Option<f64>;
    fn memory_percent(&mut self) -> Option<f64>;
    fn disk_percent(&mut self) -> Option<f64>;
    fn network_counters(&mut self) -> Option<NetworkCounters>;
}

/// `sysinfo`-backed source reading the local host.
pub struct SysinfoSource {
    system: System,
    disk_mount: PathBuf,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self::with_disk_mount(ROOT_MOUNT)
    }

    pub fn with_disk_mount(mount: impl AsRef<Path>) -> Self {
        let mut system = System::new();
        system.refresh_disks_list();
        system.refresh_networks_list();
        Self {
            system,
            disk_mount: mount.as_ref().to_path_buf(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SysinfoSource {
    fn cpu_percent(&mut self, interval: Duration) -> Option<f64> {
        self.system.refresh_cpu();
        thread::sleep(interval);
        self.system.refresh_cpu();
        if self.system.processors().is_empty() {
            return None;
        }
        Some(f64::from(self.system.global_processor_info().cpu_usage()))
    }

    fn memory_percent(&mut self) -> Option<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(self.system.used_memory() as f64 / total as f64 * 100.0)
    }

    fn disk_percent(&mut self) -> Option<f64> {
        self.system.refresh_disks();
        let disk = self
            .system
            .disks()
            .iter()
            .find(|d| d.mount_point() == self.disk_mount.as_path())?;
        let total = disk.total_space();
        if total == 0 {
            return None;
        }
        let used = total.saturating_sub(disk.available_space());
        Some(used as f64 / total as f64 * 100.0)
    }

    fn network_counters(&mut self) -> Option<NetworkCounters> {
        self.system.refresh_networks();
        let networks = self.system.networks();
        if networks.iter().next().is_none() {
            return None;
        }
        Some(networks.iter().fold(NetworkCounters::default(), |acc, (_, data)| NetworkCounters {
            sent_bytes: acc.sent_bytes.saturating_add(data.total_transmitted()),
            recv_bytes: acc.recv_bytes.saturating_add(data.total_received()),
        }))
    }
}

/// Last counter reading, used to turn cumulative byte counts into rates.
#[derive(Debug, Clone, Default)]
pub struct NetworkCounterState {
    last: Option<(NetworkCounters, Instant)>,
}

impl NetworkCounterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_counters(&self) -> Option<NetworkCounters> {
        self.last.map(|(counters, _)| counters)
    }

    /// Record `counters` read at `now` and return the rate since the previous reading.
    ///
    /// The first reading, a zero elapsed time, and counters that went backwards
    /// all produce a rate of zero.
    pub fn advance(&mut self, counters: NetworkCounters, now: Instant) -> NetworkThroughput {
        let previous = self.last.replace((counters, now));
        let Some((last, at)) = previous else {
            return NetworkThroughput::idle();
        };
        let elapsed = now.saturating_duration_since(at).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return NetworkThroughput::idle();
        }
        NetworkThroughput {
            sent_bytes_per_sec: Reading::Available(
                counters.sent_bytes.saturating_sub(last.sent_bytes) as f64 / elapsed,
            ),
            recv_bytes_per_sec: Reading::Available(
                counters.recv_bytes.saturating_sub(last.recv_bytes) as f64 / elapsed,
            ),
        }
    }
}

struct SamplerState {
    source: Box<dyn MetricSource>,
    network: NetworkCounterState,
}

/// Produces [`MetricSample`]s from a [`MetricSource`].
///
/// Calls to [`MetricSampler::sample`] are serialized, so the network counter
/// state is never read and written by two samples at once.
pub struct MetricSampler {
    state: Mutex<SamplerState>,
    cpu_interval: Duration,
}

impl MetricSampler {
    pub fn new(source: Box<dyn MetricSource>, cpu_interval: Duration) -> Self {
        Self {
            state: Mutex::new(SamplerState {
                source,
                network: NetworkCounterState::new(),
            }),
            cpu_interval,
        }
    }

    /// Sampler reading the local host through `sysinfo`.
    pub fn system(cpu_interval: Duration) -> Self {
        Self::new(Box::new(SysinfoSource::new()), cpu_interval)
    }

    /// Take one sample. Blocks for the CPU averaging interval.
    pub fn sample(&self) -> MetricSample {
        let mut state = lock(&self.state);
        let SamplerState { source, network } = &mut *state;

        let cpu_percent = Reading::percent(source.cpu_percent(self.cpu_interval));
        let memory_percent = Reading::percent(source.memory_percent());
        let disk_percent = Reading::percent(source.disk_percent());
        let throughput = match source.network_counters() {
            Some(counters) => network.advance(counters, Instant::now()),
            None => NetworkThroughput::unavailable(),
        };

        for (name, reading) in [
            ("cpu", cpu_percent),
            ("memory", memory_percent),
            ("disk", disk_percent),
            ("network", throughput.sent_bytes_per_sec),
        ] {
            if !reading.is_available() {
                tracing::debug!(metric = name, "metric unavailable");
            }
        }

        MetricSample {
            timestamp: Local::now(),
            cpu_percent,
            memory_percent,
            disk_percent,
            network: throughput,
        }
    }
}
