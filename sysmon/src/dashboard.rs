use crate::config::DashboardConfig;
use crate::console::{ConsoleLine, ConsoleSink};
use crate::hardware::{self, GpuProbe, HardwareInfo, NvmlProbe};
use crate::history::HistoryBuffer;
use crate::lock_utils::lock;
use crate::metrics::{MetricSample, MetricsSnapshot};
use crate::sampler::MetricSampler;
use std::sync::{Arc, Mutex};

/// Everything the HTTP layer needs, behind copy-out accessors.
///
/// One instance is shared for the life of the process. The console sink is
/// also handed to the output interceptor and the tracing layer.
pub struct DashboardFacade {
    config: DashboardConfig,
    sampler: MetricSampler,
    history: Mutex<HistoryBuffer<MetricSample>>,
    console: Arc<ConsoleSink>,
    gpu_probe: Box<dyn GpuProbe>,
}

impl DashboardFacade {
    pub fn new(
        config: DashboardConfig,
        sampler: MetricSampler,
        console: Arc<ConsoleSink>,
        gpu_probe: Box<dyn GpuProbe>,
    ) -> Self {
        let history = Mutex::new(HistoryBuffer::new(config.max_history_points));
        Self {
            config,
            sampler,
            history,
            console,
            gpu_probe,
        }
    }

    /// Facade reading the local host, with an NVML GPU probe.
    pub fn for_host(config: DashboardConfig, console: Arc<ConsoleSink>) -> Self {
        let sampler = MetricSampler::system(config.cpu_sample_interval());
        Self::new(config, sampler, console, Box::new(NvmlProbe::new()))
    }

    /// Console sink sized and filtered per `config`.
    pub fn console_for(config: &DashboardConfig) -> Arc<ConsoleSink> {
        Arc::new(ConsoleSink::new(config.console_max_lines, config.console_filters.clone()))
    }

    /// Sample now, record the sample, and return it with the full history.
    /// Blocks for the CPU averaging interval.
    pub fn get_current_and_history(&self) -> MetricsSnapshot {
        let current = self.sampler.sample();
        let mut history = lock(&self.history);
        history.append(current.clone());
        MetricsSnapshot {
            current,
            history: history.items(),
        }
    }

    pub fn history(&self) -> Vec<MetricSample> {
        lock(&self.history).items()
    }

    /// Retained console lines. Does not clear them.
    pub fn get_console_lines(&self) -> Vec<ConsoleLine> {
        self.console.lines()
    }

    pub fn clear_console(&self) {
        self.console.clear();
    }

    /// Remove and return the retained console lines.
    pub fn drain_console(&self) -> Vec<ConsoleLine> {
        self.console.read_and_clear()
    }

    pub fn get_hardware_info(&self) -> HardwareInfo {
        let info = hardware::collect(self.gpu_probe.as_ref());
        tracing::debug!(probe = self.gpu_probe.name(), gpu = info.has_discrete_gpu, "hardware info collected");
        info
    }

    pub fn get_config(&self) -> DashboardConfig {
        self.config.clone()
    }

    pub fn console(&self) -> &Arc<ConsoleSink> {
        &self.console
    }
}
