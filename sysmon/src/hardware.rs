use libloading::{Library, Symbol};
use serde::Serialize;
use sysinfo::{ProcessorExt, System, SystemExt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareInfo {
    pub os_name: String,
    pub cpu_description: String,
    pub total_ram_formatted: String,
    pub has_discrete_gpu: bool,
}

/// Best-effort detection of a discrete GPU. Any failure means "not present".
pub trait GpuProbe: Send + Sync {
    fn name(&self) -> &str;
    fn detect(&self) -> bool;
}

/// Probe that never finds a GPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGpuProbe;

impl GpuProbe for NoGpuProbe {
    fn name(&self) -> &str {
        "none"
    }

    fn detect(&self) -> bool {
        false
    }
}

#[cfg(windows)]
const NVML_LIBRARIES: &[&str] = &["nvml.dll"];
#[cfg(target_os = "macos")]
const NVML_LIBRARIES: &[&str] = &[];
#[cfg(all(unix, not(target_os = "macos")))]
const NVML_LIBRARIES: &[&str] = &["libnvidia-ml.so.1", "libnvidia-ml.so"];

/// Loads the NVIDIA management library at runtime and checks that it initializes.
#[derive(Debug, Clone)]
pub struct NvmlProbe {
    candidates: Vec<String>,
}

impl NvmlProbe {
    pub fn new() -> Self {
        Self::with_candidates(NVML_LIBRARIES.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_candidates(candidates: Vec<String>) -> Self {
        Self { candidates }
    }

    fn try_init(path: &str) -> Result<bool, libloading::Error> {
        // SAFETY: NVML's init/shutdown take no arguments and return an nvmlReturn_t.
        unsafe {
            let lib = Library::new(path)?;
            let init: Symbol<unsafe extern "C" fn() -> i32> = match lib.get(b"nvmlInit_v2\0") {
                Ok(sym) => sym,
                Err(_) => lib.get(b"nvmlInit\0")?,
            };
            let ok = init() == 0;
            if ok {
                if let Ok(shutdown) = lib.get::<unsafe extern "C" fn() -> i32>(b"nvmlShutdown\0") {
                    shutdown();
                }
            }
            Ok(ok)
        }
    }
}

impl Default for NvmlProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProbe for NvmlProbe {
    fn name(&self) -> &str {
        "nvml"
    }

    fn detect(&self) -> bool {
        for path in &self.candidates {
            match Self::try_init(path) {
                Ok(found) => return found,
                Err(e) => tracing::debug!(library = %path, error = %e, "NVML not loadable"),
            }
        }
        false
    }
}

/// Render a byte count as gibibytes with two decimals, e.g. `"15.53 GB"`.
pub fn format_ram(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / 1024f64.powi(3))
}

/// Read the host description and ask `gpu` about a discrete GPU.
pub fn collect(gpu: &dyn GpuProbe) -> HardwareInfo {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let os_name = system
        .long_os_version()
        .or_else(|| system.name())
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    let cpu_description = system
        .processors()
        .first()
        .map(|p| p.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| std::env::consts::ARCH.to_string());
    // sysinfo reports memory in KiB
    let total_ram_formatted = format_ram(system.total_memory().saturating_mul(1024));

    HardwareInfo {
        os_name,
        cpu_description,
        total_ram_formatted,
        has_discrete_gpu: gpu.detect(),
    }
}
