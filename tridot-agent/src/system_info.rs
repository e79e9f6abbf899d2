use std::sync::Mutex;

use sysinfo::System;

/// Host name as reported by the OS, or "unknown".
pub fn hostname() -> String {
    System::host_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Global CPU usage between successive calls.
///
/// sysinfo needs two refreshes to compute usage, so the first sample after
/// construction reads as 0.
pub struct CpuSampler {
    system: Mutex<System>,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }

    /// Percent in `[0, 100]`.
    pub fn sample(&self) -> f64 {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_cpu_usage();
        f64::from(system.global_cpu_usage()).clamp(0.0, 100.0)
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn cpu_sample_is_a_percentage() {
        let sampler = CpuSampler::new();
        for _ in 0..3 {
            let sample = sampler.sample();
            assert!((0.0..=100.0).contains(&sample));
        }
    }
}
