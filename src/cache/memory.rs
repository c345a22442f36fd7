//! Memory Probe Module
//!
//! Optional process-memory introspection used by the memory monitor.
//! Platforms that cannot report usage return `None`, which disables
//! pressure-driven eviction; the byte ceiling in `set` still applies.

/// Fraction of the memory limit at which pressure eviction starts.
pub const PRESSURE_THRESHOLD: f64 = 0.8;

/// Fraction of entries evicted per pressure event.
pub const PRESSURE_EVICT_FRACTION: f64 = 0.1;

// == Memory Sample ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    /// Bytes currently in use
    pub used: u64,
    /// Bytes available to the process
    pub limit: u64,
}

impl MemorySample {
    /// Used / limit, 0.0 when the limit is zero.
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.used as f64 / self.limit as f64
        }
    }

    pub fn under_pressure(&self) -> bool {
        self.ratio() >= PRESSURE_THRESHOLD
    }
}

// == Memory Probe ==
pub trait MemoryProbe: Send + Sync {
    /// Current usage, or `None` when the platform cannot tell.
    fn sample(&self) -> Option<MemorySample>;
}

// == Process Memory Probe ==
/// Resident set size from `/proc/self/status` against a configured limit.
#[derive(Debug, Clone)]
pub struct ProcessMemoryProbe {
    limit: Option<u64>,
}

impl ProcessMemoryProbe {
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit }
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> Option<MemorySample> {
        let limit = self.limit?;
        let used = resident_bytes()?;
        Some(MemorySample { used, limit })
    }
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<u64> {
    None
}

/// Parses the `VmRSS:` line (reported in kB).
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

// == Fixed Probe ==
/// Reports a fixed sample; for hosts that measure memory elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub Option<MemorySample>);

impl MemoryProbe for FixedMemoryProbe {
    fn sample(&self) -> Option<MemorySample> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_and_pressure() {
        let sample = MemorySample {
            used: 80,
            limit: 100,
        };
        assert!((sample.ratio() - 0.8).abs() < f64::EPSILON);
        assert!(sample.under_pressure());

        let calm = MemorySample { used: 10, limit: 100 };
        assert!(!calm.under_pressure());

        let zero = MemorySample { used: 10, limit: 0 };
        assert_eq!(zero.ratio(), 0.0);
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tflash_cache\nVmPeak:\t  9000 kB\nVmRSS:\t    2048 kB\n";
        assert_eq!(parse_vm_rss(status), Some(2048 * 1024));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }

    #[test]
    fn test_process_probe_without_limit_is_disabled() {
        let probe = ProcessMemoryProbe::new(None);
        assert!(probe.sample().is_none());
    }
}
