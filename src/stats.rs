use std::sync::atomic::{AtomicU64, Ordering};

/// Shared memory-accounting sink for device allocations.
///
/// One instance is typically shared (via `Arc`) by every device in a render
/// session, including all children of a multi device, so the host can report
/// a single current/peak figure.
#[derive(Debug, Default)]
pub struct DeviceStats {
    mem_used: AtomicU64,
    mem_peak: AtomicU64,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mem_alloc(&self, bytes: u64) {
        let now = self.mem_used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.mem_peak.fetch_max(now, Ordering::Relaxed);
    }

    pub fn mem_free(&self, bytes: u64) {
        self.mem_used.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn mem_used(&self) -> u64 {
        self.mem_used.load(Ordering::Relaxed)
    }

    pub fn mem_peak(&self) -> u64 {
        self.mem_peak.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_high_water_mark() {
        let stats = DeviceStats::new();
        stats.mem_alloc(100);
        stats.mem_alloc(50);
        stats.mem_free(120);
        stats.mem_alloc(10);
        assert_eq!(stats.mem_used(), 40);
        assert_eq!(stats.mem_peak(), 150);
    }
}
