use std::sync::{Mutex, PoisonError};

use crate::device::{DeviceInfo, DeviceKind, backend_table};

/// Device listing order. Deliberate and fixed: GPU-compute backend A, GPU-
/// compute backend B, CPU, networked. Selection UIs rely on index stability
/// within a session, so this order must not change between rebuilds.
const DEVICE_LIST_ORDER: [DeviceKind; 4] = [
    DeviceKind::Cuda,
    DeviceKind::Opencl,
    DeviceKind::Cpu,
    DeviceKind::Network,
];

#[derive(Default)]
struct Caches {
    // `None` is the dirty state: entries are released on invalidation and
    // rebuilt on the next read.
    kinds: Option<Vec<DeviceKind>>,
    devices: Option<Vec<DeviceInfo>>,
}

/// Cache of usable backend kinds and concrete device descriptors.
///
/// Constructed once by the host's startup sequence and shared by reference;
/// there is no hidden global. Both caches sit behind a single mutex, so
/// listing is safe from any thread. Probing happens while the lock is held
/// and must stay quick and side-effect-free; a backend that fails its probe
/// is simply excluded, never an error.
#[derive(Default)]
pub struct DeviceRegistry {
    caches: Mutex<Caches>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend kinds usable right now, CPU always included and first.
    /// Cached until [`DeviceRegistry::invalidate`].
    pub fn available_kinds(&self) -> Vec<DeviceKind> {
        let mut caches = self.lock();
        caches
            .kinds
            .get_or_insert_with(|| {
                let mut kinds = Vec::new();
                for entry in backend_table() {
                    if entry.kind == DeviceKind::Cpu || (entry.probe)() {
                        kinds.push(entry.kind);
                    }
                }
                tracing::debug!(?kinds, "rebuilt available backend kinds");
                kinds
            })
            .clone()
    }

    /// Descriptors for every usable concrete device, in the fixed listing
    /// order. Cached until [`DeviceRegistry::invalidate`].
    pub fn available_devices(&self) -> Vec<DeviceInfo> {
        let mut caches = self.lock();
        caches
            .devices
            .get_or_insert_with(|| {
                let table = backend_table();
                let mut devices = Vec::new();
                for kind in DEVICE_LIST_ORDER {
                    let Some(entry) = table.iter().find(|e| e.kind == kind) else {
                        continue;
                    };
                    if entry.kind == DeviceKind::Cpu || (entry.probe)() {
                        (entry.list)(&mut devices);
                    }
                }
                tracing::debug!(count = devices.len(), "rebuilt available device list");
                devices
            })
            .clone()
    }

    /// Mark both caches dirty and release their entries. Already-instantiated
    /// device handles are unaffected.
    pub fn invalidate(&self) {
        let mut caches = self.lock();
        caches.kinds = None;
        caches.devices = None;
    }

    /// Multi-section human-readable capability report, CPU first. Diagnostic
    /// output only; nothing parses this.
    pub fn capabilities_report(&self) -> String {
        let mut report = String::new();
        for entry in backend_table() {
            if entry.kind == DeviceKind::Cpu {
                report.push_str("CPU device capabilities: ");
                report.push_str(&(entry.capabilities)());
                report.push('\n');
            } else if (entry.probe)() {
                report.push('\n');
                report.push_str(entry.kind.token());
                report.push_str(" device capabilities:\n");
                report.push_str(&(entry.capabilities)());
                report.push('\n');
            }
        }
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Caches> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_listed_first_among_kinds() {
        let registry = DeviceRegistry::new();
        let kinds = registry.available_kinds();
        assert_eq!(kinds.first(), Some(&DeviceKind::Cpu));
    }

    #[test]
    fn listings_are_stable_until_invalidation() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.available_kinds(), registry.available_kinds());
        assert_eq!(registry.available_devices(), registry.available_devices());

        registry.invalidate();
        let kinds = registry.available_kinds();
        assert!(kinds.contains(&DeviceKind::Cpu));
    }

    #[test]
    fn report_always_has_a_cpu_section() {
        let registry = DeviceRegistry::new();
        assert!(
            registry
                .capabilities_report()
                .starts_with("CPU device capabilities: ")
        );
    }
}
