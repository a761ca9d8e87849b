//! OpenCL-class devices, mapped onto the GL-compatible GPU backends.

use std::sync::Arc;

use crate::device::{AccelLayout, Device, DeviceInfo, DeviceKind};
use crate::error::LuminaResult;
use crate::gpu::{self, GpuDevice};
use crate::stats::DeviceStats;

const BACKENDS: wgpu::Backends = wgpu::Backends::GL;

pub(crate) fn probe() -> bool {
    gpu::probe(BACKENDS)
}

pub(crate) fn list(devices: &mut Vec<DeviceInfo>) {
    for (num, adapter) in gpu::adapter_summaries(BACKENDS).into_iter().enumerate() {
        devices.push(DeviceInfo {
            kind: DeviceKind::Opencl,
            id: format!("OPENCL_{num}"),
            description: adapter.name,
            num: num as i32,
            has_half_images: false,
            has_volume_decoupled: false,
            has_osl: false,
            accel_layouts: AccelLayout::BVH2,
            cpu_threads: 0,
            multi_devices: Vec::new(),
        });
    }
}

pub(crate) fn create(
    info: &DeviceInfo,
    stats: Arc<DeviceStats>,
    background: bool,
) -> LuminaResult<Box<dyn Device>> {
    Ok(Box::new(GpuDevice::new(
        info.clone(),
        stats,
        background,
        BACKENDS,
    )?))
}

pub(crate) fn capabilities() -> String {
    gpu::capability_report(BACKENDS)
}
