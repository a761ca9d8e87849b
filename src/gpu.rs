//! Shared wgpu plumbing for the hardware-backed device handles.
//!
//! Backend enumeration is deliberately not cached here; callers re-probe so
//! that a driver appearing or vanishing between calls is observed.

use std::sync::Arc;

use crate::device::{Device, DeviceInfo, RenderJob};
use crate::display::DisplayPipeline;
use crate::error::{LuminaError, LuminaResult};
use crate::pixels::PixelBuffer;
use crate::stats::DeviceStats;

/// An initialized adapter/device/queue triple.
pub struct GpuContext {
    pub adapter_name: String,
    pub backend: wgpu::Backend,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Bring up a device on the first adapter the given backend mask offers.
    pub fn new(backends: wgpu::Backends) -> LuminaResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                LuminaError::device("no gpu adapter available")
            }
            other => LuminaError::device(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let adapter_info = adapter.get_info();
        tracing::debug!(
            adapter = %adapter_info.name,
            backend = %adapter_info.backend,
            "gpu context initialized"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lumina_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| LuminaError::device(format!("wgpu request_device failed: {e:?}")))?;

        Ok(Self {
            adapter_name: adapter_info.name,
            backend: adapter_info.backend,
            device,
            queue,
        })
    }
}

/// Whether the backend mask currently exposes at least one adapter.
pub(crate) fn probe(backends: wgpu::Backends) -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });
    !instance.enumerate_adapters(backends).is_empty()
}

/// Adapter descriptions for the backend mask, in enumeration order.
pub(crate) fn adapter_summaries(backends: wgpu::Backends) -> Vec<wgpu::AdapterInfo> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });
    instance
        .enumerate_adapters(backends)
        .into_iter()
        .map(|adapter| adapter.get_info())
        .collect()
}

/// Capability report body for a backend mask, one adapter per paragraph.
pub(crate) fn capability_report(backends: wgpu::Backends) -> String {
    let mut report = String::new();
    for info in adapter_summaries(backends) {
        report.push_str(&format!(
            "{} ({:?})\n\tdriver: {} {}\n",
            info.name, info.device_type, info.driver, info.driver_info
        ));
    }
    report
}

/// A hardware-backed device handle. Kernel execution stays behind the
/// [`crate::device::TileKernel`] seam; what the handle owns is the wgpu
/// context, result storage, and the presentation pipeline for interactive
/// sessions.
pub struct GpuDevice {
    info: DeviceInfo,
    stats: Arc<DeviceStats>,
    ctx: GpuContext,
    display: DisplayPipeline,
    background: bool,
    result: Option<PixelBuffer>,
}

impl GpuDevice {
    pub(crate) fn new(
        info: DeviceInfo,
        stats: Arc<DeviceStats>,
        background: bool,
        backends: wgpu::Backends,
    ) -> LuminaResult<Self> {
        let ctx = GpuContext::new(backends)?;
        Ok(Self {
            info,
            stats,
            ctx,
            display: DisplayPipeline::new(),
            background,
            result: None,
        })
    }

    fn release_result(&mut self) {
        if let Some(old) = self.result.take() {
            self.stats.mem_free(old.byte_len() as u64);
        }
    }
}

impl Device for GpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn stats(&self) -> &Arc<DeviceStats> {
        &self.stats
    }

    fn submit(&mut self, job: &RenderJob) -> LuminaResult<()> {
        let mut buffer = PixelBuffer::new(job.format, job.frame.width, job.frame.height);
        self.stats.mem_alloc(buffer.byte_len() as u64);

        let outcome = job
            .kernel
            .render(&job.frame, job.format, buffer.as_bytes_mut());
        if let Err(err) = outcome {
            self.stats.mem_free(buffer.byte_len() as u64);
            return Err(err);
        }

        self.release_result();
        self.result = Some(buffer);
        Ok(())
    }

    fn fetch_result(&mut self, out: &mut PixelBuffer) -> LuminaResult<()> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| LuminaError::render("no result to fetch: submit a job first"))?;
        if out.width() != result.width()
            || out.height() != result.height()
            || out.format() != result.format()
        {
            return Err(LuminaError::validation(
                "output buffer does not match the submitted frame",
            ));
        }
        out.as_bytes_mut().copy_from_slice(result.as_bytes());
        Ok(())
    }

    fn display_parts(&mut self) -> Option<(&GpuContext, &mut DisplayPipeline)> {
        if self.background {
            return None;
        }
        Some((&self.ctx, &mut self.display))
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        self.release_result();
    }
}
