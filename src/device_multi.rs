use std::sync::Arc;

use crate::device::{AccelLayout, Device, DeviceInfo, DeviceKind, RenderJob, Tile, create_device};
use crate::device_cpu::system_thread_count;
use crate::error::{LuminaError, LuminaResult};
use crate::pixels::PixelBuffer;
use crate::stats::DeviceStats;

/// Merge several concrete descriptors into one composite descriptor the
/// renderer treats as a single logical device.
///
/// Capability flags start from the most permissive values and are narrowed to
/// the intersection of the included children: the composite can only promise
/// what every participant delivers. When the set contains a CPU device it is
/// deprioritized: dropped outright for interactive renders, and for
/// background renders its thread count is reduced by one slot per other
/// device so CPU work does not starve the GPU driver threads.
///
/// # Panics
///
/// Fewer than two descriptors is a caller logic bug, not a runtime
/// condition, and asserts.
pub fn multi_device_info(subdevices: &[DeviceInfo], threads: u32, background: bool) -> DeviceInfo {
    multi_device_info_with_core_count(subdevices, threads, background, system_thread_count())
}

/// [`multi_device_info`] with the machine's logical core count injected,
/// which makes the thread-budget arithmetic a pure function of its inputs.
pub fn multi_device_info_with_core_count(
    subdevices: &[DeviceInfo],
    threads: u32,
    background: bool,
    system_threads: u32,
) -> DeviceInfo {
    assert!(
        subdevices.len() > 1,
        "a multi device requires at least two subdevices"
    );

    let mut info = DeviceInfo {
        kind: DeviceKind::Multi,
        id: "MULTI".into(),
        description: "Multi Device".into(),
        num: 0,
        has_half_images: true,
        has_volume_decoupled: true,
        has_osl: true,
        accel_layouts: AccelLayout::all(),
        cpu_threads: 0,
        multi_devices: Vec::new(),
    };

    for device in subdevices {
        if device.kind == DeviceKind::Cpu {
            if !background {
                tracing::debug!("CPU render threads disabled for interactive render");
                continue;
            }
            let orig_cpu_threads = if threads != 0 { threads } else { system_threads };
            // Reserve one thread slot per other member of the input set.
            let cpu_threads = orig_cpu_threads.saturating_sub(subdevices.len() as u32 - 1);
            tracing::debug!(
                from = orig_cpu_threads,
                to = cpu_threads,
                "CPU render threads reduced to dedicate to GPU"
            );
            if cpu_threads < 1 {
                continue;
            }
            let mut cpu_device = device.clone();
            cpu_device.cpu_threads = cpu_threads;
            info.multi_devices.push(cpu_device);
        } else {
            info.multi_devices.push(device.clone());
        }

        // Narrow to what every included child supports.
        info.has_half_images &= device.has_half_images;
        info.has_volume_decoupled &= device.has_volume_decoupled;
        info.has_osl &= device.has_osl;
        info.accel_layouts &= device.accel_layouts;
    }

    info
}

pub(crate) fn create(
    info: &DeviceInfo,
    stats: Arc<DeviceStats>,
    background: bool,
) -> LuminaResult<Box<dyn Device>> {
    Ok(Box::new(MultiDevice::new(info.clone(), stats, background)?))
}

/// A composite handle that fans submitted work across its children as
/// contiguous row bands and gathers their results back into one frame.
pub struct MultiDevice {
    info: DeviceInfo,
    stats: Arc<DeviceStats>,
    children: Vec<Box<dyn Device>>,
    /// Frame and per-child band of the last submitted job.
    pending: Option<(RenderJob, Vec<Tile>)>,
}

impl MultiDevice {
    pub fn new(info: DeviceInfo, stats: Arc<DeviceStats>, background: bool) -> LuminaResult<Self> {
        if info.multi_devices.is_empty() {
            return Err(LuminaError::validation(
                "multi descriptor carries no child devices",
            ));
        }
        let mut children = Vec::with_capacity(info.multi_devices.len());
        for child in &info.multi_devices {
            // Child failure aborts the whole composite; already-created
            // children release their resources on drop.
            children.push(create_device(child, stats.clone(), background)?);
        }
        Ok(Self {
            info,
            stats,
            children,
            pending: None,
        })
    }

    /// Split `frame` into one contiguous row band per child. Bands may be
    /// empty when there are more children than rows.
    fn split_bands(frame: Tile, children: usize) -> Vec<Tile> {
        let band_rows = frame.height.div_ceil(children as u32).max(1);
        (0..children as u32)
            .map(|i| {
                let y0 = (i * band_rows).min(frame.height);
                let y1 = ((i + 1) * band_rows).min(frame.height);
                Tile {
                    x: frame.x,
                    y: frame.y + y0,
                    width: frame.width,
                    height: y1 - y0,
                    sample_start: frame.sample_start,
                    num_samples: frame.num_samples,
                }
            })
            .collect()
    }
}

impl Device for MultiDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn stats(&self) -> &Arc<DeviceStats> {
        &self.stats
    }

    fn submit(&mut self, job: &RenderJob) -> LuminaResult<()> {
        let bands = Self::split_bands(job.frame, self.children.len());
        for (child, band) in self.children.iter_mut().zip(&bands) {
            if band.height == 0 {
                continue;
            }
            let mut band_job = job.clone();
            band_job.frame = *band;
            child.submit(&band_job)?;
        }
        self.pending = Some((job.clone(), bands));
        Ok(())
    }

    fn fetch_result(&mut self, out: &mut PixelBuffer) -> LuminaResult<()> {
        let (job, bands) = self
            .pending
            .as_ref()
            .ok_or_else(|| LuminaError::render("no result to fetch: submit a job first"))?;
        let frame = job.frame;
        if out.width() != frame.width || out.height() != frame.height || out.format() != job.format
        {
            return Err(LuminaError::validation(
                "output buffer does not match the submitted frame",
            ));
        }

        let row_bytes = frame.width as usize * job.format.bytes_per_texel();
        for (child, band) in self.children.iter_mut().zip(bands) {
            if band.height == 0 {
                continue;
            }
            let mut band_pixels = PixelBuffer::new(job.format, band.width, band.height);
            child.fetch_result(&mut band_pixels)?;

            let start = (band.y - frame.y) as usize * row_bytes;
            let len = band.height as usize * row_bytes;
            out.as_bytes_mut()[start..start + len].copy_from_slice(band_pixels.as_bytes());
        }
        Ok(())
    }

    #[cfg(feature = "gpu")]
    fn display_parts(
        &mut self,
    ) -> Option<(&crate::gpu::GpuContext, &mut crate::display::DisplayPipeline)> {
        // The composite co-owns its presentation path through the first child
        // that has one.
        self.children
            .iter_mut()
            .find_map(|child| child.display_parts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_partition_the_frame() {
        let frame = Tile {
            x: 0,
            y: 8,
            width: 16,
            height: 10,
            sample_start: 0,
            num_samples: 4,
        };
        let bands = MultiDevice::split_bands(frame, 3);
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[0].y, 8);
        assert_eq!(bands.iter().map(|b| b.height).sum::<u32>(), 10);
        for pair in bands.windows(2) {
            assert_eq!(pair[0].y + pair[0].height, pair[1].y);
        }
    }

    #[test]
    fn more_children_than_rows_yields_empty_tail_bands() {
        let frame = Tile {
            x: 0,
            y: 0,
            width: 4,
            height: 2,
            sample_start: 0,
            num_samples: 1,
        };
        let bands = MultiDevice::split_bands(frame, 4);
        assert_eq!(bands.iter().filter(|b| b.height > 0).count(), 2);
        assert_eq!(bands.iter().map(|b| b.height).sum::<u32>(), 2);
    }
}
