use std::sync::Arc;
use std::thread;

use rayon::prelude::*;

use crate::device::{AccelLayout, Device, DeviceInfo, DeviceKind, RenderJob, Tile};
use crate::error::{LuminaError, LuminaResult};
use crate::pixels::PixelBuffer;
use crate::stats::DeviceStats;

pub(crate) fn probe() -> bool {
    true
}

/// Logical core count of this machine.
pub(crate) fn system_thread_count() -> u32 {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as u32
}

pub(crate) fn list(out: &mut Vec<DeviceInfo>) {
    out.push(DeviceInfo {
        kind: DeviceKind::Cpu,
        id: "CPU".into(),
        description: format!(
            "{} CPU ({} threads)",
            std::env::consts::ARCH,
            system_thread_count()
        ),
        num: 0,
        has_half_images: true,
        has_volume_decoupled: true,
        has_osl: true,
        accel_layouts: AccelLayout::all(),
        cpu_threads: 0,
        multi_devices: Vec::new(),
    });
}

pub(crate) fn create(
    info: &DeviceInfo,
    stats: Arc<DeviceStats>,
    background: bool,
) -> LuminaResult<Box<dyn Device>> {
    Ok(Box::new(CpuDevice::new(info.clone(), stats, background)?))
}

pub(crate) fn capabilities() -> String {
    format!("{} ({} threads)", std::env::consts::ARCH, system_thread_count())
}

/// CPU backend: a rayon worker pool sized from the descriptor's thread
/// override, rendering a job as one contiguous row band per worker.
pub struct CpuDevice {
    info: DeviceInfo,
    stats: Arc<DeviceStats>,
    pool: rayon::ThreadPool,
    result: Option<PixelBuffer>,
}

impl CpuDevice {
    pub fn new(info: DeviceInfo, stats: Arc<DeviceStats>, _background: bool) -> LuminaResult<Self> {
        let threads = if info.cpu_threads != 0 {
            info.cpu_threads
        } else {
            system_thread_count()
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads as usize)
            .build()
            .map_err(|e| LuminaError::device(format!("cpu worker pool: {e}")))?;
        tracing::debug!(threads, "created CPU device");
        Ok(Self {
            info,
            stats,
            pool,
            result: None,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn release_result(&mut self) {
        if let Some(old) = self.result.take() {
            self.stats.mem_free(old.byte_len() as u64);
        }
    }
}

impl Device for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn stats(&self) -> &Arc<DeviceStats> {
        &self.stats
    }

    fn submit(&mut self, job: &RenderJob) -> LuminaResult<()> {
        let frame = job.frame;
        if frame.width == 0 || frame.height == 0 {
            return Err(LuminaError::validation("job frame must be non-empty"));
        }

        let mut buffer = PixelBuffer::new(job.format, frame.width, frame.height);
        self.stats.mem_alloc(buffer.byte_len() as u64);

        let row_bytes = frame.width as usize * job.format.bytes_per_texel();
        let band_rows = frame.height.div_ceil(self.threads() as u32).max(1);
        let band_bytes = band_rows as usize * row_bytes;

        let render = self.pool.install(|| {
            buffer
                .as_bytes_mut()
                .par_chunks_mut(band_bytes)
                .enumerate()
                .try_for_each(|(band, bytes)| {
                    let tile = Tile {
                        x: frame.x,
                        y: frame.y + band as u32 * band_rows,
                        width: frame.width,
                        height: (bytes.len() / row_bytes) as u32,
                        sample_start: frame.sample_start,
                        num_samples: frame.num_samples,
                    };
                    job.kernel.render(&tile, job.format, bytes)
                })
        });

        if let Err(e) = render {
            self.stats.mem_free(buffer.byte_len() as u64);
            return Err(e);
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
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        self.release_result();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureRequest;
    use crate::pixels::PixelFormat;

    struct RowFill;

    impl crate::device::TileKernel for RowFill {
        fn render(
            &self,
            tile: &Tile,
            format: PixelFormat,
            out: &mut [u8],
        ) -> LuminaResult<()> {
            // Tag every texel's first byte with its absolute row index.
            let row_bytes = tile.width as usize * format.bytes_per_texel();
            for (row, bytes) in out.chunks_mut(row_bytes).enumerate() {
                bytes.fill((tile.y as usize + row) as u8);
            }
            Ok(())
        }
    }

    fn job(width: u32, height: u32) -> RenderJob {
        RenderJob {
            frame: Tile {
                x: 0,
                y: 0,
                width,
                height,
                sample_start: 0,
                num_samples: 1,
            },
            format: PixelFormat::Rgba8,
            features: FeatureRequest::default(),
            kernel: Arc::new(RowFill),
        }
    }

    fn cpu_info(threads: u32) -> DeviceInfo {
        let mut out = Vec::new();
        list(&mut out);
        let mut info = out.remove(0);
        info.cpu_threads = threads;
        info
    }

    #[test]
    fn bands_cover_every_row_exactly_once() {
        let stats = Arc::new(DeviceStats::new());
        let mut dev = CpuDevice::new(cpu_info(3), stats, true).unwrap();
        dev.submit(&job(4, 11)).unwrap();

        let mut out = PixelBuffer::new(PixelFormat::Rgba8, 4, 11);
        dev.fetch_result(&mut out).unwrap();
        for row in 0..11usize {
            assert_eq!(out.as_bytes()[row * 16], row as u8, "row {row}");
        }
    }

    #[test]
    fn thread_override_sizes_the_pool() {
        let stats = Arc::new(DeviceStats::new());
        let dev = CpuDevice::new(cpu_info(2), stats, true).unwrap();
        assert_eq!(dev.threads(), 2);
    }

    #[test]
    fn stats_track_result_storage() {
        let stats = Arc::new(DeviceStats::new());
        let mut dev = CpuDevice::new(cpu_info(1), stats.clone(), true).unwrap();
        dev.submit(&job(8, 8)).unwrap();
        assert_eq!(stats.mem_used(), 8 * 8 * 4);
        dev.submit(&job(8, 8)).unwrap();
        assert_eq!(stats.mem_used(), 8 * 8 * 4);
        drop(dev);
        assert_eq!(stats.mem_used(), 0);
    }

    #[test]
    fn fetch_requires_matching_buffer() {
        let stats = Arc::new(DeviceStats::new());
        let mut dev = CpuDevice::new(cpu_info(1), stats, true).unwrap();
        assert!(dev.fetch_result(&mut PixelBuffer::new(PixelFormat::Rgba8, 1, 1)).is_err());

        dev.submit(&job(4, 4)).unwrap();
        let mut wrong = PixelBuffer::new(PixelFormat::RgbaHalf, 4, 4);
        assert!(dev.fetch_result(&mut wrong).is_err());
    }
}
