use std::sync::Arc;

use lumina::{
    DeviceInfo, DeviceKind, DeviceRegistry, DeviceStats, FeatureRequest, LuminaResult, PixelBuffer,
    PixelFormat, RenderJob, Tile, TileKernel, create_device,
};

/// Fills every byte of a texel with `(x + y) mod 256` for its absolute
/// frame position, so any misplaced band or tile is visible in the output.
struct Gradient;

impl TileKernel for Gradient {
    fn render(&self, tile: &Tile, format: PixelFormat, out: &mut [u8]) -> LuminaResult<()> {
        let texel = format.bytes_per_texel();
        for row in 0..tile.height {
            for col in 0..tile.width {
                let value = ((tile.x + col + tile.y + row) % 256) as u8;
                let at = (row * tile.width + col) as usize * texel;
                out[at..at + texel].fill(value);
            }
        }
        Ok(())
    }
}

fn gradient_job(width: u32, height: u32) -> RenderJob {
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
        kernel: Arc::new(Gradient),
    }
}

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn cpu_device_renders_a_listed_descriptor() {
    init_logs();
    let registry = DeviceRegistry::new();
    let descriptor = registry
        .available_devices()
        .into_iter()
        .find(|d| d.kind == DeviceKind::Cpu)
        .expect("CPU is always listed");

    let stats = Arc::new(DeviceStats::default());
    let mut device = create_device(&descriptor, stats, true).unwrap();

    let job = gradient_job(16, 9);
    device.submit(&job).unwrap();

    let mut out = PixelBuffer::new(PixelFormat::Rgba8, 16, 9);
    device.fetch_result(&mut out).unwrap();

    let bytes = out.as_bytes();
    assert_eq!(bytes[0], 0);
    // Texel (3, 2).
    let at = (2 * 16 + 3) * 4;
    assert_eq!(&bytes[at..at + 4], &[5, 5, 5, 5]);
    // Last texel (15, 8).
    let at = (8 * 16 + 15) * 4;
    assert_eq!(&bytes[at..at + 4], &[23, 23, 23, 23]);
}

#[test]
fn unknown_kind_is_an_error_not_a_panic() {
    let info = DeviceInfo::default();
    assert_eq!(info.kind, DeviceKind::None);

    let err = create_device(&info, Arc::new(DeviceStats::default()), true).unwrap_err();
    assert!(err.to_string().contains("backend not compiled in"));
}

#[cfg(not(feature = "cuda"))]
#[test]
fn missing_backend_build_is_an_error() {
    let info = DeviceInfo {
        kind: DeviceKind::Cuda,
        id: "CUDA_0".into(),
        ..DeviceInfo::default()
    };
    let err = create_device(&info, Arc::new(DeviceStats::default()), true).unwrap_err();
    assert!(err.to_string().contains("backend not compiled in"));
}

#[test]
fn fetch_before_submit_is_an_error() {
    let registry = DeviceRegistry::new();
    let descriptor = registry
        .available_devices()
        .into_iter()
        .find(|d| d.kind == DeviceKind::Cpu)
        .unwrap();
    let mut device = create_device(&descriptor, Arc::new(DeviceStats::default()), true).unwrap();

    let mut out = PixelBuffer::new(PixelFormat::Rgba8, 4, 4);
    assert!(device.fetch_result(&mut out).is_err());
}
