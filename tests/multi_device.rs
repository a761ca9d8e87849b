use std::sync::Arc;

use lumina::{
    AccelLayout, DeviceInfo, DeviceKind, DeviceStats, FeatureRequest, LuminaResult, PixelBuffer,
    PixelFormat, RenderJob, Tile, TileKernel, create_device, multi_device_info,
    multi_device_info_with_core_count,
};

fn cpu_info() -> DeviceInfo {
    DeviceInfo {
        kind: DeviceKind::Cpu,
        id: "CPU".into(),
        description: "Test CPU".into(),
        has_half_images: true,
        has_volume_decoupled: true,
        has_osl: true,
        accel_layouts: AccelLayout::all(),
        ..DeviceInfo::default()
    }
}

fn gpu_info(num: i32) -> DeviceInfo {
    DeviceInfo {
        kind: DeviceKind::Cuda,
        id: format!("CUDA_{num}"),
        description: format!("Test GPU {num}"),
        num,
        has_half_images: true,
        has_volume_decoupled: false,
        has_osl: false,
        accel_layouts: AccelLayout::BVH2,
        ..DeviceInfo::default()
    }
}

#[test]
fn merged_capabilities_are_the_intersection() {
    let merged = multi_device_info_with_core_count(&[cpu_info(), gpu_info(0)], 0, true, 8);

    assert_eq!(merged.kind, DeviceKind::Multi);
    assert_eq!(merged.id, "MULTI");
    assert_eq!(merged.description, "Multi Device");
    assert!(merged.has_half_images);
    assert!(!merged.has_volume_decoupled);
    assert!(!merged.has_osl);
    assert_eq!(merged.accel_layouts, AccelLayout::BVH2);
}

#[test]
fn cpu_threads_shrink_by_one_per_other_device() {
    let merged =
        multi_device_info_with_core_count(&[cpu_info(), gpu_info(0), gpu_info(1)], 0, true, 8);
    // Children keep input order; surviving CPU is not reordered.
    let kinds: Vec<_> = merged.multi_devices.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        [DeviceKind::Cpu, DeviceKind::Cuda, DeviceKind::Cuda]
    );
    let cpu = merged
        .multi_devices
        .iter()
        .find(|d| d.kind == DeviceKind::Cpu)
        .unwrap();
    assert_eq!(cpu.cpu_threads, 6);

    // An explicit thread override takes the place of the machine count.
    let merged =
        multi_device_info_with_core_count(&[gpu_info(0), gpu_info(1), cpu_info()], 4, true, 8);
    let cpu = merged
        .multi_devices
        .iter()
        .find(|d| d.kind == DeviceKind::Cpu)
        .unwrap();
    assert_eq!(cpu.cpu_threads, 2);
}

#[test]
fn cpu_with_no_threads_left_is_dropped() {
    let merged =
        multi_device_info_with_core_count(&[gpu_info(0), gpu_info(1), cpu_info()], 0, true, 2);
    assert!(
        merged
            .multi_devices
            .iter()
            .all(|d| d.kind != DeviceKind::Cpu)
    );
}

#[test]
fn interactive_merge_drops_the_cpu_entirely() {
    let merged = multi_device_info_with_core_count(&[gpu_info(0), cpu_info()], 0, false, 8);
    assert_eq!(merged.multi_devices.len(), 1);
    assert_eq!(merged.multi_devices[0].kind, DeviceKind::Cuda);
    // The dropped device no longer narrows the capability set.
    assert!(merged.has_half_images);
}

#[test]
#[should_panic(expected = "at least two subdevices")]
fn merging_a_single_descriptor_is_a_logic_bug() {
    let _ = multi_device_info(&[cpu_info()], 0, true);
}

/// Fills every byte of a texel with `(x + y) mod 256` for its absolute
/// frame position.
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

#[test]
fn composite_render_matches_a_single_device() {
    let merged = multi_device_info(&[cpu_info(), cpu_info()], 4, true);
    assert_eq!(merged.multi_devices.len(), 2);

    let job = RenderJob {
        frame: Tile {
            x: 0,
            y: 0,
            width: 8,
            height: 10,
            sample_start: 0,
            num_samples: 1,
        },
        format: PixelFormat::Rgba8,
        features: FeatureRequest::default(),
        kernel: Arc::new(Gradient),
    };

    let mut composite = create_device(&merged, Arc::new(DeviceStats::default()), true).unwrap();
    composite.submit(&job).unwrap();
    let mut merged_out = PixelBuffer::new(PixelFormat::Rgba8, 8, 10);
    composite.fetch_result(&mut merged_out).unwrap();

    let mut single = create_device(&cpu_info(), Arc::new(DeviceStats::default()), true).unwrap();
    single.submit(&job).unwrap();
    let mut single_out = PixelBuffer::new(PixelFormat::Rgba8, 8, 10);
    single.fetch_result(&mut single_out).unwrap();

    assert_eq!(merged_out.as_bytes(), single_out.as_bytes());
}
