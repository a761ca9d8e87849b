use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{LuminaError, LuminaResult};
use crate::feature::FeatureRequest;
use crate::pixels::{PixelBuffer, PixelFormat};
use crate::stats::DeviceStats;

/// The kind of a rendering/compute backend, used as a discriminant everywhere
/// a device is referenced before instantiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Opencl,
    Network,
    Multi,
    /// Unknown or unselected backend.
    None,
}

impl DeviceKind {
    /// The fixed uppercase token used at the configuration boundary.
    /// [`DeviceKind::None`] maps to the empty string.
    pub fn token(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Cuda => "CUDA",
            DeviceKind::Opencl => "OPENCL",
            DeviceKind::Network => "NETWORK",
            DeviceKind::Multi => "MULTI",
            DeviceKind::None => "",
        }
    }

    /// Inverse of [`DeviceKind::token`]; unknown tokens map to
    /// [`DeviceKind::None`].
    pub fn from_token(token: &str) -> Self {
        match token {
            "CPU" => DeviceKind::Cpu,
            "CUDA" => DeviceKind::Cuda,
            "OPENCL" => DeviceKind::Opencl,
            "NETWORK" => DeviceKind::Network,
            "MULTI" => DeviceKind::Multi,
            _ => DeviceKind::None,
        }
    }
}

// Serialized form is the configuration token, so persisted selections and
// the wire format agree with what users type.
impl Serialize for DeviceKind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.token())
    }
}

impl<'de> Deserialize<'de> for DeviceKind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let token = String::deserialize(d)?;
        Ok(DeviceKind::from_token(&token))
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

bitflags::bitflags! {
    /// Acceleration-structure layouts a backend can traverse.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AccelLayout: u32 {
        const BVH2 = 1 << 0;
        const BVH4 = 1 << 1;
        const BVH8 = 1 << 2;
    }
}

mod accel_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::AccelLayout;

    pub fn serialize<S: Serializer>(mask: &AccelLayout, s: S) -> Result<S::Ok, S::Error> {
        mask.bits().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<AccelLayout, D::Error> {
        Ok(AccelLayout::from_bits_truncate(u32::deserialize(d)?))
    }
}

/// Describes one selectable backend before instantiation.
///
/// Primitive descriptors come from [`crate::registry::DeviceRegistry`]; merged
/// descriptors come from [`crate::device_multi::multi_device_info`]. The value
/// is immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    /// Stable identifier, e.g. `"CPU"` or `"CUDA_0"`.
    pub id: String,
    /// Human-readable description for selection UIs.
    pub description: String,
    /// Ordinal index within the backend that listed this device.
    pub num: i32,
    /// Whether half-precision pixel buffers are supported.
    pub has_half_images: bool,
    /// Whether decoupled-volume caching is supported.
    pub has_volume_decoupled: bool,
    /// Whether the Open Shading Language mode is supported.
    pub has_osl: bool,
    /// Acceleration-structure layouts this device can traverse.
    #[serde(with = "accel_serde")]
    pub accel_layouts: AccelLayout,
    /// CPU worker-thread override; 0 means "machine default". Meaningful for
    /// CPU descriptors, in particular CPU children of a multi device.
    pub cpu_threads: u32,
    /// Child descriptors; non-empty only when `kind` is [`DeviceKind::Multi`].
    pub multi_devices: Vec<DeviceInfo>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            kind: DeviceKind::None,
            id: String::new(),
            description: String::new(),
            num: 0,
            has_half_images: false,
            has_volume_decoupled: false,
            has_osl: false,
            accel_layouts: AccelLayout::empty(),
            cpu_threads: 0,
            multi_devices: Vec::new(),
        }
    }
}

/// A rectangular slice of the frame plus the sample range to accumulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub sample_start: u32,
    pub num_samples: u32,
}

/// The seam to the path-tracing kernel collaborator.
///
/// Local devices call [`TileKernel::render`] for each tile of submitted work;
/// `out` is the tile's pixel storage (`tile.width * tile.height` RGBA texels
/// in the job's [`PixelFormat`], tightly packed). The networked backend never
/// calls it: the remote node owns its kernels and receives only the tile
/// descriptors.
pub trait TileKernel: Send + Sync {
    fn render(&self, tile: &Tile, format: PixelFormat, out: &mut [u8]) -> LuminaResult<()>;
}

/// One unit of renderer work submitted to a device.
#[derive(Clone)]
pub struct RenderJob {
    /// The full frame region this job covers.
    pub frame: Tile,
    /// Pixel format of the result buffer.
    pub format: PixelFormat,
    /// Kernel features the scene needs; forwarded to kernel specialization.
    pub features: FeatureRequest,
    /// The kernel that produces pixels for local devices.
    pub kernel: Arc<dyn TileKernel>,
}

/// The live, instantiated backend: the common contract every concrete device
/// implements. Handles are exclusively owned by their creator and release all
/// driver resources on drop.
pub trait Device: Send {
    fn info(&self) -> &DeviceInfo;

    fn stats(&self) -> &Arc<DeviceStats>;

    /// Queue one job. Completion is synchronous for the in-tree backends; the
    /// result stays on the device until [`Device::fetch_result`].
    fn submit(&mut self, job: &RenderJob) -> LuminaResult<()>;

    /// Copy the most recent result into `out`, which must match the submitted
    /// frame's dimensions and format.
    fn fetch_result(&mut self, out: &mut PixelBuffer) -> LuminaResult<()>;

    /// Presentation access for non-background GPU handles: the owning GPU
    /// context together with the fallback display pipeline. `None` for
    /// headless handles and for backends without a display path.
    #[cfg(feature = "gpu")]
    fn display_parts(
        &mut self,
    ) -> Option<(&crate::gpu::GpuContext, &mut crate::display::DisplayPipeline)> {
        None
    }
}

impl std::fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("info", self.info()).finish()
    }
}

/// One compiled-in backend: probing, listing, construction, diagnostics.
///
/// The table replaces dispatch-by-switch with scattered conditional
/// compilation: each backend registers here once, and "kind not registered"
/// becomes the single uniform failure path.
pub(crate) struct BackendEntry {
    pub(crate) kind: DeviceKind,
    /// Quick, side-effect-free runtime availability check.
    pub(crate) probe: fn() -> bool,
    /// Append one descriptor per usable concrete device.
    pub(crate) list: fn(&mut Vec<DeviceInfo>),
    pub(crate) create: fn(&DeviceInfo, Arc<DeviceStats>, bool) -> LuminaResult<Box<dyn Device>>,
    /// Free-form capability summary for the diagnostics report.
    pub(crate) capabilities: fn() -> String,
}

/// Every backend compiled into this build, CPU first.
pub(crate) fn backend_table() -> Vec<BackendEntry> {
    let mut table = vec![BackendEntry {
        kind: DeviceKind::Cpu,
        probe: crate::device_cpu::probe,
        list: crate::device_cpu::list,
        create: crate::device_cpu::create,
        capabilities: crate::device_cpu::capabilities,
    }];
    #[cfg(feature = "cuda")]
    table.push(BackendEntry {
        kind: DeviceKind::Cuda,
        probe: crate::device_cuda::probe,
        list: crate::device_cuda::list,
        create: crate::device_cuda::create,
        capabilities: crate::device_cuda::capabilities,
    });
    #[cfg(feature = "opencl")]
    table.push(BackendEntry {
        kind: DeviceKind::Opencl,
        probe: crate::device_opencl::probe,
        list: crate::device_opencl::list,
        create: crate::device_opencl::create,
        capabilities: crate::device_opencl::capabilities,
    });
    #[cfg(feature = "network")]
    table.push(BackendEntry {
        kind: DeviceKind::Network,
        probe: crate::device_network::probe,
        list: crate::device_network::list,
        create: crate::device_network::create,
        capabilities: crate::device_network::capabilities,
    });
    table
}

/// Instantiate the backend a descriptor names.
///
/// Dispatches on `info.kind`. Multi descriptors recursively instantiate each
/// child. Kinds that are unknown, not compiled in, or whose backend became
/// unavailable between listing and creation yield an error, never a panic —
/// callers fall back to another device or report to the user.
pub fn create_device(
    info: &DeviceInfo,
    stats: Arc<DeviceStats>,
    background: bool,
) -> LuminaResult<Box<dyn Device>> {
    if info.kind == DeviceKind::Multi {
        return crate::device_multi::create(info, stats, background);
    }

    let table = backend_table();
    let entry = table.iter().find(|e| e.kind == info.kind).ok_or_else(|| {
        LuminaError::device(format!(
            "backend not compiled in: {:?} ({})",
            info.kind,
            info.kind.token()
        ))
    })?;

    // Re-probe right before construction: the backend may have gone away
    // since the registry snapshot was taken.
    if !(entry.probe)() {
        return Err(LuminaError::device(format!(
            "backend unavailable: {}",
            info.kind.token()
        )));
    }

    (entry.create)(info, stats, background)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: [&str; 5] = ["CPU", "CUDA", "OPENCL", "NETWORK", "MULTI"];

    #[test]
    fn token_round_trip() {
        for token in TOKENS {
            assert_eq!(DeviceKind::from_token(token).token(), token);
        }
    }

    #[test]
    fn unknown_tokens_map_to_none() {
        for bogus in ["", "cpu", "GPU", "Cuda", "MULTI "] {
            assert_eq!(DeviceKind::from_token(bogus), DeviceKind::None);
        }
        assert_eq!(DeviceKind::None.token(), "");
    }

    #[test]
    fn serde_uses_the_same_tokens() {
        assert_eq!(
            serde_json::to_string(&DeviceKind::Opencl).unwrap(),
            "\"OPENCL\""
        );
        let kind: DeviceKind = serde_json::from_str("\"CUDA\"").unwrap();
        assert_eq!(kind, DeviceKind::Cuda);
        let unknown: DeviceKind = serde_json::from_str("\"VULKAN\"").unwrap();
        assert_eq!(unknown, DeviceKind::None);
    }

    #[test]
    fn device_info_serde_round_trip() {
        let info = DeviceInfo {
            kind: DeviceKind::Cuda,
            id: "CUDA_0".into(),
            description: "Test GPU".into(),
            num: 0,
            has_half_images: true,
            has_volume_decoupled: false,
            has_osl: false,
            accel_layouts: AccelLayout::BVH2 | AccelLayout::BVH8,
            cpu_threads: 0,
            multi_devices: Vec::new(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: DeviceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn table_always_carries_cpu_first() {
        let table = backend_table();
        assert_eq!(table[0].kind, DeviceKind::Cpu);
    }

    #[test]
    fn create_rejects_unknown_kind() {
        let info = DeviceInfo {
            kind: DeviceKind::None,
            ..DeviceInfo::default()
        };
        let err = create_device(&info, Arc::new(DeviceStats::new()), true).unwrap_err();
        assert!(err.to_string().contains("not compiled in"));
    }
}
