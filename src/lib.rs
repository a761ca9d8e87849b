#![forbid(unsafe_code)]

pub mod device;
pub mod device_cpu;
pub mod device_multi;
pub mod display;
pub mod error;
pub mod feature;
pub mod pixels;
pub mod registry;
pub mod stats;

#[cfg(feature = "cuda")]
pub mod device_cuda;
#[cfg(feature = "network")]
pub mod device_network;
#[cfg(feature = "opencl")]
pub mod device_opencl;
#[cfg(feature = "gpu")]
pub mod gpu;

pub use device::{
    AccelLayout, Device, DeviceInfo, DeviceKind, RenderJob, Tile, TileKernel, create_device,
};
pub use device_multi::{MultiDevice, multi_device_info, multi_device_info_with_core_count};
pub use error::{LuminaError, LuminaResult};
pub use feature::FeatureRequest;
pub use pixels::{PixelBuffer, PixelFormat};
pub use registry::DeviceRegistry;
pub use stats::DeviceStats;
