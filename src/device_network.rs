//! A device handle that forwards work to a render server over TCP.
//!
//! The wire format is deliberately small: every message is a `u32`
//! little-endian byte length followed by the payload. Requests are JSON job
//! descriptors; responses are raw pixel bytes for the requested frame.
//! Kernels never cross the wire, the server owns its own.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{AccelLayout, Device, DeviceInfo, DeviceKind, RenderJob, Tile};
use crate::error::{LuminaError, LuminaResult};
use crate::feature::FeatureRequest;
use crate::pixels::{PixelBuffer, PixelFormat};
use crate::stats::DeviceStats;

/// Overrides the render server address, `host:port`.
pub const SERVER_ADDR_ENV: &str = "LUMINA_NET_ADDR";

const DEFAULT_ADDR: &str = "127.0.0.1:7764";
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

pub fn server_addr() -> String {
    std::env::var(SERVER_ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_owned())
}

pub(crate) fn probe() -> bool {
    let Ok(addr) = server_addr().parse::<SocketAddr>() else {
        return false;
    };
    TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok()
}

pub(crate) fn list(devices: &mut Vec<DeviceInfo>) {
    devices.push(DeviceInfo {
        kind: DeviceKind::Network,
        id: "NETWORK_0".into(),
        description: format!("Render server at {}", server_addr()),
        num: 0,
        has_half_images: false,
        has_volume_decoupled: false,
        has_osl: false,
        accel_layouts: AccelLayout::BVH2,
        cpu_threads: 0,
        multi_devices: Vec::new(),
    });
}

pub(crate) fn create(
    info: &DeviceInfo,
    stats: Arc<DeviceStats>,
    _background: bool,
) -> LuminaResult<Box<dyn Device>> {
    Ok(Box::new(NetworkDevice::connect(info.clone(), stats)?))
}

pub(crate) fn capabilities() -> String {
    format!("render server at {}\n", server_addr())
}

/// One frame of work as sent to the server.
#[derive(Debug, Serialize, Deserialize)]
struct JobRequest {
    frame: Tile,
    format: PixelFormat,
    features: FeatureRequest,
}

pub struct NetworkDevice {
    info: DeviceInfo,
    stats: Arc<DeviceStats>,
    stream: TcpStream,
    pending: Option<(Tile, PixelFormat)>,
}

impl NetworkDevice {
    pub fn connect(info: DeviceInfo, stats: Arc<DeviceStats>) -> LuminaResult<Self> {
        Self::connect_to(&server_addr(), info, stats)
    }

    pub fn connect_to(addr: &str, info: DeviceInfo, stats: Arc<DeviceStats>) -> LuminaResult<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| LuminaError::network(format!("cannot reach {addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| LuminaError::network(format!("set_nodelay failed: {e}")))?;
        tracing::debug!(%addr, "connected to render server");
        Ok(Self {
            info,
            stats,
            stream,
            pending: None,
        })
    }

    fn send_frame(&mut self, payload: &[u8]) -> LuminaResult<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| LuminaError::network("request payload exceeds frame size limit"))?;
        self.stream
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.stream.write_all(payload))
            .map_err(|e| LuminaError::network(format!("send failed: {e}")))
    }

    fn recv_frame(&mut self) -> LuminaResult<Vec<u8>> {
        let mut len = [0u8; 4];
        self.stream
            .read_exact(&mut len)
            .map_err(|e| LuminaError::network(format!("receive failed: {e}")))?;
        let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
        self.stream
            .read_exact(&mut payload)
            .map_err(|e| LuminaError::network(format!("receive failed: {e}")))?;
        Ok(payload)
    }
}

impl Device for NetworkDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn stats(&self) -> &Arc<DeviceStats> {
        &self.stats
    }

    fn submit(&mut self, job: &RenderJob) -> LuminaResult<()> {
        let request = JobRequest {
            frame: job.frame,
            format: job.format,
            features: job.features,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| LuminaError::network(format!("encode failed: {e}")))?;
        self.send_frame(&payload)?;
        self.pending = Some((job.frame, job.format));
        Ok(())
    }

    fn fetch_result(&mut self, out: &mut PixelBuffer) -> LuminaResult<()> {
        let (frame, format) = self
            .pending
            .ok_or_else(|| LuminaError::render("no result to fetch: submit a job first"))?;
        if out.width() != frame.width || out.height() != frame.height || out.format() != format {
            return Err(LuminaError::validation(
                "output buffer does not match the submitted frame",
            ));
        }

        let pixels = self.recv_frame()?;
        if pixels.len() != out.byte_len() {
            return Err(LuminaError::network(format!(
                "server sent {} bytes, expected {}",
                pixels.len(),
                out.byte_len()
            )));
        }
        out.as_bytes_mut().copy_from_slice(&pixels);
        self.pending = None;
        Ok(())
    }
}
