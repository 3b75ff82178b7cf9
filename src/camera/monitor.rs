use crate::config::MonitorConfig;
use crate::frame::CameraId;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace};

/// Largest JPEG that still fits a single datagram with its header
pub const MAX_DATAGRAM_PAYLOAD: usize = 60_000;

const HEADER_LEN: usize = 5;

/// Fire-and-forget UDP publisher of raw camera frames
///
/// Each datagram carries one JPEG: `[camera id: u8][length: u32 BE][jpeg]`.
pub struct UdpMonitor {
    socket: UdpSocket,
    target: SocketAddr,
    quality: u8,
    sent: AtomicU64,
    skipped: AtomicU64,
}

impl UdpMonitor {
    pub fn new(config: &MonitorConfig) -> std::io::Result<Self> {
        let target = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("Monitor host {} did not resolve", config.host),
                )
            })?;

        let bind_addr = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        info!("Frame monitor publishing to {}", target);

        Ok(Self {
            socket,
            target,
            quality: config.jpeg_quality,
            sent: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        })
    }

    /// Encode and send one frame; failures are logged and dropped
    pub fn publish(&self, camera: CameraId, frame: &RgbImage) {
        let mut jpeg = Vec::new();
        let encoded = JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            ColorType::Rgb8,
        );
        if let Err(e) = encoded {
            debug!("Monitor JPEG encode failed for camera {}: {}", camera, e);
            return;
        }

        if jpeg.len() > MAX_DATAGRAM_PAYLOAD {
            trace!(
                "Monitor frame from camera {} too large ({} bytes), skipped",
                camera,
                jpeg.len()
            );
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let packet = encode_packet(camera, &jpeg);
        match self.socket.send_to(&packet, self.target) {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                trace!("Monitor send failed for camera {}: {}", camera, e);
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

fn encode_packet(camera: CameraId, jpeg: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + jpeg.len());
    packet.push(camera);
    packet.extend_from_slice(&(jpeg.len() as u32).to_be_bytes());
    packet.extend_from_slice(jpeg);
    packet
}
