//! libpcap backend. Passive: segments are observed, never diverted, so
//! re-injection is a no-op.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ::pcap::{Active, Capture, Device};

use super::frame::{parse_frame, LinkType};
use super::{BackendFactory, CaptureBackend, CaptureError, CapturedPacket};
use tap_core::config::CaptureConfig;

pub struct PcapBackend {
    capture: Mutex<Capture<Active>>,
    link: LinkType,
    target: IpAddr,
    open: AtomicBool,
}

fn map_error(e: ::pcap::Error) -> CaptureError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("not permitted") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::Backend(message)
    }
}

impl CaptureBackend for PcapBackend {
    fn recv(&self) -> Result<CapturedPacket, CaptureError> {
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !self.is_open() {
                return Err(CaptureError::Closed);
            }
            let frame = match capture.next_packet() {
                Ok(frame) => frame,
                Err(::pcap::Error::TimeoutExpired) => continue,
                Err(::pcap::Error::NoMorePackets) => return Err(CaptureError::Closed),
                Err(e) => return Err(map_error(e)),
            };
            match parse_frame(self.link, frame.data) {
                Ok(Some(segment)) => return Ok(segment.into_captured(self.target)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::trace!(target_ip = %self.target, error = %e, "unparseable frame skipped");
                    continue;
                }
            }
        }
    }

    fn send(&self, _packet: &CapturedPacket) -> Result<(), CaptureError> {
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Opens one live capture per target, filtered to that host's TCP traffic.
pub struct PcapFactory {
    config: CaptureConfig,
}

impl PcapFactory {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn device(&self) -> Result<Device, CaptureError> {
        if self.config.interface.is_empty() {
            return Device::lookup()
                .map_err(map_error)?
                .ok_or_else(|| CaptureError::Backend("no capture device found".into()));
        }
        Device::list()
            .map_err(map_error)?
            .into_iter()
            .find(|d| d.name == self.config.interface)
            .ok_or_else(|| {
                CaptureError::Backend(format!("interface '{}' not found", self.config.interface))
            })
    }
}

impl BackendFactory for PcapFactory {
    fn open(&self, target: IpAddr) -> Result<Arc<dyn CaptureBackend>, CaptureError> {
        let device = self.device()?;
        tracing::debug!(device = %device.name, target_ip = %target, "opening pcap capture");

        let mut capture = Capture::from_device(device)
            .map_err(map_error)?
            .snaplen(self.config.snaplen)
            .promisc(false)
            .timeout(self.config.timeout_ms)
            .immediate_mode(true)
            .open()
            .map_err(map_error)?;

        let filter = format!("host {target} and tcp");
        capture.filter(&filter, true).map_err(map_error)?;
        let link = LinkType::from_dlt(capture.get_datalink().0);

        Ok(Arc::new(PcapBackend {
            capture: Mutex::new(capture),
            link,
            target,
            open: AtomicBool::new(true),
        }))
    }
}
