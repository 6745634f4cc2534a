//! Link/IP/TCP header parsing for raw captured frames.
//!
//! Only what the capture driver needs: endpoints, the FIN flag and the TCP
//! payload. Fragments and non-TCP traffic yield `None`.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use super::CapturedPacket;

/// Linux cooked capture (v1) header length.
const SLL_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    RawIp,
    LinuxSll,
}

impl LinkType {
    /// From a libpcap DLT value. Unknown values fall back to Ethernet.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            12 | 101 => LinkType::RawIp,
            113 => LinkType::LinuxSll,
            _ => LinkType::Ethernet,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameParseError {
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// A parsed TCP segment borrowing its payload from the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub fin: bool,
    pub payload: &'a [u8],
}

impl TcpSegment<'_> {
    /// Direction is relative to the monitored host: traffic addressed to
    /// `target` is outbound.
    pub fn into_captured(self, target: IpAddr) -> CapturedPacket {
        CapturedPacket {
            src: self.src,
            dst: self.dst,
            outbound: self.dst.ip() == target,
            fin: self.fin,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

pub fn parse_frame(link: LinkType, data: &[u8]) -> Result<Option<TcpSegment<'_>>, FrameParseError> {
    let sliced = match link {
        LinkType::Ethernet => SlicedPacket::from_ethernet(data),
        LinkType::RawIp => SlicedPacket::from_ip(data),
        LinkType::LinuxSll => {
            if data.len() < SLL_HEADER_LEN {
                return Err(FrameParseError::Truncated("sll header"));
            }
            SlicedPacket::from_ip(&data[SLL_HEADER_LEN..])
        }
    }
    .map_err(|e| FrameParseError::Malformed(e.to_string()))?;

    let (src, dst) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        _ => return Ok(None),
    };

    // fragmented datagrams carry no transport slice
    match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Ok(Some(TcpSegment {
            src: SocketAddr::new(src, tcp.source_port()),
            dst: SocketAddr::new(dst, tcp.destination_port()),
            fin: tcp.fin(),
            payload: tcp.payload(),
        })),
        _ => Ok(None),
    }
}
