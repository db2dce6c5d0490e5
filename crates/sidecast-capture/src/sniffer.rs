//! Live packet capture via libpcap, decoded into TCP segments.

use std::net::IpAddr;

use pcap::{Capture, Device};
use tokio::sync::mpsc;
use tracing::warn;

use crate::flow::FlowKey;

/// One TCP segment lifted off the wire, stripped of link/IP framing.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub key: FlowKey,
    pub seq: u32,
    pub fin: bool,
    pub payload: Vec<u8>,
}

/// Opens a live capture on `device` (or the default route interface)
/// filtered to `"tcp and port <port>"`, decoding packets on a dedicated
/// OS thread since libpcap's read loop is blocking.
pub fn spawn(
    device: Option<String>,
    port: u16,
) -> Result<mpsc::Receiver<RawPacket>, sidecast_core::CaptureError> {
    let device = resolve_device(device)?;

    let mut cap = Capture::from_device(device)
        .map_err(|e| sidecast_core::CaptureError::StartFailed(e.to_string()))?
        .promisc(true)
        .snaplen(65535)
        .timeout(200)
        .open()
        .map_err(|e| sidecast_core::CaptureError::StartFailed(e.to_string()))?;

    cap.filter(&format!("tcp and port {port}"), true)
        .map_err(|e| sidecast_core::CaptureError::StartFailed(e.to_string()))?;

    let (tx, rx) = mpsc::channel(1000);

    std::thread::spawn(move || {
        loop {
            match cap.next_packet() {
                Ok(packet) => {
                    if let Some(raw) = decode(packet.data) {
                        if tx.blocking_send(raw).is_err() {
                            break;
                        }
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    warn!("pcap capture loop ended: {e}");
                    break;
                }
            }
        }
    });

    Ok(rx)
}

fn resolve_device(name: Option<String>) -> Result<Device, sidecast_core::CaptureError> {
    match name {
        Some(name) => Device::list()
            .map_err(|e| sidecast_core::CaptureError::StartFailed(e.to_string()))?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| sidecast_core::CaptureError::StartFailed(format!("no such device: {name}"))),
        None => Device::lookup()
            .map_err(|e| sidecast_core::CaptureError::StartFailed(e.to_string()))?
            .ok_or_else(|| sidecast_core::CaptureError::StartFailed("no default capture device found".into())),
    }
}

fn decode(data: &[u8]) -> Option<RawPacket> {
    use etherparse::{InternetSlice, SlicedPacket, TransportSlice};

    let sliced = SlicedPacket::from_ethernet(data).ok()?;
    let (src_ip, dst_ip): (IpAddr, IpAddr) = match sliced.ip? {
        InternetSlice::Ipv4(ipv4, _) => (ipv4.source_addr().into(), ipv4.destination_addr().into()),
        InternetSlice::Ipv6(ipv6, _) => (ipv6.source_addr().into(), ipv6.destination_addr().into()),
    };

    let TransportSlice::Tcp(tcp) = sliced.transport? else {
        return None;
    };

    Some(RawPacket {
        key: FlowKey {
            src_ip,
            src_port: tcp.source_port(),
            dst_ip,
            dst_port: tcp.destination_port(),
        },
        seq: tcp.sequence_number(),
        fin: tcp.fin(),
        payload: sliced.payload.to_vec(),
    })
}
