//! Per-flow TCP reassembly state machine. See spec section 4.6.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Directional 4-tuple identifying one half of a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl FlowKey {
    /// The key an in-reply response flow would carry.
    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Accumulating,
    Complete,
}

/// One flow's accumulated segments, ordered by sequence number so that
/// reassembly is byte-exact regardless of packet arrival order.
#[derive(Debug)]
pub struct Flow {
    pub key: FlowKey,
    segments: BTreeMap<u32, Vec<u8>>,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub state: FlowState,
    fin_seen: bool,
}

impl Flow {
    pub fn new(key: FlowKey, now: Instant) -> Self {
        Self {
            key,
            segments: BTreeMap::new(),
            first_seen: now,
            last_seen: now,
            state: FlowState::Accumulating,
            fin_seen: false,
        }
    }

    /// Fold in one TCP segment. Re-evaluates completion after every insert.
    pub fn add_segment(&mut self, seq: u32, payload: &[u8], fin: bool, now: Instant) {
        self.last_seen = now;
        if !payload.is_empty() {
            self.segments.entry(seq).or_insert_with(|| payload.to_vec());
        }
        self.fin_seen |= fin;

        if self.state == FlowState::Accumulating
            && (is_http_complete(&self.reassembled()) || (self.fin_seen && !self.segments.is_empty()))
        {
            self.state = FlowState::Complete;
        }
    }

    /// The flow's bytes merged in sequence-number order.
    pub fn reassembled(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for seg in self.segments.values() {
            out.extend_from_slice(seg);
        }
        out
    }

    pub fn is_expired(&self, now: Instant, expire: Duration) -> bool {
        self.state == FlowState::Accumulating && now.duration_since(self.last_seen) >= expire
    }
}

/// Per spec 4.6: detect HTTP end-of-message from the reassembled bytes so
/// far, without waiting for FIN.
fn is_http_complete(buf: &[u8]) -> bool {
    let Some(header_end) = memchr::memmem::find(buf, b"\r\n\r\n") else {
        return false;
    };
    let head = &buf[..header_end];
    let first_line_end = memchr::memmem::find(head, b"\r\n").unwrap_or(head.len());
    let start_line = &head[..first_line_end];
    let method = start_line.split(|&b| b == b' ').next().unwrap_or(b"");
    let no_body_method = matches!(method, b"GET" | b"HEAD" | b"DELETE" | b"OPTIONS");

    let content_length = find_header(head, b"content-length")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = find_header(head, b"transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false);

    let body = &buf[header_end + 4..];
    if chunked {
        return memchr::memmem::find(body, b"0\r\n\r\n").is_some();
    }
    if let Some(n) = content_length {
        return body.len() >= n;
    }
    no_body_method
}

fn find_header<'a>(head: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    for line in head.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if let Some(colon) = memchr::memchr(b':', line) {
            if line[..colon].eq_ignore_ascii_case(name) {
                let v = &line[colon + 1..];
                return Some(v.strip_prefix(b" ").unwrap_or(v));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key() -> FlowKey {
        FlowKey {
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: 51000,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            dst_port: 80,
        }
    }

    #[test]
    fn reassembles_out_of_order_segments() {
        let now = Instant::now();
        let mut flow = Flow::new(key(), now);
        let body = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        flow.add_segment(10, &body[10..], false, now);
        flow.add_segment(0, &body[..10], false, now);
        assert_eq!(flow.reassembled(), body);
        assert_eq!(flow.state, FlowState::Complete);
    }

    #[test]
    fn completes_on_content_length() {
        let now = Instant::now();
        let mut flow = Flow::new(key(), now);
        flow.add_segment(0, b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\n", false, now);
        assert_eq!(flow.state, FlowState::Accumulating);
        flow.add_segment(100, b"body", false, now);
        assert_eq!(flow.state, FlowState::Complete);
    }

    #[test]
    fn no_body_method_completes_at_header_end() {
        let now = Instant::now();
        let mut flow = Flow::new(key(), now);
        flow.add_segment(0, b"DELETE /x HTTP/1.1\r\nHost: a\r\n\r\n", false, now);
        assert_eq!(flow.state, FlowState::Complete);
    }

    #[test]
    fn chunked_completes_on_terminal_chunk() {
        let now = Instant::now();
        let mut flow = Flow::new(key(), now);
        flow.add_segment(
            0,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\ntest\r\n0\r\n\r\n",
            false,
            now,
        );
        assert_eq!(flow.state, FlowState::Complete);
    }

    #[test]
    fn idle_flow_without_end_of_message_expires() {
        let now = Instant::now();
        let mut flow = Flow::new(key(), now);
        flow.add_segment(0, b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n", false, now);
        let later = now + Duration::from_secs(5);
        assert!(flow.is_expired(later, Duration::from_secs(2)));
    }

    #[test]
    fn fin_without_known_length_completes_flow() {
        let now = Instant::now();
        let mut flow = Flow::new(key(), now);
        flow.add_segment(0, b"HTTP/1.1 200 OK\r\n\r\n", true, now);
        assert_eq!(flow.state, FlowState::Complete);
    }
}
