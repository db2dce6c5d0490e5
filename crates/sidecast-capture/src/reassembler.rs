//! Flow table driving the reassembler loop. See spec section 4.6.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use sidecast_core::{Input, Message, MessageId, PluginError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::flow::{Flow, FlowKey, FlowState};
use crate::sniffer::{self, RawPacket};

#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    /// Capture device name, or `None` for the default route interface.
    pub device: Option<String>,
    /// The service port to filter on: `"tcp and port <port>"`.
    pub port: u16,
    /// How long an accumulating flow may sit idle before being dropped.
    pub expire: Duration,
    /// Max number of concurrently tracked flows before the oldest
    /// incomplete one is evicted. A memory safety valve on the flow
    /// table, independent of downstream backpressure.
    pub max_flows: usize,
    /// Bound on `outbox`, standing in for the downstream channel's
    /// capacity. Once full, packet intake pauses and the oldest
    /// incomplete flow is dropped until the outbox drains.
    pub outbox_capacity: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            device: None,
            port: 80,
            expire: Duration::from_millis(2000),
            max_flows: 1000,
            outbox_capacity: 1000,
        }
    }
}

/// An [`Input`] that reassembles HTTP requests and responses from a raw
/// packet capture, pairing responses back to their originating request.
pub struct RawCaptureInput {
    config: ReassemblerConfig,
    packets: tokio::sync::mpsc::Receiver<RawPacket>,
    flows: HashMap<FlowKey, Flow>,
    pending_requests: HashMap<(IpAddr, u16), (MessageId, i64)>,
    outbox: VecDeque<Message>,
    tick: tokio::time::Interval,
}

impl RawCaptureInput {
    pub fn start(config: ReassemblerConfig) -> Result<Self, sidecast_core::CaptureError> {
        let packets = sniffer::spawn(config.device.clone(), config.port)?;
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Self {
            config,
            packets,
            flows: HashMap::new(),
            pending_requests: HashMap::new(),
            outbox: VecDeque::new(),
            tick,
        })
    }

    fn is_request_flow(&self, key: &FlowKey) -> bool {
        key.dst_port == self.config.port
    }

    fn handle_packet(&mut self, raw: RawPacket) {
        // Downstream backpressure: the outbox stands in for the bounded
        // channel the spec describes. Once full, stop making progress
        // on new packets and shed the oldest incomplete flow rather than
        // let it keep accumulating segments nobody will read.
        if self.outbox.len() >= self.config.outbox_capacity {
            self.evict_oldest_incomplete();
            warn!(capacity = self.config.outbox_capacity, "downstream queue full, pausing packet intake until drain");
            return;
        }

        let now = Instant::now();

        if !self.flows.contains_key(&raw.key) && self.flows.len() >= self.config.max_flows {
            self.evict_oldest_incomplete();
        }

        let flow = self.flows.entry(raw.key).or_insert_with(|| Flow::new(raw.key, now));
        flow.add_segment(raw.seq, &raw.payload, raw.fin, now);

        if flow.state == FlowState::Complete {
            if let Some(complete) = self.flows.remove(&raw.key) {
                self.emit_complete(complete);
            }
        }
    }

    fn evict_oldest_incomplete(&mut self) {
        let oldest = self
            .flows
            .iter()
            .filter(|(_, f)| f.state == FlowState::Accumulating)
            .min_by_key(|(_, f)| f.first_seen)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            warn!(?key, "reassembler at capacity, dropping oldest incomplete flow");
            self.flows.remove(&key);
        }
    }

    fn expire_stale_flows(&mut self) {
        let now = Instant::now();
        let expired: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, f)| f.is_expired(now, self.config.expire))
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            debug!(?key, "flow expired without reaching end-of-message");
            self.flows.remove(&key);
        }
    }

    fn emit_complete(&mut self, flow: Flow) {
        let payload = Bytes::from(flow.reassembled());

        if self.is_request_flow(&flow.key) {
            let msg = Message::new_request(payload);
            self.pending_requests
                .insert((flow.key.src_ip, flow.key.src_port), (msg.id, msg.timestamp));
            self.outbox.push_back(msg);
        } else {
            let client = (flow.key.dst_ip, flow.key.dst_port);
            match self.pending_requests.remove(&client) {
                Some((id, request_ts)) => {
                    self.outbox.push_back(Message::new_response(id, request_ts, payload));
                }
                None => debug!(key = ?flow.key, "response flow with no matching pending request"),
            }
        }
    }
}

#[async_trait]
impl Input for RawCaptureInput {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        loop {
            if let Some(msg) = self.outbox.pop_front() {
                return Ok(Some(msg));
            }

            tokio::select! {
                maybe_packet = self.packets.recv() => {
                    match maybe_packet {
                        Some(raw) => {
                            self.handle_packet(raw);
                            // Drain whatever else is already queued in
                            // one wake, so a packet burst doesn't need a
                            // read() round-trip per packet before the
                            // outbox-capacity check above can engage.
                            while let Ok(raw) = self.packets.try_recv() {
                                self.handle_packet(raw);
                            }
                        }
                        None => return Ok(None),
                    }
                }
                _ = self.tick.tick() => {
                    self.expire_stale_flows();
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn name(&self) -> String {
        format!("raw-tcp(:{})", self.config.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(client_port: u16, server_port: u16) -> FlowKey {
        FlowKey {
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: client_port,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            dst_port: server_port,
        }
    }

    fn bare_input(config: ReassemblerConfig) -> (RawCaptureInput, tokio::sync::mpsc::Sender<RawPacket>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        (
            RawCaptureInput {
                config,
                packets: rx,
                flows: HashMap::new(),
                pending_requests: HashMap::new(),
                outbox: VecDeque::new(),
                tick,
            },
            tx,
        )
    }

    #[tokio::test]
    async fn pairs_request_and_response_flows() {
        let (mut input, tx) = bare_input(ReassemblerConfig {
            port: 80,
            ..Default::default()
        });

        tx.send(RawPacket {
            key: key(51000, 80),
            seq: 0,
            fin: false,
            payload: b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec(),
        })
        .await
        .unwrap();

        let request = input.read().await.unwrap().unwrap();
        assert_eq!(request.kind, sidecast_core::MessageKind::Request);

        tx.send(RawPacket {
            key: key(51000, 80).reversed(),
            seq: 0,
            fin: false,
            payload: b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec(),
        })
        .await
        .unwrap();

        let response = input.read().await.unwrap().unwrap();
        assert_eq!(response.kind, sidecast_core::MessageKind::Response);
        assert_eq!(response.id, request.id);
        assert!(response.latency.is_some());
    }

    #[tokio::test]
    async fn unmatched_response_flow_is_dropped_silently() {
        let (mut input, tx) = bare_input(ReassemblerConfig {
            port: 80,
            ..Default::default()
        });

        tx.send(RawPacket {
            key: key(51000, 80).reversed(),
            seq: 0,
            fin: false,
            payload: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        assert!(input.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pauses_intake_when_outbox_is_full_and_resumes_after_drain() {
        let (mut input, tx) = bare_input(ReassemblerConfig {
            port: 80,
            outbox_capacity: 1,
            ..Default::default()
        });

        // Two distinct flows complete in a single packet each; both
        // packets are queued before the reassembler gets a chance to
        // drain the first one out via read().
        tx.send(RawPacket {
            key: key(51000, 80),
            seq: 0,
            fin: false,
            payload: b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n".to_vec(),
        })
        .await
        .unwrap();
        tx.send(RawPacket {
            key: key(51001, 80),
            seq: 0,
            fin: false,
            payload: b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n".to_vec(),
        })
        .await
        .unwrap();

        // The outbox can hold only one message, so the second packet is
        // dropped on intake rather than queued past capacity.
        let first = input.read().await.unwrap().unwrap();
        assert_eq!(sidecast_core::http::path(&first.payload), Some(b"/a".as_ref()));

        // Resend the dropped flow now that the outbox has drained.
        tx.send(RawPacket {
            key: key(51001, 80),
            seq: 0,
            fin: false,
            payload: b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n".to_vec(),
        })
        .await
        .unwrap();
        let second = input.read().await.unwrap().unwrap();
        assert_eq!(sidecast_core::http::path(&second.payload), Some(b"/b".as_ref()));
    }
}
