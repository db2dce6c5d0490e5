//! Central fan-in/fan-out coordinator. See spec section 4.9.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use sidecast_core::{Input, Message, Output};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::EmitterError;
use crate::middleware::Middleware;

const INPUT_CHANNEL_CAPACITY: usize = 1000;

/// How a message is broadcast to the configured outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastPolicy {
    /// Default: every output receives every message.
    FanOutToAll,
    /// `--split-output`: round-robin across outputs.
    SplitOutput,
}

/// Running counters for periodic `--stats` reporting: total messages
/// read from inputs, total writes dispatched to outputs, and the
/// current depth of the shared dispatch queue (incremented when an
/// input hands a message off, decremented once it's been dispatched or
/// handed to the middleware).
#[derive(Default)]
pub struct EmitterStats {
    ingress: AtomicU64,
    egress: AtomicU64,
    queue_depth: AtomicI64,
}

impl EmitterStats {
    pub fn ingress(&self) -> u64 {
        self.ingress.load(Ordering::Relaxed)
    }

    pub fn egress(&self) -> u64 {
        self.egress.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

pub struct Emitter {
    inputs: Vec<Box<dyn Input>>,
    outputs: Vec<Box<dyn Output>>,
    middleware_cmd: Option<String>,
    policy: BroadcastPolicy,
    stats: Arc<EmitterStats>,
}

impl Emitter {
    pub fn new(
        inputs: Vec<Box<dyn Input>>,
        outputs: Vec<Box<dyn Output>>,
        middleware_cmd: Option<String>,
        policy: BroadcastPolicy,
    ) -> Self {
        Self { inputs, outputs, middleware_cmd, policy, stats: Arc::new(EmitterStats::default()) }
    }

    /// A cloneable handle onto this emitter's running counters, valid
    /// for the lifetime of the returned `Arc` regardless of when `run`
    /// is called or how long it takes to return.
    pub fn stats(&self) -> Arc<EmitterStats> {
        self.stats.clone()
    }

    /// Runs until every input is exhausted or `shutdown` fires,
    /// whichever comes first. Drains outstanding messages already in
    /// the dispatch channel before returning, then closes outputs in
    /// reverse declaration order.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<(), EmitterError> {
        let (input_tx, input_rx) = mpsc::channel::<Message>(INPUT_CHANNEL_CAPACITY);

        let mut reader_handles = Vec::with_capacity(self.inputs.len());
        for mut input in self.inputs.drain(..) {
            let tx = input_tx.clone();
            let stats = self.stats.clone();
            reader_handles.push(tokio::spawn(async move {
                loop {
                    match input.read().await {
                        Ok(Some(msg)) => {
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                            stats.ingress.fetch_add(1, Ordering::Relaxed);
                            stats.queue_depth.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(input = %input.name(), error = %e, "input read failed, stopping this input");
                            break;
                        }
                    }
                }
                let _ = input.close().await;
            }));
        }
        drop(input_tx);

        let mut dispatch_rx = if let Some(cmd) = self.middleware_cmd.take() {
            let middleware = Middleware::spawn(&cmd)?;
            let (out_tx, out_rx) = mpsc::channel::<Message>(INPUT_CHANNEL_CAPACITY);
            middleware.into_tasks(input_rx, out_tx)?;
            out_rx
        } else {
            input_rx
        };

        let mut rr_counter: usize = 0;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                maybe_msg = dispatch_rx.recv() => {
                    match maybe_msg {
                        None => break,
                        Some(msg) => {
                            self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                            self.dispatch(&msg, &mut rr_counter).await;
                        }
                    }
                }
            }
        }

        // Drain whatever is already queued without blocking on new arrivals.
        while let Ok(msg) = dispatch_rx.try_recv() {
            self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
            self.dispatch(&msg, &mut rr_counter).await;
        }

        for output in self.outputs.iter_mut().rev() {
            if let Err(e) = output.close().await {
                warn!(output = %output.name(), error = %e, "error closing output");
            }
        }

        for handle in reader_handles {
            handle.abort();
        }

        Ok(())
    }

    async fn dispatch(&mut self, msg: &Message, rr_counter: &mut usize) {
        if self.outputs.is_empty() {
            return;
        }
        self.stats.egress.fetch_add(1, Ordering::Relaxed);
        match self.policy {
            BroadcastPolicy::SplitOutput => {
                let idx = *rr_counter % self.outputs.len();
                *rr_counter = rr_counter.wrapping_add(1);
                if let Err(e) = self.outputs[idx].write(msg).await {
                    warn!(output = %self.outputs[idx].name(), error = %e, "output write failed");
                }
            }
            BroadcastPolicy::FanOutToAll => {
                for output in self.outputs.iter_mut() {
                    if let Err(e) = output.write(msg).await {
                        warn!(output = %output.name(), error = %e, "output write failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sidecast_core::{Message, MessageId, MessageKind, PluginError};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct VecInput {
        items: Vec<Message>,
    }

    #[async_trait]
    impl Input for VecInput {
        async fn read(&mut self) -> Result<Option<Message>, PluginError> {
            Ok(if self.items.is_empty() { None } else { Some(self.items.remove(0)) })
        }
        async fn close(&mut self) -> Result<(), PluginError> {
            Ok(())
        }
        fn name(&self) -> String {
            "vec".to_string()
        }
    }

    struct RecordingOutput {
        received: Arc<Mutex<Vec<Message>>>,
        closed_order: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    }

    #[async_trait]
    impl Output for RecordingOutput {
        async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
            self.received.lock().await.push(msg.clone());
            Ok(())
        }
        async fn close(&mut self) -> Result<(), PluginError> {
            self.closed_order.lock().await.push(self.label);
            Ok(())
        }
        fn name(&self) -> String {
            self.label.to_string()
        }
    }

    fn msg(ts: i64) -> Message {
        Message {
            kind: MessageKind::Request,
            id: MessageId::generate(),
            timestamp: ts,
            latency: None,
            payload: bytes::Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"),
        }
    }

    #[tokio::test]
    async fn fan_out_delivers_every_message_to_every_output() {
        let input = VecInput { items: vec![msg(1), msg(2)] };
        let received_a = Arc::new(Mutex::new(Vec::new()));
        let received_b = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(Vec::new()));

        let out_a = RecordingOutput { received: received_a.clone(), closed_order: closed.clone(), label: "a" };
        let out_b = RecordingOutput { received: received_b.clone(), closed_order: closed.clone(), label: "b" };

        let emitter = Emitter::new(vec![Box::new(input)], vec![Box::new(out_a), Box::new(out_b)], None, BroadcastPolicy::FanOutToAll);
        let (_tx, rx) = mpsc::channel(1);
        emitter.run(rx).await.unwrap();

        assert_eq!(received_a.lock().await.len(), 2);
        assert_eq!(received_b.lock().await.len(), 2);
        // Outputs close in reverse declaration order.
        assert_eq!(*closed.lock().await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn split_output_round_robins_across_outputs() {
        let input = VecInput { items: vec![msg(1), msg(2), msg(3), msg(4)] };
        let received_a = Arc::new(Mutex::new(Vec::new()));
        let received_b = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(Vec::new()));

        let out_a = RecordingOutput { received: received_a.clone(), closed_order: closed.clone(), label: "a" };
        let out_b = RecordingOutput { received: received_b.clone(), closed_order: closed.clone(), label: "b" };

        let emitter = Emitter::new(vec![Box::new(input)], vec![Box::new(out_a), Box::new(out_b)], None, BroadcastPolicy::SplitOutput);
        let (_tx, rx) = mpsc::channel(1);
        emitter.run(rx).await.unwrap();

        assert_eq!(received_a.lock().await.len(), 2);
        assert_eq!(received_b.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn empty_outputs_are_a_no_op() {
        let input = VecInput { items: vec![msg(1)] };
        let emitter: Emitter = Emitter::new(vec![Box::new(input)], Vec::new(), None, BroadcastPolicy::FanOutToAll);
        let (_tx, rx) = mpsc::channel(1);
        emitter.run(rx).await.unwrap();
    }

    #[tokio::test]
    async fn stats_track_ingress_egress_and_drain_to_zero_queue_depth() {
        let input = VecInput { items: vec![msg(1), msg(2)] };
        let out = RecordingOutput {
            received: Arc::new(Mutex::new(Vec::new())),
            closed_order: Arc::new(Mutex::new(Vec::new())),
            label: "a",
        };

        let emitter = Emitter::new(vec![Box::new(input)], vec![Box::new(out)], None, BroadcastPolicy::FanOutToAll);
        let stats = emitter.stats();
        let (_tx, rx) = mpsc::channel(1);
        emitter.run(rx).await.unwrap();

        assert_eq!(stats.ingress(), 2);
        assert_eq!(stats.egress(), 2);
        assert_eq!(stats.queue_depth(), 0);
    }
}
