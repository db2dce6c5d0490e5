//! HTTP output: bounded queue in front of the worker pool in
//! `worker_pool`, each worker dispatching via `reqwest`. See spec
//! section 4.8.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, Url};
use sidecast_core::{http, Message, ModifierChain, Output, PluginError};
use tracing::{info, warn};

use crate::reporter::ResponseReporter;
use crate::worker_pool::{WorkerCount, WorkerSupervisor};

const DEFAULT_QUEUE_CAPACITY: usize = 1000;

pub struct HttpOutputConfig {
    /// Base URL requests are rewritten onto (scheme + host[:port]).
    pub target: String,
    /// Overrides the `Host` header sent to `target`, independent of it.
    pub host_override: Option<String>,
    /// Unconditional header overrides applied after the modifier chain.
    pub header_overrides: Vec<(String, String)>,
    pub timeout: Duration,
    pub modifier: ModifierChain,
    pub workers: WorkerCount,
    pub queue_capacity: usize,
    pub reporter: Option<Arc<dyn ResponseReporter>>,
}

impl Default for HttpOutputConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            host_override: None,
            header_overrides: Vec::new(),
            timeout: Duration::from_secs(5),
            modifier: ModifierChain::default(),
            workers: WorkerCount::Fixed(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reporter: None,
        }
    }
}

struct Dispatcher {
    client: reqwest::Client,
    config: HttpOutputConfig,
}

/// Dispatches one (already modifier-chain-filtered) request message to
/// the configured target. Never propagates failure upward: transient
/// network errors are logged and dropped per spec section 7.
async fn dispatch_one(dispatcher: Arc<Dispatcher>, msg: Message) {
    let Some(filtered) = dispatcher.config.modifier.apply(msg) else {
        return;
    };

    let method = match http::method(&filtered.payload).and_then(|m| Method::from_bytes(m).ok()) {
        Some(m) => m,
        None => {
            warn!("dropping output message with unparsable method");
            return;
        }
    };
    let path = http::path(&filtered.payload).unwrap_or(b"/");
    let path = String::from_utf8_lossy(path);

    let url = match Url::parse(&format!("{}{}", dispatcher.config.target, path)) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "dropping output message with unparsable target url");
            return;
        }
    };

    let mut builder = dispatcher
        .client
        .request(method, url)
        .timeout(dispatcher.config.timeout)
        .body(http::body(&filtered.payload).to_vec());

    for (name, value) in http::headers(&filtered.payload) {
        if name.eq_ignore_ascii_case("host") {
            continue; // handled below via host_override or left to reqwest's URL authority
        }
        builder = builder.header(name, value);
    }
    for (name, value) in &dispatcher.config.header_overrides {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(host) = &dispatcher.config.host_override {
        builder = builder.header(reqwest::header::HOST, host.as_str());
    }

    let start = Instant::now();
    match builder.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let latency = start.elapsed();
            info!(status, target = %dispatcher.config.target, "dispatched output request");
            if let Some(reporter) = &dispatcher.config.reporter {
                reporter.report(&filtered, Some(status), latency).await;
            }
        }
        Err(e) => {
            // Redirects surface as a non-error: `Policy::none()` still
            // resolves the response that triggered the 3xx, it just
            // doesn't follow the `Location` header.
            warn!(error = %e, target = %dispatcher.config.target, "output dispatch failed");
            if let Some(reporter) = &dispatcher.config.reporter {
                reporter.report(&filtered, None, start.elapsed()).await;
            }
        }
    }
}

type DispatchFn = Box<dyn Fn(Message) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync>;

/// Bounded-queue, elastically-scaled HTTP dispatch output. Implements
/// [`Output`]; enqueueing blocks (backpressure) once the queue is full.
pub struct HttpOutput {
    tx: async_channel::Sender<Message>,
    supervisor: Arc<WorkerSupervisor<DispatchFn>>,
    target: String,
}

/// A cloneable, non-owning window onto one `HttpOutput`'s queue depth
/// and active worker count, for periodic `--stats` reporting. Doesn't
/// keep the output alive: once the output is dropped, `queue_depth`
/// reads 0 and `active_workers` reads whatever was last recorded before
/// the supervisor's workers wound down.
#[derive(Clone)]
pub struct HttpOutputHandle {
    target: String,
    tx: async_channel::Sender<Message>,
    supervisor: Arc<WorkerSupervisor<DispatchFn>>,
}

impl HttpOutputHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn queue_depth(&self) -> usize {
        self.tx.len()
    }

    pub fn active_workers(&self) -> usize {
        self.supervisor.active_workers()
    }
}

impl HttpOutput {
    pub fn new(config: HttpOutputConfig) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PluginError::StartFailed(e.to_string()))?;

        let target = config.target.clone();
        let workers = config.workers;
        let queue_capacity = config.queue_capacity;
        let dispatcher = Arc::new(Dispatcher { client, config });

        let (tx, rx) = async_channel::bounded(queue_capacity);
        let dispatch_fn: DispatchFn = Box::new(move |msg: Message| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move { dispatch_one(dispatcher, msg).await })
        });
        let supervisor = WorkerSupervisor::start(rx, workers, dispatch_fn);

        Ok(Self { tx, supervisor, target })
    }

    /// A cloneable handle for reporting this output's queue depth and
    /// active worker count outside the dispatch path.
    pub fn stats_handle(&self) -> HttpOutputHandle {
        HttpOutputHandle {
            target: self.target.clone(),
            tx: self.tx.clone(),
            supervisor: self.supervisor.clone(),
        }
    }
}

#[async_trait]
impl Output for HttpOutput {
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
        self.tx
            .send(msg.clone())
            .await
            .map_err(|e| PluginError::Other(format!("output queue closed: {e}")))?;
        self.supervisor.maybe_scale();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.tx.close();
        Ok(())
    }

    fn name(&self) -> String {
        format!("http({})", self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecast_core::MessageKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn msg(payload: &'static [u8]) -> Message {
        Message {
            kind: MessageKind::Request,
            id: sidecast_core::MessageId::generate(),
            timestamp: 0,
            latency: None,
            payload: bytes::Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn dispatches_requests_to_the_configured_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut output = HttpOutput::new(HttpOutputConfig {
            target: server.uri(),
            workers: WorkerCount::Fixed(1),
            ..Default::default()
        })
        .unwrap();

        output.write(&msg(b"GET /hello HTTP/1.1\r\n\r\n")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        output.close().await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn modifier_chain_drops_disallowed_paths_before_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let modifier = ModifierChain::new(vec![sidecast_core::Rule::DisallowUrl(
            regex::Regex::new("/admin").unwrap(),
        )]);

        let mut output = HttpOutput::new(HttpOutputConfig {
            target: server.uri(),
            modifier,
            workers: WorkerCount::Fixed(1),
            ..Default::default()
        })
        .unwrap();

        output.write(&msg(b"GET /admin HTTP/1.1\r\n\r\n")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        output.close().await.unwrap();

        server.verify().await;
    }
}
