//! Synthetic input that emits one `GET /` request per second, useful
//! for exercising the rest of the pipeline without live traffic.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sidecast_core::{Input, Message, PluginError};

pub struct DummyInput {
    tick: tokio::time::Interval,
}

impl DummyInput {
    pub fn new() -> Self {
        Self {
            tick: tokio::time::interval(Duration::from_secs(1)),
        }
    }
}

impl Default for DummyInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Input for DummyInput {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        self.tick.tick().await;
        Ok(Some(Message::new_request(Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"))))
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn name(&self) -> String {
        "dummy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_one_get_request_per_tick() {
        let mut input = DummyInput::new();
        let msg = input.read().await.unwrap().unwrap();
        assert_eq!(sidecast_core::http::method(&msg.payload), Some(b"GET".as_ref()));
    }
}
