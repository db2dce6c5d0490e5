//! Dynamic dispatch over heterogeneous inputs/outputs as a capability
//! set (`read`/`close`, `write`/`close`), per spec design notes (§9).

use async_trait::async_trait;

use crate::error::PluginError;
use crate::message::Message;

/// A source of framed messages. Implementations include the file,
/// HTTP-listener, dummy, and reassembler-backed inputs.
#[async_trait]
pub trait Input: Send {
    /// Read the next message, or `None` on graceful exhaustion (e.g. a
    /// non-looping file input reaching EOF).
    async fn read(&mut self) -> Result<Option<Message>, PluginError>;

    /// Release any held resources. Idempotent.
    async fn close(&mut self) -> Result<(), PluginError>;

    fn name(&self) -> String;
}

/// A sink for framed messages. Implementations include file, HTTP,
/// stdout, null, TCP, and Kafka outputs.
#[async_trait]
pub trait Output: Send {
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError>;

    /// Release any held resources. Idempotent.
    async fn close(&mut self) -> Result<(), PluginError>;

    fn name(&self) -> String;
}

// Lets `LimitedInput`/`LimitedOutput` wrap a trait object directly, so the
// binary can apply a limiter to any boxed input/output it has assembled.
#[async_trait]
impl Input for Box<dyn Input> {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        (**self).read().await
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        (**self).close().await
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

#[async_trait]
impl Output for Box<dyn Output> {
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
        (**self).write(msg).await
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        (**self).close().await
    }

    fn name(&self) -> String {
        (**self).name()
    }
}
