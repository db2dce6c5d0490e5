pub mod codec;
pub mod error;
pub mod http;
pub mod limiter;
pub mod message;
pub mod modifier;
pub mod plugin;

pub use error::{CaptureError, CodecError, LimiterError, ModifierError, PluginError};
pub use limiter::{LimitedInput, LimitedOutput, LimiterSpec};
pub use message::{now_nanos, Message, MessageId, MessageKind};
pub use modifier::{FilterMode, ModifierChain, Rule};
pub use plugin::{Input, Output};
