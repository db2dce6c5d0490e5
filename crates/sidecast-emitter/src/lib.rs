//! Central fan-in/fan-out coordinator plus optional middleware
//! subprocess piping. See spec section 4.9.

pub mod emitter;
pub mod error;
pub mod middleware;

pub use emitter::{BroadcastPolicy, Emitter, EmitterStats};
pub use error::EmitterError;
pub use middleware::Middleware;
