//! Sequential file input/output (`.gor` framing, path templating,
//! rotation, gzip), S3 object listing, HTTP capture input, dummy input,
//! and the plain stdout/null/TCP outputs. See spec sections 4.4, 4.5,
//! 4.7.

pub mod dummy_input;
pub mod error;
pub mod file_input;
pub mod file_output;
pub mod http_input;
pub mod object_store;
pub mod outputs;
pub mod tcp_input;

pub use dummy_input::DummyInput;
pub use error::StorageError;
pub use file_input::{FileInput, FileInputConfig};
pub use file_output::FileOutput;
pub use http_input::HttpInput;
pub use object_store::{parse_s3_url, ObjectStore};
pub use outputs::{NullOutput, StdoutOutput, TcpOutput};
pub use tcp_input::TcpInput;
