//! ELM327 protocol knowledge with no I/O: protocol registry, OBD-II command
//! catalog and the response framer/decoder.

pub mod catalog;
pub mod decode;
pub mod error;
pub mod formula;
pub mod frame;
pub mod measurement;
pub mod protocol;
pub mod response;
pub mod tokens;
pub mod types;

pub use catalog::{Command, CommandKey, ReplyLen};
pub use decode::{Decoder, decode};
pub use error::{DecodeError, DecodeResult};
pub use frame::{FrameFormat, HeaderMode};
pub use measurement::{Measurement, Unit};
pub use protocol::Protocol;
pub use response::RawResponse;
pub use tokens::ErrorToken;
