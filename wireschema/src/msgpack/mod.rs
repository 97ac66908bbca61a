//! MessagePack codec (2017 spec revision, including the Timestamp
//! extension, type code `-1`).

mod decode;
mod encode;
mod format;

pub use decode::{decode, Decoder};
pub use encode::{encode, Encoder};
