//! JSON codec (RFC 8259). UTF-8 only; the decoder rejects trailing
//! commas, comments, and unquoted keys.

mod decode;
mod encode;

pub use decode::{decode, Decoder};
pub use encode::{encode, Encoder};
