//! Bridge between typed Rust values and the dynamic [`Value`] model, via
//! serde. `to_value` a typed struct, hand the result to either codec;
//! decode to a `Value`, `from_value` it back into typed data.

mod de;
mod ser;

pub use de::from_value;
pub use ser::to_value;
