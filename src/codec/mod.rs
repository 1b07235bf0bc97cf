//! MessagePack codec adapter.
//!
//! Encodes a heterogeneous argument list into one self-describing byte
//! buffer and decodes it back into typed slots, positionally. [`Packer`]
//! and [`Unpacker`] are the value codec; [`PackArgs`] and [`UnpackArgs`]
//! lift it to typed tuples.

mod args;
mod msgpack;

pub use args::{PackArgs, UnpackArgs};
pub use msgpack::{Packer, Unpacker};

pub(crate) use args::{render_signature, short_type_name};
