//! Wire protocol: endpoints, built-in method names, envelope helpers.
//!
//! Payload shapes, each a concatenation of top-level MessagePack values:
//!
//! | Message      | Payload                              |
//! |--------------|--------------------------------------|
//! | sync request | `method, arg0, arg1, ...`            |
//! | async request| `method, token, arg0, ...`           |
//! | reply        | `error_code[, return_value]`         |
//! | async result | `client_id, token, cb_arg0, ...`     |
//! | event        | `event_name, arg0, arg1, ...`        |
//!
//! The request socket additionally frames payloads as
//! `[client_id][empty][payload]` (ROUTER side); publish sockets carry the
//! payload as a single frame. A void reply is exactly the error code, with
//! nothing after it.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{PackArgs, Packer, Unpacker};
use crate::error::{CodecError, Error, ErrorCode, Result};

/// Default request/reply endpoint (ROUTER on the server, DEALER on clients).
pub const DEFAULT_RPC_ENDPOINT: &str = "tcp://127.0.0.1:5555";
/// Default async-result publish endpoint.
pub const DEFAULT_ASYNC_ENDPOINT: &str = "tcp://127.0.0.1:5556";
/// Default event publish endpoint.
pub const DEFAULT_EVENT_ENDPOINT: &str = "tcp://127.0.0.1:5557";

/// Built-in method: returns `Vec<String>` of `"name: signature"` lines.
pub const LIST_METHODS: &str = "list_methods";
/// Built-in method: publishes a greeting back to the caller on both publish
/// channels so the caller can observe that its subscriptions are live.
pub const HANDSHAKE: &str = "handshake";
/// Greeting returned (and published) by the handshake.
pub const HANDSHAKE_REPLY: &str = "hi";

/// Encode `[method, args...]`.
pub(crate) fn encode_request<A: PackArgs>(method: &str, args: &A) -> Result<Vec<u8>> {
    let mut packer = Packer::new();
    packer.pack(method)?;
    args.pack_into(&mut packer)?;
    Ok(packer.into_vec())
}

/// Encode `[method, token, args...]`.
pub(crate) fn encode_async_request<A: PackArgs>(
    method: &str,
    token: &str,
    args: &A,
) -> Result<Vec<u8>> {
    let mut packer = Packer::new();
    packer.pack(method)?;
    packer.pack(token)?;
    args.pack_into(&mut packer)?;
    Ok(packer.into_vec())
}

/// Encode a success reply: `[kNoError, value]`, or just `[kNoError]` for
/// void returns. Encode failures degrade to an `Unknown` error reply so the
/// caller is never left without an answer.
pub(crate) fn encode_reply<R: Serialize>(value: &R) -> Vec<u8> {
    fn try_encode<R: Serialize>(value: &R) -> std::result::Result<Vec<u8>, CodecError> {
        let mut packer = Packer::new();
        packer.pack(&ErrorCode::NoError)?;
        packer.pack_return(value)?;
        Ok(packer.into_vec())
    }
    match try_encode(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(%err, "failed to encode reply value");
            encode_error_reply(ErrorCode::Unknown)
        }
    }
}

/// Encode an error-only reply: `[code]`.
pub(crate) fn encode_error_reply(code: ErrorCode) -> Vec<u8> {
    // Codes are 0..=3, always a single positive-fixint byte.
    vec![code as u8]
}

/// Decode a reply: read the error code, surface non-zero codes as
/// [`Error::Rpc`], otherwise decode the return value.
pub(crate) fn decode_reply<R: DeserializeOwned>(payload: &[u8]) -> Result<R> {
    let mut unpacker = Unpacker::new(payload);
    let code: ErrorCode = unpacker.unpack()?;
    if code != ErrorCode::NoError {
        return Err(Error::Rpc(code));
    }
    Ok(unpacker.unpack_return::<R>()?)
}

/// Decode just the leading method name of a request.
pub(crate) fn peek_method(payload: &[u8]) -> std::result::Result<String, CodecError> {
    Unpacker::new(payload).unpack::<String>()
}
