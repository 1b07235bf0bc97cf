//! Method registry: names to type-erased invokers.
//!
//! Each registration stores a closure that owns the handler plus the static
//! types needed to decode its arguments and encode its return. The closure
//! takes the request context and produces the complete reply payload, so
//! the serve loop never sees a type.
//!
//! Failure semantics: argument decode failures answer `BadPayload`, a
//! panicking handler answers `Unknown` (logged at error level), and lookup
//! misses are the dispatcher's `BadMethod`. Registering a duplicate name
//! replaces the earlier entry.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::codec::{PackArgs, UnpackArgs, Unpacker};
use crate::error::{CodecError, ErrorCode};
use crate::handler::{AsyncService, BoundService, Callback, SyncService};
use crate::protocol::{encode_error_reply, encode_reply};
use crate::transport::PubHandle;

/// Everything an invoker needs about the request being dispatched.
pub(crate) struct InvokeCx<'a> {
    /// ROUTER identity frame of the calling client.
    pub client_id: &'a [u8],
    /// Full request payload: `[method(, token), args...]`.
    pub payload: &'a [u8],
    /// Async-result publish channel, captured by async callbacks.
    pub async_pub: &'a PubHandle,
}

type InvokerFn = Box<dyn Fn(&InvokeCx<'_>) -> Vec<u8> + Send + Sync>;

pub(crate) struct RegisteredMethod {
    pub signature: String,
    invoker: InvokerFn,
}

impl RegisteredMethod {
    pub fn invoke(&self, cx: &InvokeCx<'_>) -> Vec<u8> {
        (self.invoker)(cx)
    }
}

/// Maps method names to invokers. Sync and async methods live in separate
/// tables; dispatch tries sync first. `BTreeMap` keeps listings in name
/// order.
#[derive(Default)]
pub struct Registry {
    sync_methods: BTreeMap<String, RegisteredMethod>,
    async_methods: BTreeMap<String, RegisteredMethod>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain method. A duplicate name replaces the earlier
    /// registration (last writer wins).
    pub fn register_method<F, Args>(&mut self, name: &str, handler: F)
    where
        F: SyncService<Args>,
        Args: UnpackArgs + 'static,
    {
        let method = name.to_string();
        let invoker: InvokerFn = Box::new(move |cx| {
            let args = match decode_sync_args::<Args>(cx.payload) {
                Ok(args) => args,
                Err(err) => {
                    tracing::warn!(method = %method, %err, "failed to decode call arguments");
                    return encode_error_reply(ErrorCode::BadPayload);
                }
            };
            match catch_unwind(AssertUnwindSafe(|| handler.invoke(args))) {
                Ok(ret) => encode_reply(&ret),
                Err(_) => {
                    tracing::error!(method = %method, "handler panicked");
                    encode_error_reply(ErrorCode::Unknown)
                }
            }
        });
        self.sync_methods.insert(
            name.to_string(),
            RegisteredMethod {
                signature: F::signature(),
                invoker,
            },
        );
    }

    /// Register a method bound to shared receiver state. The receiver is
    /// owned externally and must outlive the server; `Arc` makes that hold.
    pub fn register_bound_method<F, Recv, Args>(&mut self, name: &str, receiver: Arc<Recv>, handler: F)
    where
        F: BoundService<Recv, Args>,
        Recv: Send + Sync + 'static,
        Args: UnpackArgs + 'static,
    {
        let method = name.to_string();
        let invoker: InvokerFn = Box::new(move |cx| {
            let args = match decode_sync_args::<Args>(cx.payload) {
                Ok(args) => args,
                Err(err) => {
                    tracing::warn!(method = %method, %err, "failed to decode call arguments");
                    return encode_error_reply(ErrorCode::BadPayload);
                }
            };
            match catch_unwind(AssertUnwindSafe(|| handler.invoke(&receiver, args))) {
                Ok(ret) => encode_reply(&ret),
                Err(_) => {
                    tracing::error!(method = %method, "handler panicked");
                    encode_error_reply(ErrorCode::Unknown)
                }
            }
        });
        self.sync_methods.insert(
            name.to_string(),
            RegisteredMethod {
                signature: F::signature(),
                invoker,
            },
        );
    }

    /// Register an async method. The handler's first parameter is the
    /// [`Callback`] it fires later; the synchronous reply carries only the
    /// handler's (usually void) return as acknowledgement.
    pub fn register_async_method<F, CbArgs, Args>(&mut self, name: &str, handler: F)
    where
        F: AsyncService<CbArgs, Args>,
        CbArgs: PackArgs + Send + 'static,
        Args: UnpackArgs + 'static,
    {
        let method = name.to_string();
        let invoker: InvokerFn = Box::new(move |cx| {
            let (token, args) = match decode_async_args::<Args>(cx.payload) {
                Ok(parts) => parts,
                Err(err) => {
                    tracing::warn!(method = %method, %err, "failed to decode async call arguments");
                    return encode_error_reply(ErrorCode::BadPayload);
                }
            };
            // The subscription topic is the caller's identity, verbatim.
            let topic = String::from_utf8_lossy(cx.client_id).into_owned();
            let callback = Callback::new(topic, token, cx.async_pub.clone());
            match catch_unwind(AssertUnwindSafe(|| handler.invoke(callback, args))) {
                Ok(ret) => encode_reply(&ret),
                Err(_) => {
                    tracing::error!(method = %method, "async handler panicked");
                    encode_error_reply(ErrorCode::Unknown)
                }
            }
        });
        self.async_methods.insert(
            name.to_string(),
            RegisteredMethod {
                signature: F::signature(),
                invoker,
            },
        );
    }

    pub(crate) fn lookup_sync(&self, name: &str) -> Option<&RegisteredMethod> {
        self.sync_methods.get(name)
    }

    pub(crate) fn lookup_async(&self, name: &str) -> Option<&RegisteredMethod> {
        self.async_methods.get(name)
    }

    /// Sync `(name, signature)` pairs in name order.
    pub(crate) fn sync_signatures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sync_methods
            .iter()
            .map(|(name, method)| (name.as_str(), method.signature.as_str()))
    }

    /// Async `(name, signature)` pairs in name order.
    pub(crate) fn async_signatures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.async_methods
            .iter()
            .map(|(name, method)| (name.as_str(), method.signature.as_str()))
    }

    /// `"name: signature"` lines, sync registrations first, each table in
    /// name order.
    pub fn list(&self) -> Vec<String> {
        self.sync_signatures()
            .chain(self.async_signatures())
            .map(|(name, signature)| format!("{name}: {signature}"))
            .collect()
    }

    /// Number of registered methods across both tables.
    pub fn len(&self) -> usize {
        self.sync_methods.len() + self.async_methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sync_methods.is_empty() && self.async_methods.is_empty()
    }
}

/// Decode `[method, args...]`, discarding the already-routed method name.
fn decode_sync_args<Args: UnpackArgs>(payload: &[u8]) -> Result<Args, CodecError> {
    let mut unpacker = Unpacker::new(payload);
    let _method: String = unpacker.unpack()?;
    Args::unpack_from(&mut unpacker)
}

/// Decode `[method, token, args...]`.
fn decode_async_args<Args: UnpackArgs>(payload: &[u8]) -> Result<(String, Args), CodecError> {
    let mut unpacker = Unpacker::new(payload);
    let _method: String = unpacker.unpack()?;
    let token: String = unpacker.unpack()?;
    let args = Args::unpack_from(&mut unpacker)?;
    Ok((token, args))
}
