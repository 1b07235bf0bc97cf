//! Server dispatcher: the ROUTER request loop plus the two publish channels.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::{PackArgs, Packer, UnpackArgs};
use crate::error::{ErrorCode, Result};
use crate::handler::registry::{InvokeCx, Registry};
use crate::handler::{AsyncService, BoundService, SyncService};
use crate::protocol::{
    encode_error_reply, encode_reply, peek_method, HANDSHAKE, HANDSHAKE_REPLY, LIST_METHODS,
};
use crate::transport::{Endpoints, PubHandle};

/// How long the serve loop waits for a request before rechecking the stop
/// flag.
const RECV_POLL_MS: i64 = 100;

/// RPC server: accepts framed requests on a ROUTER socket, routes them by
/// method name to registered handlers, and answers on the same socket.
/// Async results and events go out on two separate PUB sockets.
///
/// The serve loop is single-threaded and holds no cross-call state;
/// concurrency comes from async handlers spawning their own workers.
///
/// # Example
///
/// ```no_run
/// use wirecall::{Endpoints, Server};
///
/// # fn main() -> wirecall::Result<()> {
/// let mut server = Server::bind(Endpoints::default())?;
/// server.register_method("add_integer", |x: i32, y: i32| x + y);
/// server.serve()
/// # }
/// ```
pub struct Server {
    _ctx: zmq::Context,
    sock: zmq::Socket,
    async_pub: PubHandle,
    event_pub: PubHandle,
    registry: Registry,
    stop: Arc<AtomicBool>,
}

impl Server {
    /// Bind the three channels.
    pub fn bind(endpoints: Endpoints) -> Result<Self> {
        let ctx = zmq::Context::new();
        let sock = ctx.socket(zmq::ROUTER)?;
        sock.bind(&endpoints.rpc)?;
        let async_pub = PubHandle::bind(&ctx, &endpoints.async_publish)?;
        let event_pub = PubHandle::bind(&ctx, &endpoints.event_publish)?;

        // `handshake(id)` is an ordinary sync registration, so users can
        // list it and even overwrite it: it greets the caller on the async
        // channel so the caller can detect that its subscription is
        // connected, and returns the greeting as the sync reply.
        let mut registry = Registry::new();
        let greeter = async_pub.clone();
        registry.register_method(HANDSHAKE, move |id: String| {
            let mut packer = Packer::new();
            if packer
                .pack(&id)
                .and_then(|()| packer.pack(HANDSHAKE_REPLY))
                .is_ok()
            {
                if let Err(err) = greeter.publish(packer.into_vec()) {
                    tracing::warn!(%err, "failed to publish handshake greeting");
                }
            }
            HANDSHAKE_REPLY.to_string()
        });

        tracing::info!(endpoint = %endpoints.rpc, "server bound");
        Ok(Self {
            _ctx: ctx,
            sock,
            async_pub,
            event_pub,
            registry,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register a plain method. See [`Registry::register_method`].
    pub fn register_method<F, Args>(&mut self, name: &str, handler: F)
    where
        F: SyncService<Args>,
        Args: UnpackArgs + 'static,
    {
        self.registry.register_method(name, handler);
    }

    /// Register a method bound to shared receiver state. See
    /// [`Registry::register_bound_method`].
    pub fn register_bound_method<F, Recv, Args>(&mut self, name: &str, receiver: Arc<Recv>, handler: F)
    where
        F: BoundService<Recv, Args>,
        Recv: Send + Sync + 'static,
        Args: UnpackArgs + 'static,
    {
        self.registry.register_bound_method(name, receiver, handler);
    }

    /// Register an async method. See [`Registry::register_async_method`].
    pub fn register_async_method<F, CbArgs, Args>(&mut self, name: &str, handler: F)
    where
        F: AsyncService<CbArgs, Args>,
        CbArgs: PackArgs + Send + 'static,
        Args: UnpackArgs + 'static,
    {
        self.registry.register_async_method(name, handler);
    }

    /// The method registry (introspection, listings).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish `[event, args...]` to every subscribed client.
    pub fn publish_event<A: PackArgs>(&self, event: &str, args: &A) -> Result<()> {
        publish_event(&self.event_pub, event, args)
    }

    /// Ask the serve loop to exit; equivalent to [`ServerHandle::stop`].
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Control handle for stopping the loop and publishing events from
    /// other threads while `serve` borrows the server.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: self.stop.clone(),
            event_pub: self.event_pub.clone(),
        }
    }

    /// Serve until [`ServerHandle::stop`] is called.
    ///
    /// One request is received, dispatched and answered per iteration, in
    /// request order. The stop flag is observed within one poll interval
    /// even when no request arrives; no drain of in-flight async callbacks
    /// is attempted.
    pub fn serve(&mut self) -> Result<()> {
        while !self.stop.load(Ordering::SeqCst) {
            if self.sock.poll(zmq::POLLIN, RECV_POLL_MS)? == 0 {
                continue;
            }
            let frames = self.sock.recv_multipart(0)?;
            let [client_id, delimiter, payload]: [Vec<u8>; 3] = match frames.try_into() {
                Ok(parts) => parts,
                Err(frames) => {
                    tracing::warn!(frames = frames.len(), "dropping malformed request envelope");
                    continue;
                }
            };
            let reply = self.dispatch(&client_id, &payload);
            self.sock.send_multipart([client_id, delimiter, reply], 0)?;
        }
        tracing::debug!("serve loop stopped");
        Ok(())
    }

    fn dispatch(&self, client_id: &[u8], payload: &[u8]) -> Vec<u8> {
        let method = match peek_method(payload) {
            Ok(method) => method,
            Err(err) => {
                tracing::warn!(%err, "request without a decodable method name");
                return encode_error_reply(ErrorCode::BadPayload);
            }
        };
        let cx = InvokeCx {
            client_id,
            payload,
            async_pub: &self.async_pub,
        };
        if let Some(entry) = self.registry.lookup_sync(&method) {
            tracing::trace!(%method, "dispatching method");
            return entry.invoke(&cx);
        }
        if let Some(entry) = self.registry.lookup_async(&method) {
            tracing::trace!(%method, "dispatching async method");
            return entry.invoke(&cx);
        }
        match method.as_str() {
            LIST_METHODS => self.list_methods_reply(),
            _ => {
                tracing::warn!(%method, "method not registered");
                encode_error_reply(ErrorCode::BadMethod)
            }
        }
    }

    /// One alphabetical merge of the sync table (built-ins included) in
    /// name order, then the async table in name order.
    fn list_methods_reply(&self) -> Vec<u8> {
        let mut sync: BTreeMap<String, String> = self
            .registry
            .sync_signatures()
            .map(|(name, signature)| (name.to_string(), signature.to_string()))
            .collect();
        sync.entry(LIST_METHODS.to_string())
            .or_insert_with(|| "fn() -> Vec<String>".to_string());

        let mut methods: Vec<String> = sync
            .iter()
            .map(|(name, signature)| format!("{name}: {signature}"))
            .collect();
        methods.extend(
            self.registry
                .async_signatures()
                .map(|(name, signature)| format!("{name}: {signature}")),
        );
        encode_reply(&methods)
    }
}

/// Cloneable control handle for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    event_pub: PubHandle,
}

impl ServerHandle {
    /// Ask the serve loop to exit. Observed within one poll interval; the
    /// request being dispatched (if any) is still answered.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Publish `[event, args...]` to every subscribed client.
    pub fn publish_event<A: PackArgs>(&self, event: &str, args: &A) -> Result<()> {
        publish_event(&self.event_pub, event, args)
    }
}

fn publish_event<A: PackArgs>(event_pub: &PubHandle, event: &str, args: &A) -> Result<()> {
    let mut packer = Packer::new();
    packer.pack(event)?;
    args.pack_into(&mut packer)?;
    tracing::trace!(%event, "publishing event");
    event_pub.publish(packer.into_vec())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::Unpacker;
    use crate::error::Error;
    use crate::handler::Callback;
    use crate::protocol::{decode_reply, encode_request};

    fn test_server(name: &str) -> Server {
        Server::bind(Endpoints {
            rpc: format!("inproc://{name}-rpc"),
            async_publish: format!("inproc://{name}-async"),
            event_publish: format!("inproc://{name}-event"),
        })
        .unwrap()
    }

    #[test]
    fn test_dispatch_routes_to_sync_handler() {
        let mut server = test_server("server-sync");
        server.register_method("add_integer", |x: i32, y: i32| x + y);

        let request = encode_request("add_integer", &(-1i32, -2i32)).unwrap();
        let reply = server.dispatch(b"cli", &request);
        assert_eq!(decode_reply::<i32>(&reply).unwrap(), -3);
    }

    #[test]
    fn test_dispatch_unknown_method_is_bad_method() {
        let server = test_server("server-404");
        let request = encode_request("nonexist", &()).unwrap();
        let reply = server.dispatch(b"cli", &request);
        match decode_reply::<()>(&reply) {
            Err(Error::Rpc(ErrorCode::BadMethod)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_garbage_is_bad_payload() {
        let server = test_server("server-garbage");
        // 0xc1 is never a valid MessagePack leading byte.
        let reply = server.dispatch(b"cli", &[0xc1]);
        match decode_reply::<()>(&reply) {
            Err(Error::Rpc(ErrorCode::BadPayload)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_list_methods_includes_builtins_and_registrations() {
        let mut server = test_server("server-list");
        server.register_method("add_integer", |x: i32, y: i32| x + y);

        let request = encode_request(LIST_METHODS, &()).unwrap();
        let reply = server.dispatch(b"cli", &request);
        let listing = decode_reply::<Vec<String>>(&reply).unwrap();

        assert!(listing.contains(&"add_integer: fn(i32, i32) -> i32".to_string()));
        assert!(listing.contains(&"handshake: fn(String) -> String".to_string()));
        assert!(listing.contains(&"list_methods: fn() -> Vec<String>".to_string()));
    }

    #[test]
    fn test_handshake_greets_on_async_channel_only() {
        let server = test_server("server-hs");

        let async_sub = server._ctx.socket(zmq::SUB).unwrap();
        async_sub.set_subscribe(b"").unwrap();
        async_sub.connect("inproc://server-hs-async").unwrap();
        async_sub.set_rcvtimeo(1000).unwrap();

        let event_sub = server._ctx.socket(zmq::SUB).unwrap();
        event_sub.set_subscribe(b"").unwrap();
        event_sub.connect("inproc://server-hs-event").unwrap();
        event_sub.set_rcvtimeo(200).unwrap();

        std::thread::sleep(Duration::from_millis(50));

        let request = encode_request(HANDSHAKE, &("client-uuid".to_string(),)).unwrap();
        let reply = server.dispatch(b"client-uuid", &request);
        assert_eq!(decode_reply::<String>(&reply).unwrap(), HANDSHAKE_REPLY);

        let frame = async_sub.recv_bytes(0).unwrap();
        let mut unpacker = Unpacker::new(&frame);
        assert_eq!(unpacker.unpack::<String>().unwrap(), "client-uuid");
        assert_eq!(unpacker.unpack::<String>().unwrap(), HANDSHAKE_REPLY);

        // The event channel stays quiet.
        assert!(event_sub.recv_bytes(0).is_err());
    }

    #[test]
    fn test_list_methods_merges_builtins_alphabetically() {
        let mut server = test_server("server-list-order");
        server.register_method("aaa_method", || {});
        server.register_method("zzz_method", || {});
        server.register_async_method("middle_async", |cb: Callback<()>| {
            let _ = cb;
        });

        let request = encode_request(LIST_METHODS, &()).unwrap();
        let reply = server.dispatch(b"cli", &request);
        let listing = decode_reply::<Vec<String>>(&reply).unwrap();

        assert_eq!(
            listing,
            vec![
                "aaa_method: fn() -> ()".to_string(),
                "handshake: fn(String) -> String".to_string(),
                "list_methods: fn() -> Vec<String>".to_string(),
                "zzz_method: fn() -> ()".to_string(),
                "middle_async: fn(Callback<()>) -> ()".to_string(),
            ]
        );
    }

    #[test]
    fn test_publish_event_layout() {
        let server = test_server("server-ev");

        let event_sub = server._ctx.socket(zmq::SUB).unwrap();
        event_sub.set_subscribe(b"").unwrap();
        event_sub.connect("inproc://server-ev-event").unwrap();
        event_sub.set_rcvtimeo(1000).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        server
            .publish_event("event1", &("hello".to_string(), 10i32))
            .unwrap();

        let frame = event_sub.recv_bytes(0).unwrap();
        let mut unpacker = Unpacker::new(&frame);
        assert_eq!(unpacker.unpack::<String>().unwrap(), "event1");
        assert_eq!(unpacker.unpack::<String>().unwrap(), "hello");
        assert_eq!(unpacker.unpack::<i32>().unwrap(), 10);
    }

    #[test]
    fn test_handle_stop_flips_flag() {
        let server = test_server("server-stop");
        let handle = server.handle();
        assert!(!server.stop.load(Ordering::SeqCst));
        handle.stop();
        assert!(server.stop.load(Ordering::SeqCst));
    }
}
