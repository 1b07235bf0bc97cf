//! Client: call engine, event registration, and the background poller.

mod poller;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::codec::{PackArgs, Packer, UnpackArgs, Unpacker};
use crate::error::{CodecError, Error, Result};
use crate::handler::{Continuation, EventService};
use crate::protocol::{decode_reply, encode_async_request, encode_request, HANDSHAKE};
use crate::transport::Endpoints;

use poller::{EventFn, PendingCall, PendingFn, Shared};

/// Bounded retries for the connect-time handshake.
const HANDSHAKE_ATTEMPTS: usize = 50;
const HANDSHAKE_WAIT: Duration = Duration::from_millis(100);

/// RPC client.
///
/// Owns a DEALER request socket whose routing identity is a fresh UUID, and
/// two SUB sockets driven by a background poller thread. The identity is
/// also the subscription topic for this client's async results, so the
/// fan-out socket delivers per client without a second dispatcher.
///
/// `connect` performs a handshake with the server and returns only once
/// the async-result subscription is observed live, so async results after
/// a successful connect cannot be lost to the transport's slow-joiner
/// behavior. The event subscription connects at the same time but is not
/// confirmed; event publications sent before it joins may be dropped.
///
/// All methods take `&self`; the request socket is internally serialised,
/// so sharing a client across threads (e.g. behind an `Arc`) is fine.
///
/// # Example
///
/// ```no_run
/// use wirecall::{Client, Endpoints};
///
/// # fn main() -> wirecall::Result<()> {
/// let client = Client::connect(Endpoints::default())?;
/// let sum: i32 = client.call("add_integer", (-1, -2))?;
/// assert_eq!(sum, -3);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    _ctx: zmq::Context,
    /// DEALER socket; the mutex serialises request/reply exchanges.
    sock: Mutex<zmq::Socket>,
    identity: String,
    shared: Arc<Shared>,
    poller: Option<JoinHandle<()>>,
}

impl Client {
    /// Connect the three channels and handshake with the server.
    ///
    /// Blocks until the server answers the handshake; start the server
    /// first.
    pub fn connect(endpoints: Endpoints) -> Result<Self> {
        let ctx = zmq::Context::new();
        let identity = generate_token();

        let sock = ctx.socket(zmq::DEALER)?;
        sock.set_identity(identity.as_bytes())?;
        sock.connect(&endpoints.rpc)?;

        let async_sub = ctx.socket(zmq::SUB)?;
        // Async results pack the caller's identity first, so the
        // MessagePack encoding of the identity is an exact per-client
        // topic prefix.
        let mut prefix = Packer::new();
        prefix.pack(&identity)?;
        async_sub.set_subscribe(prefix.as_slice())?;
        async_sub.connect(&endpoints.async_publish)?;

        let event_sub = ctx.socket(zmq::SUB)?;
        event_sub.set_subscribe(b"")?;
        event_sub.connect(&endpoints.event_publish)?;

        let shared = Arc::new(Shared::new());
        let poller = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("wirecall-poller".to_string())
                .spawn(move || poller::run(shared, async_sub, event_sub))?
        };

        let client = Self {
            _ctx: ctx,
            sock: Mutex::new(sock),
            identity,
            shared,
            poller: Some(poller),
        };
        client.handshake()?;
        tracing::info!(endpoint = %endpoints.rpc, identity = %client.identity, "client connected");
        Ok(client)
    }

    /// Identity used as the routing key and async subscription topic.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Invoke `method` with `args` and block for the reply.
    ///
    /// The reply is `[error_code(, value)]`; a non-zero code surfaces as
    /// [`Error::Rpc`]. Use `()` as the return type for void methods:
    ///
    /// ```ignore
    /// let sum: i32 = client.call("add_integer", (-1, -2))?;
    /// client.call::<(), _>("void_method", ())?;
    /// ```
    pub fn call<R, A>(&self, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: PackArgs,
    {
        let request = encode_request(method, &args)?;
        let reply = self.exchange(request)?;
        let ret = decode_reply::<R>(&reply)?;
        tracing::trace!(%method, "call completed");
        Ok(ret)
    }

    /// Invoke an async method: the server's synchronous reply is only an
    /// acknowledgement (returned here); `callback` runs later on the
    /// poller thread, once the server publishes `[identity, token,
    /// args...]` for the generated token. Exactly one invocation per
    /// publication; the token is forgotten first, so the callback may
    /// itself issue further async calls.
    pub fn async_call<R, A, C, CbArgs>(&self, method: &str, callback: C, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: PackArgs,
        C: Continuation<CbArgs>,
        CbArgs: UnpackArgs + 'static,
    {
        let token = generate_token();
        let request = encode_async_request(method, &token, &args)?;

        // Insert before sending so a result published before the
        // acknowledgement is read cannot miss its entry.
        let continuation = erase_continuation(token.clone(), callback);
        self.shared.pending.lock().insert(
            token.clone(),
            PendingCall {
                continuation,
                created_at: Instant::now(),
            },
        );

        let outcome = self
            .exchange(request)
            .and_then(|reply| decode_reply::<R>(&reply));
        match outcome {
            Ok(ack) => {
                tracing::trace!(%method, %token, "async call acknowledged");
                Ok(ack)
            }
            Err(err) => {
                // The server will not publish for a failed request.
                self.shared.pending.lock().remove(&token);
                Err(err)
            }
        }
    }

    /// Subscribe a typed handler to a named event. The handler runs on the
    /// poller thread; returning [`EventControl::Unsubscribe`] removes the
    /// subscription. Registering the same event again replaces the
    /// handler.
    ///
    /// [`EventControl::Unsubscribe`]: crate::EventControl::Unsubscribe
    pub fn register_event<F, Args>(&self, event: &str, handler: F)
    where
        F: EventService<Args>,
        Args: UnpackArgs + 'static,
    {
        let erased: EventFn = Arc::new(move |unpacker: &mut Unpacker<'_>| {
            match Args::unpack_from(unpacker) {
                Ok(args) => handler.invoke(args),
                Err(err) => {
                    tracing::warn!(%err, "failed to decode event arguments");
                    crate::handler::EventControl::Keep
                }
            }
        });
        self.shared.events.lock().insert(event.to_string(), erased);
    }

    /// Wait until the poller delivers something (an async result, an event,
    /// or the handshake greeting) or `timeout` expires; `None` waits
    /// indefinitely. Returns the number of async calls still in flight.
    pub fn poll(&self, timeout: Option<Duration>) -> usize {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.shared.wait_for_delivery(deadline);
        self.pending_async()
    }

    /// Number of async calls awaiting their callback.
    pub fn pending_async(&self) -> usize {
        self.shared.pending_len()
    }

    /// Send `[empty][payload]` and receive the matching `[empty][payload]`
    /// reply, holding the socket for the whole exchange.
    fn exchange(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        let sock = self.sock.lock();
        sock.send_multipart([Vec::new(), request], 0)?;
        let frames = sock.recv_multipart(0)?;
        let [_delimiter, payload]: [Vec<u8>; 2] = frames.try_into().map_err(|frames: Vec<Vec<u8>>| {
            Error::Protocol(format!(
                "expected delimiter and payload in reply, got {} frames",
                frames.len()
            ))
        })?;
        Ok(payload)
    }

    /// Repeat the handshake until the poller observes the greeting on the
    /// async subscriber; each round re-publishes, defeating the
    /// slow-joiner race for async results.
    fn handshake(&self) -> Result<()> {
        for _ in 0..HANDSHAKE_ATTEMPTS {
            let _greeting: String = self.call(HANDSHAKE, (self.identity.clone(),))?;
            let deadline = Instant::now() + HANDSHAKE_WAIT;
            while Instant::now() < deadline {
                if self.shared.async_ready.load(Ordering::SeqCst) {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
        Err(Error::HandshakeTimeout)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.poller.take() {
            if handle.join().is_err() {
                tracing::error!("poller thread panicked");
            }
        }
    }
}

/// Generate a correlation token: UUID v4, lowercase, hyphenated.
fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

/// Erase a typed continuation into the payload-consuming closure stored in
/// the in-flight table.
fn erase_continuation<C, CbArgs>(token: String, callback: C) -> PendingFn
where
    C: Continuation<CbArgs>,
    CbArgs: UnpackArgs + 'static,
{
    Box::new(move |payload: &[u8]| {
        let mut unpacker = Unpacker::new(payload);
        let decoded = (|| -> std::result::Result<CbArgs, CodecError> {
            let _filter: String = unpacker.unpack()?;
            let token_back: String = unpacker.unpack()?;
            debug_assert_eq!(token_back, token);
            CbArgs::unpack_from(&mut unpacker)
        })();
        match decoded {
            Ok(args) => callback.complete(args),
            Err(err) => tracing::error!(%err, "failed to decode async callback arguments"),
        }
    })
}
