//! Server-side continuation for async methods.

use std::marker::PhantomData;

use crate::codec::{PackArgs, Packer};
use crate::error::Result;
use crate::transport::PubHandle;

/// Single-use continuation handed to async handlers.
///
/// This is not a local function pointer: invoking it encodes
/// `[client_id, token, args...]` and publishes the frame on the async
/// channel, where the issuing client's poller correlates the token and runs
/// the user callback. The callback may be moved to and invoked from any
/// thread; the usual pattern is a handler that spawns a worker, returns
/// immediately, and lets the worker invoke the callback later.
///
/// # Example
///
/// ```ignore
/// server.register_async_method("async_method", |cb: Callback<(i32,)>, i: i32| {
///     std::thread::spawn(move || {
///         std::thread::sleep(std::time::Duration::from_secs(3));
///         let _ = cb.invoke((i,));
///     });
/// });
/// ```
pub struct Callback<Args> {
    topic: String,
    token: String,
    publisher: PubHandle,
    _args: PhantomData<fn(Args)>,
}

impl<Args: PackArgs> Callback<Args> {
    pub(crate) fn new(topic: String, token: String, publisher: PubHandle) -> Self {
        Self {
            topic,
            token,
            publisher,
            _args: PhantomData,
        }
    }

    /// Publish the callback arguments back to the calling client. Consumes
    /// the callback: each async request completes at most once.
    pub fn invoke(self, args: Args) -> Result<()> {
        let mut packer = Packer::new();
        packer.pack(&self.topic)?;
        packer.pack(&self.token)?;
        args.pack_into(&mut packer)?;
        tracing::trace!(token = %self.token, "publishing async result");
        self.publisher.publish(packer.into_vec())
    }

    /// Correlation token of the originating request.
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::Unpacker;

    #[test]
    fn test_invoke_publishes_topic_token_and_args() {
        let ctx = zmq::Context::new();
        let publisher = PubHandle::bind(&ctx, "inproc://callback-test").unwrap();

        let subscriber = ctx.socket(zmq::SUB).unwrap();
        subscriber.set_subscribe(b"").unwrap();
        subscriber.connect("inproc://callback-test").unwrap();
        subscriber.set_rcvtimeo(1000).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let callback: Callback<(i32, String)> =
            Callback::new("client-1".to_string(), "tok-1".to_string(), publisher);
        assert_eq!(callback.token(), "tok-1");
        callback.invoke((42, "done".to_string())).unwrap();

        let frame = subscriber.recv_bytes(0).unwrap();
        let mut unpacker = Unpacker::new(&frame);
        assert_eq!(unpacker.unpack::<String>().unwrap(), "client-1");
        assert_eq!(unpacker.unpack::<String>().unwrap(), "tok-1");
        assert_eq!(unpacker.unpack::<i32>().unwrap(), 42);
        assert_eq!(unpacker.unpack::<String>().unwrap(), "done");
    }

    #[test]
    fn test_callback_moves_across_threads() {
        let ctx = zmq::Context::new();
        let publisher = PubHandle::bind(&ctx, "inproc://callback-thread-test").unwrap();

        let subscriber = ctx.socket(zmq::SUB).unwrap();
        subscriber.set_subscribe(b"").unwrap();
        subscriber.connect("inproc://callback-thread-test").unwrap();
        subscriber.set_rcvtimeo(1000).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let callback: Callback<(i32,)> =
            Callback::new("client-2".to_string(), "tok-2".to_string(), publisher);
        std::thread::spawn(move || callback.invoke((7,)).unwrap())
            .join()
            .unwrap();

        let frame = subscriber.recv_bytes(0).unwrap();
        let mut unpacker = Unpacker::new(&frame);
        assert_eq!(unpacker.unpack::<String>().unwrap(), "client-2");
        assert_eq!(unpacker.unpack::<String>().unwrap(), "tok-2");
        assert_eq!(unpacker.unpack::<i32>().unwrap(), 7);
    }
}
