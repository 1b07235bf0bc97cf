//! Socket-layer configuration and shared publish handles.
//!
//! The framework needs exactly two socket capabilities from the transport:
//! a multi-client bidirectional socket that preserves client identities
//! (ROUTER/DEALER) and a one-to-many fan-out channel (PUB/SUB). Everything
//! zmq-specific outside the server and client lives here.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{DEFAULT_ASYNC_ENDPOINT, DEFAULT_EVENT_ENDPOINT, DEFAULT_RPC_ENDPOINT};

/// Transport endpoints for the three logical channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Request/reply channel.
    pub rpc: String,
    /// Async-result fan-out channel.
    pub async_publish: String,
    /// Event fan-out channel.
    pub event_publish: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rpc: DEFAULT_RPC_ENDPOINT.to_string(),
            async_publish: DEFAULT_ASYNC_ENDPOINT.to_string(),
            event_publish: DEFAULT_EVENT_ENDPOINT.to_string(),
        }
    }
}

impl Endpoints {
    /// Loopback endpoints on a contiguous port range, convenient for tests
    /// and single-host deployments.
    pub fn loopback(base_port: u16) -> Self {
        Self {
            rpc: format!("tcp://127.0.0.1:{base_port}"),
            async_publish: format!("tcp://127.0.0.1:{}", base_port + 1),
            event_publish: format!("tcp://127.0.0.1:{}", base_port + 2),
        }
    }
}

/// A publish socket shareable across threads.
///
/// Async handlers hand clones of this to worker threads through their
/// [`Callback`](crate::Callback); the mutex serialises the actual sends.
/// Publications are fire-and-forget: a subscriber that joins late misses
/// earlier frames (the slow-joiner behavior of the underlying transport),
/// which the handshake at client connect compensates for.
#[derive(Clone)]
pub struct PubHandle {
    socket: Arc<Mutex<zmq::Socket>>,
}

impl PubHandle {
    /// Bind a PUB socket on `endpoint`.
    pub(crate) fn bind(ctx: &zmq::Context, endpoint: &str) -> Result<Self> {
        let socket = ctx.socket(zmq::PUB)?;
        socket.bind(endpoint)?;
        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
        })
    }

    /// Send one frame to every current subscriber.
    pub(crate) fn publish(&self, frame: Vec<u8>) -> Result<()> {
        let socket = self.socket.lock();
        socket.send(frame, 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.rpc, "tcp://127.0.0.1:5555");
        assert_eq!(endpoints.async_publish, "tcp://127.0.0.1:5556");
        assert_eq!(endpoints.event_publish, "tcp://127.0.0.1:5557");
    }

    #[test]
    fn test_loopback_uses_contiguous_ports() {
        let endpoints = Endpoints::loopback(7000);
        assert_eq!(endpoints.rpc, "tcp://127.0.0.1:7000");
        assert_eq!(endpoints.async_publish, "tcp://127.0.0.1:7001");
        assert_eq!(endpoints.event_publish, "tcp://127.0.0.1:7002");
    }

    #[test]
    fn test_endpoints_config_roundtrip() {
        let endpoints = Endpoints::loopback(7100);
        let encoded = rmp_serde::to_vec(&endpoints).unwrap();
        let decoded: Endpoints = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded, endpoints);
    }

    #[test]
    fn test_publish_fans_out_to_subscriber() {
        let ctx = zmq::Context::new();
        let publisher = PubHandle::bind(&ctx, "inproc://transport-pub-test").unwrap();

        let subscriber = ctx.socket(zmq::SUB).unwrap();
        subscriber.set_subscribe(b"").unwrap();
        subscriber.connect("inproc://transport-pub-test").unwrap();
        subscriber.set_rcvtimeo(1000).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        publisher.publish(b"frame".to_vec()).unwrap();
        assert_eq!(subscriber.recv_bytes(0).unwrap(), b"frame");
    }
}
