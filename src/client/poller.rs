//! Client-side poller: async-result correlation and event fan-out.
//!
//! One dedicated thread owns both subscriber sockets and multiplexes them
//! with `zmq::poll`. Async results are matched against the in-flight table
//! by token; events are dispatched to registered handlers by name. The
//! decode-and-dispatch logic lives on [`Shared`] so it is testable without
//! sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::codec::Unpacker;
use crate::handler::EventControl;
use crate::protocol::HANDSHAKE_REPLY;

/// How long one poll cycle waits before rechecking the stop flag.
const POLL_INTERVAL_MS: i64 = 100;

/// Continuation stored per in-flight async call. It receives the full
/// publication payload and re-decodes it, skipping the filter/token prefix.
pub(crate) type PendingFn = Box<dyn FnOnce(&[u8]) + Send>;

pub(crate) struct PendingCall {
    pub continuation: PendingFn,
    /// Insertion time; the extension point for timeout-based eviction.
    pub created_at: Instant,
}

/// Type-erased event handler: decodes its arguments from the payload past
/// the event name and returns the keep/unsubscribe decision.
pub(crate) type EventFn = Arc<dyn Fn(&mut Unpacker<'_>) -> EventControl + Send + Sync>;

/// State shared between the client facade and the poller thread.
pub(crate) struct Shared {
    pub pending: Mutex<HashMap<String, PendingCall>>,
    pub events: Mutex<HashMap<String, EventFn>>,
    pub stop: AtomicBool,
    /// Set when the handshake greeting arrives on the async channel.
    pub async_ready: AtomicBool,
    /// Bumped after every delivery; `Client::poll` waits on it.
    wakeups: Mutex<u64>,
    wakeup_cv: Condvar,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
            async_ready: AtomicBool::new(false),
            wakeups: Mutex::new(0),
            wakeup_cv: Condvar::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn notify(&self) {
        let mut generation = self.wakeups.lock();
        *generation += 1;
        self.wakeup_cv.notify_all();
    }

    /// Block until the poller delivers something or `deadline` passes
    /// (`None` waits indefinitely).
    pub fn wait_for_delivery(&self, deadline: Option<Instant>) {
        let mut generation = self.wakeups.lock();
        let seen = *generation;
        while *generation == seen {
            match deadline {
                Some(deadline) => {
                    if self
                        .wakeup_cv
                        .wait_until(&mut generation, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.wakeup_cv.wait(&mut generation),
            }
        }
    }

    /// Handle one frame from the async channel:
    /// `[client_id, token, cb_args...]`.
    pub fn handle_async(&self, payload: &[u8]) {
        let mut unpacker = Unpacker::new(payload);
        let token: String = match unpacker
            .unpack::<String>()
            .and_then(|_filter| unpacker.unpack())
        {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(%err, "undecodable async publication");
                return;
            }
        };

        if token == HANDSHAKE_REPLY {
            self.async_ready.store(true, Ordering::SeqCst);
            self.notify();
            return;
        }

        // Remove before invoking: a continuation that issues a fresh
        // async_call must not observe its own stale entry, and a duplicate
        // publication must not fire twice.
        let entry = self.pending.lock().remove(&token);
        match entry {
            Some(call) => {
                tracing::trace!(
                    %token,
                    elapsed = ?call.created_at.elapsed(),
                    "completing async call"
                );
                (call.continuation)(payload);
            }
            None => tracing::warn!(%token, "unknown async token"),
        }
        self.notify();
    }

    /// Handle one frame from the event channel: `[event, args...]`.
    pub fn handle_event(&self, payload: &[u8]) {
        let mut unpacker = Unpacker::new(payload);
        let event: String = match unpacker.unpack() {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(%err, "undecodable event publication");
                return;
            }
        };

        // Clone the handler out so the lock is not held across user code.
        let handler = self.events.lock().get(&event).cloned();
        let Some(handler) = handler else {
            tracing::trace!(%event, "event without a subscription");
            return;
        };
        if handler(&mut unpacker) == EventControl::Unsubscribe {
            self.events.lock().remove(&event);
            tracing::debug!(%event, "event subscription removed");
        }
        self.notify();
    }
}

/// Poller thread body; owns both subscriber sockets for its lifetime.
pub(crate) fn run(shared: Arc<Shared>, async_sub: zmq::Socket, event_sub: zmq::Socket) {
    while !shared.stop.load(Ordering::SeqCst) {
        let (async_readable, event_readable) = {
            let mut items = [
                async_sub.as_poll_item(zmq::POLLIN),
                event_sub.as_poll_item(zmq::POLLIN),
            ];
            match zmq::poll(&mut items, POLL_INTERVAL_MS) {
                Ok(0) => continue,
                Ok(_) => (items[0].is_readable(), items[1].is_readable()),
                Err(err) => {
                    tracing::error!(%err, "subscriber poll failed");
                    break;
                }
            }
        };
        if async_readable {
            match async_sub.recv_bytes(0) {
                Ok(payload) => shared.handle_async(&payload),
                Err(err) => tracing::error!(%err, "async receive failed"),
            }
        }
        if event_readable {
            match event_sub.recv_bytes(0) {
                Ok(payload) => shared.handle_event(&payload),
                Err(err) => tracing::error!(%err, "event receive failed"),
            }
        }
    }

    let dropped = shared.pending_len();
    if dropped > 0 {
        tracing::debug!(dropped, "poller stopping with pending async calls");
    }
    tracing::trace!("poll thread stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::codec::{Packer, UnpackArgs};

    fn shared() -> Arc<Shared> {
        Arc::new(Shared::new())
    }

    fn async_payload(filter: &str, token: &str, value: i32) -> Vec<u8> {
        let mut packer = Packer::new();
        packer.pack(filter).unwrap();
        packer.pack(token).unwrap();
        packer.pack(&value).unwrap();
        packer.into_vec()
    }

    fn event_payload(event: &str, value: i32) -> Vec<u8> {
        let mut packer = Packer::new();
        packer.pack(event).unwrap();
        packer.pack(&value).unwrap();
        packer.into_vec()
    }

    fn pending_counter(calls: Arc<AtomicUsize>) -> PendingCall {
        PendingCall {
            continuation: Box::new(move |_payload| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
            created_at: Instant::now(),
        }
    }

    #[test]
    fn test_async_delivery_invokes_continuation_once() {
        let shared = shared();
        let calls = Arc::new(AtomicUsize::new(0));
        shared
            .pending
            .lock()
            .insert("tok-1".to_string(), pending_counter(calls.clone()));

        let payload = async_payload("filter", "tok-1", 5);
        shared.handle_async(&payload);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.pending_len(), 0);
    }

    #[test]
    fn test_duplicate_publication_is_dropped() {
        let shared = shared();
        let calls = Arc::new(AtomicUsize::new(0));
        shared
            .pending
            .lock()
            .insert("tok-2".to_string(), pending_counter(calls.clone()));

        let payload = async_payload("filter", "tok-2", 5);
        shared.handle_async(&payload);
        shared.handle_async(&payload);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_token_is_dropped() {
        let shared = shared();
        shared.handle_async(&async_payload("filter", "tok-unknown", 1));
        assert_eq!(shared.pending_len(), 0);
    }

    #[test]
    fn test_entry_removed_before_continuation_runs() {
        let shared = shared();
        let observed_pending = Arc::new(AtomicUsize::new(usize::MAX));

        let inner = shared.clone();
        let observed = observed_pending.clone();
        shared.pending.lock().insert(
            "tok-3".to_string(),
            PendingCall {
                continuation: Box::new(move |_payload| {
                    // The consumed entry must already be gone, so a
                    // recursive async_call can insert a fresh token safely.
                    observed.store(inner.pending_len(), Ordering::SeqCst);
                    inner.pending.lock().insert(
                        "tok-recursive".to_string(),
                        PendingCall {
                            continuation: Box::new(|_| {}),
                            created_at: Instant::now(),
                        },
                    );
                }),
                created_at: Instant::now(),
            },
        );

        shared.handle_async(&async_payload("filter", "tok-3", 1));
        assert_eq!(observed_pending.load(Ordering::SeqCst), 0);
        assert_eq!(shared.pending_len(), 1);
    }

    #[test]
    fn test_handshake_token_sets_ready_flag() {
        let shared = shared();
        let payload = {
            let mut packer = Packer::new();
            packer.pack("11111111-2222-4333-8444-555555555555").unwrap();
            packer.pack(HANDSHAKE_REPLY).unwrap();
            packer.into_vec()
        };
        shared.handle_async(&payload);
        assert!(shared.async_ready.load(Ordering::SeqCst));
    }

    #[test]
    fn test_undecodable_async_payload_is_tolerated() {
        let shared = shared();
        shared.handle_async(&[0xc1, 0xc1]);
    }

    fn count_events(shared: &Arc<Shared>, decision: EventControl) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: EventFn = Arc::new(move |unpacker| {
            let (_value,) = <(i32,)>::unpack_from(unpacker).unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            decision
        });
        shared.events.lock().insert("event1".to_string(), handler);
        calls
    }

    #[test]
    fn test_event_keep_stays_subscribed() {
        let shared = shared();
        let calls = count_events(&shared, EventControl::Keep);

        shared.handle_event(&event_payload("event1", 10));
        shared.handle_event(&event_payload("event1", 10));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(shared.events.lock().contains_key("event1"));
    }

    #[test]
    fn test_event_unsubscribe_removes_mapping() {
        let shared = shared();
        let calls = count_events(&shared, EventControl::Unsubscribe);

        shared.handle_event(&event_payload("event1", 10));
        shared.handle_event(&event_payload("event1", 10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!shared.events.lock().contains_key("event1"));
    }

    #[test]
    fn test_event_without_subscription_is_dropped() {
        let shared = shared();
        shared.handle_event(&event_payload("unheard", 1));
    }

    #[test]
    fn test_wait_for_delivery_wakes_on_notify() {
        let shared = shared();
        let waiter = shared.clone();
        let join = std::thread::spawn(move || {
            waiter.wait_for_delivery(Some(Instant::now() + std::time::Duration::from_secs(5)));
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        shared.handle_async(&async_payload("filter", "whatever", 0));
        join.join().unwrap();
    }
}
