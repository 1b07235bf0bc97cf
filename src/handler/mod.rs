//! Typed handlers and their type-erased invocation seams.
//!
//! Handlers are plain functions and closures with statically typed
//! parameter lists. Registration erases them behind uniform traits, keeping
//! just enough type information to decode arguments off the wire and encode
//! the return value:
//!
//! - [`SyncService`]: `Fn(A0, ..) -> R`, invoked inline by the serve loop.
//! - [`BoundService`]: `Fn(&Recv, A0, ..) -> R`, bound to shared receiver
//!   state owned behind an `Arc`.
//! - [`AsyncService`]: `Fn(Callback<CbArgs>, A0, ..) -> R`; the handler
//!   returns quickly and fires the [`Callback`] later, from any thread.
//! - [`EventService`]: `Fn(E0, ..) -> EventControl`, a client-side event
//!   subscription.
//! - [`Continuation`]: `FnOnce(C0, ..)`, the client-side user callback of
//!   an async call.
//!
//! All five are implemented for arities 0 through 8 by the macro below.
//! Parameter types must be `DeserializeOwned` and returns `Serialize`,
//! which structurally rejects reference- and pointer-typed signatures at
//! compile time.

mod callback;
pub mod registry;

pub use callback::Callback;
pub use registry::Registry;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{render_signature, short_type_name, PackArgs, UnpackArgs};

/// Decision returned by event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventControl {
    /// Stay subscribed.
    Keep,
    /// Remove this subscription; later publications are dropped.
    Unsubscribe,
}

/// A synchronous method: typed arguments in, serialisable value out.
pub trait SyncService<Args>: Send + Sync + 'static {
    type Reply: Serialize;

    fn invoke(&self, args: Args) -> Self::Reply;

    /// `fn(i32, i32) -> i32` style rendering for method listings.
    fn signature() -> String;
}

/// A method bound to shared receiver state.
pub trait BoundService<Recv, Args>: Send + Sync + 'static {
    type Reply: Serialize;

    fn invoke(&self, receiver: &Recv, args: Args) -> Self::Reply;

    fn signature() -> String;
}

/// An asynchronous method. The first parameter is the [`Callback`] the
/// handler fires once its work completes; the rest are the wire arguments.
pub trait AsyncService<CbArgs, Args>: Send + Sync + 'static {
    type Reply: Serialize;

    fn invoke(&self, callback: Callback<CbArgs>, args: Args) -> Self::Reply;

    fn signature() -> String;
}

/// A client-side event handler.
pub trait EventService<Args>: Send + Sync + 'static {
    fn invoke(&self, args: Args) -> EventControl;
}

/// A client-side async continuation: the user callback handed to
/// `async_call`, consumed on its single invocation.
pub trait Continuation<Args>: Send + 'static {
    fn complete(self, args: Args);
}

macro_rules! impl_services {
    ($($ty:ident),*) => {
        #[allow(non_snake_case)]
        impl<Fun, Ret, $($ty,)*> SyncService<($($ty,)*)> for Fun
        where
            Fun: Fn($($ty),*) -> Ret + Send + Sync + 'static,
            Ret: Serialize + 'static,
            $($ty: DeserializeOwned + 'static,)*
        {
            type Reply = Ret;

            fn invoke(&self, ($($ty,)*): ($($ty,)*)) -> Ret {
                (self)($($ty),*)
            }

            fn signature() -> String {
                render_signature(
                    &<($($ty,)*) as UnpackArgs>::type_names(),
                    &short_type_name(std::any::type_name::<Ret>()),
                )
            }
        }

        #[allow(non_snake_case)]
        impl<Fun, Recv, Ret, $($ty,)*> BoundService<Recv, ($($ty,)*)> for Fun
        where
            Fun: Fn(&Recv, $($ty),*) -> Ret + Send + Sync + 'static,
            Recv: Send + Sync + 'static,
            Ret: Serialize + 'static,
            $($ty: DeserializeOwned + 'static,)*
        {
            type Reply = Ret;

            fn invoke(&self, receiver: &Recv, ($($ty,)*): ($($ty,)*)) -> Ret {
                (self)(receiver, $($ty),*)
            }

            fn signature() -> String {
                // The receiver is not a wire argument.
                render_signature(
                    &<($($ty,)*) as UnpackArgs>::type_names(),
                    &short_type_name(std::any::type_name::<Ret>()),
                )
            }
        }

        #[allow(non_snake_case)]
        impl<Fun, Ret, CbArgs, $($ty,)*> AsyncService<CbArgs, ($($ty,)*)> for Fun
        where
            Fun: Fn(Callback<CbArgs>, $($ty),*) -> Ret + Send + Sync + 'static,
            Ret: Serialize + 'static,
            CbArgs: PackArgs + Send + 'static,
            $($ty: DeserializeOwned + 'static,)*
        {
            type Reply = Ret;

            fn invoke(&self, callback: Callback<CbArgs>, ($($ty,)*): ($($ty,)*)) -> Ret {
                (self)(callback, $($ty),*)
            }

            fn signature() -> String {
                let mut params = vec![short_type_name(std::any::type_name::<Callback<CbArgs>>())];
                params.extend(<($($ty,)*) as UnpackArgs>::type_names());
                render_signature(&params, &short_type_name(std::any::type_name::<Ret>()))
            }
        }

        #[allow(non_snake_case)]
        impl<Fun, $($ty,)*> EventService<($($ty,)*)> for Fun
        where
            Fun: Fn($($ty),*) -> EventControl + Send + Sync + 'static,
            $($ty: DeserializeOwned + 'static,)*
        {
            fn invoke(&self, ($($ty,)*): ($($ty,)*)) -> EventControl {
                (self)($($ty),*)
            }
        }

        #[allow(non_snake_case)]
        impl<Fun, $($ty,)*> Continuation<($($ty,)*)> for Fun
        where
            Fun: FnOnce($($ty),*) + Send + 'static,
            $($ty: DeserializeOwned + 'static,)*
        {
            fn complete(self, ($($ty,)*): ($($ty,)*)) {
                (self)($($ty),*)
            }
        }
    };
}

impl_services!();
impl_services!(A0);
impl_services!(A0, A1);
impl_services!(A0, A1, A2);
impl_services!(A0, A1, A2, A3);
impl_services!(A0, A1, A2, A3, A4);
impl_services!(A0, A1, A2, A3, A4, A5);
impl_services!(A0, A1, A2, A3, A4, A5, A6);
impl_services!(A0, A1, A2, A3, A4, A5, A6, A7);

#[cfg(test)]
mod tests {
    use super::*;

    fn add(x: i32, y: i32) -> i32 {
        x + y
    }

    #[test]
    fn test_sync_service_invokes_fn_item() {
        assert_eq!(SyncService::invoke(&add, (2, 3)), 5);
    }

    #[test]
    fn test_sync_service_invokes_closure() {
        let offset = 10;
        let handler = move |x: i32| x + offset;
        assert_eq!(SyncService::invoke(&handler, (1,)), 11);
    }

    #[test]
    fn test_sync_signature() {
        assert_eq!(
            <fn(i32, i32) -> i32 as SyncService<(i32, i32)>>::signature(),
            "fn(i32, i32) -> i32"
        );
    }

    #[test]
    fn test_void_signature() {
        fn nothing() {}
        assert_eq!(
            <fn() as SyncService<()>>::signature(),
            "fn() -> ()"
        );
        SyncService::invoke(&nothing, ());
    }

    #[test]
    fn test_bound_service() {
        struct Counter {
            base: i32,
        }
        let handler = |counter: &Counter, x: i32| counter.base + x;
        let counter = Counter { base: 1 };
        assert_eq!(BoundService::invoke(&handler, &counter, (2,)), 3);
    }

    #[test]
    fn test_event_service_decision() {
        let keep = |_s: String| EventControl::Keep;
        let drop_it = || EventControl::Unsubscribe;
        assert_eq!(EventService::invoke(&keep, ("x".to_string(),)), EventControl::Keep);
        assert_eq!(EventService::invoke(&drop_it, ()), EventControl::Unsubscribe);
    }

    #[test]
    fn test_continuation_consumes_callback() {
        use std::sync::atomic::{AtomicI32, Ordering};
        use std::sync::Arc;

        let got = Arc::new(AtomicI32::new(0));
        let sink = got.clone();
        // FnOnce: completing moves the closure.
        let cb = move |i: i32| sink.store(i, Ordering::SeqCst);
        Continuation::complete(cb, (7,));
        assert_eq!(got.load(Ordering::SeqCst), 7);
    }
}
