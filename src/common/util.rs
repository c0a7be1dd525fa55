use std::{
    future::Future,
    str::FromStr,
    sync::Arc,
    task::{Context, Poll},
};

use crossbeam_utils::sync::{Parker, Unparker};
use futures_util::{pin_mut, task::ArcWake};

// ===============================================================================================
// Environment
// ===============================================================================================
#[doc(hidden)]
pub(crate) fn read_env(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) => value,
        Err(_) => default.to_string(),
    }
}

/// Reads and parses an environment variable, falling back to `default` if it is unset or
/// cannot be parsed.
pub(crate) fn read_env_parsed<T: FromStr>(name: &str, default: T) -> T {
    let value = read_env(name, "");
    if value.is_empty() {
        return default;
    }

    match value.trim().parse::<T>() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::warn!(
                "Cannot parse environment variable {}={:?}, using default",
                name,
                value
            );
            default
        }
    }
}

// ===============================================================================================
// Futures
// ===============================================================================================
/// Extension trait for efficiently blocking on a future.
#[doc(hidden)]
pub trait Join: Future {
    fn join(self) -> <Self as Future>::Output;
}

impl<F: Future> Join for F {
    fn join(self) -> <Self as Future>::Output {
        struct ThreadWaker(Unparker);

        impl ArcWake for ThreadWaker {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                arc_self.0.unpark();
            }
        }

        let parker = Parker::new();
        let waker = futures_util::task::waker(Arc::new(ThreadWaker(parker.unparker().clone())));
        let mut context = Context::from_waker(&waker);

        let future = self;
        pin_mut!(future);

        loop {
            match future.as_mut().poll(&mut context) {
                Poll::Ready(output) => return output,
                Poll::Pending => parker.park(),
            }
        }
    }
}
