//! Result marshalling.
//!
//! Turns the outcome of an invocation into exactly one [`CallResponse`] and
//! hands it to the caller's [`Resolver`]. Immediate outcomes resolve inline;
//! deferred outcomes resolve from a task on the dispatcher's runtime when the
//! underlying work completes or is cancelled, so the calling thread never
//! waits on them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::module::{settle_join, Deferred, Outcome};
use crate::response::CallResponse;

/// Callback that receives the response of one bridge call.
///
/// Consumed on use, so a response can be delivered at most once.
pub struct Resolver(Box<dyn FnOnce(CallResponse) + Send + 'static>);

impl Resolver {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(CallResponse) + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// A resolver that forwards the response into a channel.
    pub fn channel() -> (Self, oneshot::Receiver<CallResponse>) {
        let (tx, rx) = oneshot::channel();
        let resolver = Self::new(move |response| {
            // The receiver may have gone away; nobody is left to tell.
            let _ = tx.send(response);
        });
        (resolver, rx)
    }

    pub fn resolve(self, response: CallResponse) {
        (self.0)(response)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resolver")
    }
}

/// Handle on a dispatched call.
///
/// Dropping the handle does not cancel the call.
#[derive(Debug)]
pub struct CallHandle {
    cancel: Option<oneshot::Sender<String>>,
    /// Set by whichever of completion and cancellation settles the call first.
    claimed: Arc<AtomicBool>,
}

impl CallHandle {
    pub(crate) fn settled() -> Self {
        Self {
            cancel: None,
            claimed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the call is still waiting on an eventually-resolved result.
    pub fn is_pending(&self) -> bool {
        !self.claimed.load(Ordering::Acquire)
            && self.cancel.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Cancel a pending call.
    ///
    /// Returns `true` exactly when the caller receives
    /// [`CallResponse::Cancelled`] with `reason`, and `false` when the call
    /// was already settled.
    pub fn cancel(mut self, reason: impl Into<String>) -> bool {
        let Some(tx) = self.cancel.take() else {
            return false;
        };
        if self.claimed.swap(true, Ordering::AcqRel) {
            return false;
        }
        tx.send(reason.into()).is_ok()
    }
}

/// Deliver a response for `outcome` through `resolver`.
pub(crate) fn deliver(outcome: Outcome, resolver: Resolver, runtime: &Handle) -> CallHandle {
    match outcome {
        Outcome::Ready(value) => {
            resolver.resolve(CallResponse::ok(&value));
            CallHandle::settled()
        }
        Outcome::Pending(deferred) => deliver_deferred(deferred, resolver, runtime),
    }
}

fn deliver_deferred(deferred: Deferred, resolver: Resolver, runtime: &Handle) -> CallHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<String>();
    let claimed = Arc::new(AtomicBool::new(false));
    let mut task = deferred.into_task();

    let settle = Arc::clone(&claimed);
    runtime.spawn(async move {
        let first = tokio::select! {
            biased;
            joined = &mut task => Ok(joined),
            Ok(reason) = &mut cancel_rx => Err(reason),
        };

        let response = match first {
            Ok(joined) if !settle.swap(true, Ordering::AcqRel) => settle_join(joined),
            // Finished after cancel() claimed the call; its reason is in flight.
            Ok(joined) => match cancel_rx.await {
                Ok(reason) => CallResponse::Cancelled(reason),
                Err(_) => settle_join(joined),
            },
            Err(reason) => {
                debug!(%reason, "Cancelling pending bridge call");
                task.abort();
                CallResponse::Cancelled(reason)
            }
        };
        resolver.resolve(response);
    });

    CallHandle {
        cancel: Some(cancel_tx),
        claimed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_resolves_inline() {
        let (resolver, mut rx) = Resolver::channel();
        let handle = deliver(Outcome::Ready(json!(3)), resolver, &Handle::current());

        assert!(!handle.is_pending());
        assert_eq!(rx.try_recv().unwrap(), CallResponse::Ok("3".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let deferred = Deferred::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, HostError>("late")
        });
        let (resolver, rx) = Resolver::channel();
        let handle = deliver(Outcome::Pending(deferred), resolver, &Handle::current());

        assert!(handle.is_pending());
        assert!(handle.cancel("no longer needed"));
        assert_eq!(
            rx.await.unwrap(),
            CallResponse::Cancelled("no longer needed".to_string())
        );
    }

    #[tokio::test]
    async fn test_dropping_handle_does_not_cancel() {
        let deferred = Deferred::spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, HostError>(json!({"done": true}))
        });
        let (resolver, rx) = Resolver::channel();
        drop(deliver(Outcome::Pending(deferred), resolver, &Handle::current()));

        let response = rx.await.unwrap();
        assert_eq!(response.value(), Some(json!({"done": true})));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_reports_false() {
        let deferred = Deferred::spawn(async { Ok::<_, HostError>(1) });
        let (resolver, rx) = Resolver::channel();
        let handle = deliver(Outcome::Pending(deferred), resolver, &Handle::current());

        assert!(rx.await.unwrap().is_ok());
        assert!(!handle.cancel("too late"));
    }

    #[tokio::test]
    async fn test_cancel_result_matches_delivered_response() {
        for round in 0..64 {
            let deferred = Deferred::spawn(async move { Ok::<_, HostError>(round) });
            let (resolver, rx) = Resolver::channel();
            let handle = deliver(Outcome::Pending(deferred), resolver, &Handle::current());

            for _ in 0..round % 4 {
                tokio::task::yield_now().await;
            }
            let won = handle.cancel("racing");
            let response = rx.await.unwrap();

            assert_eq!(
                won,
                matches!(response, CallResponse::Cancelled(_)),
                "round {round}: cancel returned {won} but caller got {response:?}"
            );
        }
    }
}
