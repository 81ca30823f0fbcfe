//! Completion tokens.
//!
//! Every handle operation returns a [`Pending`]. The same token serves
//! the three calling conventions of the remote client API:
//!
//! - `.await` for async callers,
//! - [`Pending::wait`] to block the calling thread,
//! - [`Pending::on_complete`] to have a handler invoked on a runtime thread.
//!
//! Dropping the token (or [`Pending::cancel`]) abandons an operation that
//! has not started yet; the handle's worker skips it.

use std::future::IntoFuture;

use futures::future::BoxFuture;
use ppfx_core::{Error, Result};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Callback form of a completion.
pub type ResponseHandler<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

#[must_use = "dropping a pending operation abandons it"]
pub struct Pending<T> {
    state: Slot<T>,
    runtime: Handle,
}

enum Slot<T> {
    /// Resolved before submission (argument or state errors).
    Ready(Result<T>),
    Waiting(oneshot::Receiver<Result<T>>),
}

fn abandoned() -> Error {
    Error::invalid_state("operation abandoned: the handle worker stopped")
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn ready(result: Result<T>, runtime: Handle) -> Self {
        Pending {
            state: Slot::Ready(result),
            runtime,
        }
    }

    pub(crate) fn waiting(rx: oneshot::Receiver<Result<T>>, runtime: Handle) -> Self {
        Pending {
            state: Slot::Waiting(rx),
            runtime,
        }
    }

    /// Block until the operation completes.
    ///
    /// Must not be called from within an async context.
    pub fn wait(self) -> Result<T> {
        match self.state {
            Slot::Ready(result) => result,
            Slot::Waiting(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(abandoned())),
        }
    }

    /// Invoke `handler` with the result, on a runtime thread.
    pub fn on_complete<F>(self, handler: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let handler: ResponseHandler<T> = Box::new(handler);
        let runtime = self.runtime.clone();
        runtime.spawn(async move { handler(self.await) });
    }

    /// Abandon the operation if it has not started.
    pub fn cancel(self) {}
}

impl<T: Send + 'static> IntoFuture for Pending<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self.state {
            Slot::Ready(result) => Box::pin(async move { result }),
            Slot::Waiting(rx) => {
                Box::pin(async move { rx.await.unwrap_or_else(|_| Err(abandoned())) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppfx_core::ErrorKind;

    #[tokio::test]
    async fn awaits_worker_reply() {
        let (tx, rx) = oneshot::channel();
        let pending = Pending::waiting(rx, Handle::current());
        tx.send(Ok(7u32)).unwrap();
        assert_eq!(pending.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_sender_reports_abandoned() {
        let (tx, rx) = oneshot::channel::<Result<u32>>();
        drop(tx);
        let err = Pending::waiting(rx, Handle::current()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn cancel_closes_the_reply_channel() {
        let (tx, rx) = oneshot::channel::<Result<u32>>();
        Pending::waiting(rx, Handle::current()).cancel();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn callback_receives_ready_result() {
        let (done_tx, done_rx) = oneshot::channel();
        Pending::ready(Err::<u32, _>(Error::invalid_state("closed")), Handle::current())
            .on_complete(move |r| {
                let _ = done_tx.send(r);
            });
        let r = done_rx.await.unwrap();
        assert_eq!(r.unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn wait_blocks_outside_the_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, rx) = oneshot::channel();
        let pending = Pending::waiting(rx, rt.handle().clone());
        rt.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let _ = tx.send(Ok("done"));
        });
        assert_eq!(pending.wait().unwrap(), "done");
    }
}
