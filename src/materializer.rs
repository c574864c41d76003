use std::{cell::RefCell, io, rc::Rc};

use bytes::Bytes;
use futures::future::LocalBoxFuture;
use tokio::task::JoinHandle;

/// A message body that is produced asynchronously, such as a file or a blob owned by the host.
///
/// The channel asks for the bytes only when the message reaches the front of the outgoing
/// queue, and at most one payload is materialized at a time.
pub trait DeferredPayload {
    /// Size hint, used for diagnostics only.
    fn size(&self) -> Option<u64> {
        None
    }

    /// Produces the full payload.
    fn materialize(&self) -> LocalBoxFuture<'static, io::Result<Bytes>>;
}

type Completion = Box<dyn FnOnce(io::Result<Bytes>)>;

/// A single in-flight materialization.
///
/// The completion runs exactly once: either when the payload is ready, or synchronously from
/// [`Materializer::cancel`] with an `Interrupted` error.
pub(crate) struct Materializer {
    slot: Rc<RefCell<Option<Completion>>>,
    task: Option<JoinHandle<()>>,
}

impl Materializer {
    /// Starts producing `payload` on the current `LocalSet`.
    pub fn start<F>(payload: &dyn DeferredPayload, on_done: F) -> Self
    where
        F: FnOnce(io::Result<Bytes>) + 'static,
    {
        let slot: Rc<RefCell<Option<Completion>>> = Rc::new(RefCell::new(Some(Box::new(on_done))));
        let future = payload.materialize();
        let task = tokio::task::spawn_local({
            let slot = Rc::clone(&slot);
            async move {
                let result = future.await;
                let completion = slot.borrow_mut().take();
                if let Some(completion) = completion {
                    completion(result);
                }
            }
        });

        Self {
            slot,
            task: Some(task),
        }
    }

    /// Returns `true` until the completion has run.
    pub fn is_pending(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Aborts the task and reports `Interrupted` if the completion has not run yet.
    pub fn cancel(&mut self) {
        let completion = self.slot.borrow_mut().take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(completion) = completion {
            completion(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "payload materialization cancelled",
            )));
        }
    }
}

impl Drop for Materializer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{channel::oneshot, future::FutureExt};
    use std::cell::Cell;

    struct Pending(RefCell<Option<oneshot::Receiver<io::Result<Bytes>>>>);

    impl DeferredPayload for Pending {
        fn materialize(&self) -> LocalBoxFuture<'static, io::Result<Bytes>> {
            let rx = self.0.borrow_mut().take();
            async move {
                match rx {
                    Some(rx) => rx
                        .await
                        .unwrap_or_else(|_| Err(io::Error::other("sender dropped"))),
                    None => Err(io::Error::other("materialized twice")),
                }
            }
            .boxed_local()
        }
    }

    #[tokio::test]
    async fn test_completion_receives_payload() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, rx) = oneshot::channel();
                let payload = Pending(RefCell::new(Some(rx)));
                let result = Rc::new(RefCell::new(None));

                let materializer = Materializer::start(&payload, {
                    let result = Rc::clone(&result);
                    move |r| *result.borrow_mut() = Some(r)
                });
                assert!(materializer.is_pending());

                tx.send(Ok(Bytes::from_static(b"data"))).unwrap();
                for _ in 0..10 {
                    if !materializer.is_pending() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }

                assert!(!materializer.is_pending());
                let data = result.borrow_mut().take().unwrap().unwrap();
                assert_eq!(&data[..], b"data");
            })
            .await;
    }

    #[tokio::test]
    async fn test_cancel_is_synchronous_and_idempotent() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (_tx, rx) = oneshot::channel();
                let payload = Pending(RefCell::new(Some(rx)));
                let calls = Rc::new(Cell::new(0));
                let kind = Rc::new(Cell::new(None));

                let mut materializer = Materializer::start(&payload, {
                    let calls = Rc::clone(&calls);
                    let kind = Rc::clone(&kind);
                    move |r| {
                        calls.set(calls.get() + 1);
                        kind.set(r.err().map(|e| e.kind()));
                    }
                });

                materializer.cancel();
                assert_eq!(calls.get(), 1);
                assert_eq!(kind.get(), Some(io::ErrorKind::Interrupted));

                materializer.cancel();
                drop(materializer);
                assert_eq!(calls.get(), 1);
            })
            .await;
    }
}
