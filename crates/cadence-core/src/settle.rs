//! Waitable handle shared by queue waits and activity transitions.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Eventual result of a wait or a transition request.
///
/// Either already settled when created, or settled later through the
/// paired sender. A sender dropped without sending (its owner went away)
/// settles the handle with the `orphaned` error.
#[must_use = "a Settlement does nothing unless awaited"]
#[derive(Debug)]
pub struct Settlement<E> {
    inner: Inner<E>,
}

#[derive(Debug)]
enum Inner<E> {
    Ready(Option<Result<(), E>>),
    Waiting {
        rx: oneshot::Receiver<Result<(), E>>,
        orphaned: Option<E>,
    },
}

pub(crate) type Settler<E> = oneshot::Sender<Result<(), E>>;

impl<E> Settlement<E> {
    pub(crate) fn ready(result: Result<(), E>) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    pub(crate) fn channel(orphaned: E) -> (Settler<E>, Self) {
        let (tx, rx) = oneshot::channel();
        let settlement = Self {
            inner: Inner::Waiting {
                rx,
                orphaned: Some(orphaned),
            },
        };
        (tx, settlement)
    }
}

impl<E: Unpin> Future for Settlement<E> {
    type Output = Result<(), E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            Inner::Ready(result) => match result.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("Settlement polled after completion"),
            },
            Inner::Waiting { rx, orphaned } => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => match orphaned.take() {
                    Some(err) => Poll::Ready(Err(err)),
                    None => panic!("Settlement polled after completion"),
                },
            },
        }
    }
}

/// Deliver a result, ignoring receivers that were dropped.
pub(crate) fn settle<E>(settler: Settler<E>, result: Result<(), E>) {
    let _ = settler.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_settlement_yields_its_result() {
        let ok: Settlement<String> = Settlement::ready(Ok(()));
        assert!(ok.await.is_ok());

        let err: Settlement<String> = Settlement::ready(Err("boom".to_string()));
        assert_eq!(err.await.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn channel_settlement_waits_for_sender() {
        let (tx, settlement) = Settlement::<String>::channel("orphaned".to_string());
        settle(tx, Err("late".to_string()));
        assert_eq!(settlement.await.unwrap_err(), "late");
    }

    #[tokio::test]
    async fn dropped_sender_yields_orphaned_error() {
        let (tx, settlement) = Settlement::<String>::channel("orphaned".to_string());
        drop(tx);
        assert_eq!(settlement.await.unwrap_err(), "orphaned");
    }
}
