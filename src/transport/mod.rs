//! Per-turn cancellation and cancellable stream adapters.
//!
//! One [`TurnCancellation`] is created for each user-initiated turn before the
//! first model invocation. Clones share the same underlying token, so the
//! provider request, the byte read loop and the approval wait all observe the
//! same stop signal. Cancellation takes effect at the next suspension point
//! and always ends the affected stream quietly: it is never reported as an
//! error.

use std::future::Future;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation handle shared by everything working on one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnCancellation {
    token: CancellationToken,
}

impl TurnCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the turn is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// A child handle: cancelled with this one, but cancelling it does not
    /// cancel the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drive `fut` unless the turn is cancelled first. Returns `None` on
    /// cancellation. The cancellation branch is polled first so an already
    /// cancelled turn never starts new work.
    pub async fn run<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

/// Wrap a stream so that it ends (without error) at the next poll after the
/// turn is cancelled.
pub fn cancellable<S, T>(stream: S, cancel: TurnCancellation) -> BoxStream<'static, T>
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    let wrapped = async_stream::stream! {
        let mut inner = std::pin::pin!(stream);
        loop {
            match cancel.run(inner.next()).await {
                Some(Some(item)) => yield item,
                Some(None) => break,
                None => {
                    debug!("stream read loop stopped by cancellation");
                    break;
                }
            }
        }
    };
    Box::pin(wrapped)
}
