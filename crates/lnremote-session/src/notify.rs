use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use lnremote_protocol::Frame;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// Synchronous consumer of unsolicited frames.
///
/// Observers run on the session's drain task, in transport-arrival order,
/// before the frame is broadcast. They must not block.
pub trait FrameObserver: Send + Sync {
    fn observe(&self, frame: &Frame);
}

/// Stream of unsolicited frames (position reports, heartbeats).
///
/// Ends only when the session is dropped. A subscriber that falls more than
/// the configured capacity behind skips the missed frames.
pub struct Notifications {
    inner: BroadcastStream<Frame>,
}

impl Notifications {
    pub(crate) fn new(rx: broadcast::Receiver<Frame>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }
}

impl Stream for Notifications {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => return Poll::Ready(Some(frame)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "notification subscriber lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifications").finish_non_exhaustive()
    }
}
