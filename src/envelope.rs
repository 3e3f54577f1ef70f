//! The bounded queue between dispatching callers and a connection's writer task.
//!
//! Each queued item is an [`Envelope`]: the request to write, paired with a private one-shot signal through which
//! the writer reports the outcome of the write. The writer drains the queue through the connection's [`Outbox`].

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::{error::BoxError, message::Request};

/// Outcome of a write, as reported by the writer task.
pub type WriteResult = Result<(), BoxError>;

/// Creates a bounded envelope queue with the given capacity.
pub(crate) fn channel<M>(capacity: usize) -> (mpsc::Sender<Envelope<M>>, Outbox<M>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Outbox(rx))
}

/// A queued request together with its write completion signal.
///
/// An envelope is completed at most once: [`complete`](Envelope::complete) consumes it. If a writer drops an
/// envelope without completing it, the waiting caller fails with
/// [`SendError::WriterStopped`](crate::error::SendError::WriterStopped).
pub struct Envelope<M> {
    request: Request<M>,
    complete: oneshot::Sender<WriteResult>,
}

impl<M> Envelope<M> {
    pub(crate) fn new(request: Request<M>) -> (Self, oneshot::Receiver<WriteResult>) {
        let (complete, rx) = oneshot::channel();
        (Envelope { request, complete }, rx)
    }

    /// Returns the request to write.
    pub fn request(&self) -> &Request<M> {
        &self.request
    }

    /// Returns the message to write.
    pub fn message(&self) -> &M {
        &self.request.message
    }

    /// Returns `true` if the caller has stopped waiting for this write.
    ///
    /// Writers should drop envelopes found abandoned at dequeue. Once a write has started it is never retracted.
    pub fn is_abandoned(&self) -> bool {
        self.complete.is_closed()
    }

    /// Reports the outcome of the write to the waiting caller.
    pub fn complete(self, result: WriteResult) {
        let _ = self.complete.send(result);
    }

    /// Splits the envelope into its request and a completer for reporting the outcome later.
    pub fn into_parts(self) -> (Request<M>, Completer) {
        (self.request, Completer(self.complete))
    }
}

impl<M: fmt::Debug> fmt::Debug for Envelope<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("request", &self.request)
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// The completion half of an [`Envelope`], detached from its request.
#[must_use = "the caller waits until the completer is used or dropped"]
pub struct Completer(oneshot::Sender<WriteResult>);

impl Completer {
    /// Reports the outcome of the write to the waiting caller.
    pub fn complete(self, result: WriteResult) {
        let _ = self.0.send(result);
    }

    /// Returns `true` if the caller has stopped waiting for this write.
    pub fn is_abandoned(&self) -> bool {
        self.0.is_closed()
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// The writer's receiving half of a connection queue.
pub struct Outbox<M>(mpsc::Receiver<Envelope<M>>);

impl<M> Outbox<M> {
    /// Receives the next envelope, or `None` once every connection handle is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Envelope<M>> {
        self.0.recv().await
    }

    /// Receives the next envelope if one is queued.
    pub fn try_recv(&mut self) -> Option<Envelope<M>> {
        self.0.try_recv().ok()
    }

    /// Closes the queue without dropping it.
    ///
    /// Queued envelopes can still be received. Callers still waiting to enqueue fail with
    /// [`SendError::ConnectionClosed`](crate::error::SendError::ConnectionClosed).
    pub fn close(&mut self) {
        self.0.close();
    }

    /// The number of queued envelopes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no envelopes are queued.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts the outbox into a [`Stream`](tokio_stream::Stream) of envelopes.
    pub fn into_stream(self) -> ReceiverStream<Envelope<M>> {
        ReceiverStream::new(self.0)
    }
}

impl<M> fmt::Debug for Outbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox").field("rx", &self.0).finish()
    }
}
