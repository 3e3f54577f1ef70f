//! Connection handles and request dispatch.
//!
//! A [`Connection`] is the logical handle to one connected device. It owns the bounded queue serviced by the
//! device's writer task and the registry of transactions awaiting a response from the device's reader task.
//!
//! Connections have a strict, one-way lifecycle: they are created open, and once closed they can never be reopened.
//! A new connection is required to talk to the device again.
//!
//! # Example
//!
//! ```
//! use tether::{Connection, Message, Request};
//!
//! #[derive(Debug, Message)]
//! struct Ping;
//!
//! # tokio_test::block_on(async {
//! let (conn, mut outbox): (Connection<Ping>, _) =
//!     Connection::new("mac:112233445566", "route-a", None, 8);
//!
//! tokio::spawn(async move {
//!     while let Some(envelope) = outbox.recv().await {
//!         // write envelope.message() to the device here
//!         envelope.complete(Ok(()));
//!     }
//! });
//!
//! let response = conn.send(Request::new(Ping)).await?;
//! assert!(response.is_none());
//! # Ok::<(), tether::error::SendError>(())
//! # });
//! ```

use std::{
    borrow::Borrow,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    context::RequestContext,
    envelope::{self, Envelope, Outbox},
    error::SendError,
    message::{Message, Request, Response},
    options::Options,
    transaction::{PendingResponse, Transactions},
};

const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;

/// The default metadata payload conveyed with a connection.
pub type Convey = serde_json::Map<String, serde_json::Value>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(Arc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(Arc::from(s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), &*self.0)
            }
        }
    };
}

string_id! {
    /// The identifier of a connected device.
    ///
    /// This is NOT globally unique. Several connections may carry the same identifier at once, for example when a
    /// device is duplicated, and they are still served independently.
    ConnectionId
}

string_id! {
    /// The routing key a connection is currently reachable under.
    RoutingKey
}

/// A handle to one connected device.
///
/// Handles are cheap to clone; all clones refer to the same connection.
pub struct Connection<M, C = Convey> {
    inner: Arc<ConnectionInner<M, C>>,
}

struct ConnectionInner<M, C> {
    id: ConnectionId,
    key: ArcSwap<RoutingKey>,
    convey: Option<C>,
    connected_at: DateTime<Utc>,
    state: AtomicU8,
    shutdown: CancellationToken,
    messages: mpsc::Sender<Envelope<M>>,
    transactions: Transactions<Response<M>>,
}

impl<M, C> Connection<M, C>
where
    M: Message,
{
    /// Creates an open connection with a queue of `queue_size` envelopes, returning the outbox its writer task
    /// drains.
    ///
    /// A `queue_size` of zero uses [`DEFAULT_QUEUE_SIZE`](crate::options::DEFAULT_QUEUE_SIZE).
    pub fn new(
        id: impl Into<ConnectionId>,
        key: impl Into<RoutingKey>,
        convey: Option<C>,
        queue_size: usize,
    ) -> (Self, Outbox<M>) {
        Connection::with_options(id, key, convey, &Options { queue_size })
    }

    /// Creates an open connection configured by `options`.
    pub fn with_options(
        id: impl Into<ConnectionId>,
        key: impl Into<RoutingKey>,
        convey: Option<C>,
        options: &Options,
    ) -> (Self, Outbox<M>) {
        let (messages, outbox) = envelope::channel(options.queue_size());
        let conn = Connection {
            inner: Arc::new(ConnectionInner {
                id: id.into(),
                key: ArcSwap::from_pointee(key.into()),
                convey,
                connected_at: Utc::now(),
                state: AtomicU8::new(STATE_OPEN),
                shutdown: CancellationToken::new(),
                messages,
                transactions: Transactions::new(),
            }),
        };
        trace!(id = %conn.inner.id, queue_size = options.queue_size(), "connection opened");
        (conn, outbox)
    }

    /// Sends a request to the device.
    ///
    /// The request is queued for the writer task, and this method waits until the writer has attempted the write.
    /// If the message carries a transaction key, it then waits for the correlated response, which is returned.
    /// Messages without a transaction key return `Ok(None)` once written.
    ///
    /// Every wait is bounded by the request's context and by the connection closing, which fail the call with
    /// [`SendError::Cancelled`] or [`SendError::DeadlineExceeded`], and [`SendError::ConnectionClosed`]
    /// respectively. A write already taken by the writer is never retracted; only the wait stops early.
    ///
    /// Dropping the returned future before it completes is equivalent to cancelling the request.
    pub async fn send(&self, request: Request<M>) -> Result<Option<Response<M>>, SendError> {
        if self.is_closed() {
            return Err(SendError::ConnectionClosed);
        }

        let ctx = request.context().clone();
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        // Held for the rest of the call, so the transaction is released on every exit path.
        let pending = match request.transaction_key() {
            Some(key) => Some(self.inner.transactions.register(key)?),
            None => None,
        };

        self.send_request(request, &ctx).await?;

        match pending {
            Some(pending) => self.await_response(pending, &ctx).await.map(Some),
            None => Ok(None),
        }
    }

    /// Enqueues the request for the writer task and waits until the writer reports the outcome.
    async fn send_request(&self, request: Request<M>, ctx: &RequestContext) -> Result<(), SendError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let (envelope, complete) = Envelope::new(request);

        tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            _ = self.inner.shutdown.cancelled() => return Err(SendError::ConnectionClosed),
            res = self.inner.messages.send(envelope) => {
                res.map_err(|_| SendError::ConnectionClosed)?
            }
        }
        trace!(id = %self.inner.id, "request enqueued");

        tokio::select! {
            biased;
            err = ctx.done() => Err(err.into()),
            res = complete => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(SendError::Write(err)),
                Err(_) => Err(SendError::WriterStopped),
            },
            _ = self.inner.shutdown.cancelled() => Err(SendError::ConnectionClosed),
        }
    }

    /// Waits for the reader task to resolve the request's transaction.
    async fn await_response(
        &self,
        mut pending: PendingResponse<Response<M>>,
        ctx: &RequestContext,
    ) -> Result<Response<M>, SendError> {
        tokio::select! {
            biased;
            err = ctx.done() => Err(err.into()),
            response = &mut pending => response.ok_or(SendError::TransactionCancelled),
            _ = self.inner.shutdown.cancelled() => Err(SendError::ConnectionClosed),
        }
    }
}

impl<M, C> Connection<M, C> {
    /// Returns the device identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    /// Returns the current routing key.
    pub fn key(&self) -> RoutingKey {
        RoutingKey::clone(&self.inner.key.load())
    }

    /// Replaces the routing key.
    ///
    /// This is routing metadata only; it has no ordering relative to in-flight requests and does not affect open
    /// transactions or the connection's lifecycle.
    pub fn update_key(&self, key: impl Into<RoutingKey>) {
        let key = key.into();
        trace!(id = %self.inner.id, %key, "routing key updated");
        self.inner.key.store(Arc::new(key));
    }

    /// Returns the metadata payload conveyed with this connection.
    pub fn convey(&self) -> Option<&C> {
        self.inner.convey.as_ref()
    }

    /// Returns when this connection was created.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Returns an approximate count of requests queued for the writer.
    pub fn pending(&self) -> usize {
        let messages = &self.inner.messages;
        messages.max_capacity().saturating_sub(messages.capacity())
    }

    /// Returns the transaction registry, through which the reader task resolves responses.
    pub fn transactions(&self) -> &Transactions<Response<M>> {
        &self.inner.transactions
    }

    /// Requests that this connection be closed.
    ///
    /// This is idempotent and never blocks. Only the first call closes the connection, releasing every caller
    /// waiting on it, and returns `true`; every later call is a no-op returning `false`.
    pub fn request_close(&self) -> bool {
        let closed = self
            .inner
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if closed {
            self.inner.shutdown.cancel();
            debug!(id = %self.inner.id, "connection closed");
        }
        closed
    }

    /// Returns `true` once this connection is closed. Closed connections are never reopened.
    pub fn is_closed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != STATE_OPEN
    }

    /// Completes once this connection is closed.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// Returns `true` if both handles refer to the same connection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<M, C> Connection<M, C>
where
    C: Serialize,
{
    /// Renders the public metadata of this connection as a JSON object.
    ///
    /// This never fails. If the convey payload cannot be encoded, the encoding error is embedded as a string in
    /// place of the payload.
    pub fn to_json(&self) -> String {
        let convey = match &self.inner.convey {
            None => "null".to_string(),
            Some(convey) => serde_json::to_string(convey)
                .unwrap_or_else(|err| json_string(&err.to_string())),
        };

        format!(
            r#"{{"id": {}, "key": {}, "connectedAt": {}, "closed": {}, "convey": {}}}"#,
            json_string(self.inner.id.as_str()),
            json_string(self.key().as_str()),
            json_string(
                &self
                    .inner
                    .connected_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            self.is_closed(),
            convey,
        )
    }
}

fn json_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

impl<M, C> Clone for Connection<M, C> {
    fn clone(&self) -> Self {
        Connection {
            inner: self.inner.clone(),
        }
    }
}

impl<M, C> fmt::Debug for Connection<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("key", &self.key())
            .field("connected_at", &self.inner.connected_at)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<M, C> fmt::Display for Connection<M, C>
where
    C: Serialize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}
