//! Messages exchanged with a connected device.
//!
//! A [`Message`] is anything that can be written to a device. Messages which expect a reply expose a transaction
//! key, which binds the outbound request to the inbound response that the reader task later resolves.
//!
//! The [`Message`] trait can be implemented by hand, or derived:
//!
//! ```
//! use tether::Message;
//!
//! #[derive(Message)]
//! struct Query {
//!     #[transaction_key]
//!     id: String,
//!     body: Vec<u8>,
//! }
//!
//! let query = Query { id: "tx-1".into(), body: vec![] };
//! assert_eq!(tether::message::Message::transaction_key(&query), Some("tx-1"));
//! ```

use std::{borrow::Cow, sync::Arc};

use crate::context::RequestContext;

/// A message that can be dispatched to a connection.
pub trait Message: Send + 'static {
    /// The key correlating this message with its eventual response.
    ///
    /// `None`, or an empty key, marks a fire-and-forget message.
    fn transaction_key(&self) -> Option<&str> {
        None
    }
}

/// Conversion of a field into a transaction key, used by `#[derive(Message)]`.
pub trait TransactionKey {
    /// Returns the key, or `None` if the field holds no key.
    fn as_transaction_key(&self) -> Option<&str>;
}

impl TransactionKey for str {
    fn as_transaction_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl TransactionKey for String {
    fn as_transaction_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl TransactionKey for Arc<str> {
    fn as_transaction_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl TransactionKey for Cow<'_, str> {
    fn as_transaction_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl<T: TransactionKey + ?Sized> TransactionKey for &T {
    fn as_transaction_key(&self) -> Option<&str> {
        (**self).as_transaction_key()
    }
}

impl<T: TransactionKey> TransactionKey for Option<T> {
    fn as_transaction_key(&self) -> Option<&str> {
        self.as_ref().and_then(TransactionKey::as_transaction_key)
    }
}

/// A message bound to the context it is sent under.
#[derive(Debug)]
pub struct Request<M> {
    /// The message to write to the device.
    pub message: M,
    ctx: RequestContext,
}

impl<M: Message> Request<M> {
    /// Creates a request with a [background](RequestContext::background) context.
    pub fn new(message: M) -> Self {
        Request::with_context(message, RequestContext::background())
    }

    /// Creates a request bound to `ctx`.
    pub fn with_context(message: M, ctx: RequestContext) -> Self {
        Request { message, ctx }
    }

    /// Returns the request's context.
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Returns the non-empty transaction key of the message, if any.
    pub fn transaction_key(&self) -> Option<&str> {
        self.message.transaction_key().filter(|key| !key.is_empty())
    }

    /// Consumes the request, returning the message.
    pub fn into_message(self) -> M {
        self.message
    }
}

/// A response correlated to a request by its transaction key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response<M> {
    /// The message read from the device.
    pub message: M,
}

impl<M> Response<M> {
    /// Wraps a message read from the device.
    pub fn new(message: M) -> Self {
        Response { message }
    }

    /// Consumes the response, returning the message.
    pub fn into_message(self) -> M {
        self.message
    }
}
