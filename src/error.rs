//! Defines error handling constructs for tether.
//!
//! Every failure a dispatch can observe is a variant of [`SendError`]. The variants are compared by kind, never by
//! identity, so callers can match on them directly to decide on a retry policy. Nothing in this crate retries
//! internally.

use std::{error, fmt};

/// A dyn boxed error.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Error that can occur when sending a request to a connection.
pub enum SendError {
    /// The connection was closed before or during the call.
    ConnectionClosed,
    /// The request's context was cancelled.
    Cancelled,
    /// The request's context deadline elapsed.
    DeadlineExceeded,
    /// Another call is already waiting on the same transaction key.
    DuplicateTransaction(String),
    /// The pending transaction was resolved without a response.
    TransactionCancelled,
    /// The writer reported a failure while writing the request.
    Write(BoxError),
    /// The writer dropped the request without reporting an outcome.
    WriterStopped,
}

impl SendError {
    /// Returns `true` if the call failed because the connection was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, SendError::ConnectionClosed)
    }

    /// Returns `true` if the call failed because its own context fired.
    pub fn is_context(&self) -> bool {
        matches!(self, SendError::Cancelled | SendError::DeadlineExceeded)
    }
}

impl fmt::Debug for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::ConnectionClosed => write!(f, "ConnectionClosed"),
            SendError::Cancelled => write!(f, "Cancelled"),
            SendError::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            SendError::DuplicateTransaction(key) => {
                f.debug_tuple("DuplicateTransaction").field(key).finish()
            }
            SendError::TransactionCancelled => write!(f, "TransactionCancelled"),
            SendError::Write(err) => f.debug_tuple("Write").field(err).finish(),
            SendError::WriterStopped => write!(f, "WriterStopped"),
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::ConnectionClosed => write!(f, "connection closed"),
            SendError::Cancelled => write!(f, "request cancelled"),
            SendError::DeadlineExceeded => write!(f, "request deadline exceeded"),
            SendError::DuplicateTransaction(key) => {
                write!(f, "transaction '{key}' is already pending")
            }
            SendError::TransactionCancelled => write!(f, "transaction cancelled"),
            SendError::Write(err) => write!(f, "write failed: {err}"),
            SendError::WriterStopped => write!(f, "writer stopped"),
        }
    }
}

impl error::Error for SendError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            SendError::Write(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<ContextError> for SendError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => SendError::Cancelled,
            ContextError::DeadlineExceeded => SendError::DeadlineExceeded,
        }
    }
}

impl From<RegistryError> for SendError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateTransaction(key) => SendError::DuplicateTransaction(key),
            // Dispatch never registers an empty key, and never completes transactions.
            RegistryError::EmptyKey | RegistryError::UnknownTransaction(_) => {
                SendError::TransactionCancelled
            }
        }
    }
}

/// The reason a [`RequestContext`](crate::context::RequestContext) is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// The context was explicitly cancelled.
    Cancelled,
    /// The context's deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Cancelled => write!(f, "context cancelled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl error::Error for ContextError {}

/// An error that can occur when registering or resolving transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A transaction with the same key is already pending.
    DuplicateTransaction(String),
    /// No transaction is pending under the key.
    UnknownTransaction(String),
    /// Transaction keys must not be empty.
    EmptyKey,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTransaction(key) => {
                write!(f, "transaction '{key}' is already pending")
            }
            RegistryError::UnknownTransaction(key) => write!(f, "no pending transaction '{key}'"),
            RegistryError::EmptyKey => write!(f, "transaction key is empty"),
        }
    }
}

impl error::Error for RegistryError {}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn context_errors_keep_their_kind() {
        assert!(matches!(
            SendError::from(ContextError::Cancelled),
            SendError::Cancelled
        ));
        assert!(matches!(
            SendError::from(ContextError::DeadlineExceeded),
            SendError::DeadlineExceeded
        ));
        assert!(SendError::DeadlineExceeded.is_context());
        assert!(!SendError::ConnectionClosed.is_context());
        assert!(SendError::ConnectionClosed.is_closed());
    }

    #[test]
    fn duplicate_registration_carries_the_key() {
        let err = SendError::from(RegistryError::DuplicateTransaction("tx-1".into()));
        assert!(matches!(&err, SendError::DuplicateTransaction(key) if key == "tx-1"));
        assert_eq!(err.to_string(), "transaction 'tx-1' is already pending");
    }

    #[test]
    fn write_errors_expose_their_source() {
        let err = SendError::Write(Box::new(io::Error::new(io::ErrorKind::BrokenPipe, "eof")));
        assert_eq!(err.to_string(), "write failed: eof");
        assert!(error::Error::source(&err).is_some());
    }
}
