//! The canonical writer task loop.
//!
//! A connection's writer is the single consumer of its [`Outbox`]. [`write_pump`] drives any [`MessageWriter`]
//! against an outbox, completing every envelope it takes with the writer's outcome, until the connection closes or
//! the writer fails fatally.

use std::{any::Any, future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::{
    connection::Connection,
    envelope::Outbox,
    error::BoxError,
    message::{Message, Request},
};

/// Performs the physical write of requests to a device.
pub trait MessageWriter<M>: Send {
    /// Writes one request to the device.
    fn write(&mut self, request: &Request<M>) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Returns `true` if `err` leaves the device unusable, closing the connection.
    ///
    /// Defaults to treating every error as fatal.
    fn is_fatal(&self, err: &BoxError) -> bool {
        let _ = err;
        true
    }
}

/// Why a [`write_pump`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpExit {
    /// The connection was closed.
    Closed,
    /// The writer failed fatally, and the pump closed the connection.
    WriteFailed,
    /// The writer panicked, and the pump closed the connection.
    Panicked,
}

/// Runs the writer loop for `conn`.
///
/// Envelopes are written one at a time in queue order. Envelopes whose caller gave up while they were still queued
/// are dropped unwritten. A write already started is always allowed to finish, even if the connection closes or its
/// caller gives up meanwhile. Envelopes still queued when the pump returns are
/// dropped; their callers have already been released by the connection closing.
///
/// A panicking writer is treated as a fatal write failure: the envelope being written is completed with an error
/// and the connection is closed.
pub async fn write_pump<M, C, W>(conn: Connection<M, C>, mut outbox: Outbox<M>, mut writer: W) -> PumpExit
where
    M: Message,
    W: MessageWriter<M>,
{
    let exit = loop {
        let envelope = tokio::select! {
            biased;
            _ = conn.closed() => break PumpExit::Closed,
            envelope = outbox.recv() => match envelope {
                Some(envelope) => envelope,
                // Unreachable while `conn` is held, but harmless.
                None => break PumpExit::Closed,
            },
        };

        if envelope.is_abandoned() {
            trace!(id = %conn.id(), "dropping request abandoned while queued");
            continue;
        }

        let res = AssertUnwindSafe(writer.write(envelope.request()))
            .catch_unwind()
            .await;
        match res {
            Ok(Ok(())) => envelope.complete(Ok(())),
            Ok(Err(err)) => {
                warn!(id = %conn.id(), "write failed: {err}");
                let fatal = writer.is_fatal(&err);
                envelope.complete(Err(err));
                if fatal {
                    conn.request_close();
                    break PumpExit::WriteFailed;
                }
            }
            Err(panic) => {
                let msg = panic_message(&*panic);
                error!(id = %conn.id(), "writer panicked: {msg}");
                envelope.complete(Err(format!("writer panicked: {msg}").into()));
                conn.request_close();
                break PumpExit::Panicked;
            }
        }
    };

    outbox.close();
    debug!(id = %conn.id(), ?exit, dropped = outbox.len(), "write pump exiting");
    exit
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use tokio::sync::oneshot;

    use super::*;
    use crate::{context::RequestContext, error::SendError};

    #[derive(Debug)]
    struct Frame(&'static str);

    impl Message for Frame {}

    #[derive(Default)]
    struct RecordingWriter {
        written: Vec<&'static str>,
        fail_on: Option<&'static str>,
        panic_on: Option<&'static str>,
        fatal: bool,
    }

    impl MessageWriter<Frame> for &mut RecordingWriter {
        async fn write(&mut self, request: &Request<Frame>) -> Result<(), BoxError> {
            if self.panic_on == Some(request.message.0) {
                panic!("device exploded");
            }
            if self.fail_on == Some(request.message.0) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe").into());
            }
            self.written.push(request.message.0);
            Ok(())
        }

        fn is_fatal(&self, _err: &BoxError) -> bool {
            self.fatal
        }
    }

    /// Blocks its first write until released.
    struct GatedWriter {
        gate: Option<oneshot::Receiver<()>>,
        written: Vec<&'static str>,
    }

    impl MessageWriter<Frame> for &mut GatedWriter {
        async fn write(&mut self, request: &Request<Frame>) -> Result<(), BoxError> {
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
            self.written.push(request.message.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn pump_writes_in_order_until_closed() {
        let (conn, outbox): (Connection<Frame>, _) = Connection::new("id", "key", None, 4);
        let mut writer = RecordingWriter::default();

        let pump = write_pump(conn.clone(), outbox, &mut writer);
        let sends = async {
            conn.send(Request::new(Frame("a"))).await.unwrap();
            conn.send(Request::new(Frame("b"))).await.unwrap();
            conn.request_close();
        };
        let (exit, ()) = tokio::join!(pump, sends);

        assert_eq!(exit, PumpExit::Closed);
        assert_eq!(writer.written, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn fatal_write_errors_close_the_connection() {
        let (conn, outbox): (Connection<Frame>, _) = Connection::new("id", "key", None, 4);
        let mut writer = RecordingWriter {
            fail_on: Some("bad"),
            fatal: true,
            ..Default::default()
        };

        let pump = write_pump(conn.clone(), outbox, &mut writer);
        let send = conn.send(Request::new(Frame("bad")));
        let (exit, result) = tokio::join!(pump, send);

        assert_eq!(exit, PumpExit::WriteFailed);
        assert!(matches!(result, Err(SendError::Write(_))));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn non_fatal_write_errors_keep_pumping() {
        let (conn, outbox): (Connection<Frame>, _) = Connection::new("id", "key", None, 4);
        let mut writer = RecordingWriter {
            fail_on: Some("bad"),
            fatal: false,
            ..Default::default()
        };

        let pump = write_pump(conn.clone(), outbox, &mut writer);
        let sends = async {
            assert!(conn.send(Request::new(Frame("bad"))).await.is_err());
            conn.send(Request::new(Frame("good"))).await.unwrap();
            conn.request_close();
        };
        let (exit, ()) = tokio::join!(pump, sends);

        assert_eq!(exit, PumpExit::Closed);
        assert_eq!(writer.written, vec!["good"]);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn panicking_writer_fails_the_request_and_closes() {
        let (conn, outbox): (Connection<Frame>, _) = Connection::new("id", "key", None, 4);
        let mut writer = RecordingWriter {
            panic_on: Some("boom"),
            ..Default::default()
        };

        let pump = write_pump(conn.clone(), outbox, &mut writer);
        let send = conn.send(Request::new(Frame("boom")));
        let (exit, result) = tokio::join!(pump, send);

        assert_eq!(exit, PumpExit::Panicked);
        match result {
            Err(SendError::Write(err)) => assert_eq!(err.to_string(), "writer panicked: device exploded"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn requests_abandoned_while_queued_are_not_written() {
        let (conn, outbox): (Connection<Frame>, _) = Connection::new("id", "key", None, 4);
        let (release, gate) = oneshot::channel();
        let mut writer = GatedWriter {
            gate: Some(gate),
            written: Vec::new(),
        };

        let pump = write_pump(conn.clone(), outbox, &mut writer);
        let sends = async {
            let stalled = conn.send(Request::new(Frame("stalled")));
            let late = async {
                let ctx = RequestContext::with_timeout(Duration::from_millis(10));
                let err = conn
                    .send(Request::with_context(Frame("late"), ctx))
                    .await
                    .unwrap_err();
                assert!(matches!(err, SendError::DeadlineExceeded));
                release.send(()).unwrap();
            };
            let (stalled, ()) = tokio::join!(stalled, late);
            stalled.unwrap();
            conn.send(Request::new(Frame("after"))).await.unwrap();
            conn.request_close();
        };
        let (exit, ()) = tokio::join!(pump, sends);

        assert_eq!(exit, PumpExit::Closed);
        assert_eq!(writer.written, vec!["stalled", "after"]);
    }
}
