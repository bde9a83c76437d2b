//! Outbound socket abstraction.
//!
//! # Responsibilities
//! - Define the `ClientSocket` seam the hub and backpressure handler write to
//! - Adapt an axum WebSocket writer task to that seam (`WsSocket`)
//! - Report buffered output so the backpressure handler can pause a client
//!
//! # Data Flow
//! ```text
//! BackpressureHandler
//!     → WsSocket::send (non-blocking, bounded channel)
//!     → writer task (http/websocket.rs) → WebSocket sink
//!     → WsSocket::mark_written (releases buffered bytes)
//! ```
//!
//! # Design Decisions
//! - The first `write_buffer_bytes` in flight are the socket's own buffer;
//!   only bytes beyond that count as buffered output
//! - A full writer channel always reports buffered output
//! - Termination is a cancellation token shared with the reader and writer tasks

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Close code sent when the server shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code for a rejected origin.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code when the connection cap is reached.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Transport-level send failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("socket is closed")]
    Closed,
    #[error("socket write buffer is full")]
    Full,
}

/// A client connection the server can write to.
pub trait ClientSocket: Send + Sync {
    /// Whether the socket accepts frames.
    fn is_open(&self) -> bool;

    /// Bytes waiting beyond the socket's own buffer. Non-zero means backpressure.
    fn buffered_amount(&self) -> usize;

    /// Queue a text frame without blocking.
    fn send(&self, frame: Arc<str>) -> Result<(), SocketError>;

    /// Queue a protocol-level ping.
    fn ping(&self) -> Result<(), SocketError>;

    /// Begin a graceful close; the peer is expected to acknowledge.
    fn close(&self, code: u16, reason: &str);

    /// Drop the connection immediately.
    fn terminate(&self);
}

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(Arc<str>),
    Ping,
    Close { code: u16, reason: String },
}

/// `ClientSocket` backed by a bounded channel to a WebSocket writer task.
#[derive(Debug)]
pub struct WsSocket {
    tx: mpsc::Sender<Frame>,
    pending_bytes: AtomicUsize,
    write_buffer_bytes: usize,
    open: AtomicBool,
    cancel: CancellationToken,
}

impl WsSocket {
    /// Create a socket and the receiver its writer task drains.
    pub fn new(channel_capacity: usize, write_buffer_bytes: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let socket = Arc::new(Self {
            tx,
            pending_bytes: AtomicUsize::new(0),
            write_buffer_bytes,
            open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });
        (socket, rx)
    }

    /// Called by the writer once a text frame has left for the network.
    pub fn mark_written(&self, bytes: usize) {
        let _ = self
            .pending_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                Some(pending.saturating_sub(bytes))
            });
    }

    /// Bytes accepted by `send` and not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::Acquire)
    }

    /// Resolves once the socket has been terminated.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl ClientSocket for WsSocket {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    fn buffered_amount(&self) -> usize {
        let pending = self.pending_bytes();
        if self.tx.capacity() == 0 {
            pending.max(1)
        } else {
            pending.saturating_sub(self.write_buffer_bytes)
        }
    }

    fn send(&self, frame: Arc<str>) -> Result<(), SocketError> {
        if !self.is_open() {
            return Err(SocketError::Closed);
        }
        let len = frame.len();
        // Count before handing off so the writer can never release bytes first.
        self.pending_bytes.fetch_add(len, Ordering::AcqRel);
        match self.tx.try_send(Frame::Text(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.mark_written(len);
                Err(SocketError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.mark_written(len);
                Err(SocketError::Closed)
            }
        }
    }

    fn ping(&self) -> Result<(), SocketError> {
        if !self.is_open() {
            return Err(SocketError::Closed);
        }
        self.tx.try_send(Frame::Ping).map_err(|e| match e {
            TrySendError::Full(_) => SocketError::Full,
            TrySendError::Closed(_) => SocketError::Closed,
        })
    }

    fn close(&self, code: u16, reason: &str) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let frame = Frame::Close {
            code,
            reason: reason.to_string(),
        };
        if self.tx.try_send(frame).is_err() {
            self.cancel.cancel();
        }
    }

    fn terminate(&self) {
        self.open.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Records frames and lets tests script buffering and failures.
    #[derive(Default)]
    pub(crate) struct MockSocket {
        frames: Mutex<Vec<String>>,
        buffered: AtomicUsize,
        closed: AtomicBool,
        terminated: AtomicBool,
        fail_sends: AtomicUsize,
        buffer_after: Mutex<Option<usize>>,
        pings: AtomicUsize,
        close_code: Mutex<Option<u16>>,
    }

    impl MockSocket {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.frames.lock().clone()
        }

        pub(crate) fn values(&self) -> Vec<serde_json::Value> {
            self.frames
                .lock()
                .iter()
                .map(|f| serde_json::from_str(f).unwrap())
                .collect()
        }

        pub(crate) fn types(&self) -> Vec<String> {
            self.values()
                .iter()
                .map(|v| v["type"].as_str().unwrap_or_default().to_string())
                .collect()
        }

        pub(crate) fn clear(&self) {
            self.frames.lock().clear();
        }

        pub(crate) fn set_buffered(&self, bytes: usize) {
            self.buffered.store(bytes, Ordering::SeqCst);
        }

        pub(crate) fn set_closed(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        /// The next `n` sends fail while the socket still looks open.
        pub(crate) fn fail_next_sends(&self, n: usize) {
            self.fail_sends.store(n, Ordering::SeqCst);
        }

        /// After `n` more successful sends, report buffered output.
        pub(crate) fn buffer_after(&self, n: usize) {
            *self.buffer_after.lock() = Some(n);
        }

        pub(crate) fn ping_count(&self) -> usize {
            self.pings.load(Ordering::SeqCst)
        }

        pub(crate) fn close_code(&self) -> Option<u16> {
            *self.close_code.lock()
        }

        pub(crate) fn was_terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }
    }

    impl ClientSocket for MockSocket {
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst) && !self.terminated.load(Ordering::SeqCst)
        }

        fn buffered_amount(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }

        fn send(&self, frame: Arc<str>) -> Result<(), SocketError> {
            if !self.is_open() {
                return Err(SocketError::Closed);
            }
            if self.fail_sends.load(Ordering::SeqCst) > 0 {
                self.fail_sends.fetch_sub(1, Ordering::SeqCst);
                return Err(SocketError::Closed);
            }
            self.frames.lock().push(frame.to_string());
            let mut after = self.buffer_after.lock();
            if let Some(remaining) = after.as_mut() {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.buffered.store(1, Ordering::SeqCst);
                    *after = None;
                }
            }
            Ok(())
        }

        fn ping(&self) -> Result<(), SocketError> {
            if !self.is_open() {
                return Err(SocketError::Closed);
            }
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self, code: u16, _reason: &str) {
            *self.close_code.lock() = Some(code);
            self.closed.store(true, Ordering::SeqCst);
        }

        fn terminate(&self) {
            self.terminated.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_counts_pending_until_written() {
        let (socket, mut rx) = WsSocket::new(8, 4);
        socket.send(Arc::from("0123456789")).unwrap();

        assert_eq!(socket.pending_bytes(), 10);
        assert_eq!(socket.buffered_amount(), 6);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, Frame::Text(Arc::from("0123456789")));
        socket.mark_written(10);
        assert_eq!(socket.buffered_amount(), 0);
    }

    #[tokio::test]
    async fn full_channel_reports_backpressure() {
        let (socket, _rx) = WsSocket::new(1, 1024);
        socket.send(Arc::from("a")).unwrap();
        assert!(socket.buffered_amount() > 0);
        assert_eq!(socket.send(Arc::from("b")), Err(SocketError::Full));
        assert_eq!(socket.pending_bytes(), 1);
    }

    #[tokio::test]
    async fn terminate_closes_and_cancels() {
        let (socket, _rx) = WsSocket::new(4, 1024);
        socket.terminate();
        assert!(!socket.is_open());
        assert!(socket.is_terminated());
        assert_eq!(socket.send(Arc::from("x")), Err(SocketError::Closed));
        socket.terminated().await;
    }

    #[tokio::test]
    async fn close_queues_close_frame_after_text() {
        let (socket, mut rx) = WsSocket::new(4, 1024);
        socket.send(Arc::from("last words")).unwrap();
        socket.close(CLOSE_GOING_AWAY, "bye");
        socket.close(CLOSE_GOING_AWAY, "twice");

        assert!(!socket.is_open());
        assert!(matches!(rx.recv().await, Some(Frame::Text(_))));
        assert_eq!(
            rx.recv().await,
            Some(Frame::Close {
                code: CLOSE_GOING_AWAY,
                reason: "bye".into()
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_is_closed_error() {
        let (socket, rx) = WsSocket::new(4, 1024);
        drop(rx);
        assert_eq!(socket.send(Arc::from("x")), Err(SocketError::Closed));
        assert_eq!(socket.pending_bytes(), 0);
    }
}
