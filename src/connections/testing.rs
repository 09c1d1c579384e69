//! In-memory socket pair for driving the registry in unit tests.

use axum::extract::ws::Message;
use futures_util::{Sink, Stream};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type Frame = Result<Message, axum::Error>;

pub(crate) fn peer_addr() -> SocketAddr {
    "203.0.113.7:40000".parse().unwrap()
}

/// Server side of the pair; handed to `ConnectionRegistry::open`.
pub(crate) struct MockSocket {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
}

/// Remote side of the pair; plays the peer.
pub(crate) struct MockPeer {
    incoming: Option<mpsc::UnboundedSender<Frame>>,
    outgoing: mpsc::UnboundedReceiver<Message>,
    closed: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn pair() -> (MockSocket, MockPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            MockSocket {
                incoming: in_rx,
                outgoing: out_tx,
                closed: closed.clone(),
            },
            MockPeer {
                incoming: Some(in_tx),
                outgoing: out_rx,
                closed,
            },
        )
    }
}

impl MockPeer {
    pub fn send(&mut self, message: Message) {
        if let Some(tx) = &self.incoming {
            let _ = tx.send(Ok(message));
        }
    }

    /// Make the server's next read fail.
    pub fn fail(&mut self) {
        if let Some(tx) = &self.incoming {
            let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
            let _ = tx.send(Err(axum::Error::new(error)));
        }
    }

    /// End the server's inbound stream without a close frame.
    pub fn hang_up(&mut self) {
        self.incoming = None;
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.outgoing.try_recv().ok()
    }

    /// Whether the server closed its sending half.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Stream for MockSocket {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().incoming.poll_recv(cx)
    }
}

impl Sink<Message> for MockSocket {
    type Error = axum::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.outgoing.send(item).map_err(axum::Error::new)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
