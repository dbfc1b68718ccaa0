//! Per-connection session handle.
//!
//! The channel core only needs identity, the client context and a bounded
//! outbound queue. Packet framing and dispatch live outside this crate; the
//! transport shim here just drains the queue to the socket and reports EOF.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::network::ClientContext;

const READ_BUF_SIZE: usize = 4096;

/// Process-wide so ids stay unique across sibling channels.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    /// 0 until the client logs in
    char_id: AtomicU32,
    client_context: ClientContext,
    send_tx: mpsc::Sender<Bytes>,
}

impl Session {
    /// Build a session and the receiving end of its outbound queue.
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        client_context: ClientContext,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (send_tx, send_rx) = mpsc::channel(queue_capacity.max(1));
        let session = Arc::new(Self {
            id,
            peer,
            char_id: AtomicU32::new(0),
            client_context,
            send_tx,
        });
        (session, send_rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn char_id(&self) -> u32 {
        self.char_id.load(Ordering::Acquire)
    }

    pub fn set_char_id(&self, char_id: u32) {
        self.char_id.store(char_id, Ordering::Release);
    }

    pub fn client_context(&self) -> &ClientContext {
        &self.client_context
    }

    /// Try to enqueue without waiting. Returns false if the packet was dropped
    /// because the queue is full or the connection is gone.
    pub fn queue_send_non_blocking(&self, data: Bytes) -> bool {
        match self.send_tx.try_send(data) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("[channel] [send_drop] session={} reason=full", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("[channel] [send_drop] session={} reason=closed", self.id);
                false
            }
        }
    }

    /// Enqueue, waiting for room. Used for replies that must not be lost.
    pub async fn queue_send(&self, data: Bytes) -> bool {
        self.send_tx.send(data).await.is_ok()
    }

    /// Spawn the writer and reader tasks for `stream`. When the peer closes
    /// the connection the session id is sent on `delete_tx`.
    pub fn start(
        self: &Arc<Self>,
        stream: TcpStream,
        mut send_rx: mpsc::Receiver<Bytes>,
        delete_tx: mpsc::UnboundedSender<SessionId>,
    ) {
        let (mut rh, mut wh) = stream.into_split();
        let id = self.id;

        let writer = tokio::spawn(async move {
            while let Some(msg) = send_rx.recv().await {
                if wh.write_all(&msg).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUF_SIZE];
            loop {
                match rh.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => tracing::trace!("[channel] [packet_in] session={} len={}", id, n),
                    Err(e) => {
                        tracing::debug!("[channel] [read_error] session={} err={}", id, e);
                        break;
                    }
                }
            }
            writer.abort();
            if delete_tx.send(id).is_err() {
                tracing::debug!("[channel] [remove_skipped] session={} manager stopped", id);
            }
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("char_id", &self.char_id())
            .finish()
    }
}
