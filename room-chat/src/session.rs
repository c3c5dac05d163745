use std::{fmt, net::SocketAddr};

use tokio::{io::AsyncWrite, sync::mpsc};
use tracing::debug;

use crate::wire::write_line;

/// Sending half of a session's outbound line queue.
pub type Outbox = mpsc::UnboundedSender<String>;
/// Receiving half, drained into the socket by [`run_writer`].
pub type Inbox = mpsc::UnboundedReceiver<String>;

/// Opaque identity of one connection, allocated by the registry.
///
/// Display names are human-facing labels only and may repeat; every map in
/// the server is keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn outbox() -> (Outbox, Inbox) {
    mpsc::unbounded_channel()
}

/// Connection-side view of a registered session.
///
/// The session's current room lives in the registry; this handle only keeps
/// what the connection task needs to talk about itself.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub peer: Option<SocketAddr>,
}

/// Forwards queued lines to the client until every [`Outbox`] is dropped or
/// the transport fails.
///
/// Once this returns the inbox is gone, so later sends to the session fail
/// and are reported as unreachable by whoever attempted them.
pub async fn run_writer<W>(mut inbox: Inbox, writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = inbox.recv().await {
        if let Err(err) = write_line(writer, &line).await {
            debug!(?err, "failed to deliver line to client");
            break;
        }
    }
}
