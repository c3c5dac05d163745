use std::{io, path::PathBuf};

use thiserror::Error;

use crate::session::SessionId;

/// Failures produced by the room registry, the history store, and the
/// connection handshake.
///
/// The `Display` text of the client-facing variants is the exact line sent
/// back to the offending session.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Room '{0}' does not exist.")]
    NotFound(String),

    #[error("Room '{0}' already exists.")]
    AlreadyExists(String),

    #[error("Usage: {0}")]
    BadRequest(&'static str),

    #[error("User '{0}' is not in your room.")]
    RecipientNotInRoom(String),

    #[error("You are not in a room. Use /join ROOM_NAME first.")]
    NoRoom,

    #[error("Line too long (max {0} bytes).")]
    LineTooLong(usize),

    #[error("session {0} is unreachable")]
    UnreachablePeer(SessionId),

    #[error("handshake failed: {0}")]
    HandshakeFailed(&'static str),

    #[error("history storage unavailable at {}: {source}", .path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

impl ChatError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is reported to the requesting session as a reply
    /// line instead of tearing anything down.
    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::AlreadyExists(_)
                | Self::BadRequest(_)
                | Self::RecipientNotInRoom(_)
                | Self::NoRoom
                | Self::LineTooLong(_)
        )
    }
}
