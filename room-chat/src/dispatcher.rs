use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    command::Command,
    error::ChatError,
    registry::RoomRegistry,
    session::SessionId,
};

const HELP_LINES: &[&str] = &[
    "Commands:",
    "  /rooms               list all rooms",
    "  /create ROOM_NAME    create a new room",
    "  /join ROOM_NAME      move to a room and see its history",
    "  /users               list the users in your room",
    "  /msg USER MESSAGE    private message to a user in your room",
    "  /quit                leave the chat",
    "Anything else is sent to everyone in your room.",
];

/// What the connection should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Executes client lines against the shared registry.
///
/// Holds no per-session state; the only thing that carries over between
/// lines is the session's room, which lives in the registry. Replies are
/// queued on the session's outbox like any other line.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Handles one inbound line from `session`.
    ///
    /// Client mistakes are answered with a single reply line and leave all
    /// state untouched. An error is returned only when the session itself
    /// can no longer be served.
    pub async fn dispatch(&self, session: SessionId, line: &str) -> Result<Flow, ChatError> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        let result = match Command::parse(line) {
            Ok(command) => self.execute(session, command).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(flow) => Ok(flow),
            Err(err) if err.is_client_facing() => {
                self.reply(session, err.to_string()).await?;
                Ok(Flow::Continue)
            }
            Err(ChatError::UnreachablePeer(peer)) if peer != session => {
                warn!(%session, %peer, "private message recipient unreachable");
                Ok(Flow::Continue)
            }
            Err(err) => Err(err),
        }
    }

    async fn execute(&self, session: SessionId, command: Command) -> Result<Flow, ChatError> {
        match command {
            Command::Rooms => {
                let rooms = self.registry.list_rooms().await;
                let reply = if rooms.is_empty() {
                    "No rooms available.".to_string()
                } else {
                    format!("Available rooms: {}", rooms.join(", "))
                };
                self.reply(session, reply).await?;
            }
            Command::Create { name } => {
                self.registry.create_room(&name).await?;
                self.reply(session, format!("Room '{name}' created!")).await?;
            }
            Command::Join { name } => {
                let notice = format!("You joined room '{name}'");
                let outcome = self.registry.join_room(session, &name, Some(notice)).await?;
                info!(
                    %session,
                    room = %outcome.room,
                    replayed = outcome.history.len(),
                    members = outcome.members.len(),
                    "session changed rooms"
                );
            }
            Command::Users => {
                let (room, names) = self.registry.roster(session).await?;
                self.reply(session, format!("Users in room '{room}': {}", names.join(", ")))
                    .await?;
            }
            Command::Private { recipient, text } => {
                self.registry.whisper(session, &recipient, &text).await?;
            }
            Command::Help => {
                for line in HELP_LINES {
                    self.reply(session, line.to_string()).await?;
                }
            }
            Command::Quit => {
                self.reply(session, "Leaving chat...".to_string()).await?;
                if let Some(name) = self.registry.remove_session(session).await {
                    info!(%session, %name, "session quit");
                }
                return Ok(Flow::Quit);
            }
            Command::Say { text } => {
                let delivery = self.registry.post(session, &text).await?;
                debug!(
                    %session,
                    delivered = delivery.delivered,
                    unreachable = delivery.unreachable.len(),
                    "message broadcast"
                );
            }
        }
        Ok(Flow::Continue)
    }

    async fn reply(&self, session: SessionId, line: String) -> Result<(), ChatError> {
        self.registry.notify(session, line).await
    }
}
