//! Process-wide room membership and history.
//!
//! [`RoomRegistry`] is built once at startup and shared behind an `Arc` by
//! every connection task. One `tokio::sync::Mutex` guards all rooms and
//! sessions; every operation, including the read-only ones, holds it for its
//! whole read-modify-write. Sends only push onto unbounded per-session
//! queues, so holding the lock while delivering never waits on a socket.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::ChatError,
    history::HistoryStore,
    session::{Outbox, SessionId},
};

pub struct RoomRegistry {
    state: Mutex<RegistryState>,
    store: HistoryStore,
    next_id: AtomicU64,
}

#[derive(Default)]
struct RegistryState {
    rooms: BTreeMap<String, Room>,
    sessions: HashMap<SessionId, Member>,
}

#[derive(Default)]
struct Room {
    /// Join order.
    members: Vec<SessionId>,
    history: Vec<String>,
}

struct Member {
    name: String,
    room: Option<String>,
    outbox: Outbox,
}

/// What a session sees after moving into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room: String,
    pub history: Vec<String>,
    pub members: Vec<String>,
}

/// Result of fanning one line out to a room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub unreachable: Vec<SessionId>,
}

impl RoomRegistry {
    pub fn new(store: HistoryStore) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            store,
            next_id: AtomicU64::new(1),
        }
    }

    /// Rebuilds the registry from the logs on disk and makes sure the
    /// default room exists.
    ///
    /// Fails only when the history directory itself is unusable.
    pub async fn restore(store: HistoryStore, default_room: &str) -> Result<Self, ChatError> {
        let loaded = store.load_all().await?;
        let registry = Self::new(store);
        {
            let mut state = registry.state.lock().await;
            for (name, history) in loaded {
                info!(room = %name, messages = history.len(), "restored room");
                state.rooms.insert(
                    name,
                    Room {
                        members: Vec::new(),
                        history,
                    },
                );
            }
        }

        match registry.create_room(default_room).await {
            Ok(()) | Err(ChatError::AlreadyExists(_)) => Ok(registry),
            Err(err) => Err(err),
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Registers a connected client that is not yet in any room.
    pub async fn register(&self, name: String, outbox: Outbox) -> SessionId {
        let id = SessionId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().await;
        state.sessions.insert(
            id,
            Member {
                name,
                room: None,
                outbox,
            },
        );
        id
    }

    /// Registers a new empty room and creates its log file.
    ///
    /// If the log cannot be created the room still exists in memory; only its
    /// durability is lost.
    pub async fn create_room(&self, name: &str) -> Result<(), ChatError> {
        validate_room_name(name)?;
        let mut state = self.state.lock().await;
        if state.rooms.contains_key(name) {
            return Err(ChatError::AlreadyExists(name.to_string()));
        }
        state.rooms.insert(name.to_string(), Room::default());

        if let Err(err) = self.store.create_log(name).await {
            warn!(room = %name, error = %err, "room created without a history log");
        }
        info!(room = %name, "room created");
        Ok(())
    }

    /// Moves `session` into room `name`.
    ///
    /// `notice`, when given, is queued to the session ahead of the room's
    /// history replay. Both are queued before the lock is released, so any
    /// later broadcast to the room lands after the replay.
    pub async fn join_room(
        &self,
        session: SessionId,
        name: &str,
        notice: Option<String>,
    ) -> Result<JoinOutcome, ChatError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if !state.rooms.contains_key(name) {
            return Err(ChatError::NotFound(name.to_string()));
        }
        let member = state
            .sessions
            .get_mut(&session)
            .ok_or(ChatError::UnknownSession(session))?;

        if let Some(previous) = member.room.take() {
            if let Some(room) = state.rooms.get_mut(&previous) {
                room.members.retain(|id| *id != session);
            }
        }
        member.room = Some(name.to_string());

        let room = state
            .rooms
            .get_mut(name)
            .ok_or_else(|| ChatError::NotFound(name.to_string()))?;
        room.members.push(session);
        let history = room.history.clone();
        let member_ids = room.members.clone();

        let replay = notice.into_iter().chain(history.iter().cloned());
        for line in replay {
            if member.outbox.send(line).is_err() {
                debug!(%session, room = %name, "session went away during history replay");
                break;
            }
        }

        let members = names_of(&state.sessions, &member_ids);
        Ok(JoinOutcome {
            room: name.to_string(),
            history,
            members,
        })
    }

    /// Names of every registered room, whether or not anyone is in it.
    pub async fn list_rooms(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.rooms.keys().cloned().collect()
    }

    /// Display names of the members of `name`, in join order.
    pub async fn list_members(&self, name: &str) -> Result<Vec<String>, ChatError> {
        let state = self.state.lock().await;
        let room = state
            .rooms
            .get(name)
            .ok_or_else(|| ChatError::NotFound(name.to_string()))?;
        Ok(names_of(&state.sessions, &room.members))
    }

    /// The session's current room and its members, read under one lock.
    pub async fn roster(&self, session: SessionId) -> Result<(String, Vec<String>), ChatError> {
        let state = self.state.lock().await;
        let member = state
            .sessions
            .get(&session)
            .ok_or(ChatError::UnknownSession(session))?;
        let room_name = member.room.clone().ok_or(ChatError::NoRoom)?;
        let room = state
            .rooms
            .get(&room_name)
            .ok_or_else(|| ChatError::NotFound(room_name.clone()))?;
        let names = names_of(&state.sessions, &room.members);
        Ok((room_name, names))
    }

    pub async fn current_room(&self, session: SessionId) -> Option<String> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(&session)
            .and_then(|member| member.room.clone())
    }

    /// A copy of the room's in-memory history.
    pub async fn history(&self, name: &str) -> Result<Vec<String>, ChatError> {
        let state = self.state.lock().await;
        state
            .rooms
            .get(name)
            .map(|room| room.history.clone())
            .ok_or_else(|| ChatError::NotFound(name.to_string()))
    }

    /// Persists `line` to room `name` and delivers it to every member except
    /// `exclude`.
    pub async fn broadcast(
        &self,
        name: &str,
        line: String,
        exclude: Option<SessionId>,
    ) -> Result<Delivery, ChatError> {
        let mut state = self.state.lock().await;
        self.broadcast_locked(&mut state, name, line, exclude).await
    }

    /// Sends `text` from `session` to the other members of its current room
    /// as `"<name>: <text>"`.
    pub async fn post(&self, session: SessionId, text: &str) -> Result<Delivery, ChatError> {
        let mut state = self.state.lock().await;
        let member = state
            .sessions
            .get(&session)
            .ok_or(ChatError::UnknownSession(session))?;
        let room = member.room.clone().ok_or(ChatError::NoRoom)?;
        let line = format!("{}: {text}", member.name);
        self.broadcast_locked(&mut state, &room, line, Some(session))
            .await
    }

    async fn broadcast_locked(
        &self,
        state: &mut RegistryState,
        name: &str,
        line: String,
        exclude: Option<SessionId>,
    ) -> Result<Delivery, ChatError> {
        let room = state
            .rooms
            .get_mut(name)
            .ok_or_else(|| ChatError::NotFound(name.to_string()))?;

        // Disk first, so a joiner is never replayed a line that was not
        // at least handed to the log.
        if let Err(err) = self.store.append(name, &line).await {
            warn!(room = %name, error = %err, "message not persisted");
        }
        room.history.push(line.clone());

        let mut delivery = Delivery::default();
        for id in room.members.iter().copied() {
            if Some(id) == exclude {
                continue;
            }
            let sent = state
                .sessions
                .get(&id)
                .map(|member| member.outbox.send(line.clone()).is_ok())
                .unwrap_or(false);
            if sent {
                delivery.delivered += 1;
            } else {
                warn!(room = %name, error = %ChatError::UnreachablePeer(id), "skipping member");
                delivery.unreachable.push(id);
            }
        }
        Ok(delivery)
    }

    /// Delivers a private line to the member called `recipient` in the
    /// sender's room. Private lines are not persisted.
    pub async fn whisper(
        &self,
        session: SessionId,
        recipient: &str,
        text: &str,
    ) -> Result<(), ChatError> {
        let state = self.state.lock().await;
        let sender = state
            .sessions
            .get(&session)
            .ok_or(ChatError::UnknownSession(session))?;
        let room_name = sender.room.as_deref().ok_or(ChatError::NoRoom)?;
        let room = state
            .rooms
            .get(room_name)
            .ok_or_else(|| ChatError::NotFound(room_name.to_string()))?;

        let target = room
            .members
            .iter()
            .filter_map(|id| state.sessions.get(id).map(|member| (*id, member)))
            .find(|(_, member)| member.name == recipient);
        let Some((target_id, target)) = target else {
            return Err(ChatError::RecipientNotInRoom(recipient.to_string()));
        };

        target
            .outbox
            .send(format!("[private] {}: {text}", sender.name))
            .map_err(|_| ChatError::UnreachablePeer(target_id))?;
        sender
            .outbox
            .send(format!("[private to {recipient}] {text}"))
            .map_err(|_| ChatError::UnreachablePeer(session))?;
        Ok(())
    }

    /// Queues a line for one session.
    pub async fn notify(&self, session: SessionId, line: String) -> Result<(), ChatError> {
        let state = self.state.lock().await;
        let member = state
            .sessions
            .get(&session)
            .ok_or(ChatError::UnknownSession(session))?;
        member
            .outbox
            .send(line)
            .map_err(|_| ChatError::UnreachablePeer(session))
    }

    /// Queues a line for every registered session, skipping the unreachable.
    pub async fn announce(&self, line: &str) -> usize {
        let state = self.state.lock().await;
        state
            .sessions
            .values()
            .filter(|member| member.outbox.send(line.to_string()).is_ok())
            .count()
    }

    /// Forgets `session` and takes it out of its room. Safe to call more than
    /// once; returns the display name the first time.
    pub async fn remove_session(&self, session: SessionId) -> Option<String> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let member = state.sessions.remove(&session)?;
        if let Some(room) = member
            .room
            .as_deref()
            .and_then(|name| state.rooms.get_mut(name))
        {
            room.members.retain(|id| *id != session);
        }
        Some(member.name)
    }
}

fn names_of(sessions: &HashMap<SessionId, Member>, ids: &[SessionId]) -> Vec<String> {
    ids.iter()
        .filter_map(|id| sessions.get(id).map(|member| member.name.clone()))
        .collect()
}

/// Room names become part of a file name, so they may not be empty or
/// contain path separators.
pub fn validate_room_name(name: &str) -> Result<(), ChatError> {
    let invalid = name.trim().is_empty()
        || name.contains(['/', '\\'])
        || name == "."
        || name == "..";
    if invalid {
        return Err(ChatError::BadRequest(
            "/create ROOM_NAME (a non-empty name without '/' or '\\')",
        ));
    }
    Ok(())
}
