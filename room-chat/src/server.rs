use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    dispatcher::{Dispatcher, Flow},
    error::ChatError,
    history::HistoryStore,
    registry::RoomRegistry,
    session::{outbox, run_writer, Inbox, Session},
    wire::{read_capacity, read_line, write_line, Inbound},
};

/// First line sent on every new connection.
pub const NAME_PROMPT: &str = "Enter your name:";
const SHUTDOWN_NOTICE: &str = "Server shutting down.";

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    dispatcher: Dispatcher,
    default_room: String,
    max_line_bytes: usize,
}

impl ServerState {
    fn registry(&self) -> &RoomRegistry {
        self.dispatcher.registry()
    }
}

impl Server {
    /// Restores rooms from the history directory and binds the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let store = HistoryStore::new(&config.history_dir);
        info!(history_dir = %store.dir().display(), "restoring rooms");
        let registry = RoomRegistry::restore(store, &config.default_room)
            .await
            .with_context(|| {
                format!(
                    "failed to restore room history from {}",
                    config.history_dir.display()
                )
            })?;
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, Arc::new(registry), &config))
    }

    pub fn new(listener: TcpListener, registry: Arc<RoomRegistry>, config: &ServerConfig) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState {
                dispatcher: Dispatcher::new(registry),
                default_room: config.default_room.clone(),
                max_line_bytes: config.max_line_bytes,
            }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.state.dispatcher.registry()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &ServerState) {
    let notified = state.registry().announce(SHUTDOWN_NOTICE).await;
    info!(sessions = notified, "server shutting down");
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(read_capacity(state.max_line_bytes), reader);

    let name = perform_handshake(&mut reader, &mut writer, state.max_line_bytes).await?;
    let (session, inbox) = open_session(&state, name, peer).await?;
    info!(peer = %peer, session = %session.id, name = %session.name, "client joined");

    let writer_task = tokio::spawn(async move {
        run_writer(inbox, &mut writer).await;
        if let Err(err) = writer.shutdown().await {
            debug!(?err, "failed to shut down client writer cleanly");
        }
    });

    let result = run_client_session(&state, &session, &mut reader).await;
    cleanup_client_disconnect(&state, &session).await;
    if let Err(err) = writer_task.await {
        warn!(session = %session.id, error = ?err, "writer task failed");
    }

    result
}

async fn perform_handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    max_line_bytes: usize,
) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(writer, NAME_PROMPT).await?;

    let name = match read_line(reader, max_line_bytes).await? {
        Some(Inbound::Line(line)) => line.trim().to_string(),
        Some(Inbound::TooLong) => {
            return Err(ChatError::HandshakeFailed("display name too long").into());
        }
        None => {
            return Err(ChatError::HandshakeFailed("connection closed before a name was sent").into());
        }
    };

    if name.is_empty() {
        return Err(ChatError::HandshakeFailed("empty display name").into());
    }
    Ok(name)
}

async fn open_session(
    state: &ServerState,
    name: String,
    peer: SocketAddr,
) -> Result<(Session, Inbox)> {
    let registry = state.registry();
    let (tx, inbox) = outbox();
    let id = registry.register(name.clone(), tx).await;

    if let Err(err) = registry.join_room(id, &state.default_room, None).await {
        registry.remove_session(id).await;
        return Err(err).context("failed to place session in the default room");
    }

    let session = Session {
        id,
        name,
        peer: Some(peer),
    };
    Ok((session, inbox))
}

async fn run_client_session<R>(
    state: &ServerState,
    session: &Session,
    reader: &mut R,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match read_line(reader, state.max_line_bytes).await? {
            Some(Inbound::Line(line)) => line,
            Some(Inbound::TooLong) => {
                let notice = ChatError::LineTooLong(state.max_line_bytes).to_string();
                state.registry().notify(session.id, notice).await?;
                continue;
            }
            None => {
                debug!(session = %session.id, "client closed the connection");
                return Ok(());
            }
        };

        if state.dispatcher.dispatch(session.id, &line).await? == Flow::Quit {
            return Ok(());
        }
    }
}

async fn cleanup_client_disconnect(state: &ServerState, session: &Session) {
    if let Some(name) = state.registry().remove_session(session.id).await {
        info!(peer = ?session.peer, session = %session.id, %name, "client disconnected");
    }
}
