use std::{net::SocketAddr, path::PathBuf};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:5555";
pub const DEFAULT_HISTORY_DIR: &str = "history_data";
pub const DEFAULT_ROOM: &str = "general";
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024;

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub history_dir: PathBuf,
    pub default_room: String,
    pub max_line_bytes: usize,
}

impl ServerConfig {
    /// A config for tests and embedding: ephemeral localhost port, the given
    /// history directory, defaults for the rest.
    pub fn local(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            history_dir: history_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5555)),
            history_dir: PathBuf::from(DEFAULT_HISTORY_DIR),
            default_room: DEFAULT_ROOM.to_string(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}
