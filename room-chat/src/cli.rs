use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::{
    ServerConfig, DEFAULT_HISTORY_DIR, DEFAULT_LISTEN, DEFAULT_MAX_LINE_BYTES, DEFAULT_ROOM,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, rebuilding rooms from the history directory.
    Serve(ServeArgs),
    /// Connect to a server and relay stdin lines to it.
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, env = "ROOM_CHAT_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Directory holding one `history_<room>.txt` log per room.
    #[arg(long, env = "ROOM_CHAT_HISTORY_DIR", default_value = DEFAULT_HISTORY_DIR)]
    pub history_dir: PathBuf,

    /// Room every new connection starts in.
    #[arg(long, env = "ROOM_CHAT_DEFAULT_ROOM", default_value = DEFAULT_ROOM)]
    pub default_room: String,

    /// Longest accepted client line, in bytes, excluding the terminator.
    #[arg(long, env = "ROOM_CHAT_MAX_LINE_BYTES", default_value_t = DEFAULT_MAX_LINE_BYTES)]
    pub max_line_bytes: usize,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: args.listen,
            history_dir: args.history_dir,
            default_room: args.default_room,
            max_line_bytes: args.max_line_bytes,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Display name sent as the first line.
    #[arg(long)]
    pub name: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:5555")]
    pub server: SocketAddr,
}
