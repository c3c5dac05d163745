//! Parsing of inbound client lines.
//!
//! A line is a command when its first whitespace-delimited token is one of
//! the names below, compared case-sensitively. Every other line, including
//! ones starting with an unrecognised `/word`, is chat text.

use crate::error::ChatError;

pub const CREATE_USAGE: &str = "/create ROOM_NAME";
pub const JOIN_USAGE: &str = "/join ROOM_NAME";
pub const PRIVATE_USAGE: &str = "/msg USER MESSAGE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Rooms,
    Create { name: String },
    Join { name: String },
    Users,
    Private { recipient: String, text: String },
    Help,
    Quit,
    Say { text: String },
}

impl Command {
    /// Parses one non-empty line.
    ///
    /// English command names are accepted alongside the Spanish ones older
    /// clients send (`/salas`, `/crear`, `/unir`, `/usuarios`, `/privado`,
    /// `/ayuda`, `/salir`).
    ///
    /// Returns [`ChatError::BadRequest`] when a command is missing its
    /// argument.
    pub fn parse(line: &str) -> Result<Self, ChatError> {
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        match head {
            "/rooms" | "/salas" => Ok(Command::Rooms),
            "/create" | "/crear" => {
                required(rest, CREATE_USAGE).map(|name| Command::Create { name })
            }
            "/join" | "/unir" => required(rest, JOIN_USAGE).map(|name| Command::Join { name }),
            "/users" | "/usuarios" => Ok(Command::Users),
            "/msg" | "/privado" => parse_private(rest),
            "/help" | "/ayuda" => Ok(Command::Help),
            "/quit" | "/salir" => Ok(Command::Quit),
            _ => Ok(Command::Say {
                text: line.to_string(),
            }),
        }
    }
}

fn required(argument: &str, usage: &'static str) -> Result<String, ChatError> {
    if argument.is_empty() {
        return Err(ChatError::BadRequest(usage));
    }
    Ok(argument.to_string())
}

fn parse_private(rest: &str) -> Result<Command, ChatError> {
    let Some((recipient, text)) = rest.split_once(char::is_whitespace) else {
        return Err(ChatError::BadRequest(PRIVATE_USAGE));
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::BadRequest(PRIVATE_USAGE));
    }
    Ok(Command::Private {
        recipient: recipient.to_string(),
        text: text.to_string(),
    })
}
