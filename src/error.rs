use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum RustyRelayError {
    // Wire errors
    MalformedFrame(String),
    FrameTooLarge(usize),
    UnknownFrameworkMessage(u8),

    // Room errors
    RoomNotFound(String),
    Unauthorized,
    NoEmptyRedirector,
    RoleConflict,

    // Blacklist errors
    BlacklistError(String),

    // Console errors
    CommandError(String),

    // Configuration errors
    ConfigError(String),

    // System errors
    IoError(std::io::Error),
}

impl fmt::Display for RustyRelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            Self::FrameTooLarge(size) => write!(f, "Frame too large: {} bytes", size),
            Self::UnknownFrameworkMessage(id) => {
                write!(f, "Unknown framework message: {}", id)
            }
            Self::RoomNotFound(link) => write!(f, "Room not found: {}", link),
            Self::Unauthorized => write!(f, "Unauthorized: address does not own the room"),
            Self::NoEmptyRedirector => write!(f, "No empty redirector in room"),
            Self::RoleConflict => write!(f, "Connection already holds a role"),
            Self::BlacklistError(msg) => write!(f, "Blacklist error: {}", msg),
            Self::CommandError(msg) => write!(f, "{}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for RustyRelayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RustyRelayError {
    fn from(err: std::io::Error) -> Self {
        RustyRelayError::IoError(err)
    }
}

impl From<reqwest::Error> for RustyRelayError {
    fn from(err: reqwest::Error) -> Self {
        RustyRelayError::BlacklistError(err.to_string())
    }
}

impl From<serde_json::Error> for RustyRelayError {
    fn from(err: serde_json::Error) -> Self {
        RustyRelayError::BlacklistError(format!("invalid feed: {}", err))
    }
}

// Generic result type for RustyRelay
pub type Result<T> = std::result::Result<T, RustyRelayError>;
