// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

// Packet spam protection
pub const DEFAULT_SPAM_LIMIT: i64 = 500;
pub const DEFAULT_SPAM_WINDOW_MS: u64 = 3000;

// Transport configuration constants
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8192;
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 32_768;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 12_000;
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 8_000;

// Blacklist feed
pub const DEFAULT_BLACKLIST_URL: &str = "https://api.github.com/meta";

/// Oldest client build that does not receive an outdated-version advisory.
pub const DEFAULT_MIN_CLIENT_VERSION: i32 = 146;

// Link format
pub const LINK_PREFIX: &str = "CLaJ";
pub const LINK_BODY_LENGTH: usize = 42;
pub const LINK_LENGTH: usize = LINK_PREFIX.len() + LINK_BODY_LENGTH;
pub const LINK_SYMBOLS: &[u8] = b"AaBbCcDdEeFfGgHhIiJjKkLlMmNnOoPpQqRrSsTtUuVvWwYyXxZz";

// Control vocabulary
pub const CONTROL_NEW: &str = "new";
pub const CONTROL_HOST: &str = "host";
pub const CONTROL_JOIN: &str = "join";

// Advisories sent to room hosts
pub const SPAM_WARNING: &str = "[scarlet]\u{26a0}[] Connection closed due to packet spam.";
pub const SHUTDOWN_WARNING: &str =
    "[scarlet]\u{26a0}[] The server is shutting down.\nTry to reconnect in a minute.";
