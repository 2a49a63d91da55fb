pub mod errors;
pub mod id;
pub mod rate_limit;

pub use errors::{CollabError, ConfigError, SessionError, TerminalError};
pub use id::{new_session_id, now_millis, ClientId, SessionId};
pub use rate_limit::{KeyedRateWindows, RateWindow};

pub type Result<T> = std::result::Result<T, CollabError>;
