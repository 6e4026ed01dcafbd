pub mod config;
pub mod media;
pub mod session;
pub mod signaling;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConfigError, SessionConfig};
pub use session::{NegotiationCore, SessionError, SessionSnapshot};
