//! Core WebSocket infrastructure.
//!
//! This module owns the transport side of a stream: connecting, correlating
//! requests with replies, keeping the socket alive and reconnecting. It knows
//! nothing about message families; everything that is not a reply is handed to
//! a [`MessageHandler`].
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Connection task with PING on idle, reply correlation and reconnection
//! - [`RetryPolicy`]: Decides whether and when to reconnect
//! - [`PendingRequests`]: Requests still waiting for their reply
//! - [`MessageHandler`] and [`ConnectionHooks`]: What the manager calls back into
//!
//! # Example
//!
//! ```ignore
//! let policy = |attempt: u32| match attempt {
//!     0..5 => RetryDecision::retry_after(Duration::from_secs(1)),
//!     _ => RetryDecision::abandon(),
//! };
//!
//! let connection =
//!     ConnectionManager::with_policy(endpoint, Config::default(), policy, handler, hooks);
//! connection.connect();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pending;
pub mod retry;
pub mod traits;

pub use config::{Config, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use pending::PendingRequests;
pub use retry::{RetryDecision, RetryPolicy};
pub use traits::*;
