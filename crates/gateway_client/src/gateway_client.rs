//! # Gateway Client
//!
//! Client core for the agent gateway. Owns the device identity, performs the
//! challenge/signed-connect handshake, correlates calls with responses over a
//! single WebSocket, and waits for run lifecycle events.
//!
//! ```ignore
//! let session = gateway_client::connect_and_authenticate(&config, token).await?;
//! let payload = session.call("chat.send", params).await?;
//! if let Some(run_id) = gateway_client::run_id_from_payload(&payload) {
//!     let completion = session.await_completion(run_id, None).await?;
//! }
//! session.close().await;
//! ```

pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod logging;
mod pending;
mod private_fs;
pub mod session;
pub mod signer;
pub mod token_cache;
pub mod transport;

pub use completion::{Completion, CompletionStatus, run_id_from_payload};
pub use config::ClientConfig;
pub use connection::Connection;
pub use error::{AuthError, CallError, ClientError, CompletionError, ConnectionError};
pub use handshake::{HandshakeController, HandshakeState, authenticate_over, connect_and_authenticate};
pub use identity::{DeviceIdentity, IdentityError, IdentityStore};
pub use session::AuthenticatedSession;
pub use token_cache::{CachedToken, TokenCache};
pub use transport::{Transport, TransportEvent, TransportPeer};
