//! # libmanila - CSI controller plugin for OpenStack Manila
//!
//! `libmanila` provisions Manila shared-filesystem shares on behalf of an
//! orchestrator. It speaks the simplified CSI-over-QUIC protocol of RK8s
//! (via [`quinn`]) and authenticates against Keystone once per process.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Share`, `Volume`, `VolumeId`, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`config`] | Cloud credential resolution: config file, then environment. |
//! | [`backend`] | [`ShareBackend`] trait, Keystone handshake, Manila HTTP client. |
//! | [`session`] | [`SessionManager`], lazily established, memoized backend session. |
//! | [`driver`] | [`ManilaDriver`], idempotent CreateVolume / DeleteVolume. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`transport`] | QUIC client/server built on `quinn`. |

pub mod backend;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod identity;
pub mod message;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::ShareBackend;
pub use config::CredentialSource;
pub use controller::CsiController;
pub use driver::ManilaDriver;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use session::{Connector, ManilaConnector, SessionManager};
pub use types::*;
