//! Backend session management.
//!
//! [`SessionManager`] owns the one authenticated Manila connection a plugin
//! process uses. The first [`SessionManager::acquire`] resolves credentials,
//! performs the identity handshake through a [`Connector`], and memoizes the
//! resulting client; every later call returns the same client without
//! re-validating it.
//!
//! # Concurrency
//!
//! Initialization is a small state machine behind a mutex:
//!
//! ```text
//! Idle ──acquire──▶ Connecting(shared attempt) ──ok──▶ Ready(client)
//!   ▲                        │
//!   └─────────────err────────┘
//! ```
//!
//! Callers that arrive while an attempt is in flight await the same shared
//! future, so concurrent first calls cause exactly one handshake and all of
//! them observe the same outcome. A failed attempt stores nothing; the next
//! call starts over. The mutex is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, instrument, warn};

use crate::backend::ShareBackend;
use crate::backend::keystone::{self, SHARE_SERVICE_TYPE};
use crate::backend::manila::ManilaClient;
use crate::config::{CredentialSource, Credentials};
use crate::error::CsiError;

/// Turns resolved credentials into an authenticated backend client.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform exactly one authentication handshake.
    async fn connect(&self, creds: &Credentials) -> Result<Arc<dyn ShareBackend>, CsiError>;
}

/// Keystone + Manila connector used in production.
#[derive(Debug, Clone)]
pub struct ManilaConnector {
    http: reqwest::Client,
}

impl ManilaConnector {
    /// Build a connector whose HTTP requests give up after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, CsiError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(CsiError::internal)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Connector for ManilaConnector {
    async fn connect(&self, creds: &Credentials) -> Result<Arc<dyn ShareBackend>, CsiError> {
        let token = keystone::authenticate(&self.http, creds).await?;
        let endpoint = token.endpoint(SHARE_SERVICE_TYPE, &creds.region)?;
        info!(%endpoint, region = %creds.region, "manila session established");
        let client =
            ManilaClient::new(self.http.clone(), endpoint, token.id).with_reauth(creds.clone());
        Ok(Arc::new(client))
    }
}

type Attempt = Shared<BoxFuture<'static, Result<Arc<dyn ShareBackend>, CsiError>>>;

enum SessionState {
    Idle,
    Connecting(Attempt),
    Ready(Arc<dyn ShareBackend>),
}

/// Lazily established, memoized backend session.
pub struct SessionManager {
    source: CredentialSource,
    connector: Arc<dyn Connector>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("source", &self.source)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl SessionManager {
    pub fn new(source: CredentialSource, connector: Arc<dyn Connector>) -> Self {
        Self {
            source,
            connector,
            state: Mutex::new(SessionState::Idle),
        }
    }

    /// `true` once a session has been established.
    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), SessionState::Ready(_))
    }

    /// Return the shared backend client, establishing it on first use.
    #[instrument(skip_all)]
    pub async fn acquire(&self) -> Result<Arc<dyn ShareBackend>, CsiError> {
        let attempt = {
            let mut state = self.lock();
            match &*state {
                SessionState::Ready(client) => return Ok(Arc::clone(client)),
                SessionState::Connecting(attempt) => {
                    debug!("joining in-flight session attempt");
                    attempt.clone()
                }
                SessionState::Idle => {
                    let attempt =
                        establish(self.source.clone(), Arc::clone(&self.connector))
                            .boxed()
                            .shared();
                    *state = SessionState::Connecting(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        let mut state = self.lock();
        let still_current =
            matches!(&*state, SessionState::Connecting(pending) if pending.ptr_eq(&attempt));
        if still_current {
            *state = match &result {
                Ok(client) => SessionState::Ready(Arc::clone(client)),
                Err(e) => {
                    warn!(error = %e, "session attempt failed, nothing cached");
                    SessionState::Idle
                }
            };
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn establish(
    source: CredentialSource,
    connector: Arc<dyn Connector>,
) -> Result<Arc<dyn ShareBackend>, CsiError> {
    let creds = source.resolve()?;
    connector.connect(&creds).await
}
