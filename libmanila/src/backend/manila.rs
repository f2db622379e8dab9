//! Manila v2 HTTP client.
//!
//! [`ManilaClient`] is bound to one `sharev2` endpoint. It implements
//! [`ShareBackend`] with one HTTP request per operation. When it holds the
//! credentials its token came from, a `401` triggers one fresh Keystone
//! handshake and one resend of the request.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::backend::{CreateShareOpts, ShareBackend, body_or_placeholder, keystone};
use crate::config::Credentials;
use crate::error::CsiError;
use crate::types::{Share, ShareStatus};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Authenticated Manila client.
pub struct ManilaClient {
    http: reqwest::Client,
    /// Project-scoped API root, always ending in `/`.
    endpoint: Url,
    /// Held across a re-authentication so concurrent 401s renew once.
    token: Mutex<String>,
    reauth: Option<Credentials>,
}

impl std::fmt::Debug for ManilaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManilaClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// Share as returned by the Manila API. Most fields are nullable.
#[derive(Debug, Deserialize)]
struct ManilaShare {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: ShareStatus,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    share_proto: Option<String>,
    #[serde(default)]
    share_type_name: Option<String>,
    #[serde(default)]
    share_type: Option<String>,
    #[serde(default)]
    availability_zone: Option<String>,
}

impl From<ManilaShare> for Share {
    fn from(s: ManilaShare) -> Self {
        Self {
            id: s.id,
            name: s.name.unwrap_or_default(),
            status: s.status,
            size_gb: s.size.unwrap_or_default(),
            protocol: s.share_proto.unwrap_or_default(),
            share_type: s.share_type_name.or(s.share_type).unwrap_or_default(),
            availability_zone: s.availability_zone.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct ShareEnvelope {
    share: ManilaShare,
}

#[derive(Deserialize)]
struct ShareListEnvelope {
    #[serde(default)]
    shares: Vec<ManilaShare>,
}

#[derive(serde::Serialize)]
struct CreateEnvelope<'a> {
    share: &'a CreateShareOpts,
}

impl ManilaClient {
    /// Bind a client to `endpoint` using an already-issued `token`.
    pub fn new(http: reqwest::Client, mut endpoint: Url, token: impl Into<String>) -> Self {
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Self {
            http,
            endpoint,
            token: Mutex::new(token.into()),
            reauth: None,
        }
    }

    /// Renew the token with `creds` when Manila rejects it.
    pub fn with_reauth(mut self, creds: Credentials) -> Self {
        self.reauth = Some(creds);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url, CsiError> {
        self.endpoint
            .join(path)
            .map_err(|e| CsiError::internal(format!("join {path} onto {}: {e}", self.endpoint)))
    }

    /// URL of a single share. The ID becomes one percent-encoded path
    /// segment, so it cannot address anything outside `shares/`.
    fn share_url(&self, id: &str) -> Result<Url, CsiError> {
        if id.is_empty() || id == "." || id == ".." {
            return Err(CsiError::InvalidArgument(format!("invalid share id {id:?}")));
        }
        let mut url = self.url("shares/")?;
        url.path_segments_mut()
            .map_err(|()| CsiError::internal(format!("{} cannot carry a path", self.endpoint)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    /// Send the request built by `build`, renewing the token once if Manila
    /// answers `401` and credentials are at hand.
    async fn send<F>(&self, subject: &str, build: F) -> Result<Response, CsiError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let used = self.token.lock().await.clone();
        let response = build(&used).send().await.map_err(CsiError::backend)?;

        let Some(creds) = &self.reauth else {
            return Self::check(response, subject).await;
        };
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(response, subject).await;
        }

        let fresh = self.renew_token(&used, creds).await?;
        let response = build(&fresh).send().await.map_err(CsiError::backend)?;
        Self::check(response, subject).await
    }

    async fn renew_token(&self, rejected: &str, creds: &Credentials) -> Result<String, CsiError> {
        let mut token = self.token.lock().await;
        if *token != rejected {
            debug!("token already renewed by a concurrent request");
            return Ok(token.clone());
        }
        info!("manila rejected the token, re-authenticating");
        *token = keystone::authenticate(&self.http, creds).await?.id;
        Ok(token.clone())
    }

    /// Map a non-2xx response onto the error taxonomy, keeping the body so
    /// the caller sees exactly what Manila said.
    async fn check(response: Response, subject: &str) -> Result<Response, CsiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = body_or_placeholder(response.text().await);
        Err(match status {
            StatusCode::NOT_FOUND => CsiError::VolumeNotFound(subject.to_owned()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                CsiError::Authentication(format!("manila returned {status}: {body}"))
            }
            _ => CsiError::BackendError(format!("manila returned {status} for {subject}: {body}")),
        })
    }
}

#[async_trait]
impl ShareBackend for ManilaClient {
    #[instrument(skip(self))]
    async fn get_by_name(&self, name: &str) -> Result<Share, CsiError> {
        let mut url = self.url("shares/detail")?;
        url.query_pairs_mut().append_pair("name", name);

        let list: ShareListEnvelope = self
            .send(name, |token| {
                self.http
                    .get(url.clone())
                    .header(AUTH_TOKEN_HEADER, token)
            })
            .await?
            .json()
            .await
            .map_err(CsiError::backend)?;

        let mut matches = list
            .shares
            .into_iter()
            .filter(|s| s.name.as_deref() == Some(name));
        let share = matches
            .next()
            .ok_or_else(|| CsiError::VolumeNotFound(name.to_owned()))?;
        if matches.next().is_some() {
            warn!(name, "several shares carry this name, using the first");
        }
        Ok(share.into())
    }

    #[instrument(skip(self, opts), fields(name = %opts.name, size_gb = opts.size_gb))]
    async fn create(&self, opts: &CreateShareOpts) -> Result<Share, CsiError> {
        let url = self.url("shares")?;
        let body = CreateEnvelope { share: opts };
        let created: ShareEnvelope = self
            .send(&opts.name, |token| {
                self.http
                    .post(url.clone())
                    .header(AUTH_TOKEN_HEADER, token)
                    .json(&body)
            })
            .await?
            .json()
            .await
            .map_err(CsiError::backend)?;

        debug!(id = %created.share.id, "share accepted by manila");
        Ok(created.share.into())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), CsiError> {
        let url = self.share_url(id)?;
        self.send(id, |token| {
            self.http
                .delete(url.clone())
                .header(AUTH_TOKEN_HEADER, token)
        })
        .await?;
        Ok(())
    }
}
