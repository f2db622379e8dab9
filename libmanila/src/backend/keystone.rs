//! Keystone v3 password authentication.
//!
//! One `POST /v3/auth/tokens` round trip yields the token (from the
//! `X-Subject-Token` header) and the service catalog, from which the Manila
//! endpoint is picked.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::backend::body_or_placeholder;
use crate::config::Credentials;
use crate::error::CsiError;

/// Catalog type of the Manila v2 API.
pub const SHARE_SERVICE_TYPE: &str = "sharev2";

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const PUBLIC_INTERFACE: &str = "public";

/// Result of a successful handshake.
#[derive(Debug, Clone)]
pub struct Token {
    /// Opaque token sent as `X-Auth-Token` on every later request.
    pub id: String,
    pub catalog: Vec<CatalogEntry>,
}

/// One service in the Keystone catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

impl CatalogEndpoint {
    fn in_region(&self, region: &str) -> bool {
        region.is_empty()
            || self.region.as_deref() == Some(region)
            || self.region_id.as_deref() == Some(region)
    }
}

impl Token {
    /// Public endpoint of `service_type` in `region` (any region when
    /// `region` is empty). The returned URL always ends with `/` so relative
    /// paths join beneath it.
    pub fn endpoint(&self, service_type: &str, region: &str) -> Result<Url, CsiError> {
        let endpoint = self
            .catalog
            .iter()
            .filter(|entry| entry.service_type == service_type)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|ep| ep.interface == PUBLIC_INTERFACE && ep.in_region(region))
            .ok_or_else(|| {
                CsiError::Authentication(format!(
                    "no public {service_type} endpoint in catalog for region {region:?}"
                ))
            })?;

        let mut raw = endpoint.url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| {
            CsiError::Authentication(format!("invalid {service_type} endpoint {raw}: {e}"))
        })
    }
}

/// Build the token URL from an identity endpoint, defaulting to v3.
fn tokens_url(auth_url: &str) -> Result<Url, CsiError> {
    let trimmed = auth_url.trim_end_matches('/');
    let base = if trimmed.ends_with("/v3") {
        trimmed.to_owned()
    } else if let Some(stripped) = trimmed.strip_suffix("/v2.0") {
        warn!(auth_url, "identity v2.0 is not supported, using v3");
        format!("{stripped}/v3")
    } else {
        format!("{trimmed}/v3")
    };
    Url::parse(&format!("{base}/auth/tokens"))
        .map_err(|e| CsiError::Authentication(format!("invalid auth URL {auth_url}: {e}")))
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    auth: Auth<'a>,
}

#[derive(Serialize)]
struct Auth<'a> {
    identity: Identity<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<Scope<'a>>,
}

#[derive(Serialize)]
struct Identity<'a> {
    methods: [&'static str; 1],
    password: PasswordMethod<'a>,
}

#[derive(Serialize)]
struct PasswordMethod<'a> {
    user: User<'a>,
}

#[derive(Serialize)]
struct User<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<DomainRef<'a>>,
}

#[derive(Serialize, Clone, Copy)]
struct DomainRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct Scope<'a> {
    project: ProjectRef<'a>,
}

#[derive(Serialize)]
struct ProjectRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<DomainRef<'a>>,
}

impl<'a> AuthRequest<'a> {
    fn password(creds: &'a Credentials) -> Self {
        // Name-based identities need a domain; Keystone's built-in one is
        // `default`.
        let domain = match (non_empty(&creds.domain_id), non_empty(&creds.domain_name)) {
            (None, None) => DomainRef {
                id: Some("default"),
                name: None,
            },
            (id, name) => DomainRef { id, name },
        };

        let user = match non_empty(&creds.user_id) {
            Some(id) => User {
                id: Some(id),
                name: None,
                password: &creds.password,
                domain: None,
            },
            None => User {
                id: None,
                name: Some(&creds.username),
                password: &creds.password,
                domain: Some(domain),
            },
        };

        let scope = match (non_empty(&creds.tenant_id), non_empty(&creds.tenant_name)) {
            (Some(id), _) => Some(Scope {
                project: ProjectRef {
                    id: Some(id),
                    name: None,
                    domain: None,
                },
            }),
            (None, Some(name)) => Some(Scope {
                project: ProjectRef {
                    id: None,
                    name: Some(name),
                    domain: Some(domain),
                },
            }),
            (None, None) => None,
        };

        Self {
            auth: Auth {
                identity: Identity {
                    methods: ["password"],
                    password: PasswordMethod { user },
                },
                scope,
            },
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

/// Perform the password handshake. Every failure, including transport
/// errors, is reported as [`CsiError::Authentication`].
#[instrument(skip_all, fields(auth_url = %creds.auth_url))]
pub async fn authenticate(
    http: &reqwest::Client,
    creds: &Credentials,
) -> Result<Token, CsiError> {
    let url = tokens_url(&creds.auth_url)?;
    let body = AuthRequest::password(creds);

    let response = http
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| CsiError::Authentication(format!("identity request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let text = body_or_placeholder(response.text().await);
        return Err(CsiError::Authentication(match status {
            StatusCode::UNAUTHORIZED => format!("credentials rejected: {text}"),
            _ => format!("identity service returned {status}: {text}"),
        }));
    }

    let id = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| {
            CsiError::Authentication(format!("response carries no {SUBJECT_TOKEN_HEADER} header"))
        })?;

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| CsiError::Authentication(format!("malformed token response: {e}")))?;

    debug!(services = parsed.token.catalog.len(), "token issued");
    Ok(Token {
        id,
        catalog: parsed.token.catalog,
    })
}
