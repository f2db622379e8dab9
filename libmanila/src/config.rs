//! Cloud credential resolution.
//!
//! Credentials come from one of two places, tried in order:
//!
//! 1. a gcfg/INI cloud-config file (default [`DEFAULT_CLOUD_CONFIG`]) with a
//!    `[Global]` section;
//! 2. the standard `OS_*` OpenStack environment variables.
//!
//! A file that is missing, malformed, or lacks the required keys falls
//! through to the environment. Only when both tiers fail does resolution
//! return [`CsiError::ConfigResolution`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::CsiError;

/// Path read when the operator does not pass `--cloud-config`.
pub const DEFAULT_CLOUD_CONFIG: &str = "/etc/cloud.conf";

pub const ENV_AUTH_URL: &str = "OS_AUTH_URL";
pub const ENV_USERNAME: &str = "OS_USERNAME";
pub const ENV_USER_ID: &str = "OS_USERID";
pub const ENV_PASSWORD: &str = "OS_PASSWORD";
pub const ENV_TENANT_ID: &str = "OS_TENANT_ID";
pub const ENV_TENANT_NAME: &str = "OS_TENANT_NAME";
pub const ENV_PROJECT_ID: &str = "OS_PROJECT_ID";
pub const ENV_PROJECT_NAME: &str = "OS_PROJECT_NAME";
pub const ENV_DOMAIN_ID: &str = "OS_DOMAIN_ID";
pub const ENV_DOMAIN_NAME: &str = "OS_DOMAIN_NAME";
pub const ENV_REGION: &str = "OS_REGION_NAME";

/// Everything needed to authenticate against Keystone and pick the Manila
/// endpoint.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub auth_url: String,
    pub username: String,
    pub user_id: String,
    pub password: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub domain_id: String,
    pub domain_name: String,
    pub region: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("tenant_name", &self.tenant_name)
            .field("domain_id", &self.domain_id)
            .field("domain_name", &self.domain_name)
            .field("region", &self.region)
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self, CsiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through an arbitrary variable lookup.
    ///
    /// `OS_PROJECT_ID` / `OS_PROJECT_NAME` take precedence over their
    /// `OS_TENANT_*` aliases.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CsiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).unwrap_or_default();
        let either = |primary: &str, alias: &str| {
            lookup(primary)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| var(alias))
        };

        let creds = Self {
            auth_url: var(ENV_AUTH_URL),
            username: var(ENV_USERNAME),
            user_id: var(ENV_USER_ID),
            password: var(ENV_PASSWORD),
            tenant_id: either(ENV_PROJECT_ID, ENV_TENANT_ID),
            tenant_name: either(ENV_PROJECT_NAME, ENV_TENANT_NAME),
            domain_id: var(ENV_DOMAIN_ID),
            domain_name: var(ENV_DOMAIN_NAME),
            region: var(ENV_REGION),
        };
        creds
            .validate()
            .map_err(|missing| CsiError::ConfigResolution(format!("environment: {missing}")))?;
        Ok(creds)
    }

    /// Check that the fields Keystone cannot do without are present.
    fn validate(&self) -> Result<(), String> {
        if self.auth_url.is_empty() {
            return Err("missing auth URL".to_owned());
        }
        if self.username.is_empty() && self.user_id.is_empty() {
            return Err("missing username or user ID".to_owned());
        }
        if self.password.is_empty() {
            return Err("missing password".to_owned());
        }
        Ok(())
    }
}

/// Section of the cloud-config file that carries the credentials.
pub const GLOBAL_SECTION: &str = "Global";

/// On-disk layout of the cloud-config file.
#[derive(Debug, Clone, Default)]
pub struct CloudConfig {
    pub global: GlobalSection,
}

/// The `[Global]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalSection {
    pub auth_url: String,
    pub username: String,
    pub user_id: String,
    pub password: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub domain_id: String,
    pub domain_name: String,
    pub region: String,
}

impl GlobalSection {
    /// Store `value` under a gcfg key. Unknown keys are ignored.
    fn set(&mut self, key: &str, value: String) {
        let slot = match key.to_ascii_lowercase().as_str() {
            "auth-url" => &mut self.auth_url,
            "username" => &mut self.username,
            "user-id" => &mut self.user_id,
            "password" => &mut self.password,
            "tenant-id" => &mut self.tenant_id,
            "tenant-name" => &mut self.tenant_name,
            "domain-id" => &mut self.domain_id,
            "domain-name" => &mut self.domain_name,
            "region" => &mut self.region,
            _ => return,
        };
        *slot = value;
    }
}

impl CloudConfig {
    /// Parse the INI file at `path`.
    ///
    /// Section and key names match case-insensitively, as gcfg does. A file
    /// without a `[Global]` section parses to empty credentials.
    pub fn from_file(path: &Path) -> Result<Self, CsiError> {
        let unreadable =
            |e: config::ConfigError| CsiError::ConfigResolution(format!("{}: {e}", path.display()));

        let sections: HashMap<String, config::Value> = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Ini)
                    .required(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(unreadable)?;

        let mut global = GlobalSection::default();
        let section = sections
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(GLOBAL_SECTION))
            .map(|(_, table)| table);
        if let Some(table) = section {
            for (key, value) in table.into_table().map_err(unreadable)? {
                let value = value.into_string().map_err(unreadable)?;
                global.set(&key, unquote(&value).to_owned());
            }
        }
        Ok(Self { global })
    }

    /// Convert the file contents into validated [`Credentials`].
    pub fn into_credentials(self) -> Result<Credentials, CsiError> {
        let g = self.global;
        let creds = Credentials {
            auth_url: g.auth_url,
            username: g.username,
            user_id: g.user_id,
            password: g.password,
            tenant_id: g.tenant_id,
            tenant_name: g.tenant_name,
            domain_id: g.domain_id,
            domain_name: g.domain_name,
            region: g.region,
        };
        creds
            .validate()
            .map_err(|missing| CsiError::ConfigResolution(format!("config file: {missing}")))?;
        Ok(creds)
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// The two-tier credential fallback chain: config file, then environment.
///
/// Built once at startup from the `--cloud-config` path and reused for every
/// session attempt.
#[derive(Clone)]
pub struct CredentialSource {
    config_path: PathBuf,
    env: EnvLookup,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::new(DEFAULT_CLOUD_CONFIG)
    }
}

impl CredentialSource {
    /// Read `config_path` first and fall back to the process environment.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        info!(config_path = %config_path.display(), "cloud credential source configured");
        Self {
            config_path,
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace the environment tier with a custom lookup.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Resolve credentials: file first, environment second.
    pub fn resolve(&self) -> Result<Credentials, CsiError> {
        let file_err = match CloudConfig::from_file(&self.config_path)
            .and_then(CloudConfig::into_credentials)
        {
            Ok(creds) => {
                debug!(config_path = %self.config_path.display(), "credentials read from config file");
                return Ok(creds);
            }
            Err(e) => e,
        };
        debug!(error = %file_err, "cloud config unusable, trying environment");

        match Credentials::from_lookup(|key| (self.env)(key)) {
            Ok(creds) => {
                debug!("credentials read from environment");
                Ok(creds)
            }
            Err(env_err) => Err(CsiError::ConfigResolution(format!(
                "{}; {}",
                reason(file_err),
                reason(env_err)
            ))),
        }
    }
}

/// gcfg allows double-quoted values; the quotes are not part of the value.
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn reason(err: CsiError) -> String {
    match err {
        CsiError::ConfigResolution(r) => r,
        other => other.to_string(),
    }
}
