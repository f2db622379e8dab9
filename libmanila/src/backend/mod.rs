//! Remote storage backend.
//!
//! [`ShareBackend`] is the capability the controller drives: one remote call
//! per operation, no retries, no pagination. [`manila::ManilaClient`] is the
//! HTTP implementation; [`keystone`] performs the identity handshake that
//! produces it.

pub mod keystone;
pub mod manila;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CsiError;
use crate::types::Share;

/// Body of an error response, or a note saying why it could not be read.
pub(crate) fn body_or_placeholder(body: Result<String, reqwest::Error>) -> String {
    body.unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}

/// Parameters for a single share creation. Empty strings are left for the
/// backend to default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateShareOpts {
    pub name: String,
    #[serde(rename = "size")]
    pub size_gb: u64,
    #[serde(rename = "share_proto", skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub share_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,
}

/// Share operations against the remote shared-filesystem service.
#[async_trait]
pub trait ShareBackend: Send + Sync {
    /// Find a share by name. Fails with [`CsiError::VolumeNotFound`] when no
    /// share carries that name; any other error means the lookup itself
    /// failed.
    async fn get_by_name(&self, name: &str) -> Result<Share, CsiError>;

    /// Create a share.
    async fn create(&self, opts: &CreateShareOpts) -> Result<Share, CsiError>;

    /// Delete a share by ID.
    async fn delete(&self, id: &str) -> Result<(), CsiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreadable_body_is_described() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = reqwest::Client::new()
            .get(format!("http://{addr}/"))
            .send()
            .await
            .unwrap_err();

        let text = body_or_placeholder(Err(err));
        assert!(text.starts_with("<unreadable body: "), "{text}");
        assert_eq!(body_or_placeholder(Ok("quota exceeded".into())), "quota exceeded");
    }
}
