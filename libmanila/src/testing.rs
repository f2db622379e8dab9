//! In-memory doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{CreateShareOpts, ShareBackend};
use crate::config::{CredentialSource, Credentials, ENV_AUTH_URL, ENV_PASSWORD, ENV_USERNAME};
use crate::error::CsiError;
use crate::session::Connector;
use crate::types::{Share, ShareStatus};

/// A Manila stand-in keyed by share ID.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    shares: Mutex<HashMap<String, Share>>,
    next_id: AtomicU64,
    pub(crate) creates: AtomicUsize,
    pub(crate) lookup_failure: Mutex<Option<CsiError>>,
    pub(crate) delay: Option<Duration>,
}

impl MemoryBackend {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shares.lock().unwrap().len()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.shares
            .lock()
            .unwrap()
            .values()
            .map(|s| s.name.clone())
            .collect()
    }

    pub(crate) fn get(&self, id: &str) -> Option<Share> {
        self.shares.lock().unwrap().get(id).cloned()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ShareBackend for MemoryBackend {
    async fn get_by_name(&self, name: &str) -> Result<Share, CsiError> {
        self.pause().await;
        if let Some(err) = self.lookup_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.shares
            .lock()
            .unwrap()
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| CsiError::VolumeNotFound(name.to_owned()))
    }

    async fn create(&self, opts: &CreateShareOpts) -> Result<Share, CsiError> {
        self.pause().await;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = format!("share-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let share = Share {
            id: id.clone(),
            name: opts.name.clone(),
            status: ShareStatus::Creating,
            size_gb: opts.size_gb,
            protocol: opts.protocol.clone(),
            share_type: opts.share_type.clone(),
            availability_zone: if opts.availability_zone.is_empty() {
                "nova".to_owned()
            } else {
                opts.availability_zone.clone()
            },
        };
        self.shares.lock().unwrap().insert(id, share.clone());
        Ok(share)
    }

    async fn delete(&self, id: &str) -> Result<(), CsiError> {
        self.pause().await;
        self.shares
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CsiError::VolumeNotFound(id.to_owned()))
    }
}

/// Connector that hands out a fixed backend and counts handshakes.
pub(crate) struct StaticConnector {
    pub(crate) backend: Arc<MemoryBackend>,
    pub(crate) handshakes: AtomicUsize,
    pub(crate) delay: Duration,
    pub(crate) failure: Option<CsiError>,
}

impl StaticConnector {
    pub(crate) fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            handshakes: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    pub(crate) fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self, _creds: &Credentials) -> Result<Arc<dyn ShareBackend>, CsiError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(Arc::clone(&self.backend) as Arc<dyn ShareBackend>)
    }
}

/// Credentials that resolve from a fake environment, no file involved.
pub(crate) fn env_source() -> CredentialSource {
    CredentialSource::new("/nonexistent/cloud.conf").with_env_lookup(|key| match key {
        ENV_AUTH_URL => Some("http://keystone.test/v3".to_owned()),
        ENV_USERNAME => Some("demo".to_owned()),
        ENV_PASSWORD => Some("pw".to_owned()),
        _ => None,
    })
}
