//! Manila CSI driver.
//!
//! [`ManilaDriver`] implements [`CsiIdentity`] and [`CsiController`] on top
//! of a [`SessionManager`]. It holds no share state of its own: every request
//! re-queries or re-submits to Manila.
//!
//! # CreateVolume idempotency
//!
//! The share name is the idempotency key, and only the name is compared. A
//! request whose name matches an existing share gets that share back even if
//! size, type, or protocol differ. A request without a name gets a fresh
//! UUID, so retrying it creates a second share.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::backend::CreateShareOpts;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::session::SessionManager;
use crate::types::*;

/// Plugin name advertised when none is configured.
pub const DEFAULT_DRIVER_NAME: &str = "manila.csi.openstack.org";

/// Upper bound on a single controller operation.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// CSI controller + identity backed by OpenStack Manila.
#[derive(Debug)]
pub struct ManilaDriver {
    name: String,
    sessions: SessionManager,
    request_timeout: Duration,
}

impl ManilaDriver {
    pub fn new(sessions: SessionManager) -> Self {
        Self {
            name: DEFAULT_DRIVER_NAME.to_owned(),
            sessions,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the advertised plugin name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Deadline applied to each controller operation, session setup
    /// included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run `fut` under the request deadline. An elapsed deadline drops the
    /// in-flight call; anything Manila already accepted stays accepted.
    async fn within_deadline<T, F>(&self, op: &str, fut: F) -> Result<T, CsiError>
    where
        F: Future<Output = Result<T, CsiError>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| {
                CsiError::DeadlineExceeded(format!(
                    "{op} did not finish within {:?}",
                    self.request_timeout
                ))
            })?
    }

    async fn provision(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        let name = if req.name.is_empty() {
            let generated = uuid::Uuid::new_v4().to_string();
            debug!(name = %generated, "request carries no name, generated one");
            generated
        } else {
            req.name.clone()
        };

        let required = req.required_bytes();
        let size_gb = round_up_to_gib(required);
        if let Some(limit) = req.limit_bytes()
            && size_gb.saturating_mul(GIB) > limit
        {
            return Err(CsiError::OutOfRange(format!(
                "{required} bytes round up to {size_gb} GiB, above the {limit} byte limit"
            )));
        }

        let backend = self.sessions.acquire().await?;

        match backend.get_by_name(&name).await {
            Ok(existing) => {
                info!(%name, id = %existing.id, "share already exists");
                return Ok(Volume::from(&existing));
            }
            Err(e) if e.is_not_found() => {
                debug!(%name, "no share with this name yet");
            }
            Err(e) => {
                warn!(%name, error = %e, "lookup failed, not creating");
                return Err(e);
            }
        }

        let opts = CreateShareOpts {
            name,
            size_gb,
            protocol: req.parameter(PARAM_SHARE_PROTO).to_owned(),
            share_type: req.parameter(PARAM_SHARE_TYPE).to_owned(),
            availability_zone: req.parameter(PARAM_AVAILABILITY).to_owned(),
        };
        let share = backend.create(&opts).await?;

        info!(
            id = %share.id,
            name = %share.name,
            size_gb = share.size_gb,
            availability_zone = %share.availability_zone,
            "share created",
        );
        Ok(Volume::from(&share))
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for ManilaDriver {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        let acquired = self
            .within_deadline("Probe", self.sessions.acquire())
            .await;
        if let Err(e) = &acquired {
            debug!(error = %e, "probe: backend session unavailable");
        }
        Ok(acquired.is_ok())
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for ManilaDriver {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        self.within_deadline("CreateVolume", self.provision(req))
            .await
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        if volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument("volume id is empty".into()));
        }

        self.within_deadline("DeleteVolume", async {
            let backend = self.sessions.acquire().await?;
            backend.delete(&volume_id.0).await?;
            info!(%volume_id, "share deleted");
            Ok(())
        })
        .await
    }

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError> {
        debug!(volume_id = %req.volume_id, node_id = %req.node_id, "publish requested");
        Err(CsiError::Unimplemented("ControllerPublishVolume".into()))
    }

    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError> {
        debug!(%volume_id, node_id, "unpublish requested");
        Err(CsiError::Unimplemented("ControllerUnpublishVolume".into()))
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![ControllerCapability::CreateDeleteVolume])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use crate::backend::ShareBackend;
    use crate::testing::{MemoryBackend, StaticConnector, env_source};

    struct Harness {
        driver: ManilaDriver,
        backend: Arc<MemoryBackend>,
        connector: Arc<StaticConnector>,
    }

    fn harness_with(backend: MemoryBackend) -> Harness {
        let backend = Arc::new(backend);
        let connector = Arc::new(StaticConnector::new(Arc::clone(&backend)));
        let driver = ManilaDriver::new(SessionManager::new(env_source(), connector.clone()));
        Harness {
            driver,
            backend,
            connector,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryBackend::default())
    }

    fn named(name: &str, bytes: u64) -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: name.into(),
            capacity_range: Some(CapacityRange {
                required_bytes: bytes,
                limit_bytes: 0,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_volume_idempotent_by_name() {
        let h = harness();

        let v1 = h.driver.create_volume(named("pvc-1", GIB)).await.unwrap();
        let v2 = h.driver.create_volume(named("pvc-1", GIB)).await.unwrap();

        assert_eq!(v1.volume_id, v2.volume_id);
        assert_eq!(h.backend.len(), 1);
        assert_eq!(h.backend.creates.load(Ordering::SeqCst), 1);
        assert_eq!(h.connector.handshakes(), 1);
    }

    #[tokio::test]
    async fn idempotency_ignores_size_and_protocol() {
        let h = harness();

        let v1 = h.driver.create_volume(named("pvc-1", GIB)).await.unwrap();
        let mut bigger = named("pvc-1", 50 * GIB);
        bigger
            .parameters
            .insert(PARAM_SHARE_PROTO.into(), "CEPHFS".into());
        let v2 = h.driver.create_volume(bigger).await.unwrap();

        assert_eq!(v1, v2);
        assert_eq!(h.backend.get(&v2.volume_id.0).unwrap().size_gb, 1);
    }

    #[tokio::test]
    async fn empty_names_are_not_idempotent() {
        let h = harness();

        let v1 = h.driver.create_volume(named("", GIB)).await.unwrap();
        let v2 = h.driver.create_volume(named("", GIB)).await.unwrap();

        assert_ne!(v1.volume_id, v2.volume_id);
        let names = h.backend.names();
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
        for name in names {
            assert!(uuid::Uuid::parse_str(&name).is_ok(), "{name} is not a uuid");
        }
    }

    #[tokio::test]
    async fn size_rounds_up_to_whole_gib() {
        let h = harness();

        let v = h
            .driver
            .create_volume(named("odd", 1_073_741_825))
            .await
            .unwrap();
        assert_eq!(h.backend.get(&v.volume_id.0).unwrap().size_gb, 2);
        assert_eq!(v.capacity_bytes, 2 * GIB);

        let v = h.driver.create_volume(named("tiny", 1)).await.unwrap();
        assert_eq!(h.backend.get(&v.volume_id.0).unwrap().size_gb, 1);
    }

    #[tokio::test]
    async fn missing_capacity_defaults_to_one_gib() {
        let h = harness();
        let v = h
            .driver
            .create_volume(CreateVolumeRequest {
                name: "default-size".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(h.backend.get(&v.volume_id.0).unwrap().size_gb, 1);
    }

    #[tokio::test]
    async fn limit_below_rounded_size_is_out_of_range() {
        let h = harness();
        let req = CreateVolumeRequest {
            name: "capped".into(),
            capacity_range: Some(CapacityRange {
                required_bytes: GIB + 1,
                limit_bytes: GIB + 100,
            }),
            ..Default::default()
        };

        let err = h.driver.create_volume(req).await.unwrap_err();
        assert!(matches!(err, CsiError::OutOfRange(_)));
        assert_eq!(h.connector.handshakes(), 0);
        assert_eq!(h.backend.len(), 0);
    }

    #[tokio::test]
    async fn parameters_reach_the_backend_and_zone_is_echoed() {
        let h = harness();
        let mut req = named("typed", GIB);
        req.parameters = HashMap::from([
            (PARAM_SHARE_TYPE.into(), "gold".into()),
            (PARAM_SHARE_PROTO.into(), "NFS".into()),
            (PARAM_AVAILABILITY.into(), "zone-b".into()),
            ("unrelated".into(), "ignored".into()),
        ]);

        let v = h.driver.create_volume(req).await.unwrap();
        let share = h.backend.get(&v.volume_id.0).unwrap();
        assert_eq!(share.share_type, "gold");
        assert_eq!(share.protocol, "NFS");
        assert_eq!(share.availability_zone, "zone-b");
        assert_eq!(v.attributes[ATTR_AVAILABILITY], "zone-b");
    }

    #[tokio::test]
    async fn existing_share_zone_is_echoed() {
        let h = harness();
        let first = h.driver.create_volume(named("pvc-z", GIB)).await.unwrap();
        let again = h.driver.create_volume(named("pvc-z", GIB)).await.unwrap();
        assert_eq!(first.attributes[ATTR_AVAILABILITY], "nova");
        assert_eq!(again.attributes[ATTR_AVAILABILITY], "nova");
    }

    #[tokio::test]
    async fn lookup_failure_does_not_fall_through_to_create() {
        let h = harness();
        *h.backend.lookup_failure.lock().unwrap() =
            Some(CsiError::Authentication("token revoked".into()));

        let err = h.driver.create_volume(named("pvc-1", GIB)).await.unwrap_err();

        assert_eq!(err, CsiError::Authentication("token revoked".into()));
        assert_eq!(h.backend.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_failure_is_returned_verbatim() {
        let backend = Arc::new(MemoryBackend::default());
        let mut connector = StaticConnector::new(Arc::clone(&backend));
        connector.failure = Some(CsiError::Authentication("keystone said no".into()));
        let driver = ManilaDriver::new(SessionManager::new(env_source(), Arc::new(connector)));

        let err = driver.create_volume(named("pvc-1", GIB)).await.unwrap_err();
        assert_eq!(err, CsiError::Authentication("keystone said no".into()));
        let err = driver.delete_volume(&"share-0".into()).await.unwrap_err();
        assert_eq!(err, CsiError::Authentication("keystone said no".into()));
    }

    #[tokio::test]
    async fn delete_then_lookup_is_not_found() {
        let h = harness();
        let v = h.driver.create_volume(named("doomed", GIB)).await.unwrap();

        h.driver.delete_volume(&v.volume_id).await.unwrap();

        assert_eq!(h.backend.len(), 0);
        let err = h.backend.get_by_name("doomed").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_unknown_returns_backend_result_unchanged() {
        let h = harness();
        let expected = h.backend.delete("missing").await.unwrap_err();

        let err = h.driver.delete_volume(&"missing".into()).await.unwrap_err();
        assert_eq!(err, expected);
    }

    #[tokio::test]
    async fn delete_empty_id_is_invalid() {
        let h = harness();
        let err = h.driver.delete_volume(&"".into()).await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
        assert_eq!(h.connector.handshakes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_hits_the_deadline() {
        let h = harness_with(MemoryBackend::with_delay(Duration::from_secs(30)));
        let driver = h.driver.with_request_timeout(Duration::from_secs(5));

        let err = driver.create_volume(named("slow", GIB)).await.unwrap_err();
        assert!(matches!(err, CsiError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn publish_and_unpublish_are_capability_gaps() {
        let h = harness();
        let err = h
            .driver
            .controller_publish_volume(ControllerPublishVolumeRequest {
                volume_id: "share-0".into(),
                node_id: "node-1".into(),
                readonly: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Unimplemented(_)));

        let err = h
            .driver
            .controller_unpublish_volume(&"share-0".into(), "node-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Unimplemented(_)));

        let caps = h.driver.get_capabilities().await.unwrap();
        assert_eq!(caps, vec![ControllerCapability::CreateDeleteVolume]);
    }

    #[tokio::test]
    async fn identity_reports_name_and_readiness() {
        let h = harness();
        let driver = h.driver.with_name("test.csi");
        let info = driver.get_plugin_info().await.unwrap();
        assert_eq!(info.name, "test.csi");
        assert!(driver.probe().await.unwrap());
        assert_eq!(
            driver.get_plugin_capabilities().await.unwrap(),
            vec![PluginCapability::ControllerService]
        );
    }

    #[tokio::test]
    async fn probe_is_false_without_credentials() {
        let connector = Arc::new(StaticConnector::new(Arc::new(MemoryBackend::default())));
        let source = crate::config::CredentialSource::new("/nonexistent/cloud.conf")
            .with_env_lookup(|_| None);
        let driver = ManilaDriver::new(SessionManager::new(source, connector));
        assert!(!driver.probe().await.unwrap());
    }
}
