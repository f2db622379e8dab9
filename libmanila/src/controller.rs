//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle. For this
//! plugin that means provisioning and deprovisioning Manila shares; attaching
//! shares to nodes is not supported and reported as such.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerPublishVolumeRequest, CreateVolumeRequest, Volume, VolumeId,
};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a volume, or return the existing one with the same name.
    ///
    /// Creation is idempotent on the name only: an existing volume is
    /// returned as-is even if its size, type, or protocol differ from the
    /// request.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Make a volume available on a node.
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError>;

    /// Reverse of [`Self::controller_publish_volume`].
    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError>;

    /// RPCs this controller implements.
    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}
