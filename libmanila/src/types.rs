//! Core CSI types: volumes, shares, requests, and capabilities.
//!
//! These types form the data model shared by the CSI traits, the transport
//! layer, and the Manila backend. They are all [`Serialize`]/[`Deserialize`]
//! so they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One gibibyte, the allocation granularity of Manila shares.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Capacity used when the request carries no capacity range.
pub const DEFAULT_VOLUME_SIZE_BYTES: u64 = GIB;

/// Request parameter naming the Manila share type.
pub const PARAM_SHARE_TYPE: &str = "type";
/// Request parameter naming the share protocol (`NFS`, `CEPHFS`, ...).
pub const PARAM_SHARE_PROTO: &str = "proto";
/// Request parameter naming the availability zone.
pub const PARAM_AVAILABILITY: &str = "availability";

/// Volume attribute echoing the availability zone back to the orchestrator.
pub const ATTR_AVAILABILITY: &str = "availability";

/// Round `bytes` up to whole gibibytes. Never truncates: any remainder costs
/// a full extra GiB.
pub fn round_up_to_gib(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume. For this plugin it is the Manila
/// share ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

/// Lifecycle state reported by Manila. Informational only; the controller
/// never polls it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
    Creating,
    Available,
    Error,
    Deleting,
    Deleted,
    ErrorDeleting,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A share as seen by the backend client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    /// Backend-assigned ID, empty until creation succeeds.
    pub id: String,
    /// Share name, used as the idempotency key.
    pub name: String,
    pub status: ShareStatus,
    /// Size in whole GiB.
    pub size_gb: u64,
    /// Share protocol, opaque to the controller.
    #[serde(default)]
    pub protocol: String,
    /// Share type, opaque to the controller.
    #[serde(default)]
    pub share_type: String,
    #[serde(default)]
    pub availability_zone: String,
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Handle returned to the orchestrator after a successful `CreateVolume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
    /// Opaque attributes; carries [`ATTR_AVAILABILITY`].
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl From<&Share> for Volume {
    fn from(share: &Share) -> Self {
        Self {
            volume_id: VolumeId(share.id.clone()),
            capacity_bytes: share.size_gb.saturating_mul(GIB),
            attributes: HashMap::from([(
                ATTR_AVAILABILITY.to_owned(),
                share.availability_zone.clone(),
            )]),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Requested capacity bounds. A zero field means "unspecified".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    #[serde(default)]
    pub required_bytes: u64,
    #[serde(default)]
    pub limit_bytes: u64,
}

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Volume name. Empty means "generate one".
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Recognized keys: [`PARAM_SHARE_TYPE`], [`PARAM_SHARE_PROTO`],
    /// [`PARAM_AVAILABILITY`]. Everything else is ignored.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl CreateVolumeRequest {
    /// Bytes the caller asked for, falling back to
    /// [`DEFAULT_VOLUME_SIZE_BYTES`] when no range (or a zero lower bound) is
    /// given.
    pub fn required_bytes(&self) -> u64 {
        match self.capacity_range {
            Some(range) if range.required_bytes > 0 => range.required_bytes,
            _ => DEFAULT_VOLUME_SIZE_BYTES,
        }
    }

    /// Upper bound in bytes, if the caller set one.
    pub fn limit_bytes(&self) -> Option<u64> {
        self.capacity_range
            .map(|range| range.limit_bytes)
            .filter(|limit| *limit > 0)
    }

    /// Look up a parameter, treating a missing key as the empty string.
    pub fn parameter(&self, key: &str) -> &str {
        self.parameters.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Request to attach a volume to a node. Accepted on the wire but not
/// implemented by this plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerPublishVolumeRequest {
    pub volume_id: VolumeId,
    pub node_id: String,
    #[serde(default)]
    pub readonly: bool,
}

// ---------------------------------------------------------------------------
// Plugin info & capabilities
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"manila.csi.openstack.org"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// RPCs the Controller service supports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("share-abc".into());
        assert_eq!(id.to_string(), "share-abc");
    }

    #[test]
    fn round_up_never_truncates() {
        assert_eq!(round_up_to_gib(1), 1);
        assert_eq!(round_up_to_gib(GIB - 1), 1);
        assert_eq!(round_up_to_gib(GIB), 1);
        assert_eq!(round_up_to_gib(1_073_741_825), 2);
        assert_eq!(round_up_to_gib(10 * GIB), 10);
        assert_eq!(round_up_to_gib(10 * GIB + 1), 11);
        assert_eq!(round_up_to_gib(u64::MAX), u64::MAX / GIB + 1);
    }

    #[test]
    fn rounded_size_is_smallest_covering_gib() {
        for bytes in [1, 512, GIB / 2, GIB + 1, 3 * GIB - 7, 5 * GIB + 42] {
            let gb = round_up_to_gib(bytes);
            assert!(gb * GIB >= bytes);
            assert!((gb - 1) * GIB < bytes);
        }
    }

    #[test]
    fn missing_capacity_defaults_to_one_gib() {
        let req = CreateVolumeRequest::default();
        assert_eq!(req.required_bytes(), GIB);
        assert_eq!(req.limit_bytes(), None);

        let req = CreateVolumeRequest {
            capacity_range: Some(CapacityRange::default()),
            ..Default::default()
        };
        assert_eq!(req.required_bytes(), GIB);
    }

    #[test]
    fn parameters_default_to_empty() {
        let req = CreateVolumeRequest {
            parameters: HashMap::from([(PARAM_SHARE_PROTO.into(), "NFS".into())]),
            ..Default::default()
        };
        assert_eq!(req.parameter(PARAM_SHARE_PROTO), "NFS");
        assert_eq!(req.parameter(PARAM_SHARE_TYPE), "");
    }

    #[test]
    fn unknown_share_status_deserializes() {
        let status: ShareStatus = serde_json::from_str("\"manage_starting\"").unwrap();
        assert_eq!(status, ShareStatus::Unknown);
        let status: ShareStatus = serde_json::from_str("\"error_deleting\"").unwrap();
        assert_eq!(status, ShareStatus::ErrorDeleting);
    }

    #[test]
    fn volume_from_share_echoes_availability() {
        let share = Share {
            id: "abc".into(),
            name: "pvc-1".into(),
            size_gb: 2,
            availability_zone: "nova".into(),
            ..Default::default()
        };
        let vol = Volume::from(&share);
        assert_eq!(vol.volume_id, VolumeId::from("abc"));
        assert_eq!(vol.capacity_bytes, 2 * GIB);
        assert_eq!(vol.attributes[ATTR_AVAILABILITY], "nova");
    }
}
