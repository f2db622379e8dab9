//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the envelope for every request and response exchanged
//! between the orchestrator and the Manila controller plugin.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(VolumeId),
    /// Attach a volume to a node (Controller, unimplemented).
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// Detach a volume from a node (Controller, unimplemented).
    ControllerUnpublishVolume { volume_id: VolumeId, node_id: String },
    /// Query controller capabilities (Controller).
    GetControllerCapabilities,

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was created, or already existed under the requested name.
    VolumeCreated(Volume),
    /// Publish context for the node.
    Published(HashMap<String, String>),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({})", id),
            Self::ControllerPublishVolume(req) => {
                write!(f, "ControllerPublishVolume({}, node={})", req.volume_id, req.node_id)
            }
            Self::ControllerUnpublishVolume { volume_id, node_id } => {
                write!(f, "ControllerUnpublishVolume({}, node={})", volume_id, node_id)
            }
            Self::GetControllerCapabilities => f.write_str("GetControllerCapabilities"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::Published(ctx) => write!(f, "Published(keys={})", ctx.len()),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_without_capacity_parses() {
        let de: CsiMessage =
            serde_json::from_str(r#"{"CreateVolume":{"name":"pvc-1"}}"#).expect("deserialize");
        let CsiMessage::CreateVolume(req) = de else {
            panic!("expected CreateVolume");
        };
        assert_eq!(req.name, "pvc-1");
        assert_eq!(req.required_bytes(), GIB);
    }

    #[test]
    fn error_message_keeps_class() {
        let msg = CsiMessage::Error(CsiError::VolumeNotFound("share-1".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::VolumeNotFound(_))));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(
            CsiMessage::DeleteVolume("share-9".into()).to_string(),
            "DeleteVolume(share-9)"
        );
        let msg = CsiMessage::ControllerUnpublishVolume {
            volume_id: "share-9".into(),
            node_id: "n1".into(),
        };
        assert_eq!(msg.to_string(), "ControllerUnpublishVolume(share-9, node=n1)");
    }
}
