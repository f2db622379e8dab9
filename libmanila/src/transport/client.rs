//! Orchestrator-side QUIC client.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::error::CsiError;
use crate::message::CsiMessage;
use crate::transport::MAX_MESSAGE_BYTES;
use crate::types::{CreateVolumeRequest, PluginInfo, Volume, VolumeId};

/// One QUIC connection to a controller plugin. Every call opens its own
/// stream, so a client can be shared across tasks.
pub struct CsiClient {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
}

impl CsiClient {
    /// Connect to the plugin at `addr`. `server_name` is checked against the
    /// plugin certificate.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let crypto = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("TLS config unusable for QUIC: {e}")))?;

        let mut endpoint = quinn::Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .map_err(CsiError::transport)?;
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?
            .await
            .map_err(CsiError::transport)?;
        debug!(%addr, server_name, "connected to CSI plugin");

        Ok(Self {
            endpoint,
            connection,
        })
    }

    /// Send one message and read the reply.
    #[instrument(skip(self), fields(request = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let (mut send, mut recv) = self.connection.open_bi().await.map_err(CsiError::transport)?;

        let body = serde_json::to_vec(msg).map_err(CsiError::internal)?;
        send.write_all(&body).await.map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;

        let raw = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(CsiError::transport)?;
        let reply: CsiMessage = serde_json::from_slice(&raw).map_err(CsiError::transport)?;
        debug!(%reply, "reply received");
        Ok(reply)
    }

    pub async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        match self.request(&CsiMessage::CreateVolume(req)).await? {
            CsiMessage::VolumeCreated(volume) => Ok(volume),
            other => Err(into_error(other)),
        }
    }

    pub async fn delete_volume(&self, volume_id: VolumeId) -> Result<(), CsiError> {
        match self.request(&CsiMessage::DeleteVolume(volume_id)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(into_error(other)),
        }
    }

    pub async fn plugin_info(&self) -> Result<PluginInfo, CsiError> {
        match self.request(&CsiMessage::GetPluginInfo).await? {
            CsiMessage::PluginInfoResponse(info) => Ok(info),
            other => Err(into_error(other)),
        }
    }

    pub async fn probe(&self) -> Result<bool, CsiError> {
        match self.request(&CsiMessage::Probe).await? {
            CsiMessage::ProbeResult(ready) => Ok(ready),
            other => Err(into_error(other)),
        }
    }

    /// Close the connection and flush the close frame to the plugin.
    pub async fn close(&self) {
        self.connection.close(0u32.into(), b"done");
        self.endpoint.wait_idle().await;
    }
}

/// Plugin errors come back as-is; a reply of the wrong kind is a transport
/// fault.
fn into_error(reply: CsiMessage) -> CsiError {
    match reply {
        CsiMessage::Error(e) => e,
        other => CsiError::TransportError(format!("unexpected reply: {other}")),
    }
}
