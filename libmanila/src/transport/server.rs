//! Controller-side QUIC endpoint.
//!
//! One request per bi-directional stream: the client writes a JSON
//! [`CsiMessage`] and finishes its send half, the server answers with a
//! single JSON message and finishes its own. Failures inside the plugin are
//! answered as [`CsiMessage::Error`] so the caller always gets a reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::transport::MAX_MESSAGE_BYTES;

/// Serves a [`CsiIdentity`] + [`CsiController`] plugin over QUIC.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    plugin: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + 'static,
{
    /// Bind `addr` and prepare to serve `plugin`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        plugin: Arc<T>,
    ) -> Result<Self, CsiError> {
        let crypto = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("TLS config unusable for QUIC: {e}")))?;
        let endpoint = quinn::Endpoint::server(
            quinn::ServerConfig::with_crypto(Arc::new(crypto)),
            addr,
        )
        .map_err(CsiError::transport)?;
        info!(addr = ?endpoint.local_addr().ok(), "CSI endpoint bound");
        Ok(Self { endpoint, plugin })
    }

    /// Accept connections until the endpoint is closed.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let plugin = Arc::clone(&self.plugin);
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "QUIC handshake with client failed");
                        return;
                    }
                };
                let remote = conn.remote_address();
                debug!(%remote, "client connected");
                match serve_connection(conn, plugin).await {
                    Ok(()) => debug!(%remote, "client disconnected"),
                    Err(e) => warn!(%remote, error = %e, "client connection lost"),
                }
            });
        }
        debug!("CSI endpoint closed");
        Ok(())
    }

    /// Stop accepting work and wait for open connections to drain.
    pub async fn shutdown(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
        self.endpoint.wait_idle().await;
    }

    /// The bound endpoint.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

async fn serve_connection<T>(conn: quinn::Connection, plugin: Arc<T>) -> Result<(), CsiError>
where
    T: CsiIdentity + CsiController + 'static,
{
    loop {
        let (send, recv) = match conn.accept_bi().await {
            Ok(streams) => streams,
            Err(quinn::ConnectionError::ApplicationClosed(_))
            | Err(quinn::ConnectionError::LocallyClosed) => return Ok(()),
            Err(e) => return Err(CsiError::transport(e)),
        };
        let plugin = Arc::clone(&plugin);
        tokio::spawn(async move {
            if let Err(e) = answer(send, recv, plugin.as_ref()).await {
                warn!(error = %e, "failed to answer CSI request");
            }
        });
    }
}

#[instrument(skip_all, fields(stream = %recv.id()))]
async fn answer<T>(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    plugin: &T,
) -> Result<(), CsiError>
where
    T: CsiIdentity + CsiController,
{
    let raw = recv
        .read_to_end(MAX_MESSAGE_BYTES)
        .await
        .map_err(CsiError::transport)?;

    let response = match serde_json::from_slice::<CsiMessage>(&raw) {
        Ok(request) => {
            let op = request.to_string();
            let started = Instant::now();
            let response = dispatch(plugin, request).await;
            match &response {
                CsiMessage::Error(e) => {
                    info!(%op, elapsed = ?started.elapsed(), error = %e, "request failed")
                }
                _ => debug!(%op, elapsed = ?started.elapsed(), "request served"),
            }
            response
        }
        Err(e) => CsiMessage::Error(CsiError::InvalidArgument(format!("malformed request: {e}"))),
    };

    let body = serde_json::to_vec(&response).map_err(CsiError::internal)?;
    send.write_all(&body).await.map_err(CsiError::transport)?;
    send.finish().map_err(CsiError::transport)?;
    Ok(())
}

/// Wrap an operation result into its response envelope.
fn reply<V>(result: Result<V, CsiError>, wrap: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    result.map_or_else(CsiMessage::Error, wrap)
}

async fn dispatch<T>(plugin: &T, request: CsiMessage) -> CsiMessage
where
    T: CsiIdentity + CsiController,
{
    match request {
        CsiMessage::GetPluginInfo => {
            reply(plugin.get_plugin_info().await, CsiMessage::PluginInfoResponse)
        }
        CsiMessage::GetPluginCapabilities => reply(
            plugin.get_plugin_capabilities().await,
            CsiMessage::PluginCapabilitiesResponse,
        ),
        CsiMessage::Probe => reply(plugin.probe().await, CsiMessage::ProbeResult),

        CsiMessage::CreateVolume(req) => {
            reply(plugin.create_volume(req).await, CsiMessage::VolumeCreated)
        }
        CsiMessage::DeleteVolume(id) => {
            reply(plugin.delete_volume(&id).await, |()| CsiMessage::Ok)
        }
        CsiMessage::ControllerPublishVolume(req) => reply(
            plugin.controller_publish_volume(req).await,
            CsiMessage::Published,
        ),
        CsiMessage::ControllerUnpublishVolume { volume_id, node_id } => reply(
            plugin
                .controller_unpublish_volume(&volume_id, &node_id)
                .await,
            |()| CsiMessage::Ok,
        ),
        CsiMessage::GetControllerCapabilities => reply(
            plugin.get_capabilities().await,
            CsiMessage::ControllerCapabilitiesResponse,
        ),

        response => CsiMessage::Error(CsiError::InvalidArgument(format!(
            "{response} is a response, not a request"
        ))),
    }
}
