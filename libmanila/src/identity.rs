//! Plugin discovery and readiness.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// What the orchestrator asks before routing volume work to a plugin.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Name and version the plugin registers under.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// `Ok(true)` when the plugin can reach its storage backend right now.
    /// An unreachable backend is `Ok(false)`, not an error.
    async fn probe(&self) -> Result<bool, CsiError>;

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}
