//! Command handler for control API
//!
//! Dispatches API requests to provisioner operations and serializes their
//! results.

use crate::config::validate_resource_id;
use crate::control::{ApiError, ApiRequest, ApiResponse, ControlAction};
use crate::provisioner::Provisioner;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Executes control requests against a provisioner
pub struct CommandHandler {
    provisioner: Arc<Provisioner>,
}

fn to_value<T: Serialize>(value: &T) -> Result<Option<serde_json::Value>, ApiError> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| ApiError::parse(e.to_string()))
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    let value = value
        .as_deref()
        .ok_or_else(|| ApiError::invalid(format!("missing parameter '{}'", name)))?;
    validate_resource_id(value).map_err(ApiError::from)?;
    Ok(value)
}

fn require_cidr(request: &ApiRequest) -> Result<&str, ApiError> {
    request
        .cidr
        .as_deref()
        .ok_or_else(|| ApiError::invalid("missing parameter 'cidr'"))
}

impl CommandHandler {
    /// Create a handler for a provisioner
    pub fn new(provisioner: Arc<Provisioner>) -> Self {
        Self { provisioner }
    }

    /// Handle an API request
    pub async fn handle_request(&self, request: ApiRequest) -> ApiResponse {
        debug!("Handling request {}: {:?}", request.id, request.action);

        match self.dispatch(&request).await {
            Ok(data) => {
                info!(
                    "Request {} completed successfully: {:?}",
                    request.id, request.action
                );
                ApiResponse::success(request.id, data)
            }
            Err(e) => {
                error!("Request {} failed: {}", request.id, e);
                ApiResponse::error(request.id, e)
            }
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<Option<serde_json::Value>, ApiError> {
        let p = &self.provisioner;
        match request.action {
            ControlAction::ProvisionPeer => {
                let router_id = require(&request.router_id, "router_id")?;
                let options = request.options.clone().unwrap_or_default();
                to_value(&p.provision_peer(router_id, options).await?)
            }
            ControlAction::RemovePeer => {
                let router_id = require(&request.router_id, "router_id")?;
                let removed = p.remove_peer(router_id).await?;
                Ok(Some(serde_json::json!({
                    "router_id": router_id,
                    "removed": removed,
                })))
            }
            ControlAction::GetConfig => {
                let router_id = require(&request.router_id, "router_id")?;
                let config = p.get_config(router_id).await?;
                Ok(Some(serde_json::json!({
                    "router_id": router_id,
                    "config": config,
                })))
            }
            ControlAction::EnsureInterface => {
                let network_id = require(&request.network_id, "network_id")?;
                to_value(&p.ensure_interface(network_id).await?)
            }
            ControlAction::RemoveInterface => {
                let network_id = require(&request.network_id, "network_id")?;
                let removed = p.remove_interface(network_id).await?;
                Ok(Some(serde_json::json!({
                    "network_id": network_id,
                    "removed": removed,
                })))
            }
            ControlAction::AddNetwork => {
                let router_id = require(&request.router_id, "router_id")?;
                to_value(&p.add_network(router_id, require_cidr(request)?).await?)
            }
            ControlAction::RemoveNetwork => {
                let router_id = require(&request.router_id, "router_id")?;
                to_value(&p.remove_network(router_id, require_cidr(request)?).await?)
            }
            ControlAction::Status => to_value(&p.get_status().await?),
            ControlAction::Sync => to_value(&p.sync_now().await?),
            ControlAction::Resources => to_value(p.resources().as_ref()),
        }
    }
}
