//! Execution engine gateway
//!
//! One [`WorkflowGateway::submit`] call is exactly one outbound submission.
//! Gateways never retry; the orchestrator owns that policy.

pub mod http;
pub mod simulated;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::archive::Archive;
use crate::error::GatewayError;
use crate::types::{Descriptor, ExecutionStatus};

pub use http::HttpGateway;
pub use simulated::{SimulatedBehaviour, SimulatedGateway};

/// Placeholder the engine replaces with its execution id in `webhook_url`
pub const WORKFLOW_ID_PLACEHOLDER: &str = "{workflow_id}";

/// What the engine acknowledged for a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub execution_id: String,
    /// Status the engine reported inline, if it understood one
    pub status: Option<ExecutionStatus>,
}

#[async_trait]
pub trait WorkflowGateway: Send + Sync {
    /// Hand `archive` to the engine and return the id it assigned
    async fn submit(
        &self,
        archive: &Archive,
        descriptor: &Descriptor,
    ) -> Result<GatewayReceipt, GatewayError>;

    /// Short name for logs
    fn kind(&self) -> &'static str;
}

/// Expand the webhook template for a known execution id
pub fn webhook_url(template: &str, execution_id: &str) -> String {
    template.replace(WORKFLOW_ID_PLACEHOLDER, execution_id)
}

/// Parse a 2xx engine response body into a receipt
///
/// The id is read from `workflow_id`, falling back to `id`, and may be a
/// string or an integer.
pub fn parse_receipt(body: &[u8]) -> Result<GatewayReceipt, GatewayError> {
    let payload: JsonValue = serde_json::from_slice(body).map_err(|e| GatewayError::Protocol {
        message: format!("response is not JSON: {}", e),
    })?;

    let object = payload.as_object().ok_or_else(|| GatewayError::Protocol {
        message: "response is not a JSON object".to_string(),
    })?;

    let execution_id = ["workflow_id", "id"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(id_from_value)
        .ok_or_else(|| GatewayError::Protocol {
            message: "response carries no workflow_id or id".to_string(),
        })?;

    let status = object
        .get("status")
        .and_then(JsonValue::as_str)
        .and_then(|s| s.parse::<ExecutionStatus>().ok());

    Ok(GatewayReceipt {
        execution_id,
        status,
    })
}

fn id_from_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    }
}
