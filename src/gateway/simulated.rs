//! In-process stand-in for the execution engine.
//!
//! Accepted submissions get a `sim-<uuid>` id. With a webhook template
//! configured, the gateway later POSTs a completion (or failure) callback to
//! that webhook the way the real engine would. Tests can queue behaviours to
//! script outages and contract violations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{webhook_url, GatewayReceipt, WorkflowGateway};
use crate::archive::Archive;
use crate::config::{GatewayConfig, SimulatedOutcome};
use crate::error::GatewayError;
use crate::types::{CallbackPayload, Descriptor, ExecutionStatus};

const CALLBACK_ATTEMPTS: u32 = 5;
const CALLBACK_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedBehaviour {
    Accept,
    /// Accept and report `running` inline
    AcceptRunning,
    Unreachable,
    Reject { status: u16, body: String },
    MalformedResponse,
}

struct CallbackPlan {
    client: reqwest::Client,
    webhook_url_template: String,
    delay: Duration,
    outcome: SimulatedOutcome,
}

pub struct SimulatedGateway {
    script: Mutex<VecDeque<SimulatedBehaviour>>,
    calls: AtomicUsize,
    callback: Option<CallbackPlan>,
}

impl SimulatedGateway {
    /// Accepts everything and never calls back
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            callback: None,
        }
    }

    /// Behaviours consumed one per call; once exhausted every call is accepted
    pub fn scripted(behaviours: impl IntoIterator<Item = SimulatedBehaviour>) -> Self {
        Self {
            script: Mutex::new(behaviours.into_iter().collect()),
            ..Self::new()
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut gateway = Self::new();
        if let Some(template) = config.webhook_template() {
            gateway = gateway.with_callback(
                template,
                Duration::from_secs(config.simulated_delay_secs),
                config.simulated_outcome,
            );
        }
        gateway
    }

    /// Call `webhook_url_template` with `outcome` after `delay`
    pub fn with_callback(
        mut self,
        webhook_url_template: impl Into<String>,
        delay: Duration,
        outcome: SimulatedOutcome,
    ) -> Self {
        self.callback = Some(CallbackPlan {
            client: reqwest::Client::new(),
            webhook_url_template: webhook_url_template.into(),
            delay,
            outcome,
        });
        self
    }

    /// Number of submissions received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn schedule_callback(&self, execution_id: &str, descriptor: &Descriptor) {
        let Some(plan) = &self.callback else {
            return;
        };

        let url = webhook_url(&plan.webhook_url_template, execution_id);
        let payload = match plan.outcome {
            SimulatedOutcome::Completed => CallbackPayload {
                workflow_id: execution_id.to_string(),
                status: ExecutionStatus::Completed.to_string(),
                results: Some(json!({
                    "simulated": true,
                    "species": descriptor.species_tag,
                    "template": descriptor.ecosystem_type.workflow_template(),
                    "species_count": 42,
                })),
                error_message: None,
            },
            SimulatedOutcome::Failed => CallbackPayload {
                workflow_id: execution_id.to_string(),
                status: ExecutionStatus::Failed.to_string(),
                results: None,
                error_message: Some("simulated execution failure".to_string()),
            },
        };

        let client = plan.client.clone();
        let delay = plan.delay;
        let execution_id = execution_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            deliver_callback(&client, &url, &payload, &execution_id).await;
        });
    }
}

/// POST the callback, redelivering while the webhook does not know the id yet.
/// The callback is scheduled before the caller persists its record.
async fn deliver_callback(
    client: &reqwest::Client,
    url: &str,
    payload: &CallbackPayload,
    execution_id: &str,
) {
    for attempt in 1..=CALLBACK_ATTEMPTS {
        match client.post(url).json(payload).send().await {
            Ok(response)
                if response.status() == StatusCode::NOT_FOUND && attempt < CALLBACK_ATTEMPTS =>
            {
                debug!(
                    execution_id = %execution_id,
                    attempt,
                    "Webhook does not know the execution yet, redelivering"
                );
                tokio::time::sleep(CALLBACK_RETRY_DELAY).await;
            }
            Ok(response) => {
                info!(
                    execution_id = %execution_id,
                    status = response.status().as_u16(),
                    attempt,
                    "Simulated engine delivered callback"
                );
                return;
            }
            Err(e) => {
                warn!(
                    execution_id = %execution_id,
                    error = %e,
                    "Simulated engine failed to deliver callback"
                );
                return;
            }
        }
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowGateway for SimulatedGateway {
    async fn submit(
        &self,
        archive: &Archive,
        descriptor: &Descriptor,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(SimulatedBehaviour::Accept);

        let status = match behaviour {
            SimulatedBehaviour::Accept => None,
            SimulatedBehaviour::AcceptRunning => Some(ExecutionStatus::Running),
            SimulatedBehaviour::Unreachable => {
                return Err(GatewayError::Unreachable {
                    message: "simulated connection timeout".to_string(),
                })
            }
            SimulatedBehaviour::Reject { status, body } => {
                return Err(GatewayError::Rejected { status, body })
            }
            SimulatedBehaviour::MalformedResponse => {
                return Err(GatewayError::Protocol {
                    message: "simulated response without workflow_id".to_string(),
                })
            }
        };

        let execution_id = format!("sim-{}", Uuid::new_v4());
        info!(
            execution_id = %execution_id,
            archive_bytes = archive.len(),
            "Simulated engine accepted submission"
        );
        self.schedule_callback(&execution_id, descriptor);

        Ok(GatewayReceipt {
            execution_id,
            status,
        })
    }

    fn kind(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use crate::types::{EcosystemType, GeometryType};
    use wiremock::matchers::{body_partial_json, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor() -> Descriptor {
        Descriptor {
            name: "Trout".to_string(),
            description: None,
            species_tag: "Salmo trutta".to_string(),
            ecosystem_type: EcosystemType::Freshwater,
            geometry_type: GeometryType::Polygon,
            geometry_wkt: "POLYGON((0 0, 4 0, 2 3, 0 0))".to_string(),
            time_window: None,
            parameters: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_script_then_accept() {
        let gateway = SimulatedGateway::scripted([
            SimulatedBehaviour::Unreachable,
            SimulatedBehaviour::AcceptRunning,
        ]);
        let descriptor = descriptor();
        let archive = ArchiveBuilder::new().build(&descriptor).unwrap();

        assert!(matches!(
            gateway.submit(&archive, &descriptor).await,
            Err(GatewayError::Unreachable { .. })
        ));

        let running = gateway.submit(&archive, &descriptor).await.unwrap();
        assert_eq!(running.status, Some(ExecutionStatus::Running));
        assert!(running.execution_id.starts_with("sim-"));

        let accepted = gateway.submit(&archive, &descriptor).await.unwrap();
        assert_eq!(accepted.status, None);
        assert_ne!(accepted.execution_id, running.execution_id);
        assert_eq!(gateway.calls(), 3);
    }

    #[tokio::test]
    async fn test_delivers_failure_callback_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/webhook/sim-[0-9a-f-]+$"))
            .and(body_partial_json(json!({
                "status": "failed",
                "error_message": "simulated execution failure"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = SimulatedGateway::new().with_callback(
            format!("{}/webhook/{{workflow_id}}", server.uri()),
            Duration::from_millis(10),
            SimulatedOutcome::Failed,
        );
        let descriptor = descriptor();
        let archive = ArchiveBuilder::new().build(&descriptor).unwrap();
        gateway.submit(&archive, &descriptor).await.unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            if server.received_requests().await.map_or(0, |r| r.len()) == 1 {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered, "callback was not delivered");
    }

    #[tokio::test]
    async fn test_callback_redelivered_until_record_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"status": "completed"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = SimulatedGateway::new().with_callback(
            format!("{}/webhook/{{workflow_id}}", server.uri()),
            Duration::ZERO,
            SimulatedOutcome::Completed,
        );
        let descriptor = descriptor();
        let archive = ArchiveBuilder::new().build(&descriptor).unwrap();
        let receipt = gateway.submit(&archive, &descriptor).await.unwrap();

        let mut requests = Vec::new();
        for _ in 0..100 {
            requests = server.received_requests().await.unwrap_or_default();
            if requests.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(requests.len(), 2, "callback was not redelivered");
        assert!(requests
            .iter()
            .all(|r| r.url.path() == format!("/webhook/{}", receipt.execution_id)));
    }
}
