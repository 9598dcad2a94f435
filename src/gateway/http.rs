//! Multipart submission to the real execution engine

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::{parse_receipt, GatewayReceipt, WorkflowGateway};
use crate::archive::{Archive, ARCHIVE_FILE_NAME};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::types::Descriptor;

/// Form part carrying the archive
pub const ARCHIVE_FIELD: &str = "rocratefile";

/// Longest engine error body kept in a `Rejected` error
const MAX_ERROR_BODY: usize = 2000;

pub struct HttpGateway {
    client: Client,
    url: String,
    auth: Option<(HeaderName, HeaderValue)>,
    webhook_url_template: Option<String>,
    dry_run: bool,
    force: bool,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Unreachable {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let auth = match config.auth_value() {
            Some(value) => {
                let name = HeaderName::from_bytes(config.auth_header.trim().as_bytes())
                    .map_err(|e| GatewayError::Protocol {
                        message: format!("invalid auth header name: {}", e),
                    })?;
                let mut value = HeaderValue::from_str(&value).map_err(|e| GatewayError::Protocol {
                    message: format!("invalid auth header value: {}", e),
                })?;
                value.set_sensitive(true);
                Some((name, value))
            }
            None => None,
        };

        Ok(Self {
            client,
            url: config.url.clone(),
            auth,
            webhook_url_template: config.webhook_template().map(String::from),
            dry_run: config.dry_run,
            force: config.force,
        })
    }

    fn form(&self, archive: &Archive, descriptor: &Descriptor) -> Result<Form, GatewayError> {
        let file = Part::bytes(archive.bytes.clone())
            .file_name(ARCHIVE_FILE_NAME)
            .mime_str("application/zip")
            .map_err(|e| GatewayError::Protocol {
                message: format!("invalid archive part: {}", e),
            })?;

        let mut form = Form::new();
        if let Some(template) = &self.webhook_url_template {
            form = form.text("webhook_url", template.clone());
        }

        // Text fields go first, the binary archive last
        Ok(form
            .text("dry_run", self.dry_run.to_string())
            .text("force", self.force.to_string())
            .text("param-target_species", descriptor.species_tag.clone())
            .text(
                "param-climate_periods",
                descriptor.climate_periods().unwrap_or_default(),
            )
            .text("param-aoi_wkt", descriptor.geometry_wkt.clone())
            .part(ARCHIVE_FIELD, file))
    }
}

#[async_trait]
impl WorkflowGateway for HttpGateway {
    async fn submit(
        &self,
        archive: &Archive,
        descriptor: &Descriptor,
    ) -> Result<GatewayReceipt, GatewayError> {
        let mut request = self.client.post(&self.url).multipart(self.form(archive, descriptor)?);
        if let Some((name, value)) = &self.auth {
            request = request.header(name.clone(), value.clone());
        }

        debug!(
            url = %self.url,
            auth_header = self.auth.as_ref().map(|(name, _)| name.as_str()),
            archive_bytes = archive.len(),
            dry_run = self.dry_run,
            "Submitting archive to execution engine"
        );

        let response = request.send().await.map_err(|e| GatewayError::Unreachable {
            message: e.to_string(),
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| GatewayError::Unreachable {
            message: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            let body = truncate(&String::from_utf8_lossy(&body), MAX_ERROR_BODY);
            warn!(status = status.as_u16(), body = %body, "Execution engine rejected submission");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let receipt = parse_receipt(&body).map_err(|e| {
            warn!(
                status = status.as_u16(),
                error = %e,
                "Execution engine response does not match the submission contract"
            );
            e
        })?;

        info!(
            execution_id = %receipt.execution_id,
            reported_status = receipt.status.map(|s| s.as_str()),
            "Execution engine accepted submission"
        );
        Ok(receipt)
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
